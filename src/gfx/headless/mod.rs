//! 无头参考后端
//!
//! - `context`：设备创建和能力探测
//! - `renderer`：在 CPU 上执行命令列表的 `RenderBackend` 实现

pub mod context;
pub mod renderer;

pub use context::{HeadlessContext, HeadlessDeviceDesc};
pub use renderer::HeadlessRenderer;
