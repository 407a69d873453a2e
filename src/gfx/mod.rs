//! 图形后端模块
//!
//! 具体的主机图形 API 实现（Vulkan、OpenGL）不在本 crate 中，
//! 这里只提供设备抽象和一个始终可用的无头参考后端。

pub mod backend;
pub mod headless;

pub use backend::HostDevice;
pub use headless::{HeadlessContext, HeadlessDeviceDesc, HeadlessRenderer};
