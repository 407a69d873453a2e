//! 渲染器模块
//!
//! 本模块提供了统一的渲染后端接口，模拟器核心通过它与主机图形 API 交互，
//! 而不需要关心具体使用的是哪个后端。
//!
//! # 架构设计
//!
//! - `features`：主机 GPU 能力模型和可编程混合手段的选择
//! - `backend_trait`：所有后端都要实现的 [`RenderBackend`] 契约和共享状态
//! - `commands`：生产者线程到渲染线程的有界命令通道
//! - `executor`：渲染线程上的命令列表执行循环
//! - `shaders`：着色器缓存登记表
//! - 具体后端实现在 `gfx` 模块中

use tracing::{info, warn};

use crate::core::config::GraphicsBackend;
use crate::core::error::{GraphicsError, RendererError, Result};
use crate::core::paths::RootPaths;
use crate::gfx::{HeadlessDeviceDesc, HeadlessRenderer};

pub mod backend_trait;
pub mod commands;
pub mod executor;
pub mod features;
pub mod guest;
pub mod shaders;
pub mod types;

pub use backend_trait::{default_game_start, BackendState, RenderBackend};
pub use commands::{ChannelClosed, Command, CommandChannel, CommandList, FenceValue, DEFAULT_MAX_PENDING_LISTS};
pub use features::{FeatureMask, FeatureState, ProgrammableBlending};
pub use guest::{GuestAddress, GuestMemory, VecGuestMemory};
pub use shaders::{ShaderCache, ShaderHash};
pub use types::{DisplayState, Filter, FrameDump, GpuState, TextureCache, Vec2};

/// 按后端类型构造（尚未初始化的）后端
///
/// Vulkan 和 OpenGL 的主机实现由外部提供，这里报告为不可用。
pub fn create_backend(kind: GraphicsBackend) -> Result<Box<dyn RenderBackend>> {
    match kind {
        GraphicsBackend::Headless => Ok(Box::new(HeadlessRenderer::new(HeadlessDeviceDesc::default()))),
        GraphicsBackend::Vulkan | GraphicsBackend::OpenGL => {
            Err(GraphicsError::BackendUnavailable(kind.name().to_string()).into())
        }
    }
}

/// 设置根目录并执行 `init()`
///
/// `init()` 失败时不再调用后端的任何方法，直接返回错误。
pub fn init_backend(
    mut backend: Box<dyn RenderBackend>,
    kind: GraphicsBackend,
    root_paths: &RootPaths,
) -> Result<Box<dyn RenderBackend>> {
    backend.state_mut().init_paths(root_paths);

    if !backend.init() {
        return Err(RendererError::Initialization(format!(
            "{} backend failed to initialize",
            kind.name()
        )));
    }

    let state = backend.state_mut();
    state.current_backend = Some(kind);
    state.channel().set_max_pending(DEFAULT_MAX_PENDING_LISTS);

    info!(
        backend = kind.name(),
        gpu = backend.get_gpu_name(),
        "Render backend initialized"
    );
    Ok(backend)
}

/// 创建并初始化指定类型的后端
pub fn init(kind: GraphicsBackend, root_paths: &RootPaths) -> Result<Box<dyn RenderBackend>> {
    let backend = create_backend(kind)?;
    init_backend(backend, kind, root_paths)
}

/// 依次尝试首选后端和备选后端，返回第一个初始化成功的
pub fn init_with_fallback(
    preferred: GraphicsBackend,
    fallbacks: &[GraphicsBackend],
    root_paths: &RootPaths,
) -> Result<Box<dyn RenderBackend>> {
    let mut tried = Vec::new();

    for kind in std::iter::once(preferred).chain(fallbacks.iter().copied()) {
        if tried.contains(&kind) {
            continue;
        }
        tried.push(kind);

        match init(kind, root_paths) {
            Ok(backend) => return Ok(backend),
            Err(e) => warn!(backend = kind.name(), "Backend unavailable, trying next: {}", e),
        }
    }

    let names: Vec<&str> = tried.iter().map(|kind| kind.name()).collect();
    Err(RendererError::Initialization(format!(
        "no usable render backend (tried {})",
        names.join(", ")
    )))
}
