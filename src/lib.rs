//! gxm_render - 模拟器渲染后端抽象层
//!
//! 把模拟器核心和具体的主机图形 API 隔离开：模拟线程把客户机 GPU 工作
//! 打包成命令列表推入有界通道，渲染线程取出并交给当前后端执行。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、根目录、错误处理）
//! - `renderer`: 能力模型、后端契约、命令通道、着色器缓存
//! - `gfx`: 主机设备抽象和无头参考后端
//!
//! # 使用示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use gxm_render::core::{Config, RootPaths};
//! use gxm_render::core::config::GraphicsBackend;
//! use gxm_render::renderer::{self, Command, CommandList, VecGuestMemory};
//!
//! let config = Config::default();
//! let root = RootPaths::from_base("data");
//! let mut backend = renderer::init_with_fallback(config.graphics.backend, &[GraphicsBackend::Headless], &root)?;
//!
//! backend.late_init(&config, "PCSE00000", Arc::new(VecGuestMemory::new(1 << 24)));
//! backend.game_start("/ux0/app/PCSE00000", "PCSE00000", "eboot.bin");
//!
//! let _id = backend.state().channel().push(CommandList::new().with(Command::CreateContext))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod core;
pub mod renderer;
pub mod gfx;
