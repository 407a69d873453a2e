//! 核心功能模块
//!
//! 与具体图形后端无关的基础设施：日志、配置、根目录和错误处理。
//!
//! # 模块组织
//!
//! - `log`：日志系统
//! - `config`：配置管理，从 `config.toml` 加载渲染设置
//! - `paths`：根目录提供者
//! - `error`：错误处理，定义统一的错误类型

pub mod log;
pub mod config;
pub mod paths;
pub mod error;

pub use error::{Result, RendererError};
pub use config::Config;
pub use paths::RootPaths;
