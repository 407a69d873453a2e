//! 错误处理模块
//!
//! 定义了渲染后端层使用的统一错误类型。
//!
//! 注意：后端生命周期中只有 `init()` 允许通过返回值失败，
//! 其余错误（配置加载、着色器缓存 I/O 等）都在这里建模。
//! 着色器缓存的 I/O 错误由调用方就地恢复（冷启动），不会向上传播为致命错误。

use std::fmt;
use std::path::PathBuf;

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, RendererError>;

/// 渲染后端层的错误类型
#[derive(Debug)]
pub enum RendererError {
    /// 配置错误
    Config(ConfigError),

    /// 图形后端错误
    Graphics(GraphicsError),

    /// 着色器缓存读写错误
    ShaderCache { path: PathBuf, reason: String },

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误（没有可用的后端）
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形后端相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 请求的后端在当前构建中不可用
    BackendUnavailable(String),

    /// 设备创建失败
    DeviceCreation(String),

    /// 帧回读失败
    Readback(String),
}

impl fmt::Display for RendererError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererError::Config(e) => write!(f, "Configuration error: {}", e),
            RendererError::Graphics(e) => write!(f, "Graphics error: {}", e),
            RendererError::ShaderCache { path, reason } => {
                write!(f, "Shader cache error at {}: {}", path.display(), reason)
            }
            RendererError::Io(e) => write!(f, "IO error: {}", e),
            RendererError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            RendererError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::BackendUnavailable(name) => write!(f, "Backend unavailable: {}", name),
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::Readback(msg) => write!(f, "Frame readback failed: {}", msg),
        }
    }
}

impl std::error::Error for RendererError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RendererError::Io(e) => Some(e),
            RendererError::Config(e) => Some(e),
            RendererError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for RendererError {
    fn from(err: std::io::Error) -> Self {
        RendererError::Io(err)
    }
}

impl From<ConfigError> for RendererError {
    fn from(err: ConfigError) -> Self {
        RendererError::Config(err)
    }
}

impl From<GraphicsError> for RendererError {
    fn from(err: GraphicsError) -> Self {
        RendererError::Graphics(err)
    }
}
