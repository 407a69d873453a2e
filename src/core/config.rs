//! 配置管理模块
//!
//! 提供渲染后端配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [graphics]
//! backend = "vulkan"          # vulkan, opengl, headless
//! screen_filter = "Bilinear"  # Nearest, Bilinear, Bicubic, FXAA, FSR
//! anisotropic_filtering = 1
//! disable_surface_sync = true
//! fullscreen = false
//! resolution_multiplier = 1.0
//!
//! [paths]
//! base_dir = "data"
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{ConfigError, Result};
use super::paths::RootPaths;

/// 渲染后端配置
///
/// `late_init()` 从这里读取过滤器、各向异性过滤、表面同步等设置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 根目录配置
    #[serde(default)]
    pub paths: PathsConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 首选的图形后端
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 屏幕后处理过滤器名称
    #[serde(default = "default_screen_filter")]
    pub screen_filter: String,

    /// 各向异性过滤等级
    #[serde(default = "default_anisotropic_filtering")]
    pub anisotropic_filtering: i32,

    /// 关闭表面同步（不把渲染结果写回客户机内存）
    #[serde(default = "default_disable_surface_sync")]
    pub disable_surface_sync: bool,

    /// 全屏
    #[serde(default)]
    pub fullscreen: bool,

    /// 拉伸显示区域
    #[serde(default)]
    pub stretch_the_display_area: bool,

    /// 全屏时 HD 分辨率像素对齐
    #[serde(default)]
    pub fullscreen_hd_res_pixel_perfect: bool,

    /// 分辨率倍数（内部渲染放大）
    #[serde(default = "default_resolution_multiplier")]
    pub resolution_multiplier: f32,

    /// 异步管线编译
    #[serde(default = "default_async_compilation")]
    pub async_pipeline_compilation: bool,

    /// GPU 索引（0 表示自动选择）
    #[serde(default)]
    pub gpu_idx: usize,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// Vulkan 后端（外部实现）
    Vulkan,
    /// OpenGL 后端（外部实现）
    #[serde(rename = "opengl")]
    OpenGL,
    /// 无头参考后端（CPU 实现，始终可用）
    Headless,
}

/// 根目录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// 数据根目录，其余目录默认都在它下面
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// 缓存目录（默认 `{base_dir}/cache`）
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// 日志目录（默认 `{base_dir}/logs`）
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_backend() -> GraphicsBackend { GraphicsBackend::Vulkan }
fn default_screen_filter() -> String { "Bilinear".to_string() }
fn default_anisotropic_filtering() -> i32 { 1 }
fn default_disable_surface_sync() -> bool { true }
fn default_resolution_multiplier() -> f32 { 1.0 }
fn default_async_compilation() -> bool { true }
fn default_base_dir() -> PathBuf { PathBuf::from("data") }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "gxm_render.log".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            graphics: GraphicsConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            screen_filter: default_screen_filter(),
            anisotropic_filtering: default_anisotropic_filtering(),
            disable_surface_sync: default_disable_surface_sync(),
            fullscreen: false,
            stretch_the_display_area: false,
            fullscreen_hd_res_pixel_perfect: false,
            resolution_multiplier: default_resolution_multiplier(),
            async_pipeline_compilation: default_async_compilation(),
            gpu_idx: 0,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            cache_dir: None,
            log_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl PathsConfig {
    /// 生成根目录提供者
    pub fn root_paths(&self) -> RootPaths {
        let mut root = RootPaths::from_base(&self.base_dir);
        if let Some(cache) = &self.cache_dir {
            root.set_cache_path(cache.clone());
        }
        if let Some(log) = &self.log_dir {
            root.set_log_path(log.clone());
        }
        root
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或解析失败则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--vulkan` / `--opengl` / `--headless`: 选择后端
    /// - `--fullscreen`: 全屏
    /// - `--filter <name>`: 屏幕过滤器
    /// - `--res-multiplier <value>`: 分辨率倍数
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--vulkan") {
            self.graphics.backend = GraphicsBackend::Vulkan;
        }
        if args.iter().any(|a| a == "--opengl") {
            self.graphics.backend = GraphicsBackend::OpenGL;
        }
        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }
        if args.iter().any(|a| a == "--fullscreen") {
            self.graphics.fullscreen = true;
        }

        if let Some(idx) = args.iter().position(|a| a == "--filter") {
            if let Some(name) = args.get(idx + 1) {
                self.graphics.screen_filter = name.clone();
            }
        }

        if let Some(idx) = args.iter().position(|a| a == "--res-multiplier") {
            if let Some(value) = args.get(idx + 1) {
                if let Ok(multiplier) = value.parse() {
                    self.graphics.resolution_multiplier = multiplier;
                }
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        let multiplier = self.graphics.resolution_multiplier;
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.resolution_multiplier".to_string(),
                reason: "Resolution multiplier must be a positive number".to_string(),
            }.into());
        }

        if !matches!(self.graphics.anisotropic_filtering, 1 | 2 | 4 | 8 | 16) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.anisotropic_filtering".to_string(),
                reason: "Anisotropic filtering must be 1, 2, 4, 8, or 16".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Vulkan => "Vulkan",
            GraphicsBackend::OpenGL => "OpenGL",
            GraphicsBackend::Headless => "Headless",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.graphics.backend, GraphicsBackend::Vulkan);
        assert_eq!(config.graphics.screen_filter, "Bilinear");
        assert_eq!(config.graphics.resolution_multiplier, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.graphics.resolution_multiplier = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.anisotropic_filtering = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            backend = "headless"
            screen_filter = "FXAA"
            fullscreen = true
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.graphics.screen_filter, "FXAA");
        assert!(config.graphics.fullscreen);
        assert!(config.graphics.disable_surface_sync);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["gxm_render", "--headless", "--filter", "FSR", "--res-multiplier", "2"]);

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.graphics.screen_filter, "FSR");
        assert_eq!(config.graphics.resolution_multiplier, 2.0);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.graphics.backend = GraphicsBackend::OpenGL;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.graphics.backend, GraphicsBackend::OpenGL);
        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_root_paths_overrides() {
        let mut paths = PathsConfig::default();
        paths.cache_dir = Some(PathBuf::from("/tmp/cache"));

        let root = paths.root_paths();
        assert_eq!(root.get_cache_path(), Path::new("/tmp/cache"));
        assert_eq!(root.get_log_path(), Path::new("data/logs"));
    }
}
