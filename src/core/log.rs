//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! 渲染线程和模拟线程都会写日志，`init_logger` 默认打开线程名输出，
//! 方便分辨一条日志来自生产者还是消费者。
//!
//! # 使用示例
//!
//! ```no_run
//! use gxm_render::core::log::{self, LogLevel};
//!
//! log::init_logger(LogLevel::Info, false, None);
//! tracing::info!(width = 960, height = 544, "Frame dumped");
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use std::path::Path;

pub use super::config::LogLevel;

const DEFAULT_LOG_FILE: &str = "gxm_render.log";

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。重复调用会被忽略（`try_init`）。
/// 设置了 `RUST_LOG` 时以它为准，`level` 只作为默认值。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "gxm_render.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) {
    // RUST_LOG 优先于配置文件
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_directive(level)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true);

    let file_layer = file_output.then(|| {
        let path = Path::new(log_file_path.unwrap_or(DEFAULT_LOG_FILE));
        let directory = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_LOG_FILE);

        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(RollingFileAppender::new(Rotation::DAILY, directory, filename))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// 渲染后端日志 - Info 级别
#[macro_export]
macro_rules! renderer_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "gxm_render::renderer", $($arg)*)
    };
}

/// 渲染后端日志 - Warn 级别
#[macro_export]
macro_rules! renderer_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "gxm_render::renderer", $($arg)*)
    };
}

/// 渲染后端日志 - Error 级别
#[macro_export]
macro_rules! renderer_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "gxm_render::renderer", $($arg)*)
    };
}

/// 日志级别转换
impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}
