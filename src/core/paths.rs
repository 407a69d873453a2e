//! 根目录提供者
//!
//! 渲染后端在 `init_paths()` 时从这里取得缓存、日志、共享数据和静态资源目录。

use std::path::{Path, PathBuf};

/// 模拟器使用的根目录集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPaths {
    cache_path: PathBuf,
    log_path: PathBuf,
    shared_path: PathBuf,
    static_assets_path: PathBuf,
}

impl RootPaths {
    /// 显式指定所有目录
    pub fn new(
        cache_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        shared_path: impl Into<PathBuf>,
        static_assets_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache_path: cache_path.into(),
            log_path: log_path.into(),
            shared_path: shared_path.into(),
            static_assets_path: static_assets_path.into(),
        }
    }

    /// 以一个根目录为基础生成默认布局
    pub fn from_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self::new(
            base.join("cache"),
            base.join("logs"),
            base.join("shared"),
            base.join("static"),
        )
    }

    pub fn get_cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn get_log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn get_shared_path(&self) -> &Path {
        &self.shared_path
    }

    pub fn get_static_assets_path(&self) -> &Path {
        &self.static_assets_path
    }

    pub fn set_cache_path(&mut self, path: PathBuf) {
        self.cache_path = path;
    }

    pub fn set_log_path(&mut self, path: PathBuf) {
        self.log_path = path;
    }
}
