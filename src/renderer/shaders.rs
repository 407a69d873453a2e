//! 着色器缓存登记表
//!
//! 记录已经编译过的着色器变体哈希，避免重复编译，并在标题之间持久化：
//!
//! - `preclose_action()` 时把哈希列表写入 `{shaders_path}/hashes.toml`
//! - 下一次同一标题的 `game_start()` 时读回，交给 `precompile_shader` 预热
//!
//! # 哈希推导
//!
//! ```text
//! SHA-256( len(source) as u64 LE ‖ source ‖ features_mask as u32 LE ‖ gpu_state )
//! ```
//!
//! `features_mask` 是后端 `get_features_mask()` 的返回值，位布局见
//! [`FeatureMask`](crate::renderer::features::FeatureMask)。同一份源码在不同的特性组合
//! 或 GPU 状态下会得到不同的哈希。
//!
//! 缓存文件读写失败永远不是致命错误：记录警告，按空缓存（冷启动）继续。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

use crate::core::error::{RendererError, Result};

/// 缓存文件格式版本，格式或哈希推导变化时必须修改
pub const SHADER_CACHE_VERSION: &str = "gxm-shader-cache-1";

/// 缓存文件名
pub const SHADER_CACHE_FILE: &str = "hashes.toml";

/// 着色器变体的内容哈希
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHash([u8; 32]);

impl ShaderHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 由着色器源码、特性掩码和相关 GPU 状态计算哈希
    pub fn compute(source: &[u8], features_mask: u32, gpu_state: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((source.len() as u64).to_le_bytes());
        hasher.update(source);
        hasher.update(features_mask.to_le_bytes());
        hasher.update(gpu_state);
        Self(hasher.finalize().into())
    }

    /// 解析 64 位小写或大写十六进制字符串
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ShaderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ShaderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaderHash({})", &self.to_hex()[..16])
    }
}

/// 磁盘上的缓存文件
#[derive(Debug, Serialize, Deserialize)]
struct ShaderCacheFile {
    version: String,
    features_mask: u32,
    hashes: Vec<String>,
}

/// 着色器缓存登记表
///
/// 集合受互斥锁保护，计数器是原子量，可以在其他线程上读取。
pub struct ShaderCache {
    compiled: Mutex<HashSet<ShaderHash>>,
    /// 从磁盘读回、还没有预编译的哈希
    pending: Mutex<Vec<ShaderHash>>,
    /// 在 Vulkan 类后端上统计的是编译的管线数
    shaders_count_compiled: AtomicU32,
    programs_count_pre_compiled: AtomicU32,
    shader_version: String,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self {
            compiled: Mutex::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
            shaders_count_compiled: AtomicU32::new(0),
            programs_count_pre_compiled: AtomicU32::new(0),
            shader_version: SHADER_CACHE_VERSION.to_string(),
        }
    }

    pub fn shader_version(&self) -> &str {
        &self.shader_version
    }

    pub fn contains(&self, hash: &ShaderHash) -> bool {
        self.compiled.lock().contains(hash)
    }

    /// 加入集合，返回是否为新条目
    pub fn insert(&self, hash: ShaderHash) -> bool {
        self.compiled.lock().insert(hash)
    }

    /// 记录一次按需编译
    pub fn mark_compiled(&self, hash: ShaderHash) -> bool {
        let inserted = self.insert(hash);
        if inserted {
            self.shaders_count_compiled.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// 记录一次预编译（预热）
    pub fn mark_precompiled(&self, hash: ShaderHash) -> bool {
        let inserted = self.insert(hash);
        if inserted {
            self.programs_count_pre_compiled.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    pub fn shaders_count_compiled(&self) -> u32 {
        self.shaders_count_compiled.load(Ordering::Relaxed)
    }

    pub fn programs_count_pre_compiled(&self) -> u32 {
        self.programs_count_pre_compiled.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.compiled.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出待预编译的哈希
    pub fn take_pending(&self) -> Vec<ShaderHash> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// 清空集合、待预编译列表和计数器
    pub fn clear(&self) {
        self.compiled.lock().clear();
        self.pending.lock().clear();
        self.shaders_count_compiled.store(0, Ordering::Relaxed);
        self.programs_count_pre_compiled.store(0, Ordering::Relaxed);
    }

    /// 从 `dir` 读回哈希列表，返回待预编译的数量
    ///
    /// 文件不存在、损坏、版本或特性掩码不符时按冷启动处理，返回 0。
    pub fn load(&self, dir: &Path, features_mask: u32) -> usize {
        self.clear();

        let path = dir.join(SHADER_CACHE_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No shader cache, cold start");
            return 0;
        }

        let file = match read_cache_file(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Ignoring shader cache: {}", e);
                return 0;
            }
        };

        if file.version != self.shader_version || file.features_mask != features_mask {
            info!(
                cached_version = %file.version,
                cached_mask = file.features_mask,
                features_mask,
                "Shader cache was built for a different configuration, cold start"
            );
            return 0;
        }

        let mut seen = HashSet::new();
        let hashes: Vec<ShaderHash> = file
            .hashes
            .iter()
            .filter_map(|hex| {
                let hash = ShaderHash::from_hex(hex);
                if hash.is_none() {
                    warn!(entry = %hex, "Skipping malformed shader hash");
                }
                hash
            })
            .filter(|hash| seen.insert(*hash))
            .collect();

        let count = hashes.len();
        *self.pending.lock() = hashes;
        info!(count, path = %path.display(), "Loaded shader cache");
        count
    }

    /// 把已编译和尚未预编译的哈希写入 `dir`
    pub fn save(&self, dir: &Path, features_mask: u32) -> Result<PathBuf> {
        let mut hashes: Vec<ShaderHash> = self.compiled.lock().iter().copied().collect();
        hashes.extend(self.pending.lock().iter().copied());
        hashes.sort();
        hashes.dedup();

        let file = ShaderCacheFile {
            version: self.shader_version.clone(),
            features_mask,
            hashes: hashes.iter().map(ShaderHash::to_hex).collect(),
        };

        let path = dir.join(SHADER_CACHE_FILE);
        let cache_error = |reason: String| RendererError::ShaderCache { path: path.clone(), reason };

        let contents = toml::to_string_pretty(&file).map_err(|e| cache_error(e.to_string()))?;
        std::fs::create_dir_all(dir).map_err(|e| cache_error(e.to_string()))?;
        std::fs::write(&path, contents).map_err(|e| cache_error(e.to_string()))?;

        info!(count = hashes.len(), path = %path.display(), "Saved shader cache");
        Ok(path)
    }

    /// 把翻译后的着色器文本写到 `{log_dir}/{hash}.txt`，失败只记录警告
    pub fn log_shader(&self, log_dir: &Path, hash: &ShaderHash, text: &str) {
        let path = log_dir.join(format!("{}.txt", hash));
        let result = std::fs::create_dir_all(log_dir).and_then(|_| std::fs::write(&path, text));
        if let Err(e) = result {
            warn!(path = %path.display(), "Failed to write shader log: {}", e);
        }
    }
}

impl Default for ShaderCache {
    fn default() -> Self {
        Self::new()
    }
}

fn read_cache_file(path: &Path) -> Result<ShaderCacheFile> {
    let cache_error = |reason: String| RendererError::ShaderCache { path: path.to_path_buf(), reason };
    let contents = std::fs::read_to_string(path).map_err(|e| cache_error(e.to_string()))?;
    toml::from_str(&contents).map_err(|e| cache_error(e.to_string()))
}
