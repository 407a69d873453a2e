//! 客户机内存抽象
//!
//! 真正的模拟器会用它自己的地址空间实现 [`GuestMemory`]；
//! 这里只保留渲染后端需要的最小接口：读写和地址合法性查询。
//! [`MappingTracker`] 负责保证 `map_memory`/`unmap_memory` 成对出现。

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;

/// 客户机地址（32 位地址空间）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GuestAddress(pub u32);

impl GuestAddress {
    pub fn address(&self) -> u32 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn offset(&self, bytes: u32) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for GuestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestMemoryError {
    pub address: GuestAddress,
    pub len: usize,
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guest memory access out of bounds: address={}, len=0x{:x}",
            self.address, self.len
        )
    }
}

impl std::error::Error for GuestMemoryError {}

/// 最小的客户机内存接口
pub trait GuestMemory: Send + Sync {
    /// 地址空间大小（字节）
    fn size(&self) -> u64;

    fn read(&self, address: GuestAddress, dst: &mut [u8]) -> Result<(), GuestMemoryError>;

    fn write(&self, address: GuestAddress, src: &[u8]) -> Result<(), GuestMemoryError>;

    /// `[address, address + len)` 是否完全落在地址空间内
    fn is_valid(&self, address: GuestAddress, len: u32) -> bool {
        !address.is_null() && u64::from(address.0) + u64::from(len) <= self.size()
    }
}

/// 连续的内存实现（测试和无头后端使用）
#[derive(Debug)]
pub struct VecGuestMemory {
    mem: RwLock<Vec<u8>>,
}

impl VecGuestMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: RwLock::new(vec![0u8; size_bytes]),
        }
    }

    fn range(&self, address: GuestAddress, len: usize) -> Result<std::ops::Range<usize>, GuestMemoryError> {
        let err = GuestMemoryError { address, len };
        let start = usize::try_from(address.0).map_err(|_| err.clone())?;
        let end = start.checked_add(len).ok_or_else(|| err.clone())?;
        if end > self.mem.read().len() {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl GuestMemory for VecGuestMemory {
    fn size(&self) -> u64 {
        self.mem.read().len() as u64
    }

    fn read(&self, address: GuestAddress, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let range = self.range(address, dst.len())?;
        dst.copy_from_slice(&self.mem.read()[range]);
        Ok(())
    }

    fn write(&self, address: GuestAddress, src: &[u8]) -> Result<(), GuestMemoryError> {
        let range = self.range(address, src.len())?;
        self.mem.write()[range].copy_from_slice(src);
        Ok(())
    }
}

/// 映射记录出错的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// 空地址或零长度
    EmptyRegion(GuestAddress),
    /// 与已映射区域重叠
    Overlap(GuestAddress),
    /// 该地址没有对应的映射
    NotMapped(GuestAddress),
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::EmptyRegion(addr) => write!(f, "empty mapping region at {}", addr),
            MappingError::Overlap(addr) => write!(f, "mapping at {} overlaps an existing region", addr),
            MappingError::NotMapped(addr) => write!(f, "no mapping starts at {}", addr),
        }
    }
}

impl std::error::Error for MappingError {}

/// 记录当前有效的客户机到主机的内存映射
///
/// 每次成功的 `map` 必须在区域被复用或释放前恰好对应一次 `unmap`。
#[derive(Debug, Default)]
pub struct MappingTracker {
    regions: BTreeMap<GuestAddress, u32>,
}

impl MappingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, address: GuestAddress, size: u32) -> Result<(), MappingError> {
        if address.is_null() || size == 0 {
            return Err(MappingError::EmptyRegion(address));
        }

        let end = u64::from(address.0) + u64::from(size);
        // 前一个区域不能覆盖到 address，后一个区域不能起始于 end 之前
        let prev_overlaps = self
            .regions
            .range(..=address)
            .next_back()
            .is_some_and(|(start, len)| u64::from(start.0) + u64::from(*len) > u64::from(address.0));
        let next_overlaps = self
            .regions
            .range(address..)
            .next()
            .is_some_and(|(start, _)| u64::from(start.0) < end);

        if prev_overlaps || next_overlaps {
            return Err(MappingError::Overlap(address));
        }

        self.regions.insert(address, size);
        Ok(())
    }

    /// 解除映射，返回该区域的大小
    pub fn unmap(&mut self, address: GuestAddress) -> Result<u32, MappingError> {
        self.regions
            .remove(&address)
            .ok_or(MappingError::NotMapped(address))
    }

    /// 地址是否落在某个已映射区域内
    pub fn is_mapped(&self, address: GuestAddress) -> bool {
        self.regions
            .range(..=address)
            .next_back()
            .is_some_and(|(start, len)| u64::from(address.0) < u64::from(start.0) + u64::from(*len))
    }

    /// 尚未解除的映射数量
    pub fn outstanding(&self) -> usize {
        self.regions.len()
    }
}
