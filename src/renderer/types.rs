//! 后端契约使用的协作方类型
//!
//! 显示状态、GPU 状态快照、屏幕过滤器、纹理缓存句柄和帧回读结果。

use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::path::Path;

use super::guest::GuestAddress;
use crate::core::error::{GraphicsError, Result};

/// 2D 向量（视口位置和尺寸）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// 客户机当前要显示的帧缓冲
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    /// 帧缓冲在客户机内存中的地址
    pub base: GuestAddress,
    /// 每行像素数
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    /// 已显示的帧数
    pub frame_count: u64,
}

/// 客户机 GPU 状态快照
#[derive(Debug, Clone, Default)]
pub struct GpuState {
    /// 当前绑定的颜色表面（渲染目标 id）
    pub color_surface: Option<u32>,
}

/// 屏幕后处理过滤器
///
/// 每个过滤器对应一个独立的位，后端可以同时支持多个，但同一时刻只启用一个。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Bilinear,
    Bicubic,
    Fxaa,
    Fsr,
}

impl Filter {
    pub const ALL: [Filter; 5] = [
        Filter::Nearest,
        Filter::Bilinear,
        Filter::Bicubic,
        Filter::Fxaa,
        Filter::Fsr,
    ];

    pub fn bit(&self) -> u32 {
        match self {
            Filter::Nearest => 1 << 0,
            Filter::Bilinear => 1 << 1,
            Filter::Bicubic => 1 << 2,
            Filter::Fxaa => 1 << 3,
            Filter::Fsr => 1 << 4,
        }
    }

    /// 配置文件和 UI 中使用的名称
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Nearest => "Nearest",
            Filter::Bilinear => "Bilinear",
            Filter::Bicubic => "Bicubic",
            Filter::Fxaa => "FXAA",
            Filter::Fsr => "FSR",
        }
    }

    /// 按名称查找（不区分大小写）
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|filter| filter.name().eq_ignore_ascii_case(name.trim()))
    }

    /// 列出位掩码中包含的过滤器
    pub fn from_mask(mask: u32) -> Vec<Self> {
        Self::ALL.into_iter().filter(|f| mask & f.bit() != 0).collect()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 纹理缓存句柄
///
/// 纹理缓存的内部结构不属于本层，这里只暴露协作方需要的查询。
pub trait TextureCache {
    /// 当前缓存的纹理数量
    fn cached_texture_count(&self) -> usize;

    /// 是否启用了纹理替换（从 `texture_folder()` 加载）
    fn is_replacement_enabled(&self) -> bool {
        false
    }
}

/// `dump_frame` 的结果
///
/// 每个像素是打包的 RGBA8：内存中的字节顺序依次为 R、G、B、A。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDump {
    pub pixels: Vec<u32>,
    pub width: u32,
    pub height: u32,
}

impl FrameDump {
    /// 转换为 `image` 的 RGBA 图像
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        let bytes: &[u8] = bytemuck::cast_slice(&self.pixels);
        image::RgbaImage::from_raw(self.width, self.height, bytes.to_vec())
    }

    /// 保存为 PNG 截图
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let image = self.to_image().ok_or_else(|| {
            GraphicsError::Readback(format!(
                "pixel buffer does not match {}x{}",
                self.width, self.height
            ))
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        image
            .save(path.as_ref())
            .map_err(|e| GraphicsError::Readback(e.to_string()))?;
        Ok(())
    }
}

/// 打包一个 RGBA8 像素
pub fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

/// 拆开一个 RGBA8 像素
pub fn unpack_rgba(pixel: u32) -> [u8; 4] {
    pixel.to_le_bytes()
}
