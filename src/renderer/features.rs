//! 主机 GPU 能力模型
//!
//! `FeatureState` 在后端 `init()` 期间根据主机 GPU 的探测结果填写一次，之后只读。
//! 可编程混合（片段着色器读取当前帧缓冲内容）有三种模拟手段，优先级为：
//!
//! 1. `direct_fragcolor`：直接读写 fragcolor，最快
//! 2. `support_shader_interlock`：配合有序执行模式使用，厂商支持较少
//! 3. `support_texture_barrier`：较慢，但三大厂商都支持
//!
//! 所有派生判断都是纯函数，每次调用都从当前标志重新计算。

/// 可编程混合的模拟手段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgrammableBlending {
    DirectFragcolor,
    ShaderInterlock,
    TextureBarrier,
    Unsupported,
}

/// 影响生成着色器的特性位
///
/// 这是本 crate 所有后端共用的稳定布局，`get_features_mask()` 的返回值
/// 会参与着色器哈希计算，因此位的含义一旦发布就不能再改。
pub struct FeatureMask;

impl FeatureMask {
    pub const DIRECT_FRAGCOLOR: u32 = 1 << 0;
    pub const SHADER_INTERLOCK: u32 = 1 << 1;
    pub const TEXTURE_BARRIER: u32 = 1 << 2;
    pub const PRESERVE_F16_NAN: u32 = 1 << 3;
    pub const RGB_ATTRIBUTES: u32 = 1 << 4;
    pub const MASK_BIT: u32 = 1 << 5;
    pub const RGBA16_FOR_RGBA8: u32 = 1 << 6;
    pub const MEMORY_MAPPING: u32 = 1 << 7;
    pub const TEXTURE_VIEWPORT: u32 = 1 << 8;
    pub const SPIRV_SHADER: u32 = 1 << 9;
}

/// 主机 GPU 特性标志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureState {
    /// 混合的首选同步方案，配合有序执行模式
    pub support_shader_interlock: bool,
    /// 混合的第二方案，较慢但兼容性最好
    pub support_texture_barrier: bool,
    pub direct_fragcolor: bool,
    pub spirv_shader: bool,
    pub support_get_texture_sub_image: bool,
    /// 向 1 号绘制缓冲写入 4xU16，保留部分驱动会吞掉的 F16 NaN
    pub preserve_f16_nan_as_u16: bool,
    pub support_unknown_format: bool,
    /// GPU 是否支持 3 分量顶点属性（部分 AMD 不支持）
    pub support_rgb_attributes: bool,
    /// 是否模拟逐采样的 mask bit
    pub use_mask_bit: bool,
    /// 用更宽的 RGBA16 纹理模拟 tile 渲染器内部的 RGBA8 存储
    pub use_rgba16_for_rgba8: bool,
    /// 主机 GPU 内存是否直接映射到客户机内存
    pub support_memory_mapping: bool,
    /// 着色器中是否使用纹理视口
    pub use_texture_viewport: bool,
}

impl Default for FeatureState {
    fn default() -> Self {
        Self {
            support_shader_interlock: false,
            support_texture_barrier: false,
            direct_fragcolor: false,
            spirv_shader: false,
            support_get_texture_sub_image: false,
            preserve_f16_nan_as_u16: false,
            support_unknown_format: false,
            support_rgb_attributes: true,
            use_mask_bit: false,
            use_rgba16_for_rgba8: false,
            support_memory_mapping: false,
            use_texture_viewport: false,
        }
    }
}

impl FeatureState {
    pub fn is_programmable_blending_supported(&self) -> bool {
        self.support_shader_interlock || self.support_texture_barrier || self.direct_fragcolor
    }

    pub fn is_programmable_blending_need_to_bind_color_attachment(&self) -> bool {
        (self.support_texture_barrier || self.support_shader_interlock) && !self.direct_fragcolor
    }

    pub fn should_use_shader_interlock(&self) -> bool {
        self.support_shader_interlock && !self.direct_fragcolor
    }

    pub fn should_use_texture_barrier(&self) -> bool {
        self.support_texture_barrier && !self.support_shader_interlock && !self.direct_fragcolor
    }

    /// 按优先级选出当前应使用的混合手段
    pub fn programmable_blending(&self) -> ProgrammableBlending {
        if self.direct_fragcolor {
            ProgrammableBlending::DirectFragcolor
        } else if self.should_use_shader_interlock() {
            ProgrammableBlending::ShaderInterlock
        } else if self.should_use_texture_barrier() {
            ProgrammableBlending::TextureBarrier
        } else {
            ProgrammableBlending::Unsupported
        }
    }

    /// 把影响着色器生成的标志折叠成 `FeatureMask` 位
    ///
    /// 只读辅助标志（`support_get_texture_sub_image`、`support_unknown_format`）
    /// 不影响生成的着色器文本，因此不参与。
    pub fn shader_mask(&self) -> u32 {
        let bits = [
            (self.direct_fragcolor, FeatureMask::DIRECT_FRAGCOLOR),
            (self.support_shader_interlock, FeatureMask::SHADER_INTERLOCK),
            (self.support_texture_barrier, FeatureMask::TEXTURE_BARRIER),
            (self.preserve_f16_nan_as_u16, FeatureMask::PRESERVE_F16_NAN),
            (self.support_rgb_attributes, FeatureMask::RGB_ATTRIBUTES),
            (self.use_mask_bit, FeatureMask::MASK_BIT),
            (self.use_rgba16_for_rgba8, FeatureMask::RGBA16_FOR_RGBA8),
            (self.support_memory_mapping, FeatureMask::MEMORY_MAPPING),
            (self.use_texture_viewport, FeatureMask::TEXTURE_VIEWPORT),
            (self.spirv_shader, FeatureMask::SPIRV_SHADER),
        ];

        bits.iter()
            .filter(|(enabled, _)| *enabled)
            .fold(0, |mask, (_, bit)| mask | bit)
    }
}
