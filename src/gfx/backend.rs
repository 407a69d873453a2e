//! 主机图形设备的统一抽象接口
//!
//! 具体后端在 `init()` 中创建设备，并通过本 trait 把原始的能力探测结果
//! 交给能力模型（[`FeatureState`]）和采样质量协商。

use crate::renderer::features::FeatureState;

/// 主机图形设备
pub trait HostDevice {
    /// 后端名称，用于日志输出（如 "Vulkan"、"Headless"）
    fn backend_name(&self) -> &str;

    /// 设备名称（`get_gpu_name()` 返回它）
    fn device_name(&self) -> &str;

    /// 探测主机 GPU 特性
    fn query_features(&self) -> FeatureState;

    fn max_2d_texture_width(&self) -> i32;

    fn max_anisotropy(&self) -> i32;
}
