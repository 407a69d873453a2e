//! 无头后端设备管理
//!
//! 没有真正的主机 GPU：设备的名称、特性和限制都来自 [`HeadlessDeviceDesc`]，
//! 测试可以借此模拟不同厂商的能力组合，或者模拟设备创建失败。

use tracing::{debug, info};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::HostDevice;
use crate::renderer::features::FeatureState;

/// 无头设备描述
#[derive(Debug, Clone)]
pub struct HeadlessDeviceDesc {
    pub name: String,
    pub features: FeatureState,
    pub max_texture_width: i32,
    pub max_anisotropy: i32,
    /// 为 `false` 时设备创建失败
    pub available: bool,
}

impl Default for HeadlessDeviceDesc {
    fn default() -> Self {
        Self {
            name: "Headless Software Device".to_string(),
            features: FeatureState {
                support_shader_interlock: true,
                support_texture_barrier: true,
                support_get_texture_sub_image: true,
                support_memory_mapping: true,
                ..Default::default()
            },
            max_texture_width: 4096,
            max_anisotropy: 16,
            available: true,
        }
    }
}

/// 无头设备上下文
#[derive(Debug)]
pub struct HeadlessContext {
    desc: HeadlessDeviceDesc,
}

impl HeadlessContext {
    /// 创建设备
    pub fn create(desc: &HeadlessDeviceDesc) -> Result<Self> {
        debug!(device = %desc.name, "Creating headless device");
        if !desc.available {
            return Err(GraphicsError::DeviceCreation(format!(
                "device '{}' is not available",
                desc.name
            ))
            .into());
        }

        info!(
            device = %desc.name,
            max_texture_width = desc.max_texture_width,
            "Headless device created"
        );
        Ok(Self { desc: desc.clone() })
    }
}

impl HostDevice for HeadlessContext {
    fn backend_name(&self) -> &str {
        "Headless"
    }

    fn device_name(&self) -> &str {
        &self.desc.name
    }

    fn query_features(&self) -> FeatureState {
        self.desc.features
    }

    fn max_2d_texture_width(&self) -> i32 {
        self.desc.max_texture_width
    }

    fn max_anisotropy(&self) -> i32 {
        self.desc.max_anisotropy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_unavailable_device() {
        let desc = HeadlessDeviceDesc { available: false, ..Default::default() };
        assert!(HeadlessContext::create(&desc).is_err());
    }

    #[test]
    fn test_query_features() {
        let context = HeadlessContext::create(&HeadlessDeviceDesc::default()).unwrap();
        let features = context.query_features();
        assert!(features.should_use_shader_interlock());
        assert_eq!(context.backend_name(), "Headless");
        assert_eq!(context.max_anisotropy(), 16);
    }
}
