//! Adapter capability query

use crate::{BackendType, REQUIRED_STORAGE_BUFFERS};
use ripple_core::BackendError;

/// What the selected adapter can do, as far as the solver cares.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub backend: BackendType,
    pub adapter_name: String,
    pub max_storage_buffers_per_stage: u32,
    pub max_storage_buffer_binding_size: u64,
    pub max_workgroup_size_x: u32,
    pub supports_compute: bool,
}

impl DeviceCapabilities {
    pub fn from_parts(info: &wgpu::AdapterInfo, limits: &wgpu::Limits, supports_compute: bool) -> Self {
        Self {
            backend: info.backend.into(),
            adapter_name: info.name.clone(),
            max_storage_buffers_per_stage: limits.max_storage_buffers_per_shader_stage,
            max_storage_buffer_binding_size: u64::from(limits.max_storage_buffer_binding_size),
            max_workgroup_size_x: limits.max_compute_workgroup_size_x,
            supports_compute,
        }
    }

    /// Fails unless every solver kernel can run on this adapter.
    pub fn check_solver_support(&self) -> Result<(), BackendError> {
        if !self.supports_compute {
            return Err(BackendError::DeviceRequest(format!(
                "{} has no compute shader support",
                self.adapter_name
            )));
        }
        if self.max_storage_buffers_per_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(BackendError::DeviceRequest(format!(
                "{} binds {} storage buffers per stage, {} needed",
                self.adapter_name, self.max_storage_buffers_per_stage, REQUIRED_STORAGE_BUFFERS
            )));
        }
        if self.max_workgroup_size_x < crate::WORKGROUP_SIZE {
            return Err(BackendError::DeviceRequest(format!(
                "{} allows workgroups of {}, {} needed",
                self.adapter_name,
                self.max_workgroup_size_x,
                crate::WORKGROUP_SIZE
            )));
        }
        Ok(())
    }
}

/// Probe the adapter wgpu would pick for compute work.
pub fn query_capabilities(adapter: &wgpu::Adapter) -> DeviceCapabilities {
    let compute = adapter
        .get_downlevel_capabilities()
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);
    DeviceCapabilities::from_parts(&adapter.get_info(), &adapter.limits(), compute)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_info(backend: wgpu::Backend) -> wgpu::AdapterInfo {
        wgpu::AdapterInfo {
            name: "test adapter".into(),
            vendor: 0,
            device: 0,
            device_type: wgpu::DeviceType::Other,
            driver: String::new(),
            driver_info: String::new(),
            backend,
        }
    }

    #[test]
    fn test_default_limits_are_enough() {
        let caps = DeviceCapabilities::from_parts(&adapter_info(wgpu::Backend::Vulkan), &wgpu::Limits::default(), true);
        assert_eq!(caps.backend, BackendType::Vulkan);
        assert!(caps.check_solver_support().is_ok());
    }

    #[test]
    fn test_downlevel_limits_are_rejected() {
        let caps = DeviceCapabilities::from_parts(
            &adapter_info(wgpu::Backend::Gl),
            &wgpu::Limits::downlevel_defaults(),
            true,
        );
        assert!(matches!(caps.check_solver_support(), Err(BackendError::DeviceRequest(_))));
    }

    #[test]
    fn test_missing_compute_is_rejected() {
        let caps = DeviceCapabilities::from_parts(&adapter_info(wgpu::Backend::Gl), &wgpu::Limits::default(), false);
        assert!(caps.check_solver_support().is_err());
    }
}
