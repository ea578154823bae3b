//! Ripple GPU backend
//!
//! Runs the solver kernels as wgpu compute pipelines. Adapter selection is
//! left to wgpu; [`capabilities`] reports what it picked.

pub mod backend;
pub mod capabilities;

pub use backend::WgpuBackend;
pub use capabilities::{query_capabilities, DeviceCapabilities};
pub use wgpu;

/// WGSL source for every solver kernel.
pub const SHADER_SOURCE: &str = include_str!("shaders/pbf.wgsl");

/// Invocations per workgroup; matches `@workgroup_size` in the shader.
pub const WORKGROUP_SIZE: u32 = 64;

/// Storage buffers the widest kernel binds at once.
pub const REQUIRED_STORAGE_BUFFERS: u32 = 6;

/// Workgroups needed to cover `grid_size` invocations.
pub fn workgroup_count(grid_size: u32) -> u32 {
    grid_size.div_ceil(WORKGROUP_SIZE)
}

/// Graphics API the adapter runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Metal (macOS, iOS)
    Metal,
    /// DirectX 12 (Windows)
    DirectX12,
    /// Vulkan (cross-platform)
    Vulkan,
    /// OpenGL (cross-platform, fallback)
    OpenGL,
    /// WebGPU (browser)
    WebGpu,
    /// Anything wgpu reports that we do not recognize
    Other,
}

impl From<wgpu::Backend> for BackendType {
    fn from(backend: wgpu::Backend) -> Self {
        match backend {
            wgpu::Backend::Metal => BackendType::Metal,
            wgpu::Backend::Dx12 => BackendType::DirectX12,
            wgpu::Backend::Vulkan => BackendType::Vulkan,
            wgpu::Backend::Gl => BackendType::OpenGL,
            wgpu::Backend::BrowserWebGpu => BackendType::WebGpu,
            _ => BackendType::Other,
        }
    }
}
