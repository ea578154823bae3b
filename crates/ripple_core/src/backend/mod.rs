//! Compute backend abstraction
//!
//! The orchestrator drives every stage through [`ComputeBackend`]: named
//! buffers, named kernels, a fence per dispatch and an explicit barrier on
//! it. Host backends execute synchronously; device backends queue work and
//! block in `barrier`.
//!
//! Vector buffers travel as `[f32; 4]` per element (xyz plus padding) so
//! host and device agree on one layout.

mod cpu;

pub use cpu::{CpuBackend, Parallelism};

use crate::math::Packed3;
use crate::params::SimParams;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use thiserror::Error;

/// Every buffer the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferId {
    Positions,
    Velocities,
    /// Predicted positions `q`, corrected in place by the constraint loop.
    Predicted,
    /// Position corrections `Δq`; zeroed once applied.
    Deltas,
    /// Lagrange multipliers `λ` of the current iteration.
    Lambdas,
    Densities,
    Vorticity,
    SmoothedVelocities,
    BucketCounts,
    BucketEntries,
    NeighborCounts,
    NeighborIndices,
    Flags,
}

impl BufferId {
    pub const ALL: [BufferId; 13] = [
        BufferId::Positions,
        BufferId::Velocities,
        BufferId::Predicted,
        BufferId::Deltas,
        BufferId::Lambdas,
        BufferId::Densities,
        BufferId::Vorticity,
        BufferId::SmoothedVelocities,
        BufferId::BucketCounts,
        BufferId::BucketEntries,
        BufferId::NeighborCounts,
        BufferId::NeighborIndices,
        BufferId::Flags,
    ];

    /// Buffers whose size depends on grid or neighbor-list sizing.
    pub const SIZED_BY_PARAMS: [BufferId; 3] = [
        BufferId::BucketCounts,
        BufferId::BucketEntries,
        BufferId::NeighborIndices,
    ];

    /// Shader binding slot; slot 0 is the uniform block.
    pub fn binding(self) -> u32 {
        match self {
            BufferId::Positions => 1,
            BufferId::Velocities => 2,
            BufferId::Predicted => 3,
            BufferId::Deltas => 4,
            BufferId::Lambdas => 5,
            BufferId::Densities => 6,
            BufferId::Vorticity => 7,
            BufferId::SmoothedVelocities => 8,
            BufferId::BucketCounts => 9,
            BufferId::BucketEntries => 10,
            BufferId::NeighborCounts => 11,
            BufferId::NeighborIndices => 12,
            BufferId::Flags => 13,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BufferId::Positions => "positions",
            BufferId::Velocities => "velocities",
            BufferId::Predicted => "predicted",
            BufferId::Deltas => "deltas",
            BufferId::Lambdas => "lambdas",
            BufferId::Densities => "densities",
            BufferId::Vorticity => "vorticity",
            BufferId::SmoothedVelocities => "smoothed_velocities",
            BufferId::BucketCounts => "bucket_counts",
            BufferId::BucketEntries => "bucket_entries",
            BufferId::NeighborCounts => "neighbor_counts",
            BufferId::NeighborIndices => "neighbor_indices",
            BufferId::Flags => "flags",
        }
    }

    pub fn element_size(self) -> usize {
        match self {
            BufferId::Positions
            | BufferId::Velocities
            | BufferId::Predicted
            | BufferId::Deltas
            | BufferId::Vorticity
            | BufferId::SmoothedVelocities => std::mem::size_of::<Packed3>(),
            BufferId::Lambdas | BufferId::Densities => std::mem::size_of::<f32>(),
            BufferId::BucketCounts
            | BufferId::BucketEntries
            | BufferId::NeighborCounts
            | BufferId::NeighborIndices
            | BufferId::Flags => std::mem::size_of::<u32>(),
        }
    }

    /// Element count under the sizing carried by `uniforms`.
    pub fn elements(self, uniforms: &FrameUniforms) -> usize {
        let particles = uniforms.particle_count as usize;
        match self {
            BufferId::BucketCounts => uniforms.table_size as usize,
            BufferId::BucketEntries => {
                uniforms.table_size as usize * uniforms.bucket_capacity as usize
            }
            BufferId::NeighborIndices => particles * uniforms.max_neighbors as usize,
            _ => particles,
        }
    }

    pub fn bytes(self, uniforms: &FrameUniforms) -> usize {
        self.elements(uniforms) * self.element_size()
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Every kernel of a frame, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    Predict,
    ClearGrid,
    InsertGrid,
    FindNeighbors,
    ComputeLambda,
    ComputeDelta,
    ResolveCollisions,
    ApplyDelta,
    UpdateVelocity,
    Vorticity,
    Viscosity,
    Commit,
}

impl KernelId {
    pub const ALL: [KernelId; 12] = [
        KernelId::Predict,
        KernelId::ClearGrid,
        KernelId::InsertGrid,
        KernelId::FindNeighbors,
        KernelId::ComputeLambda,
        KernelId::ComputeDelta,
        KernelId::ResolveCollisions,
        KernelId::ApplyDelta,
        KernelId::UpdateVelocity,
        KernelId::Vorticity,
        KernelId::Viscosity,
        KernelId::Commit,
    ];

    /// Shader entry point name.
    pub fn entry_point(self) -> &'static str {
        match self {
            KernelId::Predict => "predict",
            KernelId::ClearGrid => "clear_grid",
            KernelId::InsertGrid => "insert_grid",
            KernelId::FindNeighbors => "find_neighbors",
            KernelId::ComputeLambda => "compute_lambda",
            KernelId::ComputeDelta => "compute_delta",
            KernelId::ResolveCollisions => "resolve_collisions",
            KernelId::ApplyDelta => "apply_delta",
            KernelId::UpdateVelocity => "update_velocity",
            KernelId::Vorticity => "vorticity",
            KernelId::Viscosity => "viscosity",
            KernelId::Commit => "commit",
        }
    }

    /// Buffers the kernel reads or writes.
    pub fn bindings(self) -> &'static [BufferId] {
        use BufferId::*;
        match self {
            KernelId::Predict => &[Positions, Velocities, Predicted],
            KernelId::ClearGrid => &[BucketCounts],
            KernelId::InsertGrid => &[Predicted, BucketCounts, BucketEntries],
            KernelId::FindNeighbors => &[
                Predicted,
                BucketCounts,
                BucketEntries,
                NeighborCounts,
                NeighborIndices,
            ],
            KernelId::ComputeLambda => &[Predicted, NeighborCounts, NeighborIndices, Lambdas, Densities],
            KernelId::ComputeDelta => &[Predicted, NeighborCounts, NeighborIndices, Lambdas, Deltas],
            KernelId::ResolveCollisions => &[Predicted, Deltas],
            KernelId::ApplyDelta => &[Predicted, Deltas],
            KernelId::UpdateVelocity => &[Positions, Predicted, Velocities],
            KernelId::Vorticity => &[Predicted, Velocities, NeighborCounts, NeighborIndices, Vorticity],
            KernelId::Viscosity => &[
                Predicted,
                Velocities,
                NeighborCounts,
                NeighborIndices,
                SmoothedVelocities,
                Flags,
            ],
            KernelId::Commit => &[Positions, Velocities, Predicted, SmoothedVelocities],
        }
    }

    /// Number of invocations for one dispatch.
    pub fn grid_size(self, uniforms: &FrameUniforms) -> u32 {
        match self {
            KernelId::ClearGrid => uniforms.table_size,
            _ => uniforms.particle_count,
        }
    }
}

impl std::fmt::Display for KernelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.entry_point())
    }
}

/// Completion token returned by a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fence(pub u64);

/// Uniform block shared by every kernel of a dispatch. Laid out in 16-byte
/// rows so the WGSL struct matches field for field.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub smoothing_radius: f32,
    pub rest_density: f32,
    pub particle_mass: f32,
    pub epsilon: f32,

    pub viscosity: f32,
    /// Effective timestep, time scale applied.
    pub dt: f32,
    pub tensile_k: f32,
    pub tensile_ratio: f32,

    pub gravity: [f32; 3],
    pub tensile_n: f32,

    pub domain_min: [f32; 3],
    pub wall_jitter: f32,

    pub domain_max: [f32; 3],
    /// Absolute clamp on `|Δq|`.
    pub max_delta: f32,

    pub particle_count: u32,
    pub table_size: u32,
    pub bucket_capacity: u32,
    pub max_neighbors: u32,

    pub frame: u32,
    pub iteration: u32,
    pub gradient_kernel: u32,
    pub _pad: u32,
}

impl FrameUniforms {
    pub fn new(params: &SimParams, particle_count: u32, frame: u32) -> Self {
        Self {
            smoothing_radius: params.smoothing_radius,
            rest_density: params.rest_density,
            particle_mass: params.particle_mass,
            epsilon: params.epsilon,
            viscosity: params.viscosity,
            dt: params.effective_dt(),
            tensile_k: params.tensile.strength,
            tensile_ratio: params.tensile.reference_ratio,
            gravity: params.gravity.to_array(),
            tensile_n: params.tensile.exponent,
            domain_min: params.domain.min.to_array(),
            wall_jitter: params.wall_jitter,
            domain_max: params.domain.max.to_array(),
            max_delta: params.max_delta_ratio * params.smoothing_radius,
            particle_count,
            table_size: params.hash_table_size,
            bucket_capacity: params.bucket_capacity,
            max_neighbors: params.max_neighbors,
            frame,
            iteration: 0,
            gradient_kernel: params.gradient_kernel.code(),
            _pad: 0,
        }
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn gravity(&self) -> Vec3 {
        Vec3::from_array(self.gravity)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("buffer {0} is already allocated")]
    AlreadyAllocated(BufferId),

    #[error("buffer {0} is not allocated")]
    UnallocatedBuffer(BufferId),

    #[error("buffer {0} was released twice or never allocated")]
    DoubleRelease(BufferId),

    #[error("buffer {buffer} holds {expected} bytes, transfer was {actual} bytes")]
    SizeMismatch {
        buffer: BufferId,
        expected: usize,
        actual: usize,
    },

    #[error("buffer {buffer} needs {bytes} bytes, device limit is {limit}")]
    BufferTooLarge { buffer: BufferId, bytes: u64, limit: u64 },

    #[error("unknown fence {0:?}")]
    UnknownFence(Fence),

    #[error("kernel {kernel} cannot run: {reason}")]
    InvalidDispatch { kernel: KernelId, reason: String },

    #[error("no compatible GPU adapter found")]
    AdapterUnavailable,

    #[error("device request failed: {0}")]
    DeviceRequest(String),

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("readback of {buffer} failed: {reason}")]
    Readback { buffer: BufferId, reason: String },
}

/// Host/device execution interface used by the orchestrator.
///
/// Calls are strictly sequential. `dispatch` may return before the kernel has
/// finished; its effects are only guaranteed visible after `barrier` on the
/// returned fence.
pub trait ComputeBackend {
    fn name(&self) -> &str;

    /// Allocate `elements` elements of `id`, zero-initialized.
    fn allocate(&mut self, id: BufferId, elements: usize) -> Result<(), BackendError>;

    /// Replace the whole contents of `id` with `data`.
    fn upload(&mut self, id: BufferId, data: &[u8]) -> Result<(), BackendError>;

    /// Copy the whole contents of `id` into `out`.
    fn download(&mut self, id: BufferId, out: &mut [u8]) -> Result<(), BackendError>;

    fn dispatch(
        &mut self,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        grid_size: u32,
    ) -> Result<Fence, BackendError>;

    fn barrier(&mut self, fence: Fence) -> Result<(), BackendError>;

    fn release(&mut self, id: BufferId) -> Result<(), BackendError>;

    fn is_allocated(&self, id: BufferId) -> bool;

    /// Bytes currently held by live allocations.
    fn live_bytes(&self) -> usize;

    /// Largest single buffer the backend accepts, if it has a limit.
    fn max_buffer_bytes(&self) -> Option<u64> {
        None
    }
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn allocate(&mut self, id: BufferId, elements: usize) -> Result<(), BackendError> {
        (**self).allocate(id, elements)
    }

    fn upload(&mut self, id: BufferId, data: &[u8]) -> Result<(), BackendError> {
        (**self).upload(id, data)
    }

    fn download(&mut self, id: BufferId, out: &mut [u8]) -> Result<(), BackendError> {
        (**self).download(id, out)
    }

    fn dispatch(
        &mut self,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        grid_size: u32,
    ) -> Result<Fence, BackendError> {
        (**self).dispatch(kernel, uniforms, grid_size)
    }

    fn barrier(&mut self, fence: Fence) -> Result<(), BackendError> {
        (**self).barrier(fence)
    }

    fn release(&mut self, id: BufferId) -> Result<(), BackendError> {
        (**self).release(id)
    }

    fn is_allocated(&self, id: BufferId) -> bool {
        (**self).is_allocated(id)
    }

    fn live_bytes(&self) -> usize {
        (**self).live_bytes()
    }

    fn max_buffer_bytes(&self) -> Option<u64> {
        (**self).max_buffer_bytes()
    }
}

/// Upload a typed slice.
pub fn upload_slice<B: ComputeBackend + ?Sized, T: Pod>(
    backend: &mut B,
    id: BufferId,
    data: &[T],
) -> Result<(), BackendError> {
    backend.upload(id, bytemuck::cast_slice(data))
}

/// Download into a typed slice.
pub fn download_slice<B: ComputeBackend + ?Sized, T: Pod>(
    backend: &mut B,
    id: BufferId,
    out: &mut [T],
) -> Result<(), BackendError> {
    backend.download(id, bytemuck::cast_slice_mut(out))
}

/// Check a transfer length against the buffer's allocated size.
pub fn check_transfer(id: BufferId, expected: usize, actual: usize) -> Result<(), BackendError> {
    if expected == actual {
        Ok(())
    } else {
        Err(BackendError::SizeMismatch {
            buffer: id,
            expected,
            actual,
        })
    }
}
