//! Host backends
//!
//! Runs every kernel on the host, either as a plain loop or data-parallel
//! with rayon. Dispatches complete before they return, so `barrier` only
//! validates the fence. Grid insertion is always sequential, which keeps
//! bucket order (and therefore the whole run) deterministic.

use super::{check_transfer, BackendError, BufferId, ComputeBackend, Fence, FrameUniforms, KernelId};
use crate::collision;
use crate::grid::{GridView, HashGridLayout};
use crate::math::{pack, unpack, HashRng, Packed3};
use crate::memory::AllocationLedger;
use crate::neighbors::{self, NeighborView};
use crate::params::Domain;
use crate::solver::{self, ConstraintParams};
use crate::velocity;
use glam::Vec3;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Parallelism {
    /// Single-threaded loop.
    #[default]
    Serial,
    /// Rayon thread pool.
    Rayon,
}

const VEC_STRIDE: usize = std::mem::size_of::<Packed3>();

#[derive(Debug, Default)]
struct CpuBuffers {
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    predicted: Vec<Vec3>,
    deltas: Vec<Vec3>,
    lambdas: Vec<f32>,
    densities: Vec<f32>,
    vorticity: Vec<Vec3>,
    smoothed: Vec<Vec3>,
    bucket_counts: Vec<u32>,
    bucket_entries: Vec<u32>,
    neighbor_counts: Vec<u32>,
    neighbor_indices: Vec<u32>,
    flags: Vec<u32>,
}

enum Slot<'a> {
    Vector(&'a mut Vec<Vec3>),
    Scalar(&'a mut Vec<f32>),
    Index(&'a mut Vec<u32>),
}

impl CpuBuffers {
    fn slot(&mut self, id: BufferId) -> Slot<'_> {
        match id {
            BufferId::Positions => Slot::Vector(&mut self.positions),
            BufferId::Velocities => Slot::Vector(&mut self.velocities),
            BufferId::Predicted => Slot::Vector(&mut self.predicted),
            BufferId::Deltas => Slot::Vector(&mut self.deltas),
            BufferId::Vorticity => Slot::Vector(&mut self.vorticity),
            BufferId::SmoothedVelocities => Slot::Vector(&mut self.smoothed),
            BufferId::Lambdas => Slot::Scalar(&mut self.lambdas),
            BufferId::Densities => Slot::Scalar(&mut self.densities),
            BufferId::BucketCounts => Slot::Index(&mut self.bucket_counts),
            BufferId::BucketEntries => Slot::Index(&mut self.bucket_entries),
            BufferId::NeighborCounts => Slot::Index(&mut self.neighbor_counts),
            BufferId::NeighborIndices => Slot::Index(&mut self.neighbor_indices),
            BufferId::Flags => Slot::Index(&mut self.flags),
        }
    }

    fn len_of(&mut self, id: BufferId) -> usize {
        match self.slot(id) {
            Slot::Vector(v) => v.len(),
            Slot::Scalar(v) => v.len(),
            Slot::Index(v) => v.len(),
        }
    }
}

fn neighbor_view<'a>(u: &FrameUniforms, counts: &'a [u32], indices: &'a [u32]) -> NeighborView<'a> {
    NeighborView {
        capacity: u.max_neighbors,
        counts,
        indices,
    }
}

/// Runs `f` for every element of `out`.
fn fill<T, F>(par: Parallelism, out: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    match par {
        Parallelism::Serial => out.iter_mut().enumerate().for_each(|(i, o)| f(i, o)),
        Parallelism::Rayon => out.par_iter_mut().enumerate().for_each(|(i, o)| f(i, o)),
    }
}

/// Runs `f` for every element pair of two equally long outputs.
fn fill_pair<A, B, F>(par: Parallelism, a: &mut [A], b: &mut [B], f: F)
where
    A: Send,
    B: Send,
    F: Fn(usize, &mut A, &mut B) + Sync + Send,
{
    match par {
        Parallelism::Serial => a
            .iter_mut()
            .zip(b.iter_mut())
            .enumerate()
            .for_each(|(i, (x, y))| f(i, x, y)),
        Parallelism::Rayon => a
            .par_iter_mut()
            .zip(b.par_iter_mut())
            .enumerate()
            .for_each(|(i, (x, y))| f(i, x, y)),
    }
}

pub struct CpuBackend {
    parallelism: Parallelism,
    buffers: CpuBuffers,
    ledger: AllocationLedger,
    last_fence: u64,
}

impl CpuBackend {
    pub fn new(parallelism: Parallelism) -> Self {
        Self {
            parallelism,
            buffers: CpuBuffers::default(),
            ledger: AllocationLedger::new(),
            last_fence: 0,
        }
    }

    pub fn serial() -> Self {
        Self::new(Parallelism::Serial)
    }

    pub fn parallel() -> Self {
        Self::new(Parallelism::Rayon)
    }

    pub fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    fn check_bindings(&mut self, kernel: KernelId, u: &FrameUniforms, grid_size: u32) -> Result<(), BackendError> {
        let expected_grid = kernel.grid_size(u);
        if grid_size != expected_grid {
            return Err(BackendError::InvalidDispatch {
                kernel,
                reason: format!("grid size {grid_size}, expected {expected_grid}"),
            });
        }
        for &id in kernel.bindings() {
            if !self.ledger.is_live(id) {
                return Err(BackendError::UnallocatedBuffer(id));
            }
            let len = self.buffers.len_of(id);
            if len != id.elements(u) {
                return Err(BackendError::InvalidDispatch {
                    kernel,
                    reason: format!("{id} holds {len} elements, expected {}", id.elements(u)),
                });
            }
        }
        Ok(())
    }

    fn run(&mut self, kernel: KernelId, u: &FrameUniforms) {
        let par = self.parallelism;
        let CpuBuffers {
            positions,
            velocities,
            predicted,
            deltas,
            lambdas,
            densities,
            vorticity,
            smoothed,
            bucket_counts,
            bucket_entries,
            neighbor_counts,
            neighbor_indices,
            flags,
        } = &mut self.buffers;

        let layout = HashGridLayout {
            cell_size: u.smoothing_radius,
            table_size: u.table_size,
            bucket_capacity: u.bucket_capacity,
        };

        match kernel {
            KernelId::Predict => {
                let (dt, g) = (u.dt, u.gravity());
                let positions = &*positions;
                fill_pair(par, velocities, predicted, |i, v, q| {
                    *v += dt * g;
                    *q = positions[i] + dt * *v;
                });
            }
            KernelId::ClearGrid => bucket_counts.fill(0),
            KernelId::InsertGrid => {
                for (i, &q) in predicted.iter().enumerate() {
                    layout.insert(bucket_counts, bucket_entries, i as u32, q);
                }
            }
            KernelId::FindNeighbors => {
                let grid = GridView {
                    layout,
                    counts: bucket_counts.as_slice(),
                    entries: bucket_entries.as_slice(),
                };
                let q = &*predicted;
                let cap = u.max_neighbors as usize;
                match par {
                    Parallelism::Serial => neighbor_counts
                        .iter_mut()
                        .zip(neighbor_indices.chunks_mut(cap))
                        .enumerate()
                        .for_each(|(i, (count, slots))| *count = neighbors::gather(&grid, q, i, slots)),
                    Parallelism::Rayon => neighbor_counts
                        .par_iter_mut()
                        .zip(neighbor_indices.par_chunks_mut(cap))
                        .enumerate()
                        .for_each(|(i, (count, slots))| *count = neighbors::gather(&grid, q, i, slots)),
                }
            }
            KernelId::ComputeLambda => {
                let c = ConstraintParams::from_uniforms(u);
                let nv = neighbor_view(u, neighbor_counts, neighbor_indices);
                let q = &*predicted;
                fill_pair(par, lambdas, densities, |i, lambda, rho| {
                    (*lambda, *rho) = solver::lambda(&c, &nv, q, i);
                });
            }
            KernelId::ComputeDelta => {
                let c = ConstraintParams::from_uniforms(u);
                let nv = neighbor_view(u, neighbor_counts, neighbor_indices);
                let (q, lambdas) = (&*predicted, &*lambdas);
                fill(par, deltas, |i, d| *d = solver::position_delta(&c, &nv, q, lambdas, i));
            }
            KernelId::ResolveCollisions => {
                let domain = Domain {
                    min: Vec3::from_array(u.domain_min),
                    max: Vec3::from_array(u.domain_max),
                };
                let q = &*predicted;
                fill(par, deltas, |i, d| {
                    let mut rng = HashRng::for_particle(i as u32, u.frame, u.iteration);
                    *d = collision::resolve(&domain, u.wall_jitter, q[i], *d, &mut rng);
                });
            }
            KernelId::ApplyDelta => fill_pair(par, predicted, deltas, |_, q, d| {
                *q += *d;
                *d = Vec3::ZERO;
            }),
            KernelId::UpdateVelocity => {
                let (p, q, dt) = (&*positions, &*predicted, u.dt);
                fill(par, velocities, |i, v| *v = velocity::reconstruct(p[i], q[i], dt));
            }
            KernelId::Vorticity => {
                let c = ConstraintParams::from_uniforms(u);
                let nv = neighbor_view(u, neighbor_counts, neighbor_indices);
                let (q, v) = (&*predicted, &*velocities);
                fill(par, vorticity, |i, w| *w = velocity::vorticity(&c.kernel, &nv, q, v, i));
            }
            KernelId::Viscosity => {
                let c = ConstraintParams::from_uniforms(u);
                let nv = neighbor_view(u, neighbor_counts, neighbor_indices);
                let (q, v) = (&*predicted, &*velocities);
                fill_pair(par, smoothed, flags, |i, out, flag| {
                    (*out, *flag) = velocity::xsph(&c.kernel, u.viscosity, &nv, q, v, i);
                });
            }
            KernelId::Commit => {
                let (q, s) = (&*predicted, &*smoothed);
                fill_pair(par, positions, velocities, |i, p, v| {
                    *p = q[i];
                    *v = s[i];
                });
            }
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::serial()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        match self.parallelism {
            Parallelism::Serial => "cpu",
            Parallelism::Rayon => "cpu-rayon",
        }
    }

    fn allocate(&mut self, id: BufferId, elements: usize) -> Result<(), BackendError> {
        self.ledger.record_allocation(id, elements * id.element_size())?;
        match self.buffers.slot(id) {
            Slot::Vector(v) => *v = vec![Vec3::ZERO; elements],
            Slot::Scalar(v) => *v = vec![0.0; elements],
            Slot::Index(v) => *v = vec![0; elements],
        }
        Ok(())
    }

    fn upload(&mut self, id: BufferId, data: &[u8]) -> Result<(), BackendError> {
        let size = self.ledger.size_of(id).ok_or(BackendError::UnallocatedBuffer(id))?;
        check_transfer(id, size, data.len())?;
        match self.buffers.slot(id) {
            Slot::Vector(v) => {
                for (dst, chunk) in v.iter_mut().zip(data.chunks_exact(VEC_STRIDE)) {
                    *dst = unpack(bytemuck::pod_read_unaligned::<Packed3>(chunk));
                }
            }
            Slot::Scalar(v) => bytemuck::cast_slice_mut::<f32, u8>(v.as_mut_slice()).copy_from_slice(data),
            Slot::Index(v) => bytemuck::cast_slice_mut::<u32, u8>(v.as_mut_slice()).copy_from_slice(data),
        }
        Ok(())
    }

    fn download(&mut self, id: BufferId, out: &mut [u8]) -> Result<(), BackendError> {
        let size = self.ledger.size_of(id).ok_or(BackendError::UnallocatedBuffer(id))?;
        check_transfer(id, size, out.len())?;
        match self.buffers.slot(id) {
            Slot::Vector(v) => {
                for (chunk, src) in out.chunks_exact_mut(VEC_STRIDE).zip(v.iter()) {
                    chunk.copy_from_slice(bytemuck::bytes_of(&pack(*src)));
                }
            }
            Slot::Scalar(v) => out.copy_from_slice(bytemuck::cast_slice::<f32, u8>(v.as_slice())),
            Slot::Index(v) => out.copy_from_slice(bytemuck::cast_slice::<u32, u8>(v.as_slice())),
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        kernel: KernelId,
        uniforms: &FrameUniforms,
        grid_size: u32,
    ) -> Result<Fence, BackendError> {
        self.check_bindings(kernel, uniforms, grid_size)?;
        self.run(kernel, uniforms);
        self.last_fence += 1;
        Ok(Fence(self.last_fence))
    }

    fn barrier(&mut self, fence: Fence) -> Result<(), BackendError> {
        if fence.0 == 0 || fence.0 > self.last_fence {
            return Err(BackendError::UnknownFence(fence));
        }
        Ok(())
    }

    fn release(&mut self, id: BufferId) -> Result<(), BackendError> {
        self.ledger.record_release(id)?;
        match self.buffers.slot(id) {
            Slot::Vector(v) => *v = Vec::new(),
            Slot::Scalar(v) => *v = Vec::new(),
            Slot::Index(v) => *v = Vec::new(),
        }
        Ok(())
    }

    fn is_allocated(&self, id: BufferId) -> bool {
        self.ledger.is_live(id)
    }

    fn live_bytes(&self) -> usize {
        self.ledger.live_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{download_slice, upload_slice};
    use crate::params::SimParams;

    fn allocate_all(backend: &mut CpuBackend, u: &FrameUniforms) {
        for id in BufferId::ALL {
            backend.allocate(id, id.elements(u)).unwrap();
        }
    }

    #[test]
    fn test_upload_download_vectors_use_padded_layout() {
        let mut backend = CpuBackend::serial();
        backend.allocate(BufferId::Positions, 2).unwrap();
        let packed = [[1.0f32, 2.0, 3.0, 0.0], [4.0, 5.0, 6.0, 0.0]];
        upload_slice(&mut backend, BufferId::Positions, &packed).unwrap();
        let mut out = [[0.0f32; 4]; 2];
        download_slice(&mut backend, BufferId::Positions, &mut out).unwrap();
        assert_eq!(out, packed);
        assert_eq!(backend.live_bytes(), 32);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let mut backend = CpuBackend::serial();
        backend.allocate(BufferId::Lambdas, 4).unwrap();
        let err = upload_slice(&mut backend, BufferId::Lambdas, &[0.0f32; 3]).unwrap_err();
        assert_eq!(
            err,
            BackendError::SizeMismatch {
                buffer: BufferId::Lambdas,
                expected: 16,
                actual: 12,
            }
        );
    }

    #[test]
    fn test_dispatch_requires_bindings() {
        let mut backend = CpuBackend::serial();
        let u = FrameUniforms::new(&SimParams::default(), 4, 0);
        let err = backend.dispatch(KernelId::Predict, &u, 4).unwrap_err();
        assert!(matches!(err, BackendError::UnallocatedBuffer(_)));
    }

    #[test]
    fn test_release_twice_is_an_error() {
        let mut backend = CpuBackend::serial();
        backend.allocate(BufferId::Flags, 8).unwrap();
        backend.release(BufferId::Flags).unwrap();
        assert_eq!(
            backend.release(BufferId::Flags),
            Err(BackendError::DoubleRelease(BufferId::Flags))
        );
        assert_eq!(backend.live_bytes(), 0);
    }

    #[test]
    fn test_predict_integrates_gravity() {
        let params = SimParams {
            dt: 0.5,
            gravity: Vec3::new(0.0, -2.0, 0.0),
            ..SimParams::default()
        };
        let u = FrameUniforms::new(&params, 1, 0);
        let mut backend = CpuBackend::serial();
        allocate_all(&mut backend, &u);
        let fence = backend
            .dispatch(KernelId::Predict, &u, KernelId::Predict.grid_size(&u))
            .unwrap();
        backend.barrier(fence).unwrap();

        let mut q = [[0.0f32; 4]; 1];
        download_slice(&mut backend, BufferId::Predicted, &mut q).unwrap();
        assert_eq!(q[0], [0.0, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_barrier_rejects_unknown_fence() {
        let mut backend = CpuBackend::serial();
        assert_eq!(backend.barrier(Fence(3)), Err(BackendError::UnknownFence(Fence(3))));
    }
}
