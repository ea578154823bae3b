//! Frame orchestration
//!
//! [`FluidSolver`] owns the particle state and a [`ComputeBackend`], and runs
//! one frame per [`FluidSolver::step_frame`] call:
//!
//! ```text
//! Idle → Predicting → NeighborSearch → Solving(0..k) → VelocityUpdate → Rendering → Idle
//! ```
//!
//! Every dispatch is followed by a barrier on its fence, so each stage sees
//! the complete output of the previous one. Warm-up frames skip straight to
//! `Rendering`.

use crate::backend::{
    download_slice, upload_slice, BackendError, BufferId, ComputeBackend, FrameUniforms, KernelId,
};
use crate::grid;
use crate::math::{pack, unpack, Packed3};
use crate::neighbors;
use crate::params::{ParamError, SimParams};
use crate::stats::{FrameDiagnostics, PerformanceStats};
use crate::time::FrameClock;
use crate::velocity::{ConfinementInput, NoConfinement, VorticityConfinement, FLAG_VISCOSITY_CLAMPED};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    Predicting,
    NeighborSearch,
    Solving { iteration: u32 },
    VelocityUpdate,
    Rendering,
}

impl FrameStage {
    pub fn label(&self) -> &'static str {
        match self {
            FrameStage::Idle => "idle",
            FrameStage::Predicting => "predict",
            FrameStage::NeighborSearch => "neighbors",
            FrameStage::Solving { .. } => "solve",
            FrameStage::VelocityUpdate => "velocity",
            FrameStage::Rendering => "render",
        }
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("invalid parameters: {0}")]
    Params(#[from] ParamError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("no particles to simulate")]
    NoParticles,

    #[error("{count} particles exceed max_particles ({max})")]
    TooManyParticles { count: usize, max: u32 },

    #[error("seed position {index} is not finite")]
    NonFiniteSeed { index: usize },

    #[error("solver has been shut down")]
    ShutDown,
}

/// What is downloaded after each simulated frame besides positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Readback {
    pub velocities: bool,
    pub densities: bool,
    /// Neighbor counts, bucket counts and flags for [`FrameDiagnostics`].
    pub diagnostics: bool,
}

impl Default for Readback {
    fn default() -> Self {
        Self {
            velocities: true,
            densities: false,
            diagnostics: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Frames at the start of the run that only render.
    pub warmup_frames: u64,
    pub readback: Readback,
    /// Warn when more than this fraction of particles lost neighbors.
    pub truncation_warn_ratio: f64,
    /// Samples kept by the rolling timers.
    pub stats_window: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            warmup_frames: 50,
            readback: Readback::default(),
            truncation_warn_ratio: 0.05,
            stats_window: 60,
        }
    }
}

/// Host-side state handed to observers during `Rendering`.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub frame: u64,
    pub warmup: bool,
    pub positions: &'a [Vec3],
    pub velocities: &'a [Vec3],
    /// Empty unless density readback is on.
    pub densities: &'a [f32],
    pub params: &'a SimParams,
    pub diagnostics: &'a FrameDiagnostics,
}

/// Render and diagnostic hook, called once per frame with the latest state.
pub trait FrameObserver {
    fn on_frame(&mut self, frame: &FrameView<'_>);
}

pub struct FluidSolver<B: ComputeBackend> {
    backend: B,
    params: SimParams,
    pending: Option<SimParams>,
    config: SolverConfig,
    clock: FrameClock,
    stage: FrameStage,
    stage_started: Instant,
    stage_history: Vec<FrameStage>,
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    /// False once a frame ran without velocity readback.
    host_velocities_current: bool,
    densities: Vec<f32>,
    staging: Vec<Packed3>,
    observers: Vec<Box<dyn FrameObserver>>,
    confinement: Box<dyn VorticityConfinement>,
    stats: PerformanceStats,
    dispatches: u64,
    live: bool,
}

impl<B: ComputeBackend> FluidSolver<B> {
    pub fn initialize(backend: B, params: SimParams, seed_positions: &[Vec3]) -> Result<Self, SolverError> {
        Self::with_config(backend, params, seed_positions, SolverConfig::default())
    }

    /// Validate, allocate every buffer and upload the initial state.
    pub fn with_config(
        mut backend: B,
        params: SimParams,
        seed_positions: &[Vec3],
        config: SolverConfig,
    ) -> Result<Self, SolverError> {
        params.validate()?;
        if seed_positions.is_empty() {
            return Err(SolverError::NoParticles);
        }
        if seed_positions.len() > params.max_particles as usize {
            return Err(SolverError::TooManyParticles {
                count: seed_positions.len(),
                max: params.max_particles,
            });
        }
        if let Some(index) = seed_positions.iter().position(|p| !p.is_finite()) {
            return Err(SolverError::NonFiniteSeed { index });
        }

        let count = seed_positions.len();
        let uniforms = FrameUniforms::new(&params, count as u32, 0);
        for id in BufferId::ALL {
            backend.allocate(id, id.elements(&uniforms))?;
        }

        let mut solver = Self {
            backend,
            params,
            pending: None,
            clock: FrameClock::new(config.warmup_frames),
            stats: PerformanceStats::new(config.stats_window),
            config,
            stage: FrameStage::Idle,
            stage_started: Instant::now(),
            stage_history: Vec::new(),
            positions: seed_positions.to_vec(),
            velocities: vec![Vec3::ZERO; count],
            host_velocities_current: true,
            densities: Vec::new(),
            staging: vec![[0.0; 4]; count],
            observers: Vec::new(),
            confinement: Box::new(NoConfinement),
            dispatches: 0,
            live: true,
        };
        solver.upload_state()?;

        info!(
            backend = solver.backend.name(),
            particles = count,
            device_bytes = solver.backend.live_bytes(),
            "fluid solver initialized"
        );
        Ok(solver)
    }

    pub fn particle_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Host copy of the velocities; stale when velocity readback is off.
    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    /// Densities of the last constraint evaluation; empty unless density
    /// readback is on.
    pub fn densities(&self) -> &[f32] {
        &self.densities
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_readback(&mut self, readback: Readback) {
        self.config.readback = readback;
        if !readback.densities {
            self.densities.clear();
        }
    }

    /// Queue new parameters; they take effect at the start of the next frame.
    ///
    /// If the grid buffers cannot be resized then, that frame fails, the
    /// queued parameters are dropped and the previous ones stay in force.
    pub fn set_params(&mut self, params: SimParams) -> Result<(), SolverError> {
        params.validate()?;
        if self.particle_count() > params.max_particles as usize {
            return Err(SolverError::TooManyParticles {
                count: self.particle_count(),
                max: params.max_particles,
            });
        }
        self.pending = Some(params);
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.push(observer);
    }

    pub fn set_confinement(&mut self, confinement: Box<dyn VorticityConfinement>) {
        self.confinement = confinement;
    }

    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    /// Stages entered during the last frame, in order.
    pub fn stage_history(&self) -> &[FrameStage] {
        &self.stage_history
    }

    /// Index of the next frame.
    pub fn frame(&self) -> u64 {
        self.clock.frame()
    }

    pub fn simulated_time(&self) -> f64 {
        self.clock.simulated_time()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn step_frame(&mut self) -> Result<(), SolverError> {
        if !self.live {
            return Err(SolverError::ShutDown);
        }
        self.stats.begin_frame();
        self.stage_history.clear();
        self.stage_started = Instant::now();
        self.apply_pending_params()?;

        let warmup = self.clock.in_warmup();
        let dispatches_before = self.dispatches;
        if !warmup {
            self.simulate()?;
        }

        self.enter(FrameStage::Rendering);
        let view = FrameView {
            frame: self.clock.frame(),
            warmup,
            positions: &self.positions,
            velocities: &self.velocities,
            densities: &self.densities,
            params: &self.params,
            diagnostics: self.stats.last_frame(),
        };
        for observer in &mut self.observers {
            observer.on_frame(&view);
        }
        self.enter(FrameStage::Idle);

        let dt = if warmup { 0.0 } else { self.params.effective_dt() };
        self.clock.advance(dt);
        self.stats.record_dispatches(self.dispatches - dispatches_before);
        self.stats.end_frame(warmup);

        debug!(
            frame = self.clock.frame() - 1,
            warmup,
            dispatches = self.dispatches - dispatches_before,
            "frame complete"
        );
        Ok(())
    }

    /// Release every device allocation. Called on drop if not called earlier.
    pub fn shutdown(&mut self) -> Result<(), SolverError> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        for id in BufferId::ALL {
            if self.backend.is_allocated(id) {
                self.backend.release(id)?;
            }
        }
        info!(
            backend = self.backend.name(),
            frames = self.stats.frame_count(),
            live_bytes = self.backend.live_bytes(),
            "fluid solver shut down"
        );
        Ok(())
    }

    fn simulate(&mut self) -> Result<(), SolverError> {
        let count = self.particle_count() as u32;
        let uniforms = FrameUniforms::new(&self.params, count, self.clock.frame() as u32);

        self.enter(FrameStage::Predicting);
        self.upload_state()?;
        self.run(KernelId::Predict, &uniforms)?;

        self.enter(FrameStage::NeighborSearch);
        self.run(KernelId::ClearGrid, &uniforms)?;
        self.run(KernelId::InsertGrid, &uniforms)?;
        self.run(KernelId::FindNeighbors, &uniforms)?;

        for iteration in 0..self.params.solver_iterations {
            self.enter(FrameStage::Solving { iteration });
            let u = uniforms.with_iteration(iteration);
            self.run(KernelId::ComputeLambda, &u)?;
            self.run(KernelId::ComputeDelta, &u)?;
            self.run(KernelId::ResolveCollisions, &u)?;
            self.run(KernelId::ApplyDelta, &u)?;
        }

        self.enter(FrameStage::VelocityUpdate);
        self.run(KernelId::UpdateVelocity, &uniforms)?;
        self.run(KernelId::Vorticity, &uniforms)?;
        if self.confinement.is_active() {
            self.apply_confinement(&uniforms)?;
        }
        self.run(KernelId::Viscosity, &uniforms)?;
        self.run(KernelId::Commit, &uniforms)?;

        self.download_state()?;
        if self.config.readback.diagnostics {
            self.collect_diagnostics(&uniforms)?;
        }
        Ok(())
    }

    fn run(&mut self, kernel: KernelId, uniforms: &FrameUniforms) -> Result<(), BackendError> {
        let fence = self
            .backend
            .dispatch(kernel, uniforms, kernel.grid_size(uniforms))?;
        self.backend.barrier(fence)?;
        self.dispatches += 1;
        trace!(%kernel, fence = fence.0, "dispatch complete");
        Ok(())
    }

    fn enter(&mut self, stage: FrameStage) {
        let now = Instant::now();
        if self.stage != FrameStage::Idle {
            self.stats
                .stages_mut()
                .record(self.stage.label(), now - self.stage_started);
        }
        trace!(from = ?self.stage, to = ?stage, "stage transition");
        self.stage = stage;
        self.stage_started = now;
        self.stage_history.push(stage);
    }

    fn apply_pending_params(&mut self) -> Result<(), SolverError> {
        let Some(params) = self.pending.take() else {
            return Ok(());
        };
        if self.params.needs_reallocation(&params) {
            self.check_buffer_limits(&params)?;
            if let Err(err) = self.resize_grid_buffers(&params) {
                warn!(%err, "grid reallocation failed, keeping previous parameters");
                let previous = self.params.clone();
                self.resize_grid_buffers(&previous)?;
                return Err(err.into());
            }
            debug!(
                table_size = params.hash_table_size,
                bucket_capacity = params.bucket_capacity,
                max_neighbors = params.max_neighbors,
                "grid buffers reallocated"
            );
        }
        self.params = params;
        info!(frame = self.clock.frame(), "parameters updated");
        Ok(())
    }

    /// Refuse `params` up front when a grid buffer would exceed the backend's
    /// per-buffer limit.
    fn check_buffer_limits(&self, params: &SimParams) -> Result<(), BackendError> {
        let Some(limit) = self.backend.max_buffer_bytes() else {
            return Ok(());
        };
        let uniforms = FrameUniforms::new(params, self.particle_count() as u32, 0);
        for id in BufferId::SIZED_BY_PARAMS {
            let bytes = id.bytes(&uniforms) as u64;
            if bytes > limit {
                return Err(BackendError::BufferTooLarge { buffer: id, bytes, limit });
            }
        }
        Ok(())
    }

    /// Size every params-dependent buffer for `params`, allocating any that
    /// are missing.
    fn resize_grid_buffers(&mut self, params: &SimParams) -> Result<(), BackendError> {
        let uniforms = FrameUniforms::new(params, self.particle_count() as u32, 0);
        for id in BufferId::SIZED_BY_PARAMS {
            if self.backend.is_allocated(id) {
                self.backend.release(id)?;
            }
            self.backend.allocate(id, id.elements(&uniforms))?;
        }
        Ok(())
    }

    /// Push the host state to the device. Host velocities are only pushed
    /// while they mirror the device copy.
    fn upload_state(&mut self) -> Result<(), BackendError> {
        pack_into(&mut self.staging, &self.positions);
        upload_slice(&mut self.backend, BufferId::Positions, &self.staging)?;
        if self.host_velocities_current {
            pack_into(&mut self.staging, &self.velocities);
            upload_slice(&mut self.backend, BufferId::Velocities, &self.staging)?;
        }
        Ok(())
    }

    fn download_state(&mut self) -> Result<(), BackendError> {
        download_slice(&mut self.backend, BufferId::Positions, &mut self.staging)?;
        unpack_into(&mut self.positions, &self.staging);
        self.host_velocities_current = self.config.readback.velocities;
        if self.host_velocities_current {
            download_slice(&mut self.backend, BufferId::Velocities, &mut self.staging)?;
            unpack_into(&mut self.velocities, &self.staging);
        }
        if self.config.readback.densities {
            self.densities.resize(self.positions.len(), 0.0);
            download_slice(&mut self.backend, BufferId::Densities, &mut self.densities)?;
        }
        Ok(())
    }

    fn apply_confinement(&mut self, uniforms: &FrameUniforms) -> Result<(), BackendError> {
        let count = self.particle_count();
        let mut q = vec![Vec3::ZERO; count];
        let mut vorticity = vec![Vec3::ZERO; count];
        let mut velocities = vec![Vec3::ZERO; count];

        download_slice(&mut self.backend, BufferId::Predicted, &mut self.staging)?;
        unpack_into(&mut q, &self.staging);
        download_slice(&mut self.backend, BufferId::Vorticity, &mut self.staging)?;
        unpack_into(&mut vorticity, &self.staging);
        download_slice(&mut self.backend, BufferId::Velocities, &mut self.staging)?;
        unpack_into(&mut velocities, &self.staging);

        let input = ConfinementInput {
            positions: &q,
            vorticity: &vorticity,
            params: &self.params,
            dt: uniforms.dt,
        };
        self.confinement.apply(&input, &mut velocities);

        pack_into(&mut self.staging, &velocities);
        upload_slice(&mut self.backend, BufferId::Velocities, &self.staging)
    }

    fn collect_diagnostics(&mut self, uniforms: &FrameUniforms) -> Result<(), BackendError> {
        let count = self.particle_count();
        let mut per_particle = vec![0u32; count];
        let mut buckets = vec![0u32; uniforms.table_size as usize];

        download_slice(&mut self.backend, BufferId::BucketCounts, &mut buckets)?;
        let bucket_overflows = grid::overflow_count(&buckets, uniforms.bucket_capacity);

        download_slice(&mut self.backend, BufferId::NeighborCounts, &mut per_particle)?;
        let truncated_neighbor_lists = neighbors::truncated_lists(&per_particle, uniforms.max_neighbors);

        download_slice(&mut self.backend, BufferId::Flags, &mut per_particle)?;
        let viscosity_clamps = per_particle
            .iter()
            .filter(|&&f| f & FLAG_VISCOSITY_CLAMPED != 0)
            .count() as u64;

        let diagnostics = FrameDiagnostics {
            particles: count as u32,
            bucket_overflows,
            truncated_neighbor_lists,
            viscosity_clamps,
        };
        let ratio = diagnostics.truncation_ratio();
        if ratio > self.config.truncation_warn_ratio {
            warn!(
                frame = self.clock.frame(),
                bucket_overflows,
                truncated_neighbor_lists,
                ratio,
                "neighbor search is truncating; raise bucket_capacity or max_neighbors"
            );
        }
        self.stats.record_diagnostics(diagnostics);
        Ok(())
    }
}

impl<B: ComputeBackend> Drop for FluidSolver<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "solver teardown failed");
        }
    }
}

fn pack_into(dst: &mut [Packed3], src: &[Vec3]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = pack(*s);
    }
}

fn unpack_into(dst: &mut [Vec3], src: &[Packed3]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = unpack(*s);
    }
}
