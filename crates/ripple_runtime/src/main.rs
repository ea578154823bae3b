//! Ripple Runtime
//!
//! Headless driver: loads run settings, seeds a scene, steps the solver on
//! the chosen backend and logs performance as it goes.
//!
//! Usage: `ripple [settings.json]`. Without a path the defaults are used.

use anyhow::{bail, Context, Result};
use ripple_core::{ComputeBackend, CpuBackend, FluidSolver};
use ripple_services::{BackendKind, DensityCsvSink, RunSettings};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("Ripple v{}", ripple_core::VERSION);

    let settings = match std::env::args().nth(1) {
        Some(path) => RunSettings::load(&path).with_context(|| format!("loading settings from {path}"))?,
        None => {
            tracing::info!("No settings file given, using defaults");
            RunSettings::default()
        }
    };

    match settings.backend {
        BackendKind::Cpu => run(CpuBackend::serial(), &settings),
        BackendKind::Rayon => run(CpuBackend::parallel(), &settings),
        BackendKind::Gpu => run_gpu(&settings),
    }
}

#[cfg(feature = "gpu")]
fn run_gpu(settings: &RunSettings) -> Result<()> {
    let backend = ripple_gpu::WgpuBackend::new().context("initializing the GPU backend")?;
    run(backend, settings)
}

#[cfg(not(feature = "gpu"))]
fn run_gpu(_settings: &RunSettings) -> Result<()> {
    bail!("this build has no GPU support; rebuild with `--features gpu`")
}

fn run<B: ComputeBackend>(backend: B, settings: &RunSettings) -> Result<()> {
    let seeds = settings.scene.seed_positions(&settings.params);
    if seeds.is_empty() {
        bail!("scene {:?} produced no particles", settings.scene);
    }
    tracing::info!("Seeded {} particles", seeds.len());

    let mut solver = FluidSolver::with_config(backend, settings.params.clone(), &seeds, settings.solver_config())
        .context("initializing the fluid solver")?;
    if let Some(path) = &settings.density_log {
        let sink = DensityCsvSink::create(path).with_context(|| format!("creating {}", path.display()))?;
        solver.add_observer(Box::new(sink));
    }

    for _ in 0..settings.frames {
        solver.step_frame().context("stepping the solver")?;
        let frame = solver.frame();
        if settings.log_every > 0 && frame % settings.log_every == 0 {
            log_stats(&solver);
        }
    }

    log_stats(&solver);
    solver.shutdown().context("releasing device buffers")?;
    tracing::info!(
        "Finished {} frames, {:.3}s simulated",
        solver.stats().frame_count(),
        solver.simulated_time()
    );
    Ok(())
}

fn log_stats<B: ComputeBackend>(solver: &FluidSolver<B>) {
    let stats = solver.stats();
    let diagnostics = stats.last_frame();
    tracing::info!(
        frame = solver.frame(),
        fps = stats.fps(),
        frame_ms = stats.frame_time_ms(),
        bucket_overflows = diagnostics.bucket_overflows,
        truncated_lists = diagnostics.truncated_neighbor_lists,
        viscosity_clamps = diagnostics.viscosity_clamps,
        "solver stats"
    );
    for (stage, ms) in stats.stage_summary() {
        tracing::debug!("  {stage}: {ms:.3} ms");
    }
}
