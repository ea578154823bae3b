//! End-to-end solver runs on the host backends.

use ripple_core::glam::Vec3;
use ripple_core::orchestrator::{Readback, SolverConfig};
use ripple_core::params::{Domain, TensileCorrection};
use ripple_core::scene;
use ripple_core::sph::SphKernel;
use ripple_core::{CpuBackend, FluidSolver, GradientKernel, SimParams};

fn no_warmup() -> SolverConfig {
    SolverConfig {
        warmup_frames: 0,
        ..SolverConfig::default()
    }
}

/// Two particles `h/2` apart, at rest, with `rho0` equal to their density.
fn resting_pair(tensile: TensileCorrection) -> (SimParams, Vec<Vec3>) {
    let h = 0.1;
    let kernel = SphKernel::new(h, GradientKernel::Poly6);
    let mass = 1000.0 * h * h * h;
    let rest_density = mass * kernel.w(Vec3::X * (0.5 * h));
    let params = SimParams {
        smoothing_radius: h,
        particle_mass: mass,
        rest_density,
        dt: 0.02,
        gravity: Vec3::ZERO,
        tensile,
        ..SimParams::default()
    };
    let seeds = vec![Vec3::new(-0.25 * h, 0.0, 0.0), Vec3::new(0.25 * h, 0.0, 0.0)];
    (params, seeds)
}

#[test]
fn resting_pair_stays_put() {
    let (params, seeds) = resting_pair(TensileCorrection::disabled());
    let h = params.smoothing_radius;
    let mut solver = FluidSolver::with_config(CpuBackend::serial(), params, &seeds, no_warmup()).unwrap();
    solver.step_frame().unwrap();

    let d0 = solver.positions()[0] - seeds[0];
    let d1 = solver.positions()[1] - seeds[1];
    assert!(d0.length() < 0.01 * h, "d0 = {d0}");
    assert!(d1.length() < 0.01 * h, "d1 = {d1}");
    assert!((d0.x + d1.x).abs() < 1e-6);
    assert_eq!((d0.y, d0.z, d1.y, d1.z), (0.0, 0.0, 0.0, 0.0));
}

#[test]
fn resting_pair_with_tensile_term_moves_along_axis_only() {
    let (params, seeds) = resting_pair(TensileCorrection::default());
    let mut solver = FluidSolver::with_config(CpuBackend::serial(), params, &seeds, no_warmup()).unwrap();
    solver.step_frame().unwrap();

    let d0 = solver.positions()[0] - seeds[0];
    let d1 = solver.positions()[1] - seeds[1];
    assert!((d0.x + d1.x).abs() < 1e-6, "d0 = {d0}, d1 = {d1}");
    assert!(d0.x.signum() == -d1.x.signum() || d0.x == 0.0);
    assert_eq!((d0.y, d0.z, d1.y, d1.z), (0.0, 0.0, 0.0, 0.0));
    assert!(solver.velocities().iter().all(|v| v.y == 0.0 && v.z == 0.0));
}

#[test]
fn gaussian_cloud_stays_finite_and_contained() {
    let params = SimParams {
        smoothing_radius: 0.1,
        rest_density: 1000.0,
        ..SimParams::default()
    };
    let domain = params.domain;
    let seeds = scene::gaussian_cloud(3500, 0.3, &domain, 42);
    let mut solver = FluidSolver::with_config(CpuBackend::parallel(), params, &seeds, no_warmup()).unwrap();

    for _ in 0..100 {
        solver.step_frame().unwrap();
    }

    assert!(solver.positions().iter().all(|p| p.is_finite()));
    assert!(solver.velocities().iter().all(|v| v.is_finite()));
    let (lo, hi) = solver
        .positions()
        .iter()
        .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(lo, hi), p| {
            (lo.min(*p), hi.max(*p))
        });
    assert!(lo.cmpge(domain.min - Vec3::splat(1e-5)).all(), "min corner {lo}");
    assert!(hi.cmple(domain.max + Vec3::splat(1e-5)).all(), "max corner {hi}");
    assert_eq!(solver.stats().frame_count(), 100);
}

#[test]
fn particles_pushed_through_walls_end_inside_jittered_box() {
    let params = SimParams {
        gravity: Vec3::new(0.0, -400.0, 0.0),
        domain: Domain::default(),
        ..SimParams::default()
    };
    let jitter = params.wall_jitter;
    let seeds = scene::lattice(Vec3::new(-0.2, -0.95, -0.2), Vec3::new(0.2, -0.8, 0.2), 0.05);
    let mut solver = FluidSolver::with_config(CpuBackend::serial(), params, &seeds, no_warmup()).unwrap();
    for _ in 0..5 {
        solver.step_frame().unwrap();
    }
    for p in solver.positions() {
        assert!(p.cmpge(Vec3::splat(-1.0 - jitter)).all(), "{p}");
        assert!(p.cmple(Vec3::splat(1.0 + jitter)).all(), "{p}");
    }
}

#[test]
fn serial_and_parallel_backends_agree() {
    let params = SimParams::default();
    let seeds = scene::gaussian_cloud(800, 0.2, &params.domain, 5);
    let mut serial =
        FluidSolver::with_config(CpuBackend::serial(), params.clone(), &seeds, no_warmup()).unwrap();
    let mut parallel = FluidSolver::with_config(CpuBackend::parallel(), params, &seeds, no_warmup()).unwrap();
    for _ in 0..5 {
        serial.step_frame().unwrap();
        parallel.step_frame().unwrap();
    }
    for (a, b) in serial.positions().iter().zip(parallel.positions()) {
        assert!((*a - *b).length() < 1e-6);
    }
    for (a, b) in serial.velocities().iter().zip(parallel.velocities()) {
        assert!((*a - *b).length() < 1e-5);
    }
}

#[test]
fn full_buckets_and_lists_are_counted_not_fatal() {
    let params = SimParams {
        hash_table_size: 17,
        bucket_capacity: 2,
        max_neighbors: 2,
        ..SimParams::default()
    };
    let seeds = scene::lattice(Vec3::splat(-0.1), Vec3::splat(0.1), 0.04);
    let mut solver = FluidSolver::with_config(CpuBackend::serial(), params, &seeds, no_warmup()).unwrap();
    solver.step_frame().unwrap();

    let diagnostics = *solver.stats().last_frame();
    assert_eq!(diagnostics.particles as usize, seeds.len());
    assert!(diagnostics.bucket_overflows > 0);
    assert!(diagnostics.truncated_neighbor_lists > 0);
    assert!(solver.positions().iter().all(|p| p.is_finite()));
}

#[test]
fn heavy_viscosity_is_clamped_and_counted() {
    let params = SimParams {
        viscosity: 50.0,
        ..SimParams::default()
    };
    let seeds = scene::lattice(Vec3::splat(-0.1), Vec3::splat(0.1), 0.03);
    let mut solver = FluidSolver::with_config(CpuBackend::serial(), params, &seeds, no_warmup()).unwrap();
    solver.step_frame().unwrap();
    assert!(solver.stats().last_frame().viscosity_clamps > 0);
    assert!(solver.velocities().iter().all(|v| v.is_finite()));
}

#[test]
fn densities_track_rest_density_after_solving() {
    let params = SimParams::default();
    let seeds = scene::dam_block(&params.domain, params.smoothing_radius, 0.5 * params.smoothing_radius, 0.2, 11);
    let config = SolverConfig {
        readback: Readback {
            densities: true,
            ..Readback::default()
        },
        ..no_warmup()
    };
    let mut solver = FluidSolver::with_config(CpuBackend::parallel(), params.clone(), &seeds, config).unwrap();
    for _ in 0..10 {
        solver.step_frame().unwrap();
    }
    let densities = solver.densities();
    assert_eq!(densities.len(), seeds.len());
    let mean = densities.iter().sum::<f32>() / densities.len() as f32;
    assert!(mean > 0.2 * params.rest_density && mean < 2.0 * params.rest_density, "mean density {mean}");
}
