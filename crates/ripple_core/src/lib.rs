//! Ripple Core
//!
//! Position-Based Fluids solver:
//! - Spatial hash grid and fixed-capacity neighbor lists
//! - Density-constraint iteration with positional correction
//! - Velocity reconstruction (vorticity estimate, XSPH viscosity)
//! - Backend-agnostic frame orchestration with per-stage barriers

pub mod backend;
pub mod collision;
pub mod grid;
pub mod math;
pub mod memory;
pub mod neighbors;
pub mod orchestrator;
pub mod params;
pub mod scene;
pub mod solver;
pub mod sph;
pub mod stats;
pub mod time;
pub mod velocity;

pub use glam;

pub use backend::{BackendError, ComputeBackend, CpuBackend, Parallelism};
pub use orchestrator::{FluidSolver, FrameObserver, FrameStage, FrameView, SolverError};
pub use params::{GradientKernel, ParamError, SimParams};
pub use stats::{FrameDiagnostics, PerformanceStats};
pub use velocity::{NoConfinement, VorticityConfinement};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
