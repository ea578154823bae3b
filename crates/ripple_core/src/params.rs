//! Simulation parameters.
//!
//! `SimParams` is immutable for the duration of a frame. The host may replace
//! it between frames (GUI sliders, settings reload); the orchestrator picks up
//! the new value at the start of the next frame.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gradient used for both the constraint Jacobian and the correction direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientKernel {
    /// Analytic gradient of the density kernel.
    #[default]
    Poly6,
    /// Spiky gradient, kept for experimentation.
    Spiky,
}

impl GradientKernel {
    /// Selector value carried in the kernel uniform block.
    pub fn code(self) -> u32 {
        match self {
            GradientKernel::Poly6 => 0,
            GradientKernel::Spiky => 1,
        }
    }

    /// Inverse of [`GradientKernel::code`]; unknown codes fall back to poly6.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => GradientKernel::Spiky,
            _ => GradientKernel::Poly6,
        }
    }
}

/// Artificial-pressure term `s_corr = -k (W(r) / W(ratio * h))^n`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensileCorrection {
    /// `k`; zero disables the term.
    pub strength: f32,
    /// Reference distance as a fraction of `h`.
    pub reference_ratio: f32,
    /// `n`.
    pub exponent: f32,
}

impl Default for TensileCorrection {
    fn default() -> Self {
        Self {
            strength: 0.1,
            reference_ratio: 0.2,
            exponent: 4.0,
        }
    }
}

impl TensileCorrection {
    pub fn disabled() -> Self {
        Self {
            strength: 0.0,
            ..Self::default()
        }
    }
}

/// Axis-aligned container the particles are clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        }
    }
}

impl Domain {
    pub fn contains(&self, p: Vec3, slack: f32) -> bool {
        p.cmpge(self.min - Vec3::splat(slack)).all() && p.cmple(self.max + Vec3::splat(slack)).all()
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Kernel support radius `h`; also the hash cell size.
    pub smoothing_radius: f32,
    /// `rho0`.
    pub rest_density: f32,
    /// `m`.
    pub particle_mass: f32,
    /// Added to the constraint denominator so isolated particles stay finite.
    pub epsilon: f32,
    /// XSPH coefficient `c`.
    pub viscosity: f32,
    /// Frame timestep before `time_scale` is applied.
    pub dt: f32,
    /// Multiplier on `dt` (the GUI time-scale slider).
    pub time_scale: f32,
    pub gravity: Vec3,
    /// Constraint sub-iterations per frame; fixed, not adaptive.
    pub solver_iterations: u32,
    pub max_particles: u32,
    pub hash_table_size: u32,
    /// Slots per hash bucket; further insertions are dropped.
    pub bucket_capacity: u32,
    /// Slots per neighbor list; further neighbors are dropped.
    pub max_neighbors: u32,
    pub gradient_kernel: GradientKernel,
    pub tensile: TensileCorrection,
    /// Largest `|Δq|` of a single sub-iteration, as a fraction of `h`.
    pub max_delta_ratio: f32,
    pub domain: Domain,
    /// Wall clamp jitter `ε`: walls move inward by up to this much per call.
    pub wall_jitter: f32,
}

impl Default for SimParams {
    fn default() -> Self {
        let smoothing_radius = 0.1;
        let rest_density = 1000.0;
        Self {
            smoothing_radius,
            rest_density,
            // One particle per (h/2)^3 of fluid at rest.
            particle_mass: rest_density * (0.5 * smoothing_radius as f32).powi(3),
            epsilon: 100.0,
            viscosity: 0.01,
            dt: 0.016,
            time_scale: 1.0,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            solver_iterations: 4,
            max_particles: 65_536,
            hash_table_size: 65_537,
            bucket_capacity: 32,
            max_neighbors: 48,
            gradient_kernel: GradientKernel::Poly6,
            tensile: TensileCorrection::default(),
            max_delta_ratio: 0.1,
            domain: Domain::default(),
            wall_jitter: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("{name} must be finite and positive, got {value}")]
    NotPositive { name: &'static str, value: f32 },

    #[error("{name} must be finite and non-negative, got {value}")]
    Negative { name: &'static str, value: f32 },

    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("domain min {min:?} must be strictly below max {max:?}")]
    EmptyDomain { min: Vec3, max: Vec3 },

    #[error("wall jitter {jitter} leaves no room inside the domain")]
    JitterTooLarge { jitter: f32 },
}

fn positive(name: &'static str, value: f32) -> Result<(), ParamError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParamError::NotPositive { name, value })
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ParamError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ParamError::Negative { name, value })
    }
}

fn in_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ParamError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ParamError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

impl SimParams {
    pub const MAX_SOLVER_ITERATIONS: u32 = 16;

    /// Parameters for a viscous, honey-like fluid.
    pub fn viscous() -> Self {
        Self {
            viscosity: 0.3,
            ..Self::default()
        }
    }

    /// Timestep actually integrated this frame.
    pub fn effective_dt(&self) -> f32 {
        self.dt * self.time_scale
    }

    /// Whether switching from `self` to `other` changes device buffer sizes.
    pub fn needs_reallocation(&self, other: &SimParams) -> bool {
        self.hash_table_size != other.hash_table_size
            || self.bucket_capacity != other.bucket_capacity
            || self.max_neighbors != other.max_neighbors
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        positive("smoothing_radius", self.smoothing_radius)?;
        positive("rest_density", self.rest_density)?;
        positive("particle_mass", self.particle_mass)?;
        positive("epsilon", self.epsilon)?;
        non_negative("viscosity", self.viscosity)?;
        positive("dt", self.dt)?;
        positive("time_scale", self.time_scale)?;
        if !self.gravity.is_finite() {
            return Err(ParamError::NotPositive {
                name: "gravity",
                value: f32::NAN,
            });
        }
        in_range(
            "solver_iterations",
            self.solver_iterations as f64,
            1.0,
            Self::MAX_SOLVER_ITERATIONS as f64,
        )?;
        in_range("max_particles", self.max_particles as f64, 1.0, u32::MAX as f64)?;
        in_range("hash_table_size", self.hash_table_size as f64, 1.0, u32::MAX as f64)?;
        in_range("bucket_capacity", self.bucket_capacity as f64, 1.0, 1024.0)?;
        in_range("max_neighbors", self.max_neighbors as f64, 1.0, 1024.0)?;
        non_negative("tensile.strength", self.tensile.strength)?;
        in_range(
            "tensile.reference_ratio",
            self.tensile.reference_ratio as f64,
            f64::MIN_POSITIVE,
            0.999,
        )?;
        in_range("tensile.exponent", self.tensile.exponent as f64, 1.0, 16.0)?;
        positive("max_delta_ratio", self.max_delta_ratio)?;

        let extent = self.domain.extent();
        if !(extent.cmpgt(Vec3::ZERO).all() && extent.is_finite()) {
            return Err(ParamError::EmptyDomain {
                min: self.domain.min,
                max: self.domain.max,
            });
        }
        non_negative("wall_jitter", self.wall_jitter)?;
        if 2.0 * self.wall_jitter >= extent.min_element() {
            return Err(ParamError::JitterTooLarge {
                jitter: self.wall_jitter,
            });
        }
        Ok(())
    }
}
