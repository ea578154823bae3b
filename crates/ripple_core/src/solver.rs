//! Density-constraint solver
//!
//! Per-particle pieces of one PBF sub-iteration. Each function reads shared
//! arrays and returns the value for particle `i`, so backends can drive them
//! from a serial loop or a parallel one without changing the math.

use crate::backend::FrameUniforms;
use crate::neighbors::NeighborView;
use crate::params::{GradientKernel, SimParams};
use crate::sph::SphKernel;
use glam::Vec3;

/// Per-frame constants derived from [`SimParams`].
#[derive(Debug, Clone, Copy)]
pub struct ConstraintParams {
    pub kernel: SphKernel,
    pub rest_density: f32,
    pub inv_rest_density: f32,
    pub mass: f32,
    pub epsilon: f32,
    pub tensile_k: f32,
    pub tensile_n: f32,
    /// `1 / W(Δq_ref)`; zero when the term is disabled.
    pub inv_w_ref: f32,
    pub max_delta: f32,
}

impl ConstraintParams {
    pub fn from_params(params: &SimParams) -> Self {
        Self::from_uniforms(&FrameUniforms::new(params, 0, 0))
    }

    pub fn from_uniforms(u: &FrameUniforms) -> Self {
        let h = u.smoothing_radius;
        let kernel = SphKernel::new(h, GradientKernel::from_code(u.gradient_kernel));
        let w_ref = kernel.w(Vec3::X * (u.tensile_ratio * h));
        let inv_w_ref = if w_ref > 0.0 { 1.0 / w_ref } else { 0.0 };
        Self {
            kernel,
            rest_density: u.rest_density,
            inv_rest_density: 1.0 / u.rest_density,
            mass: u.particle_mass,
            epsilon: u.epsilon,
            tensile_k: u.tensile_k,
            tensile_n: u.tensile_n,
            inv_w_ref,
            max_delta: u.max_delta,
        }
    }

    /// Artificial pressure `s_corr = -k (W(r) / W(Δq_ref))^n`.
    #[inline]
    pub fn tensile_correction(&self, r: Vec3) -> f32 {
        if self.tensile_k == 0.0 {
            return 0.0;
        }
        -self.tensile_k * (self.kernel.w(r) * self.inv_w_ref).powf(self.tensile_n)
    }
}

/// `ρ_i = m Σ_j W(q_i - q_j)` over the neighbors of `i`, which never include `i`.
pub fn density(c: &ConstraintParams, neighbors: &NeighborView<'_>, q: &[Vec3], i: usize) -> f32 {
    let qi = q[i];
    let sum: f32 = neighbors
        .of(i)
        .iter()
        .map(|&j| c.kernel.w(qi - q[j as usize]))
        .sum();
    c.mass * sum
}

/// Returns `(λ_i, ρ_i)`.
pub fn lambda(c: &ConstraintParams, neighbors: &NeighborView<'_>, q: &[Vec3], i: usize) -> (f32, f32) {
    let rho = density(c, neighbors, q, i);
    let constraint = rho * c.inv_rest_density - 1.0;

    let qi = q[i];
    let mut grad_sum = Vec3::ZERO;
    let mut grad_sq_sum = 0.0;
    for &j in neighbors.of(i) {
        let grad = c.kernel.grad(qi - q[j as usize]) * c.inv_rest_density;
        grad_sq_sum += grad.length_squared();
        grad_sum += grad;
    }

    let denominator = grad_sq_sum + grad_sum.length_squared() + c.epsilon;
    (-constraint / denominator, rho)
}

/// `Δq_i = (1/ρ0) Σ_j (λ_i + λ_j + s_corr) ∇W(q_i - q_j)`, clamped to `max_delta`.
pub fn position_delta(
    c: &ConstraintParams,
    neighbors: &NeighborView<'_>,
    q: &[Vec3],
    lambdas: &[f32],
    i: usize,
) -> Vec3 {
    let qi = q[i];
    let li = lambdas[i];
    let mut delta = Vec3::ZERO;
    for &j in neighbors.of(i) {
        let r = qi - q[j as usize];
        let scale = li + lambdas[j as usize] + c.tensile_correction(r);
        delta += scale * c.kernel.grad(r);
    }
    clamp_length(delta * c.inv_rest_density, c.max_delta)
}

#[inline]
fn clamp_length(v: Vec3, max: f32) -> Vec3 {
    let len2 = v.length_squared();
    if len2 > max * max {
        v * (max / len2.sqrt())
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{HashGridLayout, SpatialHashGrid};
    use crate::neighbors::NeighborTable;
    use crate::params::TensileCorrection;

    fn setup(q: &[Vec3], params: &SimParams) -> NeighborTable {
        let mut grid = SpatialHashGrid::new(HashGridLayout::from_params(params));
        grid.rebuild(q);
        let mut table = NeighborTable::new(q.len(), params.max_neighbors);
        table.build(&grid.view(), q);
        table
    }

    #[test]
    fn test_isolated_particle_has_zero_density() {
        let params = SimParams::default();
        let c = ConstraintParams::from_params(&params);
        let q = vec![Vec3::ZERO, Vec3::new(0.5, 0.0, 0.0)];
        let table = setup(&q, &params);
        assert_eq!(table.view().of(0).len(), 0);
        assert_eq!(density(&c, &table.view(), &q, 0), 0.0);
    }

    #[test]
    fn test_density_sums_neighbors_only() {
        let params = SimParams::default();
        let c = ConstraintParams::from_params(&params);
        let q = vec![Vec3::ZERO, Vec3::new(0.05, 0.0, 0.0)];
        let table = setup(&q, &params);
        let expected = params.particle_mass * c.kernel.w(Vec3::new(0.05, 0.0, 0.0));
        assert!((density(&c, &table.view(), &q, 0) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_equilibrium_is_idempotent() {
        // Two particles whose density equals rest density exactly: C = 0,
        // λ = 0 and, with the tensile term off, Δq = 0.
        let mut params = SimParams {
            tensile: TensileCorrection::disabled(),
            ..SimParams::default()
        };
        let q = vec![Vec3::ZERO, Vec3::new(0.05, 0.0, 0.0)];
        let table = setup(&q, &params);
        params.rest_density = density(&ConstraintParams::from_params(&params), &table.view(), &q, 0);

        let c = ConstraintParams::from_params(&params);
        let lambdas: Vec<f32> = (0..2).map(|i| lambda(&c, &table.view(), &q, i).0).collect();
        for (i, &l) in lambdas.iter().enumerate() {
            assert!(l.abs() < 1e-6, "lambda {i} = {l}");
            let d = position_delta(&c, &table.view(), &q, &lambdas, i);
            assert!(d.length() < 1e-6, "delta {i} = {d}");
        }
    }

    #[test]
    fn test_compressed_pair_is_pushed_apart() {
        let params = SimParams {
            tensile: TensileCorrection::disabled(),
            rest_density: 1.0,
            ..SimParams::default()
        };
        let c = ConstraintParams::from_params(&params);
        let q = vec![Vec3::ZERO, Vec3::new(0.02, 0.0, 0.0)];
        let table = setup(&q, &params);
        let lambdas: Vec<f32> = (0..2).map(|i| lambda(&c, &table.view(), &q, i).0).collect();
        assert!(lambdas[0] < 0.0);

        let d0 = position_delta(&c, &table.view(), &q, &lambdas, 0);
        let d1 = position_delta(&c, &table.view(), &q, &lambdas, 1);
        assert!(d0.x < 0.0 && d1.x > 0.0);
        assert!((d0 + d1).length() < 1e-6);
        assert_eq!(d0.y, 0.0);
        assert_eq!(d0.z, 0.0);
    }

    #[test]
    fn test_delta_is_clamped() {
        let params = SimParams {
            rest_density: 1e-3,
            ..SimParams::default()
        };
        let c = ConstraintParams::from_params(&params);
        let q = vec![Vec3::ZERO, Vec3::new(0.01, 0.0, 0.0)];
        let table = setup(&q, &params);
        let lambdas: Vec<f32> = (0..2).map(|i| lambda(&c, &table.view(), &q, i).0).collect();
        let d = position_delta(&c, &table.view(), &q, &lambdas, 0);
        assert!(d.length() <= c.max_delta * 1.0001);
    }

    #[test]
    fn test_tensile_correction_at_reference_distance() {
        let params = SimParams::default();
        let c = ConstraintParams::from_params(&params);
        let s = c.tensile_correction(Vec3::X * (0.2 * params.smoothing_radius));
        assert!((s + params.tensile.strength).abs() < 1e-5);
        assert_eq!(c.tensile_correction(Vec3::X), 0.0);
    }
}
