//! Velocity reconstruction
//!
//! After the constraint iterations: `v = (q - p) / dt`, the vorticity
//! estimate, the confinement hook and XSPH smoothing. All kernels are
//! evaluated at the predicted positions `q`, the positions about to be
//! committed.

use crate::neighbors::NeighborView;
use crate::params::SimParams;
use crate::sph::SphKernel;
use glam::Vec3;

/// Flag bit: the XSPH weights summed above one and were renormalized.
pub const FLAG_VISCOSITY_CLAMPED: u32 = 1 << 0;

#[inline]
pub fn reconstruct(p: Vec3, q: Vec3, dt: f32) -> Vec3 {
    (q - p) / dt
}

/// `ω_i = Σ_j (v_j - v_i) × ∇W(q_i - q_j)`.
pub fn vorticity(kernel: &SphKernel, neighbors: &NeighborView<'_>, q: &[Vec3], v: &[Vec3], i: usize) -> Vec3 {
    let (qi, vi) = (q[i], v[i]);
    neighbors.of(i).iter().fold(Vec3::ZERO, |acc, &j| {
        let j = j as usize;
        acc + (v[j] - vi).cross(kernel.grad(qi - q[j]))
    })
}

/// XSPH blend. Returns the smoothed velocity and the particle's flag bits.
///
/// `α_j = c W(q_i - q_j) / W(0)`. When `Σα > 1` the weights are scaled to sum
/// to one, so the result is always a convex combination of the inputs.
pub fn xsph(
    kernel: &SphKernel,
    viscosity: f32,
    neighbors: &NeighborView<'_>,
    q: &[Vec3],
    v: &[Vec3],
    i: usize,
) -> (Vec3, u32) {
    let (qi, vi) = (q[i], v[i]);
    let scale = viscosity / kernel.w_zero();

    let mut weight_sum = 0.0;
    let mut weighted = Vec3::ZERO;
    for &j in neighbors.of(i) {
        let alpha = scale * kernel.w(qi - q[j as usize]);
        weight_sum += alpha;
        weighted += alpha * v[j as usize];
    }

    if weight_sum > 1.0 {
        (weighted / weight_sum, FLAG_VISCOSITY_CLAMPED)
    } else {
        (weighted + (1.0 - weight_sum) * vi, 0)
    }
}

/// Everything a confinement model may read.
#[derive(Debug, Clone, Copy)]
pub struct ConfinementInput<'a> {
    pub positions: &'a [Vec3],
    pub vorticity: &'a [Vec3],
    pub params: &'a SimParams,
    pub dt: f32,
}

/// Extension point for vorticity confinement.
///
/// Runs on the host between the vorticity estimate and XSPH, with read access
/// to the curl and write access to the reconstructed velocities.
pub trait VorticityConfinement: Send {
    /// Inactive models are skipped entirely, including the device round trip.
    fn is_active(&self) -> bool {
        true
    }

    fn apply(&mut self, input: &ConfinementInput<'_>, velocities: &mut [Vec3]);
}

/// Computes nothing; the curl is still estimated and exposed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConfinement;

impl VorticityConfinement for NoConfinement {
    fn is_active(&self) -> bool {
        false
    }

    fn apply(&mut self, _input: &ConfinementInput<'_>, _velocities: &mut [Vec3]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::GradientKernel;

    fn kernel() -> SphKernel {
        SphKernel::new(0.1, GradientKernel::Poly6)
    }

    fn view<'a>(counts: &'a [u32], indices: &'a [u32], capacity: u32) -> NeighborView<'a> {
        NeighborView {
            capacity,
            counts,
            indices,
        }
    }

    #[test]
    fn test_reconstruct() {
        let v = reconstruct(Vec3::ZERO, Vec3::new(0.0, -0.5, 0.0), 0.5);
        assert_eq!(v, Vec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_xsph_without_neighbors_keeps_velocity() {
        let q = [Vec3::ZERO];
        let v = [Vec3::new(1.0, 2.0, 3.0)];
        let (out, flags) = xsph(&kernel(), 0.5, &view(&[0], &[0; 4], 4), &q, &v, 0);
        assert_eq!(out, v[0]);
        assert_eq!(flags, 0);
    }

    #[test]
    fn test_xsph_large_coefficient_is_convex() {
        // Coincident neighbors with c = 1 give Σα = 3 > 1.
        let q = [Vec3::ZERO; 4];
        let v = [
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let counts = [3, 0, 0, 0];
        let indices = [1, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let (out, flags) = xsph(&kernel(), 1.0, &view(&counts, &indices, 3), &q, &v, 0);
        assert_eq!(flags, FLAG_VISCOSITY_CLAMPED);
        let third = 1.0 / 3.0;
        assert!((out - Vec3::splat(third)).length() < 1e-6);
        let bounds = (Vec3::ZERO, Vec3::ONE);
        assert!(out.cmpge(bounds.0).all() && out.cmple(bounds.1).all());
    }

    #[test]
    fn test_xsph_small_coefficient_blends() {
        let q = [Vec3::ZERO, Vec3::ZERO];
        let v = [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)];
        let counts = [1, 0];
        let indices = [1, 0];
        let (out, flags) = xsph(&kernel(), 0.25, &view(&counts, &indices, 1), &q, &v, 0);
        assert_eq!(flags, 0);
        assert!((out.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_velocity_has_no_curl() {
        let q = [Vec3::ZERO, Vec3::new(0.03, 0.01, 0.0)];
        let v = [Vec3::ONE, Vec3::ONE];
        let counts = [1, 1];
        let indices = [1, 0];
        let w = vorticity(&kernel(), &view(&counts, &indices, 1), &q, &v, 0);
        assert_eq!(w, Vec3::ZERO);
    }

    #[test]
    fn test_no_confinement_is_inactive() {
        let mut model = NoConfinement;
        assert!(!model.is_active());
        let params = SimParams::default();
        let mut velocities = vec![Vec3::X];
        model.apply(
            &ConfinementInput {
                positions: &[Vec3::ZERO],
                vorticity: &[Vec3::Z],
                params: &params,
                dt: 0.01,
            },
            &mut velocities,
        );
        assert_eq!(velocities, vec![Vec3::X]);
    }
}
