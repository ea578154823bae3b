//! Smoothing kernels.
//!
//! `W(r) = C (1 - |r|²/h²)³` for `|r| < h`, with `C = 315 / (64 π h³)`.
//! Written in terms of `|r|/h`, this is the usual poly6 kernel, so `W(0) = C`.

use crate::params::GradientKernel;
use glam::Vec3;
use std::f32::consts::PI;

/// Distances below this are treated as coincident by the spiky gradient.
pub const MIN_DISTANCE: f32 = 1e-6;

/// Kernel coefficients for one smoothing radius, computed once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphKernel {
    h: f32,
    h2: f32,
    poly6: f32,
    poly6_grad: f32,
    spiky_grad: f32,
    gradient: GradientKernel,
}

impl SphKernel {
    pub fn new(h: f32, gradient: GradientKernel) -> Self {
        let poly6 = 315.0 / (64.0 * PI * h.powi(3));
        Self {
            h,
            h2: h * h,
            poly6,
            poly6_grad: -6.0 * poly6 / (h * h),
            spiky_grad: -45.0 / (PI * h.powi(6)),
            gradient,
        }
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.h
    }

    /// `W(0)`, the self contribution to density.
    #[inline]
    pub fn w_zero(&self) -> f32 {
        self.poly6
    }

    #[inline]
    pub fn w(&self, r: Vec3) -> f32 {
        self.w_sq(r.length_squared())
    }

    /// `W` evaluated from a squared distance.
    #[inline]
    pub fn w_sq(&self, r2: f32) -> f32 {
        if r2 >= self.h2 {
            return 0.0;
        }
        let b = 1.0 - r2 / self.h2;
        self.poly6 * b * b * b
    }

    /// Gradient selected by the parameters.
    #[inline]
    pub fn grad(&self, r: Vec3) -> Vec3 {
        match self.gradient {
            GradientKernel::Poly6 => self.poly6_gradient(r),
            GradientKernel::Spiky => self.spiky_gradient(r),
        }
    }

    /// `∇W(r) = -6C/h² (1 - |r|²/h²)² r`.
    #[inline]
    pub fn poly6_gradient(&self, r: Vec3) -> Vec3 {
        let r2 = r.length_squared();
        if r2 >= self.h2 {
            return Vec3::ZERO;
        }
        let b = 1.0 - r2 / self.h2;
        self.poly6_grad * b * b * r
    }

    /// `∇W(r) = -45/(π h⁶) (h - |r|)² r/|r|`.
    #[inline]
    pub fn spiky_gradient(&self, r: Vec3) -> Vec3 {
        let len = r.length();
        if len >= self.h || len < MIN_DISTANCE {
            return Vec3::ZERO;
        }
        let diff = self.h - len;
        self.spiky_grad * diff * diff * (r / len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> SphKernel {
        SphKernel::new(0.1, GradientKernel::Poly6)
    }

    #[test]
    fn test_w_zero_matches_coefficient() {
        let k = kernel();
        let expected = 315.0 / (64.0 * PI * 0.001);
        assert!((k.w(Vec3::ZERO) - expected).abs() / expected < 1e-5);
        assert_eq!(k.w(Vec3::ZERO), k.w_zero());
    }

    #[test]
    fn test_kernel_vanishes_outside_support() {
        let k = kernel();
        assert_eq!(k.w(Vec3::new(0.1, 0.0, 0.0)), 0.0);
        assert_eq!(k.w(Vec3::new(0.0, 0.2, 0.0)), 0.0);
        assert_eq!(k.grad(Vec3::new(0.0, 0.0, 0.15)), Vec3::ZERO);
        assert_eq!(k.spiky_gradient(Vec3::new(0.0, 0.0, 0.15)), Vec3::ZERO);
        assert!(k.w(Vec3::new(0.099, 0.0, 0.0)) > 0.0);
    }

    #[test]
    fn test_kernel_is_monotone_in_distance() {
        let k = kernel();
        let mut prev = k.w_zero();
        for step in 1..10 {
            let w = k.w(Vec3::X * (step as f32 * 0.01));
            assert!(w < prev);
            prev = w;
        }
    }

    #[test]
    fn test_gradients_point_towards_origin() {
        let k = kernel();
        let r = Vec3::new(0.03, 0.0, 0.0);
        assert!(k.poly6_gradient(r).x < 0.0);
        assert!(k.spiky_gradient(r).x < 0.0);
        assert_eq!(k.poly6_gradient(r).y, 0.0);
    }

    #[test]
    fn test_gradient_is_antisymmetric() {
        let k = kernel();
        let r = Vec3::new(0.02, -0.01, 0.04);
        assert_eq!(k.poly6_gradient(-r), -k.poly6_gradient(r));
    }

    #[test]
    fn test_spiky_guard_at_coincidence() {
        let k = SphKernel::new(0.1, GradientKernel::Spiky);
        assert_eq!(k.grad(Vec3::ZERO), Vec3::ZERO);
        assert_eq!(k.grad(Vec3::splat(1e-8)), Vec3::ZERO);
    }
}
