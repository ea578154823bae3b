//! Initial particle layouts
//!
//! Seeding uses `rand` with an explicit seed so every layout is reproducible.

use crate::params::Domain;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Largest jitter applied to the x coordinate of block particles.
pub const BLOCK_JITTER: f32 = 1e-3;

/// `count` particles drawn from an isotropic Gaussian centred on the domain,
/// clamped inside it.
pub fn gaussian_cloud(count: usize, std_dev: f32, domain: &Domain, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centre = (domain.min + domain.max) * 0.5;
    (0..count)
        .map(|_| {
            let offset = Vec3::new(
                rng.sample(StandardNormal),
                rng.sample(StandardNormal),
                rng.sample(StandardNormal),
            ) * std_dev;
            (centre + offset).clamp(domain.min, domain.max)
        })
        .collect()
}

/// Regular grid of points from `min` towards `max` with the given spacing.
pub fn lattice(min: Vec3, max: Vec3, spacing: f32) -> Vec<Vec3> {
    if spacing <= 0.0 {
        return Vec::new();
    }
    let steps = ((max - min) / spacing).floor().max(Vec3::ZERO).as_uvec3() + 1;
    let mut points = Vec::with_capacity((steps.x * steps.y * steps.z) as usize);
    for ix in 0..steps.x {
        for iy in 0..steps.y {
            for iz in 0..steps.z {
                points.push(min + Vec3::new(ix as f32, iy as f32, iz as f32) * spacing);
            }
        }
    }
    points
}

/// A block of fluid standing on the floor of the domain, ready to collapse.
///
/// The block spans `±half_width` in x and z around the domain centre line and
/// `2·half_width` upward from `2h` above the floor, with particles `spacing`
/// apart. Each x coordinate is nudged by up to [`BLOCK_JITTER`] to break the
/// lattice symmetry.
pub fn dam_block(domain: &Domain, h: f32, spacing: f32, half_width: f32, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centre = (domain.min + domain.max) * 0.5;
    let min = Vec3::new(centre.x - half_width, domain.min.y + 2.0 * h, centre.z - half_width);
    // h/10 of slack so the far face is not lost to rounding.
    let max = min + Vec3::splat(2.0 * half_width + 0.1 * h);
    lattice(min, max, spacing)
        .into_iter()
        .map(|p| {
            let jitter = BLOCK_JITTER * rng.random::<f32>();
            (p + Vec3::X * jitter).clamp(domain.min, domain.max)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_cloud_is_seeded_and_contained() {
        let domain = Domain::default();
        let a = gaussian_cloud(500, 0.3, &domain, 7);
        let b = gaussian_cloud(500, 0.3, &domain, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|p| domain.contains(*p, 0.0)));
        let mean = a.iter().copied().sum::<Vec3>() / a.len() as f32;
        assert!(mean.length() < 0.1);
    }

    #[test]
    fn test_gaussian_cloud_spread_matches_std_dev() {
        let domain = Domain::default();
        let cloud = gaussian_cloud(4000, 0.2, &domain, 11);
        let var = cloud.iter().map(|p| p.x * p.x).sum::<f32>() / cloud.len() as f32;
        assert!((var.sqrt() - 0.2).abs() < 0.02, "std dev {}", var.sqrt());
    }

    #[test]
    fn test_lattice_counts() {
        let points = lattice(Vec3::ZERO, Vec3::new(1.0, 0.5, 0.0), 0.5);
        assert_eq!(points.len(), 3 * 2);
        assert_eq!(points[0], Vec3::ZERO);
        assert!(lattice(Vec3::ZERO, Vec3::ONE, 0.0).is_empty());
    }

    #[test]
    fn test_dam_block_sits_above_floor() {
        let domain = Domain::default();
        let h = 0.1;
        let block = dam_block(&domain, h, 0.9 * h, 2.5 * 0.9 * h, 3);
        assert_eq!(block.len(), 6 * 6 * 6);
        assert!(block.iter().all(|p| p.y >= domain.min.y + 2.0 * h - 1e-6));
        assert!(block.iter().all(|p| domain.contains(*p, 0.0)));
    }
}
