//! Box boundary resolution
//!
//! Clamps `q + Δq` into the domain, each wall pulled inward by a small random
//! amount so particles piling against a wall do not end up coincident.

use crate::math::HashRng;
use crate::params::Domain;
use glam::Vec3;

/// Returns the corrected `Δq` so that `q + Δq` lies inside the jittered box.
///
/// Only axes that leave the box are rewritten; the others return `delta`'s
/// component bit for bit.
pub fn resolve(domain: &Domain, jitter: f32, q: Vec3, delta: Vec3, rng: &mut HashRng) -> Vec3 {
    let target = q + delta;
    let mut corrected = delta;
    for axis in 0..3 {
        // Both walls draw on every axis so the stream stays aligned with the device.
        let lo = domain.min[axis] + jitter * rng.next_f32();
        let hi = domain.max[axis] - jitter * rng.next_f32();
        if target[axis] < lo {
            corrected[axis] = lo - q[axis];
        } else if target[axis] > hi {
            corrected[axis] = hi - q[axis];
        }
    }
    corrected
}
