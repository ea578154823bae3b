//! Deterministic math utilities
//!
//! Re-exports glam with the packing helpers and the stateless hash RNG shared
//! by every backend. The WGSL kernels in `ripple_gpu` carry a line-for-line
//! copy of [`pcg_hash`] so CPU and GPU runs draw identical jitter.

pub use glam::*;

/// Device-side layout of a 3-vector: xyz plus one padding lane.
pub type Packed3 = [f32; 4];

#[inline]
pub fn pack(v: Vec3) -> Packed3 {
    [v.x, v.y, v.z, 0.0]
}

#[inline]
pub fn unpack(p: Packed3) -> Vec3 {
    Vec3::new(p[0], p[1], p[2])
}

/// PCG-style integer hash (Jarzynski & Olano, "Hash Functions for GPU Rendering").
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Deterministic random stream keyed by (particle, frame, iteration).
///
/// Stateless across calls: the same key always yields the same stream, which
/// lets per-particle kernels draw jitter without shared RNG state.
#[derive(Debug, Clone, Copy)]
pub struct HashRng {
    state: u32,
}

impl HashRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn for_particle(particle: u32, frame: u32, iteration: u32) -> Self {
        Self::new(pcg_hash(particle ^ pcg_hash(frame ^ pcg_hash(iteration))))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = pcg_hash(self.state);
        self.state
    }

    /// Uniform in `[0, 1)`, 24 bits of precision.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / 16_777_216.0
    }
}
