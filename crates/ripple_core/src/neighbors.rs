//! Fixed-capacity neighbor lists
//!
//! Each particle owns `max_neighbors` slots. The per-particle counter records
//! how many neighbors were *found*, which may exceed the capacity; readers
//! clamp with `min(found, capacity)`.
//!
//! Lists are built once per frame from the predicted positions `q`, not the
//! committed positions `p`.

use crate::grid::GridView;
use glam::Vec3;

/// Fill `slots` with the neighbors of particle `i` and return the number found.
///
/// A neighbor is any stored grid candidate `j != i` with `|q_i - q_j| < h`.
/// Only the first `slots.len()` are written.
pub fn gather(grid: &GridView<'_>, positions: &[Vec3], i: usize, slots: &mut [u32]) -> u32 {
    let qi = positions[i];
    let h2 = grid.layout.cell_size * grid.layout.cell_size;
    let mut found = 0u32;
    grid.for_each_candidate(qi, |j| {
        if j as usize == i {
            return;
        }
        if qi.distance_squared(positions[j as usize]) < h2 {
            if let Some(slot) = slots.get_mut(found as usize) {
                *slot = j;
            }
            found += 1;
        }
    });
    found
}

/// Number of lists that hit their capacity and dropped neighbors.
pub fn truncated_lists(counts: &[u32], capacity: u32) -> u64 {
    counts.iter().filter(|&&c| c > capacity).count() as u64
}

/// Read-only view over the neighbor arrays.
#[derive(Debug, Clone, Copy)]
pub struct NeighborView<'a> {
    pub capacity: u32,
    pub counts: &'a [u32],
    pub indices: &'a [u32],
}

impl<'a> NeighborView<'a> {
    #[inline]
    pub fn of(&self, i: usize) -> &'a [u32] {
        let cap = self.capacity as usize;
        let len = (self.counts[i] as usize).min(cap);
        &self.indices[i * cap..i * cap + len]
    }
}

/// Host-owned neighbor table.
#[derive(Debug, Clone)]
pub struct NeighborTable {
    capacity: u32,
    counts: Vec<u32>,
    indices: Vec<u32>,
}

impl NeighborTable {
    pub fn new(particles: usize, capacity: u32) -> Self {
        Self {
            capacity,
            counts: vec![0; particles],
            indices: vec![0; particles * capacity as usize],
        }
    }

    pub fn build(&mut self, grid: &GridView<'_>, positions: &[Vec3]) {
        let cap = self.capacity as usize;
        for (i, (count, slots)) in self
            .counts
            .iter_mut()
            .zip(self.indices.chunks_mut(cap))
            .enumerate()
        {
            *count = gather(grid, positions, i, slots);
        }
    }

    pub fn neighbors(&self, i: usize) -> &[u32] {
        self.view().of(i)
    }

    /// Neighbors found for `i`, including any that did not fit.
    pub fn found(&self, i: usize) -> u32 {
        self.counts[i]
    }

    pub fn truncated_lists(&self) -> u64 {
        truncated_lists(&self.counts, self.capacity)
    }

    pub fn view(&self) -> NeighborView<'_> {
        NeighborView {
            capacity: self.capacity,
            counts: &self.counts,
            indices: &self.indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{HashGridLayout, SpatialHashGrid};

    fn grid_for(positions: &[Vec3], table_size: u32, bucket_capacity: u32) -> SpatialHashGrid {
        let mut grid = SpatialHashGrid::new(HashGridLayout {
            cell_size: 0.1,
            table_size,
            bucket_capacity,
        });
        grid.rebuild(positions);
        grid
    }

    #[test]
    fn test_self_is_never_a_neighbor() {
        let positions = vec![Vec3::ZERO, Vec3::new(0.05, 0.0, 0.0), Vec3::new(0.0, 0.05, 0.0)];
        let grid = grid_for(&positions, 1, 8);
        let mut table = NeighborTable::new(positions.len(), 8);
        table.build(&grid.view(), &positions);
        for i in 0..positions.len() {
            assert!(!table.neighbors(i).contains(&(i as u32)));
            assert_eq!(table.neighbors(i).len(), 2);
        }
    }

    #[test]
    fn test_radius_cutoff_is_strict() {
        let positions = vec![Vec3::ZERO, Vec3::new(0.1, 0.0, 0.0), Vec3::new(0.099, 0.0, 0.0)];
        let grid = grid_for(&positions, 101, 8);
        let mut table = NeighborTable::new(positions.len(), 8);
        table.build(&grid.view(), &positions);
        assert_eq!(table.neighbors(0), &[2]);
    }

    #[test]
    fn test_relation_need_not_be_symmetric() {
        // Particle 0 shares a full bucket with 1..=3; 3 is dropped from the grid,
        // so 3 still sees 0 but 0 never sees 3.
        let positions = vec![
            Vec3::splat(0.01),
            Vec3::splat(0.02),
            Vec3::splat(0.03),
            Vec3::splat(0.04),
        ];
        let grid = grid_for(&positions, 1, 3);
        let mut table = NeighborTable::new(positions.len(), 8);
        table.build(&grid.view(), &positions);
        assert!(!table.neighbors(0).contains(&3));
        assert!(table.neighbors(3).contains(&0));
    }

    #[test]
    fn test_truncation_is_counted() {
        let positions: Vec<Vec3> = (0..6).map(|i| Vec3::X * (i as f32 * 0.001)).collect();
        let grid = grid_for(&positions, 7, 16);
        let mut table = NeighborTable::new(positions.len(), 3);
        table.build(&grid.view(), &positions);
        assert_eq!(table.found(0), 5);
        assert_eq!(table.neighbors(0).len(), 3);
        assert_eq!(table.truncated_lists(), 6);
    }
}
