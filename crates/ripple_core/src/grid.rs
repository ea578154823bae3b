//! Spatial hash grid for neighbor queries.
//!
//! A fixed-size table of `table_size` buckets, each holding at most
//! `bucket_capacity` particle indices. Cells are `floor(p / h)` per axis and
//! are hashed into buckets, so distinct cells may share a bucket; callers
//! filter candidates by distance.
//!
//! Bucket counters keep counting past capacity. Stored entries never exceed
//! capacity, and the excess is what [`overflow_count`] reports.

use crate::params::SimParams;
use glam::{IVec3, Vec3};

const HASH_P1: u32 = 11_969;
const HASH_P2: u32 = 80_737;

/// Number of cells visited by a neighborhood query.
pub const NEIGHBORHOOD: usize = 27;

/// Geometry of the table, shared by the host grid and the device buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HashGridLayout {
    pub cell_size: f32,
    pub table_size: u32,
    pub bucket_capacity: u32,
}

impl HashGridLayout {
    pub fn from_params(params: &SimParams) -> Self {
        Self {
            cell_size: params.smoothing_radius,
            table_size: params.hash_table_size,
            bucket_capacity: params.bucket_capacity,
        }
    }

    /// Length of the bucket entry array.
    pub fn entry_slots(&self) -> usize {
        self.table_size as usize * self.bucket_capacity as usize
    }

    #[inline]
    pub fn cell_of(&self, position: Vec3) -> IVec3 {
        (position / self.cell_size).floor().as_ivec3()
    }

    /// `((x·P1 + y)·P2 + z) mod table_size` in wrapping u32 arithmetic.
    #[inline]
    pub fn bucket_of_cell(&self, cell: IVec3) -> u32 {
        let h = (cell.x as u32)
            .wrapping_mul(HASH_P1)
            .wrapping_add(cell.y as u32)
            .wrapping_mul(HASH_P2)
            .wrapping_add(cell.z as u32);
        h % self.table_size
    }

    #[inline]
    pub fn bucket_of(&self, position: Vec3) -> u32 {
        self.bucket_of_cell(self.cell_of(position))
    }

    /// Distinct buckets covering the 3×3×3 cells around `cell`.
    ///
    /// Returns the bucket array and how many leading entries are valid. A
    /// bucket reached by two cells through a collision appears once.
    pub fn neighborhood(&self, cell: IVec3) -> ([u32; NEIGHBORHOOD], usize) {
        let mut buckets = [0u32; NEIGHBORHOOD];
        let mut count = 0;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let bucket = self.bucket_of_cell(cell + IVec3::new(dx, dy, dz));
                    if !buckets[..count].contains(&bucket) {
                        buckets[count] = bucket;
                        count += 1;
                    }
                }
            }
        }
        (buckets, count)
    }

    /// Record `index` in its bucket. Returns false when the bucket was full
    /// and the index was dropped.
    pub fn insert(&self, counts: &mut [u32], entries: &mut [u32], index: u32, position: Vec3) -> bool {
        let bucket = self.bucket_of(position) as usize;
        let slot = counts[bucket];
        counts[bucket] = slot.saturating_add(1);
        if slot < self.bucket_capacity {
            entries[bucket * self.bucket_capacity as usize + slot as usize] = index;
            true
        } else {
            false
        }
    }
}

/// Total insertions dropped because their bucket was full.
pub fn overflow_count(counts: &[u32], bucket_capacity: u32) -> u64 {
    counts
        .iter()
        .map(|&c| c.saturating_sub(bucket_capacity) as u64)
        .sum()
}

/// Read-only view over bucket counters and entries.
#[derive(Debug, Clone, Copy)]
pub struct GridView<'a> {
    pub layout: HashGridLayout,
    pub counts: &'a [u32],
    pub entries: &'a [u32],
}

impl<'a> GridView<'a> {
    /// Stored entries of one bucket, at most `bucket_capacity`.
    pub fn bucket(&self, bucket: u32) -> &'a [u32] {
        let cap = self.layout.bucket_capacity as usize;
        let start = bucket as usize * cap;
        let len = (self.counts[bucket as usize] as usize).min(cap);
        &self.entries[start..start + len]
    }

    /// Visit every stored candidate in the neighborhood of `position`.
    pub fn for_each_candidate(&self, position: Vec3, mut f: impl FnMut(u32)) {
        let (buckets, count) = self.layout.neighborhood(self.layout.cell_of(position));
        for &bucket in &buckets[..count] {
            for &candidate in self.bucket(bucket) {
                f(candidate);
            }
        }
    }
}

/// Host-owned grid: the layout plus its two arrays.
#[derive(Debug, Clone)]
pub struct SpatialHashGrid {
    layout: HashGridLayout,
    counts: Vec<u32>,
    entries: Vec<u32>,
}

impl SpatialHashGrid {
    pub fn new(layout: HashGridLayout) -> Self {
        Self {
            layout,
            counts: vec![0; layout.table_size as usize],
            entries: vec![0; layout.entry_slots()],
        }
    }

    pub fn layout(&self) -> HashGridLayout {
        self.layout
    }

    pub fn clear(&mut self) {
        self.counts.fill(0);
    }

    pub fn insert(&mut self, index: u32, position: Vec3) -> bool {
        self.layout
            .insert(&mut self.counts, &mut self.entries, index, position)
    }

    pub fn rebuild(&mut self, positions: &[Vec3]) {
        self.clear();
        for (i, &p) in positions.iter().enumerate() {
            self.insert(i as u32, p);
        }
    }

    pub fn overflow_count(&self) -> u64 {
        overflow_count(&self.counts, self.layout.bucket_capacity)
    }

    pub fn view(&self) -> GridView<'_> {
        GridView {
            layout: self.layout,
            counts: &self.counts,
            entries: &self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(table_size: u32, bucket_capacity: u32) -> HashGridLayout {
        HashGridLayout {
            cell_size: 0.1,
            table_size,
            bucket_capacity,
        }
    }

    #[test]
    fn test_cell_floors_negative_coordinates() {
        let l = layout(97, 4);
        assert_eq!(l.cell_of(Vec3::new(0.05, -0.05, 0.25)), IVec3::new(0, -1, 2));
    }

    #[test]
    fn test_bucket_hash_constants() {
        let l = layout(1_000_003, 4);
        let expected = ((1u32 * 11_969 + 2) * 80_737 + 3) % 1_000_003;
        assert_eq!(l.bucket_of_cell(IVec3::new(1, 2, 3)), expected);
        // Negative cells wrap rather than panic.
        assert!(l.bucket_of_cell(IVec3::new(-5, -7, -9)) < 1_000_003);
    }

    #[test]
    fn test_neighborhood_dedupes_collisions() {
        let (_, count) = layout(1, 4).neighborhood(IVec3::ZERO);
        assert_eq!(count, 1);
        let (buckets, count) = layout(100_003, 4).neighborhood(IVec3::ZERO);
        assert_eq!(count, NEIGHBORHOOD);
        for (i, b) in buckets.iter().enumerate() {
            assert!(!buckets[i + 1..].contains(b));
        }
    }

    #[test]
    fn test_full_bucket_drops_without_panic() {
        let mut grid = SpatialHashGrid::new(layout(13, 2));
        let p = Vec3::splat(0.05);
        assert!(grid.insert(0, p));
        assert!(grid.insert(1, p));
        assert!(!grid.insert(2, p));
        assert!(!grid.insert(3, p));
        assert_eq!(grid.overflow_count(), 2);

        let bucket = grid.layout().bucket_of(p);
        assert_eq!(grid.view().bucket(bucket), &[0, 1]);

        let mut seen = Vec::new();
        grid.view().for_each_candidate(p, |j| seen.push(j));
        assert!(!seen.contains(&2));
        assert!(!seen.contains(&3));
    }

    #[test]
    fn test_clear_empties_buckets() {
        let mut grid = SpatialHashGrid::new(layout(13, 2));
        grid.rebuild(&[Vec3::ZERO, Vec3::splat(0.5)]);
        grid.clear();
        assert_eq!(grid.overflow_count(), 0);
        let mut seen = 0;
        grid.view().for_each_candidate(Vec3::ZERO, |_| seen += 1);
        assert_eq!(seen, 0);
    }
}
