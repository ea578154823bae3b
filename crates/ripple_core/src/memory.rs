//! Device allocation bookkeeping
//!
//! Every backend keeps one ledger of its live buffers so that teardown can
//! prove each allocation was released exactly once.

use crate::backend::{BackendError, BufferId};

#[derive(Debug, Default)]
pub struct AllocationLedger {
    live: Vec<(BufferId, usize)>,
    peak_bytes: usize,
    total_allocations: u64,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allocation(&mut self, id: BufferId, bytes: usize) -> Result<(), BackendError> {
        if self.is_live(id) {
            return Err(BackendError::AlreadyAllocated(id));
        }
        self.live.push((id, bytes));
        self.total_allocations += 1;
        self.peak_bytes = self.peak_bytes.max(self.live_bytes());
        Ok(())
    }

    pub fn record_release(&mut self, id: BufferId) -> Result<usize, BackendError> {
        match self.live.iter().position(|(live, _)| *live == id) {
            Some(idx) => Ok(self.live.swap_remove(idx).1),
            None => Err(BackendError::DoubleRelease(id)),
        }
    }

    pub fn is_live(&self, id: BufferId) -> bool {
        self.live.iter().any(|(live, _)| *live == id)
    }

    pub fn size_of(&self, id: BufferId) -> Option<usize> {
        self.live
            .iter()
            .find(|(live, _)| *live == id)
            .map(|(_, bytes)| *bytes)
    }

    pub fn live_bytes(&self) -> usize {
        self.live.iter().map(|(_, bytes)| bytes).sum()
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_returns_size() {
        let mut ledger = AllocationLedger::new();
        ledger.record_allocation(BufferId::Positions, 64).unwrap();
        ledger.record_allocation(BufferId::Lambdas, 16).unwrap();
        assert_eq!(ledger.live_bytes(), 80);
        assert_eq!(ledger.record_release(BufferId::Positions), Ok(64));
        assert_eq!(ledger.live_bytes(), 16);
        assert_eq!(ledger.peak_bytes(), 80);
    }

    #[test]
    fn test_double_release_is_an_error() {
        let mut ledger = AllocationLedger::new();
        ledger.record_allocation(BufferId::Flags, 4).unwrap();
        ledger.record_release(BufferId::Flags).unwrap();
        assert_eq!(
            ledger.record_release(BufferId::Flags),
            Err(BackendError::DoubleRelease(BufferId::Flags))
        );
    }

    #[test]
    fn test_duplicate_allocation_is_an_error() {
        let mut ledger = AllocationLedger::new();
        ledger.record_allocation(BufferId::Deltas, 4).unwrap();
        assert!(ledger.record_allocation(BufferId::Deltas, 4).is_err());
        assert_eq!(ledger.total_allocations(), 1);
    }
}
