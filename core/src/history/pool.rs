//! Reusable delta buffers

use super::delta::DeltaPair;

/// Number of spare delta buffers kept by default
pub const DEFAULT_SPARE_DELTAS: usize = 64;

/// Pool of reusable delta buffers
///
/// Every submitted frame produces one delta and every evicted frame releases
/// one, so in steady state the rewind buffer never allocates on the tick path.
#[derive(Debug)]
pub struct DeltaPool {
    /// Spare buffers, cleared but keeping their capacity
    spares: Vec<Vec<DeltaPair>>,
    /// Maximum number of spares retained
    max_spares: usize,
}

impl DeltaPool {
    /// Create a pool that retains at most `max_spares` buffers
    pub fn new(max_spares: usize) -> Self {
        Self {
            spares: Vec::with_capacity(max_spares),
            max_spares,
        }
    }

    /// Acquire a buffer from the pool
    ///
    /// Allocates a fresh buffer if the pool is empty.
    pub fn acquire(&mut self) -> Vec<DeltaPair> {
        self.spares.pop().unwrap_or_default()
    }

    /// Return a buffer to the pool
    pub fn release(&mut self, mut delta: Vec<DeltaPair>) {
        if self.spares.len() < self.max_spares {
            delta.clear();
            self.spares.push(delta);
        }
    }

    /// Number of spare buffers
    pub fn available(&self) -> usize {
        self.spares.len()
    }

    /// Bytes held by spare buffers
    pub fn memory_usage(&self) -> usize {
        self.spares
            .iter()
            .map(|d| d.capacity() * std::mem::size_of::<DeltaPair>())
            .sum()
    }
}

impl Default for DeltaPool {
    fn default() -> Self {
        Self::new(DEFAULT_SPARE_DELTAS)
    }
}
