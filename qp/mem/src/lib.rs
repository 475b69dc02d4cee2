#![no_std]
#![forbid(unsafe_code)]

//! # QP Memory Management
//!
//! Fixed-block event pools and the registry that hands out event objects
//! from them. Every piece of shared state sits behind
//! [`critical_section::Mutex`]; operations come in a task-context form that
//! enters the critical section itself and a `*_from_isr` form that runs
//! inside a critical section the caller already holds.

extern crate alloc;

pub mod context;
pub mod event;
pub mod pool;
pub mod registry;

pub use context::QMemContext;
pub use event::{EventAttr, EventHeader};
pub use pool::{EventBlock, QMPool, QMemoryPool};
pub use registry::{EventPools, MAX_EVENT_POOLS};

/// Memory pool statistics for debugging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QPoolStats {
    /// Total number of blocks in the pool
    pub total_blocks: usize,
    /// Number of free blocks currently available
    pub free_blocks: usize,
    /// Number of blocks currently in use
    pub used_blocks: usize,
    /// Minimum number of free blocks ever reached
    pub min_free_blocks: usize,
}

impl QPoolStats {
    pub const fn new(total_blocks: usize) -> Self {
        Self {
            total_blocks,
            free_blocks: total_blocks,
            used_blocks: 0,
            min_free_blocks: total_blocks,
        }
    }

    pub fn on_alloc(&mut self) {
        self.used_blocks += 1;
        self.free_blocks -= 1;
        if self.free_blocks < self.min_free_blocks {
            self.min_free_blocks = self.free_blocks;
        }
    }

    pub fn on_free(&mut self) {
        if self.used_blocks > 0 {
            self.used_blocks -= 1;
            self.free_blocks += 1;
        }
    }

    /// All blocks handed out
    pub const fn is_exhausted(&self) -> bool {
        self.free_blocks == 0
    }

    /// Utilization as a percentage (0-100)
    pub fn utilization(&self) -> u8 {
        if self.total_blocks == 0 {
            0
        } else {
            ((self.used_blocks * 100) / self.total_blocks) as u8
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QPoolStats {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "QPoolStats{{ total: {}, free: {}, used: {}, min_free: {} }}",
            self.total_blocks,
            self.free_blocks,
            self.used_blocks,
            self.min_free_blocks
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_low_watermark() {
        let mut stats = QPoolStats::new(4);
        stats.on_alloc();
        stats.on_alloc();
        stats.on_free();
        assert_eq!(stats.free_blocks, 3);
        assert_eq!(stats.used_blocks, 1);
        assert_eq!(stats.min_free_blocks, 2);
        assert_eq!(stats.utilization(), 25);
        assert!(!stats.is_exhausted());
    }
}
