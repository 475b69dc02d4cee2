//! Fixed-block event pool
//!
//! A pool is an arena of equally sized blocks. A block is addressed by its
//! index plus the generation it had when it was allocated; the generation is
//! bumped on every free, so a handle that outlived its event no longer
//! matches and is rejected instead of touching the block's next occupant.
//!
//! [`EventPools`](crate::EventPools) only talks to pools through the
//! [`QMemoryPool`] trait, so an application can hand it any fixed-block
//! allocator. Pools are not synchronized themselves; the registry owns them
//! and serializes every call under the critical section.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use qp_core::{BlockId, QError, QResult, QSignal};

use crate::event::EventHeader;
use crate::QPoolStats;

/// One allocated block as seen by the registry: the event header it keeps
/// and the payload storage, `block_size` bytes long.
pub struct EventBlock<'a> {
    pub header: &'a mut EventHeader,
    pub data: &'a mut [u8],
}

/// Fixed-block allocator the event registry draws from.
pub trait QMemoryPool: Send {
    /// Payload bytes per block
    fn block_size(&self) -> usize;

    /// Take a block, or `None` when the pool is exhausted.
    fn alloc(&mut self) -> Option<BlockId>;

    /// Return a block. A stale or already freed handle is `ObjectInvalid`.
    fn free(&mut self, id: BlockId) -> QResult<()>;

    fn stats(&self) -> QPoolStats;

    /// Header and payload of an allocated block, `ObjectInvalid` otherwise.
    fn block_mut(&mut self, id: BlockId) -> QResult<EventBlock<'_>>;
}

impl core::fmt::Debug for dyn QMemoryPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QMemoryPool")
            .field("block_size", &self.block_size())
            .finish_non_exhaustive()
    }
}

struct Block {
    generation: u16,
    used: bool,
    header: EventHeader,
    data: Box<[u8]>,
}

/// Pool of `n_blocks` blocks of `block_size` payload bytes each.
pub struct QMPool {
    block_size: usize,
    blocks: Vec<Block>,
    free: Vec<u16>,
    stats: QPoolStats,
}

impl QMPool {
    /// Preallocate the pool storage.
    ///
    /// Both `block_size` and `n_blocks` must be non-zero and fit in `u16`.
    pub fn new(block_size: usize, n_blocks: usize) -> QResult<Self> {
        if block_size == 0
            || n_blocks == 0
            || block_size > u16::MAX as usize
            || n_blocks > u16::MAX as usize
        {
            return Err(QError::InvalidSize);
        }

        let blocks = (0..n_blocks)
            .map(|_| Block {
                generation: 0,
                used: false,
                header: EventHeader::constant(QSignal::EMPTY),
                data: vec![0u8; block_size].into_boxed_slice(),
            })
            .collect();
        // popped from the back, so block 0 goes out first
        let free = (0..n_blocks as u16).rev().collect();

        Ok(Self {
            block_size,
            blocks,
            free,
            stats: QPoolStats::new(n_blocks),
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn stats(&self) -> QPoolStats {
        self.stats
    }

    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    /// Take a block, or `None` when the pool is exhausted.
    pub fn alloc(&mut self) -> Option<BlockId> {
        let index = self.free.pop()?;
        let block = &mut self.blocks[index as usize];
        block.used = true;
        block.data.fill(0);
        self.stats.on_alloc();
        Some(BlockId::new(index, block.generation))
    }

    /// Return a block. A stale or already freed handle is `ObjectInvalid`.
    pub fn free(&mut self, id: BlockId) -> QResult<()> {
        let block = self.slot_mut(id)?;
        block.used = false;
        block.generation = block.generation.wrapping_add(1);
        self.free.push(id.index);
        self.stats.on_free();
        Ok(())
    }

    /// Whether `id` designates a block that is currently allocated.
    pub fn is_live(&self, id: BlockId) -> bool {
        self.slot(id).is_ok()
    }

    fn slot(&self, id: BlockId) -> QResult<&Block> {
        match self.blocks.get(id.index as usize) {
            Some(block) if block.used && block.generation == id.generation => Ok(block),
            _ => Err(QError::ObjectInvalid),
        }
    }

    fn slot_mut(&mut self, id: BlockId) -> QResult<&mut Block> {
        match self.blocks.get_mut(id.index as usize) {
            Some(block) if block.used && block.generation == id.generation => Ok(block),
            _ => Err(QError::ObjectInvalid),
        }
    }
}

impl QMemoryPool for QMPool {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn alloc(&mut self) -> Option<BlockId> {
        QMPool::alloc(self)
    }

    fn free(&mut self, id: BlockId) -> QResult<()> {
        QMPool::free(self, id)
    }

    fn stats(&self) -> QPoolStats {
        self.stats
    }

    fn block_mut(&mut self, id: BlockId) -> QResult<EventBlock<'_>> {
        let block = self.slot_mut(id)?;
        Ok(EventBlock {
            header: &mut block.header,
            data: &mut block.data,
        })
    }
}

impl core::fmt::Debug for QMPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QMPool")
            .field("block_size", &self.block_size)
            .field("stats", &self.stats)
            .finish()
    }
}
