//! Event queue for active objects
//!
//! A `heapless::Deque` of event handles with its capacity fixed at compile
//! time, plus a low-watermark of free slots. The queue only moves handles
//! around; whoever posts is responsible for retaining the event first, and
//! whoever takes it out releases it after use.
//!
//! The queue is not synchronized itself. An active object keeps it behind a
//! `critical_section::Mutex` so only the index updates run with interrupts
//! masked.

use heapless::Deque;
use qp_core::{QError, QEvt, QResult};

/// Queue of up to `N` event handles. `N` must be non-zero.
pub struct QEQueue<const N: usize> {
    ring: Deque<QEvt, N>,
    n_min: usize,
}

impl<const N: usize> QEQueue<N> {
    pub const fn new() -> Self {
        Self {
            ring: Deque::new(),
            n_min: N,
        }
    }

    /// Bytes of storage a queue of this capacity occupies.
    pub const fn storage_bytes() -> usize {
        core::mem::size_of::<Self>()
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn n_free(&self) -> usize {
        N - self.ring.len()
    }

    /// Lowest number of free slots seen since creation.
    pub fn n_min(&self) -> usize {
        self.n_min
    }

    /// Append at the back (FIFO).
    pub fn post(&mut self, e: QEvt) -> QResult<()> {
        self.ring.push_back(e).map_err(|_| QError::QueueFull)?;
        self.on_post();
        Ok(())
    }

    /// Insert at the front, ahead of everything already queued.
    pub fn post_lifo(&mut self, e: QEvt) -> QResult<()> {
        self.ring.push_front(e).map_err(|_| QError::QueueFull)?;
        self.on_post();
        Ok(())
    }

    /// Take the event at the front.
    pub fn get(&mut self) -> Option<QEvt> {
        self.ring.pop_front()
    }

    fn on_post(&mut self) {
        self.n_min = self.n_min.min(self.n_free());
    }
}

impl<const N: usize> Default for QEQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for QEQueue<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QEQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("n_min", &self.n_min)
            .finish()
    }
}
