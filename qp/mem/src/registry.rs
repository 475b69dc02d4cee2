//! Event pool registry and event lifecycle
//!
//! [`EventPools`] keeps the registered pools sorted by ascending block size
//! and allocates every dynamic event from the smallest pool whose blocks are
//! large enough. The registry is the owner of the pools: an event remembers
//! the [`PoolId`] it came from and is always returned there, whatever the
//! registry order is by then.
//!
//! Reference counting follows the QP rules:
//! * a fresh event has a count of 0 and attribute `Dynamic`;
//! * every holder (queue slot, deferral list, ...) calls `retain`;
//! * `release` drops one reference and frees a `Dynamic` event at zero;
//! * `lock` switches to `Reserved`, which suspends automatic reclaim until
//!   `unlock`, which frees the event at once if nobody holds it any more.

use alloc::boxed::Box;
use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use log::{debug, trace, warn};
use qp_core::{BlockId, EventOrigin, PoolId, QError, QEvt, QResult, QSignal};

use crate::event::{EventAttr, EventHeader};
use crate::pool::{EventBlock, QMemoryPool};
use crate::QPoolStats;

/// Maximum number of pools the registry holds at once
pub const MAX_EVENT_POOLS: usize = 8;

struct PoolSlot {
    id: PoolId,
    pool: Box<dyn QMemoryPool>,
}

struct Registry {
    pools: heapless::Vec<PoolSlot, MAX_EVENT_POOLS>,
    next_id: u8,
}

impl Registry {
    fn fresh_id(&mut self) -> PoolId {
        loop {
            let id = PoolId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pools.iter().any(|slot| slot.id == id) {
                return id;
            }
        }
    }

    fn pool_mut(&mut self, id: PoolId) -> QResult<&mut dyn QMemoryPool> {
        self.pools
            .iter_mut()
            .find(|slot| slot.id == id)
            .map(|slot| -> &mut dyn QMemoryPool { slot.pool.as_mut() })
            .ok_or(QError::ObjectInvalid)
    }

    fn block_mut(&mut self, pool: PoolId, block: BlockId, sig: QSignal) -> QResult<EventBlock<'_>> {
        let blk = self.pool_mut(pool)?.block_mut(block)?;
        if blk.header.sig != sig {
            return Err(QError::ObjectInvalid);
        }
        Ok(blk)
    }
}

/// Process-wide registry of event pools.
///
/// Usually a `static`:
///
/// ```
/// use qp_mem::EventPools;
/// static POOLS: EventPools = EventPools::new();
/// ```
pub struct EventPools {
    inner: Mutex<RefCell<Registry>>,
}

impl Default for EventPools {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPools {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Registry {
                pools: heapless::Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Hand a pool over to the registry. Pools with equal block size keep
    /// their registration order.
    pub fn register<P>(&self, pool: P) -> QResult<PoolId>
    where
        P: QMemoryPool + 'static,
    {
        let block_size = pool.block_size();
        if block_size == 0 {
            return Err(QError::InvalidSize);
        }
        let pool: Box<dyn QMemoryPool> = Box::new(pool);
        let id = critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            if reg.pools.is_full() {
                return Err(QError::OutOfMemory);
            }
            let pos = reg
                .pools
                .iter()
                .position(|slot| slot.pool.block_size() > block_size)
                .unwrap_or(reg.pools.len());
            let id = reg.fresh_id();
            reg.pools
                .insert(pos, PoolSlot { id, pool })
                .map_err(|_| QError::OutOfMemory)?;
            Ok(id)
        })?;
        debug!("registered pool {} with {}-byte blocks", id.0, block_size);
        Ok(id)
    }

    /// Take a pool back out. Refused while any of its blocks is in use.
    pub fn unregister(&self, id: PoolId) -> QResult<Box<dyn QMemoryPool>> {
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            let pos = reg
                .pools
                .iter()
                .position(|slot| slot.id == id)
                .ok_or(QError::ObjectInvalid)?;
            if reg.pools[pos].pool.stats().used_blocks != 0 {
                return Err(QError::NotPermitted);
            }
            Ok(reg.pools.remove(pos).pool)
        })
        .inspect(|_| debug!("unregistered pool {}", id.0))
    }

    /// Allocate a dynamic event of `size` payload bytes.
    ///
    /// Never falls back to a larger pool when the best-fitting one is
    /// exhausted.
    pub fn create(&self, size: usize, sig: QSignal) -> QResult<QEvt> {
        let res = critical_section::with(|cs| self.create_from_isr(cs, size, sig));
        match &res {
            Ok(e) => trace!("create {e} ({size} bytes)"),
            Err(err) => warn!("create {sig} ({size} bytes) failed: {err}"),
        }
        res
    }

    /// Allocate an event and fill its payload before anyone can see it.
    /// `fill` runs inside the critical section, keep it short.
    pub fn create_with<F>(&self, size: usize, sig: QSignal, fill: F) -> QResult<QEvt>
    where
        F: FnOnce(&mut [u8]),
    {
        critical_section::with(|cs| {
            let e = self.create_from_isr(cs, size, sig)?;
            self.write_from_isr(cs, &e, fill)?;
            Ok(e)
        })
    }

    /// Non-suspending form of [`create`](Self::create).
    pub fn create_from_isr(&self, cs: CriticalSection<'_>, size: usize, sig: QSignal) -> QResult<QEvt> {
        if size == 0 {
            return Err(QError::InvalidSize);
        }
        if sig.is_reserved() {
            return Err(QError::InvalidSignal);
        }
        let size16 = u16::try_from(size).map_err(|_| QError::InvalidSize)?;

        let mut reg = self.inner.borrow_ref_mut(cs);
        let slot = reg
            .pools
            .iter_mut()
            .find(|slot| slot.pool.block_size() >= size)
            .ok_or(QError::OutOfMemory)?;
        let pool_id = slot.id;
        let block = slot.pool.alloc().ok_or(QError::OutOfMemory)?;
        *slot.pool.block_mut(block)?.header = EventHeader::dynamic(sig, pool_id, size16);
        Ok(QEvt::pooled(sig, pool_id, block))
    }

    /// Add one reference to `e`. No-op for const events.
    pub fn retain(&self, e: &QEvt) -> QResult<()> {
        critical_section::with(|cs| self.retain_from_isr(cs, e))
    }

    pub fn retain_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<()> {
        let EventOrigin::Pool { pool, block } = e.origin() else {
            return Ok(());
        };
        let mut reg = self.inner.borrow_ref_mut(cs);
        let blk = reg.block_mut(pool, block, e.signal())?;
        blk.header.ref_count = blk
            .header
            .ref_count
            .checked_add(1)
            .ok_or(QError::NotPermitted)?;
        Ok(())
    }

    /// Drop one reference (the "destroy" of an event). Returns `true` when
    /// this call gave the block back to its pool.
    pub fn release(&self, e: &QEvt) -> QResult<bool> {
        let freed = critical_section::with(|cs| self.release_from_isr(cs, e))?;
        if freed {
            trace!("freed {e}");
        }
        Ok(freed)
    }

    pub fn release_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<bool> {
        let EventOrigin::Pool { pool, block } = e.origin() else {
            return Ok(false);
        };
        let mut reg = self.inner.borrow_ref_mut(cs);
        let blk = reg.block_mut(pool, block, e.signal())?;
        blk.header.ref_count = blk.header.ref_count.saturating_sub(1);
        if blk.header.ref_count != 0 || blk.header.attr != EventAttr::Dynamic {
            return Ok(false);
        }
        reg.pool_mut(pool)?.free(block)?;
        Ok(true)
    }

    /// Take manual ownership of a dynamic event.
    pub fn lock(&self, e: &QEvt) -> QResult<()> {
        let EventOrigin::Pool { pool, block } = e.origin() else {
            return Err(QError::NotPermitted);
        };
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            let blk = reg.block_mut(pool, block, e.signal())?;
            if blk.header.attr != EventAttr::Dynamic {
                return Err(QError::NotPermitted);
            }
            blk.header.attr = EventAttr::Reserved;
            Ok(())
        })
        .inspect(|_| trace!("lock {e}"))
    }

    /// Hand a reserved event back to automatic reclaim. Returns `true` when
    /// no reference was left and the event got freed right away.
    pub fn unlock(&self, e: &QEvt) -> QResult<bool> {
        let EventOrigin::Pool { pool, block } = e.origin() else {
            return Err(QError::NotPermitted);
        };
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            let blk = reg.block_mut(pool, block, e.signal())?;
            if blk.header.attr != EventAttr::Reserved {
                return Err(QError::NotPermitted);
            }
            blk.header.attr = EventAttr::Dynamic;
            if blk.header.ref_count != 0 {
                return Ok(false);
            }
            reg.pool_mut(pool)?.free(block)?;
            Ok(true)
        })
        .inspect(|freed| trace!("unlock {e} (freed: {freed})"))
    }

    /// Snapshot of the event header.
    pub fn header(&self, e: &QEvt) -> QResult<EventHeader> {
        let EventOrigin::Pool { pool, block } = e.origin() else {
            return Ok(EventHeader::constant(e.signal()));
        };
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            Ok(*reg.block_mut(pool, block, e.signal())?.header)
        })
    }

    /// Whether `e` still designates a live event.
    pub fn is_live(&self, e: &QEvt) -> bool {
        self.header(e).is_ok()
    }

    /// Read the payload. Const events have an empty payload.
    pub fn read_payload<R, F>(&self, e: &QEvt, f: F) -> QResult<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let EventOrigin::Pool { pool, block } = e.origin() else {
            return Ok(f(&[]));
        };
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            let blk = reg.block_mut(pool, block, e.signal())?;
            let data = blk
                .data
                .get(..blk.header.size as usize)
                .ok_or(QError::ObjectInvalid)?;
            Ok(f(data))
        })
    }

    /// Write the payload of an event nobody holds yet.
    pub fn write_payload<R, F>(&self, e: &QEvt, f: F) -> QResult<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        critical_section::with(|cs| self.write_from_isr(cs, e, f))
    }

    fn write_from_isr<R, F>(&self, cs: CriticalSection<'_>, e: &QEvt, f: F) -> QResult<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let EventOrigin::Pool { pool, block } = e.origin() else {
            return Err(QError::NotPermitted);
        };
        let mut reg = self.inner.borrow_ref_mut(cs);
        let blk = reg.block_mut(pool, block, e.signal())?;
        if blk.header.ref_count != 0 || blk.header.attr != EventAttr::Dynamic {
            return Err(QError::NotPermitted);
        }
        let size = blk.header.size as usize;
        let data = blk.data.get_mut(..size).ok_or(QError::ObjectInvalid)?;
        Ok(f(data))
    }

    pub fn stats(&self, id: PoolId) -> QResult<QPoolStats> {
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            Ok(reg.pool_mut(id)?.stats())
        })
    }

    /// Registered pools as `(id, block_size)`, in allocation order.
    pub fn layout(&self) -> heapless::Vec<(PoolId, usize), MAX_EVENT_POOLS> {
        critical_section::with(|cs| {
            self.inner
                .borrow_ref(cs)
                .pools
                .iter()
                .map(|slot| (slot.id, slot.pool.block_size()))
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).pools.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::QMPool;

    const SIG: QSignal = QSignal::new(7);

    fn pools(sizes: &[usize]) -> EventPools {
        let pools = EventPools::new();
        for &size in sizes {
            pools.register(QMPool::new(size, 2).unwrap()).unwrap();
        }
        pools
    }

    #[test]
    fn registration_keeps_ascending_order() {
        let pools = pools(&[64, 8, 32, 8]);
        let sizes: heapless::Vec<usize, 8> = pools.layout().iter().map(|(_, s)| *s).collect();
        assert_eq!(&sizes[..], &[8, 8, 32, 64]);
    }

    #[test]
    fn registry_capacity_is_bounded() {
        let pools = EventPools::new();
        for _ in 0..MAX_EVENT_POOLS {
            pools.register(QMPool::new(4, 1).unwrap()).unwrap();
        }
        assert_eq!(
            pools.register(QMPool::new(4, 1).unwrap()).unwrap_err(),
            QError::OutOfMemory
        );
    }

    #[test]
    fn reserved_signals_and_zero_size_are_rejected() {
        let pools = pools(&[16]);
        assert_eq!(pools.create(0, SIG).unwrap_err(), QError::InvalidSize);
        assert_eq!(pools.create(4, QSignal::ENTRY).unwrap_err(), QError::InvalidSignal);
    }

    #[test]
    fn payload_is_frozen_once_retained() {
        let pools = pools(&[16]);
        let e = pools
            .create_with(4, SIG, |buf| buf.copy_from_slice(&[1, 2, 3, 4]))
            .unwrap();
        pools.retain(&e).unwrap();
        assert_eq!(pools.write_payload(&e, |_| ()).unwrap_err(), QError::NotPermitted);
        let sum: u32 = pools
            .read_payload(&e, |b| b.iter().map(|&x| x as u32).sum())
            .unwrap();
        assert_eq!(sum, 10);
    }

    #[test]
    fn forged_signal_is_rejected() {
        let pools = pools(&[16]);
        let e = pools.create(4, SIG).unwrap();
        let EventOrigin::Pool { pool, block } = e.origin() else {
            unreachable!()
        };
        let forged = QEvt::pooled(QSignal::new(99), pool, block);
        assert_eq!(pools.retain(&forged).unwrap_err(), QError::ObjectInvalid);
    }
}
