//! Memory budget handed to active objects at creation

use core::cell::Cell;

use critical_section::Mutex;
use log::warn;
use qp_core::{QError, QResult};

/// Byte budget standing in for the memory an application sets aside for
/// active objects (queue storage, workspaces, chain buffers).
pub struct QMemContext {
    capacity: usize,
    used: Mutex<Cell<usize>>,
}

impl QMemContext {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Mutex::new(Cell::new(0)),
        }
    }

    /// Claim `bytes` of the budget.
    pub fn reserve(&self, bytes: usize) -> QResult<()> {
        let res = critical_section::with(|cs| {
            let used = self.used.borrow(cs);
            match used.get().checked_add(bytes) {
                Some(total) if total <= self.capacity => {
                    used.set(total);
                    Ok(())
                }
                _ => Err(QError::OutOfMemory),
            }
        });
        if res.is_err() {
            warn!("memory context: {} bytes requested, {} available", bytes, self.available());
        }
        res
    }

    /// Give `bytes` back. Releasing more than was reserved is `NotPermitted`.
    pub fn release(&self, bytes: usize) -> QResult<()> {
        critical_section::with(|cs| {
            let used = self.used.borrow(cs);
            let left = used.get().checked_sub(bytes).ok_or(QError::NotPermitted)?;
            used.set(left);
            Ok(())
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        critical_section::with(|cs| self.used.borrow(cs).get())
    }

    pub fn available(&self) -> usize {
        self.capacity - self.used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_enforced() {
        let ctx = QMemContext::new(100);
        ctx.reserve(60).unwrap();
        assert_eq!(ctx.reserve(41), Err(QError::OutOfMemory));
        ctx.reserve(40).unwrap();
        assert_eq!(ctx.available(), 0);

        ctx.release(100).unwrap();
        assert_eq!(ctx.used(), 0);
        assert_eq!(ctx.release(1), Err(QError::NotPermitted));
    }
}
