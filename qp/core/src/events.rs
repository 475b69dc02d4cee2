//! Signals and event handles

use core::fmt;

/// Type-safe event signal identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QSignal(pub u16);

impl QSignal {
    /// Reserved signal for initial transitions
    pub const INIT: QSignal = QSignal(0);
    /// Reserved signal for state entry actions
    pub const ENTRY: QSignal = QSignal(1);
    /// Reserved signal for state exit actions
    pub const EXIT: QSignal = QSignal(2);
    /// Reserved signal for empty/null events
    pub const EMPTY: QSignal = QSignal(3);

    /// First user-defined signal
    pub const USER: QSignal = QSignal(4);

    /// Create a new signal from a raw value
    pub const fn new(signal: u16) -> Self {
        QSignal(signal)
    }

    /// Get the raw signal value
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Reserved signals are only ever carried by const events.
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::USER.0
    }
}

impl fmt::Display for QSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            QSignal::INIT => f.write_str("INIT"),
            QSignal::ENTRY => f.write_str("ENTRY"),
            QSignal::EXIT => f.write_str("EXIT"),
            QSignal::EMPTY => f.write_str("EMPTY"),
            QSignal(raw) => write!(f, "SIG({raw})"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QSignal {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "QSignal({})", self.0);
    }
}

/// Stable identity of a registered event pool.
///
/// Assigned once at registration and never reused while the pool is
/// registered, so it stays valid however the registry is re-sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId(pub u8);

/// Slot index plus the generation the slot had when it was handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub index: u16,
    pub generation: u16,
}

impl BlockId {
    pub const fn new(index: u16, generation: u16) -> Self {
        Self { index, generation }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PoolId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Pool({})", self.0);
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BlockId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Block({}@{})", self.index, self.generation);
    }
}

/// Where an event's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOrigin {
    /// Immutable process-wide event, never counted or destroyed.
    Const,
    /// Event held in a block of a registered pool.
    Pool { pool: PoolId, block: BlockId },
}

/// Handle to an event object.
///
/// The handle is `Copy`: copying it does not change ownership. Ownership of
/// pooled events is tracked by the reference count kept in the event header
/// inside the pool, see `qp_mem::EventPools`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QEvt {
    sig: QSignal,
    origin: EventOrigin,
}

impl QEvt {
    pub const INIT: QEvt = QEvt::constant(QSignal::INIT);
    pub const ENTRY: QEvt = QEvt::constant(QSignal::ENTRY);
    pub const EXIT: QEvt = QEvt::constant(QSignal::EXIT);
    pub const EMPTY: QEvt = QEvt::constant(QSignal::EMPTY);

    /// A const event carrying only a signal.
    pub const fn constant(sig: QSignal) -> Self {
        Self {
            sig,
            origin: EventOrigin::Const,
        }
    }

    /// Handle for an event living in `block` of `pool`.
    pub const fn pooled(sig: QSignal, pool: PoolId, block: BlockId) -> Self {
        Self {
            sig,
            origin: EventOrigin::Pool { pool, block },
        }
    }

    #[inline]
    pub const fn signal(&self) -> QSignal {
        self.sig
    }

    #[inline]
    pub const fn origin(&self) -> EventOrigin {
        self.origin
    }

    pub const fn is_const(&self) -> bool {
        matches!(self.origin, EventOrigin::Const)
    }
}

impl fmt::Display for QEvt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            EventOrigin::Const => write!(f, "{}", self.sig),
            EventOrigin::Pool { pool, block } => write!(
                f,
                "{}@pool{}[{}#{}]",
                self.sig, pool.0, block.index, block.generation
            ),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QEvt {
    fn format(&self, fmt: defmt::Formatter) {
        match self.origin {
            EventOrigin::Const => defmt::write!(fmt, "{}", self.sig),
            EventOrigin::Pool { pool, block } => {
                defmt::write!(fmt, "{}@{}{}", self.sig, pool, block)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_events_are_const() {
        for e in [QEvt::INIT, QEvt::ENTRY, QEvt::EXIT, QEvt::EMPTY] {
            assert!(e.is_const());
            assert!(e.signal().is_reserved());
        }
        assert!(!QSignal::USER.is_reserved());
    }

    #[test]
    fn pooled_handle_keeps_origin() {
        let e = QEvt::pooled(QSignal::new(9), PoolId(2), BlockId::new(5, 3));
        assert!(!e.is_const());
        assert_eq!(
            e.origin(),
            EventOrigin::Pool {
                pool: PoolId(2),
                block: BlockId::new(5, 3)
            }
        );
    }
}
