//! Event header kept alongside every pooled event

use qp_core::{PoolId, QSignal};

/// Ownership mode of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAttr {
    /// Freed automatically when the reference count drops back to zero.
    Dynamic,
    /// Built-in or user static event; never pooled, counted or freed.
    Const,
    /// Lifetime held manually by whoever called `lock`.
    Reserved,
}

/// Header of an event object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub sig: QSignal,
    pub attr: EventAttr,
    pub ref_count: u8,
    /// Pool the event must be returned to; `None` for const events.
    pub pool: Option<PoolId>,
    /// Payload size requested at creation.
    pub size: u16,
}

impl EventHeader {
    pub const fn constant(sig: QSignal) -> Self {
        Self {
            sig,
            attr: EventAttr::Const,
            ref_count: 0,
            pool: None,
            size: 0,
        }
    }

    pub(crate) const fn dynamic(sig: QSignal, pool: PoolId, size: u16) -> Self {
        Self {
            sig,
            attr: EventAttr::Dynamic,
            ref_count: 0,
            pool: Some(pool),
            size,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EventAttr {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            EventAttr::Dynamic => defmt::write!(fmt, "Dynamic"),
            EventAttr::Const => defmt::write!(fmt, "Const"),
            EventAttr::Reserved => defmt::write!(fmt, "Reserved"),
        }
    }
}
