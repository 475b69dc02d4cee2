//! Tick counters for time events

use core::fmt;

/// Down-counter of system ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct QTimeEvtCtr(pub u32);

impl QTimeEvtCtr {
    pub const ZERO: Self = Self(0);

    pub const fn new(ticks: u32) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Count one tick down; returns `true` on the tick that reaches zero.
    pub fn decrement(&mut self) -> bool {
        if self.0 > 0 {
            self.0 -= 1;
            self.0 == 0
        } else {
            false
        }
    }
}

impl fmt::Display for QTimeEvtCtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ticks", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QTimeEvtCtr {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}ticks", self.0);
    }
}

/// How a time event re-arms after it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QTimeInterval {
    /// Fires once after the given ticks
    OneShot(QTimeEvtCtr),
    /// Fires every given ticks until disarmed
    Periodic(QTimeEvtCtr),
}

impl QTimeInterval {
    pub const fn one_shot(ticks: u32) -> Self {
        Self::OneShot(QTimeEvtCtr::new(ticks))
    }

    pub const fn periodic(ticks: u32) -> Self {
        Self::Periodic(QTimeEvtCtr::new(ticks))
    }

    pub const fn ticks(&self) -> QTimeEvtCtr {
        match self {
            Self::OneShot(ticks) | Self::Periodic(ticks) => *ticks,
        }
    }

    pub const fn is_periodic(&self) -> bool {
        matches!(self, Self::Periodic(_))
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QTimeInterval {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::OneShot(ticks) => defmt::write!(fmt, "OneShot({})", ticks),
            Self::Periodic(ticks) => defmt::write!(fmt, "Periodic({})", ticks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_signals_expiry_once() {
        let mut ctr = QTimeEvtCtr::new(2);
        assert!(!ctr.decrement());
        assert!(ctr.decrement());
        assert!(ctr.is_zero());
        assert!(!ctr.decrement());
    }
}
