//! Active-object priorities and ready sets

use crate::{QError, QResult};
use core::fmt;

/// Priority of an active object; higher value runs first, 0 is reserved
/// for the idle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QPriority(u8);

impl QPriority {
    /// Lowest priority an active object may use
    pub const MIN: QPriority = QPriority(1);

    /// Highest priority tracked by [`QPriorityMask`]
    pub const MAX: QPriority = QPriority(64);

    /// Create a new priority level
    pub fn new(priority: u8) -> QResult<Self> {
        if priority == 0 || priority > Self::MAX.0 {
            Err(QError::InvalidPriority)
        } else {
            Ok(QPriority(priority))
        }
    }

    /// Create priority without validation (const fn)
    pub const fn new_unchecked(priority: u8) -> Self {
        QPriority(priority)
    }

    /// Get the raw priority value
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Check if this priority is usable by an active object
    pub const fn is_valid(self) -> bool {
        self.0 > 0 && self.0 <= Self::MAX.0
    }
}

impl fmt::Display for QPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QPriority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Set of priorities, one bit per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QPriorityMask(u64);

impl QPriorityMask {
    pub const EMPTY: Self = Self(0);

    pub const fn new() -> Self {
        Self::EMPTY
    }

    pub fn set(&mut self, priority: QPriority) {
        if priority.is_valid() {
            self.0 |= 1u64 << (priority.0 - 1);
        }
    }

    pub fn clear(&mut self, priority: QPriority) {
        if priority.is_valid() {
            self.0 &= !(1u64 << (priority.0 - 1));
        }
    }

    pub const fn is_set(&self, priority: QPriority) -> bool {
        priority.is_valid() && (self.0 & (1u64 << (priority.0 - 1))) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Highest priority present in the set.
    pub fn highest(&self) -> Option<QPriority> {
        if self.is_empty() {
            None
        } else {
            let msb = 63 - self.0.leading_zeros();
            Some(QPriority((msb + 1) as u8))
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QPriorityMask {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "PriorityMask({=u64:b})", self.0);
    }
}

/// Macro to create compile-time priority constants
#[macro_export]
macro_rules! priority {
    ($value:literal) => {
        $crate::QPriority::new_unchecked($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_range_is_checked() {
        assert_eq!(QPriority::new(0), Err(QError::InvalidPriority));
        assert!(QPriority::new(1).is_ok());
        assert!(QPriority::new(64).is_ok());
        assert_eq!(QPriority::new(65), Err(QError::InvalidPriority));
    }

    #[test]
    fn mask_reports_highest() {
        let mut mask = QPriorityMask::new();
        assert_eq!(mask.highest(), None);

        mask.set(priority!(3));
        mask.set(priority!(17));
        assert!(mask.is_set(priority!(3)));
        assert!(!mask.is_set(priority!(4)));
        assert_eq!(mask.highest(), Some(priority!(17)));

        mask.clear(priority!(17));
        assert_eq!(mask.highest(), Some(priority!(3)));
    }
}
