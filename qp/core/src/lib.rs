#![no_std]
#![forbid(unsafe_code)]

//! # QP Core
//!
//! Core types shared by every layer of the active-object kernel: the error
//! model, signals and event handles, priorities and tick counters.
//! Nothing in here touches shared state, so the crate needs neither `alloc`
//! nor a critical-section implementation.

#[cfg(feature = "std")]
extern crate std;

pub mod events;
pub mod priorities;
pub mod time;

pub use events::*;
pub use priorities::*;
pub use time::*;

use thiserror::Error;

/// QP framework version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the QP framework
pub type QResult<T> = Result<T, QError>;

/// Error types for QP framework operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QError {
    /// Event queue is full
    #[error("event queue is full")]
    QueueFull,
    /// No event pool (or memory budget) can satisfy the request
    #[error("memory pool exhausted")]
    OutOfMemory,
    /// Zero or otherwise unusable size
    #[error("invalid size for allocation")]
    InvalidSize,
    /// Signal is reserved or out of range for the operation
    #[error("invalid signal")]
    InvalidSignal,
    /// Invalid priority level
    #[error("invalid priority level")]
    InvalidPriority,
    /// State identifier outside of the state table
    #[error("state id out of range")]
    InvalidState,
    /// A state handler broke the transition contract
    #[error("invalid state machine transition")]
    InvalidTransition,
    /// State table has a cycle, a dangling superstate or is too deep
    #[error("malformed state table")]
    MalformedTable,
    /// Handle does not refer to a live object (stale generation, unknown pool)
    #[error("object is invalid or was destroyed")]
    ObjectInvalid,
    /// Operation is not allowed in the object's current lifecycle state
    #[error("operation not permitted")]
    NotPermitted,
}

/// Coarse error classes callers are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceExhausted,
    InvalidArgument,
    ObjectInvalid,
    NotPermitted,
}

impl QError {
    /// Classify the error.
    pub const fn kind(self) -> ErrorKind {
        match self {
            QError::QueueFull | QError::OutOfMemory => ErrorKind::ResourceExhausted,
            QError::InvalidSize
            | QError::InvalidSignal
            | QError::InvalidPriority
            | QError::InvalidState
            | QError::InvalidTransition
            | QError::MalformedTable => ErrorKind::InvalidArgument,
            QError::ObjectInvalid => ErrorKind::ObjectInvalid,
            QError::NotPermitted => ErrorKind::NotPermitted,
        }
    }

    /// Shorthand for `kind() == ErrorKind::ResourceExhausted`.
    pub const fn is_exhausted(self) -> bool {
        matches!(self, QError::QueueFull | QError::OutOfMemory)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            QError::QueueFull => defmt::write!(fmt, "QueueFull"),
            QError::OutOfMemory => defmt::write!(fmt, "OutOfMemory"),
            QError::InvalidSize => defmt::write!(fmt, "InvalidSize"),
            QError::InvalidSignal => defmt::write!(fmt, "InvalidSignal"),
            QError::InvalidPriority => defmt::write!(fmt, "InvalidPriority"),
            QError::InvalidState => defmt::write!(fmt, "InvalidState"),
            QError::InvalidTransition => defmt::write!(fmt, "InvalidTransition"),
            QError::MalformedTable => defmt::write!(fmt, "MalformedTable"),
            QError::ObjectInvalid => defmt::write!(fmt, "ObjectInvalid"),
            QError::NotPermitted => defmt::write!(fmt, "NotPermitted"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ErrorKind {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            ErrorKind::ResourceExhausted => defmt::write!(fmt, "ResourceExhausted"),
            ErrorKind::InvalidArgument => defmt::write!(fmt, "InvalidArgument"),
            ErrorKind::ObjectInvalid => defmt::write!(fmt, "ObjectInvalid"),
            ErrorKind::NotPermitted => defmt::write!(fmt, "NotPermitted"),
        }
    }
}
