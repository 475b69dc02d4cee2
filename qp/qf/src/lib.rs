#![no_std]
#![forbid(unsafe_code)]

//! # QP Framework (QF)
//!
//! The framework layer composes the pieces below it into active objects:
//! encapsulated, event-driven objects that each own one state machine
//! ([`qp_qep`]) and one event queue, and communicate only by posting events
//! allocated from the shared pools ([`qp_mem`]).
//!
//! - [`QEQueue`]: fixed-capacity deque of event handles
//! - [`QActive`]: active object composition and lifecycle
//! - [`QTimeEvt`]: tick-driven one-shot and periodic timeouts

pub mod active;
pub mod queue;
pub mod time;

pub use active::{
    QActive, QActiveDef, QActiveDefBuilder, QActiveRunnable, QActiveState, QFsmActive,
    QHsmActive,
};
pub use queue::QEQueue;
pub use time::QTimeEvt;

/// Maximum number of active objects in the system
pub const MAX_ACTIVE: usize = 32;

/// Default event queue capacity for active objects
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
