#![no_std]
#![forbid(unsafe_code)]

//! # QP Event Processor (QEP)
//!
//! Table-driven state machine engines implementing UML statecharts:
//! - [`QHsm`]: hierarchical dispatch with bubbling to superstates, entry and
//!   exit actions along the least-common-ancestor path and nested initial
//!   transitions
//! - [`QFsm`]: the flat special case where every state hangs off top
//!
//! A state machine is described by a static [`StateTable`]. Each state is a
//! plain handler function operating on the machine's workspace, so an
//! application carries all its extended state in one owned struct.

extern crate alloc;

pub mod fsm;
pub mod hsm;
pub mod table;

pub use fsm::QFsm;
pub use hsm::QHsm;
pub use table::{StateDesc, StateHandler, StateId, StateTable};

use qp_core::{QEvt, QResult};

/// Maximum nesting depth for hierarchical states
pub const MAX_STATE_DEPTH: usize = 16;

/// What a state handler did with the event it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QStateReturn {
    /// Event consumed
    Handled,
    /// Event saved for later; the engine treats it as consumed
    Deferred,
    /// Not handled here, try the superstate
    Unhandled,
    /// Take a transition to the given state
    Transition(StateId),
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QOutcome {
    Handled,
    Deferred,
    /// No state in the active configuration handled the event
    Ignored,
    /// A transition ran; the payload is the leaf state it settled in
    Transitioned(StateId),
}

/// Common face of the hierarchical and flat engines.
pub trait QStateMachine: Sized {
    type Workspace: 'static;

    /// Build an engine over `table`, validating the table.
    fn with_table(table: StateTable<Self::Workspace>, ws: Self::Workspace) -> QResult<Self>;

    /// Bytes held by the engine beyond its workspace (transition scratch).
    fn footprint(&self) -> usize;

    /// Take the topmost initial transition into `initial`.
    fn init(&mut self, initial: StateId) -> QResult<()>;

    /// Run one run-to-completion step.
    fn dispatch(&mut self, e: &QEvt) -> QResult<QOutcome>;

    /// Exit every active state, leaving the machine in top.
    fn exit_to_top(&mut self) -> QResult<()>;

    fn state(&self) -> StateId;

    fn workspace(&self) -> &Self::Workspace;

    fn workspace_mut(&mut self) -> &mut Self::Workspace;

    fn into_workspace(self) -> Self::Workspace;
}

#[cfg(feature = "defmt")]
impl defmt::Format for QOutcome {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            QOutcome::Handled => defmt::write!(fmt, "Handled"),
            QOutcome::Deferred => defmt::write!(fmt, "Deferred"),
            QOutcome::Ignored => defmt::write!(fmt, "Ignored"),
            QOutcome::Transitioned(s) => defmt::write!(fmt, "Transitioned({})", s.0),
        }
    }
}
