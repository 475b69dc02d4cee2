//! Hierarchical state machine
//!
//! Dispatch starts at the current leaf state and bubbles up the superstate
//! chain until some state handles the event. A transition exits from the
//! leaf up to the source, then from the source up to the least common
//! ancestor (LCA) of source and target, and enters from below the LCA down
//! to the target. The target's initial transitions are then followed down
//! to a leaf.
//!
//! The LCA search keeps two ancestor chains in scratch buffers sized from
//! the table's deepest nesting level, so a transition never allocates.

use alloc::boxed::Box;
use alloc::vec;

use log::{error, trace};
use qp_core::{QError, QEvt, QResult, QSignal};

use crate::table::{StateId, StateTable};
use crate::{QOutcome, QStateMachine, QStateReturn};

/// Hierarchical state machine over a workspace `W`.
pub struct QHsm<W: 'static> {
    table: StateTable<W>,
    state: StateId,
    ws: W,
    /// Source-side ancestors visited while looking for the LCA
    src: Box<[StateId]>,
    /// Target chain: `dst[0]` is the target, each next slot its superstate
    dst: Box<[StateId]>,
    max_depth: usize,
    started: bool,
}

impl<W: 'static> QHsm<W> {
    /// Validate `table` and size the transition buffers from it.
    pub fn new(table: StateTable<W>, ws: W) -> QResult<Self> {
        let max_depth = table.validate()?;
        Ok(Self {
            table,
            state: StateId::TOP,
            ws,
            src: vec![StateId::TOP; max_depth + 1].into_boxed_slice(),
            dst: vec![StateId::TOP; max_depth + 1].into_boxed_slice(),
            max_depth,
            started: false,
        })
    }

    /// Current leaf state
    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.table.name(self.state)
    }

    pub fn table(&self) -> StateTable<W> {
        self.table
    }

    /// Deepest nesting level of the table.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether `s` is the current state or one of its superstates.
    pub fn is_in(&self, s: StateId) -> bool {
        self.table.is_ancestor(s, self.state)
    }

    pub fn workspace(&self) -> &W {
        &self.ws
    }

    pub fn workspace_mut(&mut self) -> &mut W {
        &mut self.ws
    }

    pub fn into_workspace(self) -> W {
        self.ws
    }

    /// Bytes held by the two scratch chains.
    pub fn chain_bytes(&self) -> usize {
        (self.src.len() + self.dst.len()) * core::mem::size_of::<StateId>()
    }

    /// Take the topmost initial transition: enter every state from below
    /// top down to `initial`, then follow initial transitions to a leaf.
    pub fn init(&mut self, initial: StateId) -> QResult<()> {
        if self.started {
            return Err(QError::NotPermitted);
        }
        self.check_target(initial)?;

        let mut n = 0;
        let mut s = initial;
        while !s.is_top() {
            self.dst[n] = s;
            n += 1;
            s = self.table.superstate(s);
        }
        for i in (0..n).rev() {
            let s = self.dst[i];
            self.enter(s)?;
        }
        self.state = initial;
        self.started = true;
        self.drill(initial)
    }

    /// Process one event to completion.
    pub fn dispatch(&mut self, e: &QEvt) -> QResult<QOutcome> {
        if e.signal().is_reserved() && e.signal() != QSignal::EMPTY {
            return Err(QError::InvalidSignal);
        }
        if !self.started {
            return Err(QError::NotPermitted);
        }

        let mut s = self.state;
        loop {
            match self.call(s, e) {
                QStateReturn::Handled => return Ok(QOutcome::Handled),
                QStateReturn::Deferred => return Ok(QOutcome::Deferred),
                QStateReturn::Unhandled if s.is_top() => {
                    trace!("{}: {} ignored", self.state_name(), e);
                    return Ok(QOutcome::Ignored);
                }
                QStateReturn::Unhandled => s = self.table.superstate(s),
                QStateReturn::Transition(t) => {
                    self.transition(s, t)?;
                    return Ok(QOutcome::Transitioned(self.state));
                }
            }
        }
    }

    /// Exit the whole active chain, innermost first. Top stays current.
    pub fn exit_to_top(&mut self) -> QResult<()> {
        if !self.started {
            return Ok(());
        }
        let mut s = self.state;
        while !s.is_top() {
            self.exit(s)?;
            s = self.table.superstate(s);
        }
        self.state = StateId::TOP;
        self.started = false;
        Ok(())
    }

    #[inline]
    fn call(&mut self, s: StateId, e: &QEvt) -> QStateReturn {
        (self.table.handler(s))(&mut self.ws, e)
    }

    fn check_target(&self, t: StateId) -> QResult<()> {
        if t.index() >= self.table.len() {
            error!("transition to unknown state {}", t);
            return Err(QError::InvalidState);
        }
        if t.is_top() {
            error!("transition to top from '{}'", self.state_name());
            return Err(QError::InvalidTransition);
        }
        Ok(())
    }

    fn enter(&mut self, s: StateId) -> QResult<()> {
        trace!("{}: ENTRY", self.table.name(s));
        match self.call(s, &QEvt::ENTRY) {
            QStateReturn::Transition(_) => {
                error!("'{}' took a transition on ENTRY", self.table.name(s));
                Err(QError::InvalidTransition)
            }
            _ => Ok(()),
        }
    }

    fn exit(&mut self, s: StateId) -> QResult<()> {
        trace!("{}: EXIT", self.table.name(s));
        match self.call(s, &QEvt::EXIT) {
            QStateReturn::Transition(_) => {
                error!("'{}' took a transition on EXIT", self.table.name(s));
                Err(QError::InvalidTransition)
            }
            _ => Ok(()),
        }
    }

    /// Follow initial transitions from `s` down to a leaf.
    fn drill(&mut self, mut s: StateId) -> QResult<()> {
        loop {
            let t = match self.call(s, &QEvt::INIT) {
                QStateReturn::Transition(t) => t,
                _ => return Ok(()),
            };
            self.check_target(t)?;

            // the initial target must sit strictly below `s`
            let mut n = 0;
            let mut q = t;
            while q != s {
                if q.is_top() {
                    error!(
                        "'{}' INIT target '{}' is not a substate",
                        self.table.name(s),
                        self.table.name(t)
                    );
                    return Err(QError::InvalidTransition);
                }
                self.dst[n] = q;
                n += 1;
                q = self.table.superstate(q);
            }
            if n == 0 {
                return Err(QError::InvalidTransition);
            }

            for i in (0..n).rev() {
                let q = self.dst[i];
                self.enter(q)?;
            }
            self.state = t;
            s = t;
        }
    }

    fn transition(&mut self, source: StateId, target: StateId) -> QResult<()> {
        self.check_target(target)?;
        trace!(
            "{}: tran {} -> {}",
            self.state_name(),
            self.table.name(source),
            self.table.name(target)
        );

        // exit from the current leaf up to the state that took the transition
        let mut s = self.state;
        while s != source {
            self.exit(s)?;
            s = self.table.superstate(s);
        }

        let n = self.exit_to_lca(source, target)?;
        for i in (0..n).rev() {
            let s = self.dst[i];
            self.enter(s)?;
        }
        self.state = target;
        self.drill(target)
    }

    /// Exit from `s` up to, not including, the LCA of `s` and `t`.
    ///
    /// Returns how many slots of `dst` (counted from the target) must be
    /// entered afterwards, outermost last. The cheap shapes are tried first;
    /// the general case fills `src` with the source's ancestors and meets
    /// the target chain in `dst`.
    fn exit_to_lca(&mut self, s: StateId, t: StateId) -> QResult<usize> {
        let table = self.table;
        self.dst[0] = t;

        // self-transition
        if s == t {
            self.exit(s)?;
            return Ok(1);
        }

        // source is the target's parent
        let t_super = table.superstate(t);
        if s == t_super {
            return Ok(1);
        }

        // siblings
        self.src[0] = s;
        let s_super = table.superstate(s);
        self.src[1] = s_super;
        if s_super == t_super {
            self.exit(s)?;
            return Ok(1);
        }

        // target is the source's parent
        if s_super == t {
            self.exit(s)?;
            return Ok(0);
        }

        // source is a further ancestor of the target
        self.dst[1] = t_super;
        let mut len = 2;
        let mut q = t_super;
        while !q.is_top() {
            q = table.superstate(q);
            self.dst[len] = q;
            len += 1;
            if q == s {
                return Ok(len - 1);
            }
        }

        // climb the source chain until it meets the target chain, which
        // always ends in top
        let mut k = 1;
        let lca = loop {
            let a = self.src[k];
            if let Some(i) = self.dst[..len].iter().position(|&x| x == a) {
                break i;
            }
            self.src[k + 1] = table.superstate(a);
            k += 1;
        };
        for j in 0..k {
            let a = self.src[j];
            self.exit(a)?;
        }
        Ok(lca)
    }
}

impl<W: 'static> QStateMachine for QHsm<W> {
    type Workspace = W;

    fn with_table(table: StateTable<W>, ws: W) -> QResult<Self> {
        Self::new(table, ws)
    }

    fn footprint(&self) -> usize {
        self.chain_bytes()
    }

    fn init(&mut self, initial: StateId) -> QResult<()> {
        QHsm::init(self, initial)
    }

    fn dispatch(&mut self, e: &QEvt) -> QResult<QOutcome> {
        QHsm::dispatch(self, e)
    }

    fn exit_to_top(&mut self) -> QResult<()> {
        QHsm::exit_to_top(self)
    }

    fn state(&self) -> StateId {
        self.state
    }

    fn workspace(&self) -> &W {
        &self.ws
    }

    fn workspace_mut(&mut self) -> &mut W {
        &mut self.ws
    }

    fn into_workspace(self) -> W {
        self.ws
    }
}

impl<W: 'static> core::fmt::Debug for QHsm<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QHsm")
            .field("state", &self.state_name())
            .field("max_depth", &self.max_depth)
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl<W: 'static> defmt::Format for QHsm<W> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "QHsm{{ state: {} }}", self.state.0);
    }
}
