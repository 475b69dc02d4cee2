//! Flat state machine
//!
//! Every state's superstate is top, so dispatch is a single handler call and
//! a transition is exit-current, enter-target, init-target.

use log::{error, trace};
use qp_core::{QError, QEvt, QResult, QSignal};

use crate::table::{StateId, StateTable};
use crate::{QOutcome, QStateMachine, QStateReturn};

pub struct QFsm<W: 'static> {
    table: StateTable<W>,
    state: StateId,
    ws: W,
    started: bool,
}

impl<W: 'static> QFsm<W> {
    /// A table with any nesting below top is `MalformedTable`.
    pub fn new(table: StateTable<W>, ws: W) -> QResult<Self> {
        if table.validate()? > 1 {
            error!("flat state machine given a nested table");
            return Err(QError::MalformedTable);
        }
        Ok(Self {
            table,
            state: StateId::TOP,
            ws,
            started: false,
        })
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.table.name(self.state)
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

    pub fn init(&mut self, initial: StateId) -> QResult<()> {
        if self.started {
            return Err(QError::NotPermitted);
        }
        self.check_target(initial)?;
        self.enter(initial)?;
        self.started = true;
        Ok(())
    }

    pub fn dispatch(&mut self, e: &QEvt) -> QResult<QOutcome> {
        if e.signal().is_reserved() && e.signal() != QSignal::EMPTY {
            return Err(QError::InvalidSignal);
        }
        if !self.started {
            return Err(QError::NotPermitted);
        }

        match self.call(self.state, e) {
            QStateReturn::Handled => Ok(QOutcome::Handled),
            QStateReturn::Deferred => Ok(QOutcome::Deferred),
            QStateReturn::Unhandled => {
                trace!("{}: {} ignored", self.state_name(), e);
                Ok(QOutcome::Ignored)
            }
            QStateReturn::Transition(t) => {
                self.check_target(t)?;
                trace!("tran {} -> {}", self.state_name(), self.table.name(t));
                self.signal_state(self.state, QEvt::EXIT)?;
                self.enter(t)?;
                Ok(QOutcome::Transitioned(t))
            }
        }
    }

    pub fn exit_to_top(&mut self) -> QResult<()> {
        if self.started {
            self.signal_state(self.state, QEvt::EXIT)?;
            self.state = StateId::TOP;
            self.started = false;
        }
        Ok(())
    }

    #[inline]
    fn call(&mut self, s: StateId, e: &QEvt) -> QStateReturn {
        (self.table.handler(s))(&mut self.ws, e)
    }

    fn check_target(&self, t: StateId) -> QResult<()> {
        if t.index() >= self.table.len() {
            return Err(QError::InvalidState);
        }
        if t.is_top() {
            return Err(QError::InvalidTransition);
        }
        Ok(())
    }

    /// Enter `s` and run its INIT. Flat states have no substates, so a
    /// transition out of INIT is refused.
    fn enter(&mut self, s: StateId) -> QResult<()> {
        self.signal_state(s, QEvt::ENTRY)?;
        self.state = s;
        self.signal_state(s, QEvt::INIT)
    }

    fn signal_state(&mut self, s: StateId, e: QEvt) -> QResult<()> {
        match self.call(s, &e) {
            QStateReturn::Transition(_) => {
                error!("'{}' took a transition on {}", self.table.name(s), e.signal());
                Err(QError::InvalidTransition)
            }
            _ => Ok(()),
        }
    }
}

impl<W: 'static> QStateMachine for QFsm<W> {
    type Workspace = W;

    fn with_table(table: StateTable<W>, ws: W) -> QResult<Self> {
        Self::new(table, ws)
    }

    fn footprint(&self) -> usize {
        0
    }

    fn init(&mut self, initial: StateId) -> QResult<()> {
        QFsm::init(self, initial)
    }

    fn dispatch(&mut self, e: &QEvt) -> QResult<QOutcome> {
        QFsm::dispatch(self, e)
    }

    fn exit_to_top(&mut self) -> QResult<()> {
        QFsm::exit_to_top(self)
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

impl<W: 'static> core::fmt::Debug for QFsm<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QFsm")
            .field("state", &self.state_name())
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::StateDesc;

    const OPEN: StateId = StateId(1);
    const CLOSED: StateId = StateId(2);
    const TOGGLE: QSignal = QSignal(20);

    #[derive(Default)]
    struct Door {
        entries: u32,
        exits: u32,
    }

    fn count(w: &mut Door, e: &QEvt) {
        match e.signal() {
            QSignal::ENTRY => w.entries += 1,
            QSignal::EXIT => w.exits += 1,
            _ => {}
        }
    }

    fn open(w: &mut Door, e: &QEvt) -> QStateReturn {
        count(w, e);
        match e.signal() {
            TOGGLE => QStateReturn::Transition(CLOSED),
            _ => QStateReturn::Unhandled,
        }
    }

    fn closed(w: &mut Door, e: &QEvt) -> QStateReturn {
        count(w, e);
        match e.signal() {
            TOGGLE => QStateReturn::Transition(OPEN),
            _ => QStateReturn::Unhandled,
        }
    }

    static DOOR: [StateDesc<Door>; 3] = [
        StateDesc::top(),
        StateDesc::new("open", StateId::TOP, open),
        StateDesc::new("closed", StateId::TOP, closed),
    ];

    static NESTED: [StateDesc<Door>; 3] = [
        StateDesc::top(),
        StateDesc::new("open", StateId::TOP, open),
        StateDesc::new("closed", OPEN, closed),
    ];

    #[test]
    fn toggles_between_states() {
        let mut fsm = QFsm::new(StateTable::new(&DOOR), Door::default()).unwrap();
        fsm.init(OPEN).unwrap();
        assert_eq!(fsm.dispatch(&QEvt::constant(TOGGLE)), Ok(QOutcome::Transitioned(CLOSED)));
        assert_eq!(fsm.dispatch(&QEvt::constant(TOGGLE)), Ok(QOutcome::Transitioned(OPEN)));
        assert_eq!(fsm.dispatch(&QEvt::constant(QSignal(99))), Ok(QOutcome::Ignored));
        assert_eq!(fsm.workspace().entries, 3);
        assert_eq!(fsm.workspace().exits, 2);

        fsm.exit_to_top().unwrap();
        assert_eq!(fsm.workspace().exits, 3);
        assert_eq!(fsm.state(), StateId::TOP);
    }

    #[test]
    fn nested_table_is_rejected() {
        let err = QFsm::new(StateTable::new(&NESTED), Door::default()).unwrap_err();
        assert_eq!(err, QError::MalformedTable);
    }
}
