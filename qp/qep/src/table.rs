//! Static state tables
//!
//! States are numbered by their position in the table. Slot 0 is always the
//! top state: the implicit root that handles nothing and is never entered or
//! exited.

use core::fmt;

use log::error;
use qp_core::{QError, QEvt, QResult};

use crate::{QStateReturn, MAX_STATE_DEPTH};

/// Handler function of one state.
pub type StateHandler<W> = fn(&mut W, &QEvt) -> QStateReturn;

/// Index of a state in its [`StateTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub u8);

impl StateId {
    /// The top state
    pub const TOP: StateId = StateId(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_top(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One row of a state table.
pub struct StateDesc<W: 'static> {
    pub name: &'static str,
    pub superstate: StateId,
    pub handler: StateHandler<W>,
}

fn top_handler<W>(_: &mut W, _: &QEvt) -> QStateReturn {
    QStateReturn::Unhandled
}

impl<W: 'static> StateDesc<W> {
    pub const fn new(name: &'static str, superstate: StateId, handler: StateHandler<W>) -> Self {
        Self {
            name,
            superstate,
            handler,
        }
    }

    /// Row for slot 0.
    pub const fn top() -> Self {
        Self {
            name: "top",
            superstate: StateId::TOP,
            handler: top_handler::<W>,
        }
    }
}

/// Borrowed view of a `'static` array of [`StateDesc`].
pub struct StateTable<W: 'static> {
    states: &'static [StateDesc<W>],
}

impl<W: 'static> Clone for StateTable<W> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<W: 'static> Copy for StateTable<W> {}

impl<W: 'static> StateTable<W> {
    pub const fn new(states: &'static [StateDesc<W>]) -> Self {
        Self { states }
    }

    pub const fn len(&self) -> usize {
        self.states.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, id: StateId) -> QResult<&'static StateDesc<W>> {
        self.states.get(id.index()).ok_or(QError::InvalidState)
    }

    /// Name of `id`, or `"?"` when out of range.
    pub fn name(&self, id: StateId) -> &'static str {
        self.states.get(id.index()).map_or("?", |d| d.name)
    }

    /// Superstate of a state already known to be in range.
    #[inline]
    pub(crate) fn superstate(&self, id: StateId) -> StateId {
        self.states[id.index()].superstate
    }

    #[inline]
    pub(crate) fn handler(&self, id: StateId) -> StateHandler<W> {
        self.states[id.index()].handler
    }

    /// Number of superstate links between `id` and top.
    pub fn depth_of(&self, id: StateId) -> QResult<usize> {
        self.get(id)?;
        let mut depth = 0;
        let mut s = id;
        while !s.is_top() {
            s = self.get(s)?.superstate;
            depth += 1;
            if depth > MAX_STATE_DEPTH || depth >= self.len() {
                return Err(QError::MalformedTable);
            }
        }
        Ok(depth)
    }

    /// Whether `ancestor` is `id` itself or one of its superstates.
    pub fn is_ancestor(&self, ancestor: StateId, id: StateId) -> bool {
        let mut s = id;
        for _ in 0..=MAX_STATE_DEPTH {
            if s == ancestor {
                return true;
            }
            if s.is_top() {
                return false;
            }
            match self.states.get(s.index()) {
                Some(d) => s = d.superstate,
                None => return false,
            }
        }
        false
    }

    /// Check the table and return the deepest nesting level in it.
    ///
    /// Slot 0 must be the top state, every superstate must be in range and
    /// every chain must reach top within [`MAX_STATE_DEPTH`] links.
    pub fn validate(&self) -> QResult<usize> {
        let top = self.states.first().ok_or(QError::MalformedTable)?;
        if !top.superstate.is_top() {
            error!("state table: slot 0 must be top, found '{}'", top.name);
            return Err(QError::MalformedTable);
        }
        if self.len() > u8::MAX as usize + 1 {
            return Err(QError::MalformedTable);
        }

        let mut max_depth = 0;
        for i in 1..self.len() {
            let id = StateId(i as u8);
            let depth = self.depth_of(id).map_err(|_| {
                error!("state table: '{}' does not reach top", self.name(id));
                QError::MalformedTable
            })?;
            max_depth = max_depth.max(depth);
        }
        Ok(max_depth)
    }
}

impl<W: 'static> fmt::Debug for StateTable<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.states.iter().map(|d| (d.name, d.superstate.0)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &mut (), _: &QEvt) -> QStateReturn {
        QStateReturn::Handled
    }

    static NESTED: [StateDesc<()>; 4] = [
        StateDesc::top(),
        StateDesc::new("a", StateId(0), nop),
        StateDesc::new("b", StateId(1), nop),
        StateDesc::new("c", StateId(2), nop),
    ];

    static CYCLIC: [StateDesc<()>; 3] = [
        StateDesc::top(),
        StateDesc::new("a", StateId(2), nop),
        StateDesc::new("b", StateId(1), nop),
    ];

    static DANGLING: [StateDesc<()>; 2] = [StateDesc::top(), StateDesc::new("a", StateId(9), nop)];

    #[test]
    fn depth_is_measured_to_top() {
        let table = StateTable::new(&NESTED);
        assert_eq!(table.validate(), Ok(3));
        assert_eq!(table.depth_of(StateId(2)), Ok(2));
        assert!(table.is_ancestor(StateId(1), StateId(3)));
        assert!(!table.is_ancestor(StateId(3), StateId(1)));
        assert_eq!(table.name(StateId(0)), "top");
    }

    #[test]
    fn cycles_and_dangling_links_are_rejected() {
        assert_eq!(StateTable::new(&CYCLIC).validate(), Err(QError::MalformedTable));
        assert_eq!(StateTable::new(&DANGLING).validate(), Err(QError::MalformedTable));
        assert_eq!(StateTable::<()>::new(&[]).validate(), Err(QError::MalformedTable));
    }
}
