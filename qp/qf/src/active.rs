//! Active objects
//!
//! An active object couples one state machine with one event queue. Events
//! are posted from any context; a scheduler later takes them out one at a
//! time and runs each to completion on the object's state machine.
//!
//! Posting retains a pooled event, and `dispatch_one` releases it once the
//! state machine is done with it, so an event stays alive exactly as long as
//! some queue or handler still refers to it.

use core::cell::{Cell, RefCell};
use core::fmt;

use critical_section::{CriticalSection, Mutex};
use log::{debug, trace, warn};
use qp_core::{QError, QEvt, QPriority, QResult};
use qp_mem::{EventPools, QMemContext};
use qp_qep::{QFsm, QHsm, QOutcome, QStateMachine, StateId, StateTable};

use crate::queue::QEQueue;
use crate::DEFAULT_QUEUE_CAPACITY;

/// Lifecycle of a live active object.
///
/// Creation and destruction are not states here: `QActive::create` only
/// hands out an object that is already started, and `QActive::destroy`
/// consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QActiveState {
    /// Initial transition taken, no event dispatched yet
    Started,
    /// At least one event dispatched
    Running,
}

impl fmt::Display for QActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QActiveState::Started => write!(f, "Started"),
            QActiveState::Running => write!(f, "Running"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QActiveState {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            QActiveState::Started => defmt::write!(fmt, "Started"),
            QActiveState::Running => defmt::write!(fmt, "Running"),
        }
    }
}

/// Static description of an active object with an event queue of `N`
/// slots.
pub struct QActiveDef<W: 'static, const N: usize = DEFAULT_QUEUE_CAPACITY> {
    name: &'static str,
    priority: QPriority,
    initial: StateId,
    table: StateTable<W>,
}

impl<W: 'static, const N: usize> QActiveDef<W, N> {
    pub fn builder(name: &'static str, table: StateTable<W>) -> QActiveDefBuilder<W, N> {
        QActiveDefBuilder {
            name,
            table,
            priority: 0,
            initial: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> QPriority {
        self.priority
    }

    pub const fn queue_capacity(&self) -> usize {
        N
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn table(&self) -> StateTable<W> {
        self.table
    }

    pub const fn workspace_size(&self) -> usize {
        core::mem::size_of::<W>()
    }
}

pub struct QActiveDefBuilder<W: 'static, const N: usize> {
    name: &'static str,
    table: StateTable<W>,
    priority: u8,
    initial: Option<StateId>,
}

impl<W: 'static, const N: usize> QActiveDefBuilder<W, N> {
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn initial(mut self, state: StateId) -> Self {
        self.initial = Some(state);
        self
    }

    pub fn build(self) -> QResult<QActiveDef<W, N>> {
        let priority = QPriority::new(self.priority)?;
        if N == 0 {
            return Err(QError::InvalidSize);
        }
        let initial = self.initial.ok_or(QError::InvalidState)?;
        if initial.index() >= self.table.len() {
            return Err(QError::InvalidState);
        }
        if initial.is_top() {
            return Err(QError::InvalidTransition);
        }
        Ok(QActiveDef {
            name: self.name,
            priority,
            initial,
            table: self.table,
        })
    }
}

/// Object-safe view of an active object, used by schedulers.
pub trait QActiveRunnable: Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> QPriority;
    /// Dispatch one queued event; `Ok(false)` when the queue was empty.
    fn dispatch_one(&self) -> QResult<bool>;
    fn has_events(&self) -> bool;
    fn post(&self, e: &QEvt) -> QResult<()>;
    fn post_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<()>;
    /// Post ahead of everything already queued.
    fn post_lifo(&self, e: &QEvt) -> QResult<()> {
        critical_section::with(|cs| self.post_lifo_from_isr(cs, e))
    }
    fn post_lifo_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<()>;
}

/// Active object running a state machine `M` with an event queue of `N`
/// slots.
pub struct QActive<'a, M: QStateMachine, const N: usize = DEFAULT_QUEUE_CAPACITY> {
    name: &'static str,
    priority: QPriority,
    queue: Mutex<RefCell<QEQueue<N>>>,
    sm: spin::Mutex<M>,
    lifecycle: Mutex<Cell<QActiveState>>,
    pools: &'a EventPools,
    mem: &'a QMemContext,
    footprint: usize,
}

/// Active object over a hierarchical state machine
pub type QHsmActive<'a, W, const N: usize = DEFAULT_QUEUE_CAPACITY> = QActive<'a, QHsm<W>, N>;

/// Active object over a flat state machine
pub type QFsmActive<'a, W, const N: usize = DEFAULT_QUEUE_CAPACITY> = QActive<'a, QFsm<W>, N>;

impl<'a, M: QStateMachine, const N: usize> QActive<'a, M, N> {
    /// Reserve storage from `mem`, build the state machine and take its
    /// initial transition.
    pub fn create(
        def: &QActiveDef<M::Workspace, N>,
        workspace: M::Workspace,
        mem: &'a QMemContext,
        pools: &'a EventPools,
    ) -> QResult<Self> {
        let mut sm = M::with_table(def.table, workspace)?;
        let footprint = QEQueue::<N>::storage_bytes() + def.workspace_size() + sm.footprint();
        mem.reserve(footprint)?;

        if let Err(err) = sm.init(def.initial) {
            warn!("{}: initial transition failed: {}", def.name, err);
            mem.release(footprint)?;
            return Err(err);
        }
        debug!(
            "{}: started in state {}, {} bytes reserved",
            def.name,
            sm.state(),
            footprint
        );

        Ok(Self {
            name: def.name,
            priority: def.priority,
            queue: Mutex::new(RefCell::new(QEQueue::new())),
            sm: spin::Mutex::new(sm),
            lifecycle: Mutex::new(Cell::new(QActiveState::Started)),
            pools,
            mem,
            footprint,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> QPriority {
        self.priority
    }

    pub fn lifecycle(&self) -> QActiveState {
        critical_section::with(|cs| self.lifecycle.borrow(cs).get())
    }

    /// Bytes reserved from the memory context.
    pub fn footprint(&self) -> usize {
        self.footprint
    }

    /// Post to the back of the queue.
    ///
    /// On success the event is retained by the queue. On failure nothing
    /// changed and the caller still owns the event.
    pub fn post(&self, e: &QEvt) -> QResult<()> {
        critical_section::with(|cs| self.post_from_isr(cs, e))
            .inspect(|_| trace!("{}: post {}", self.name, e))
            .inspect_err(|err| warn!("{}: post {} failed: {}", self.name, e, err))
    }

    /// Post ahead of everything already queued.
    pub fn post_lifo(&self, e: &QEvt) -> QResult<()> {
        critical_section::with(|cs| self.post_lifo_from_isr(cs, e))
            .inspect(|_| trace!("{}: post_lifo {}", self.name, e))
            .inspect_err(|err| warn!("{}: post_lifo {} failed: {}", self.name, e, err))
    }

    pub fn post_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<()> {
        self.enqueue(cs, e, false)
    }

    pub fn post_lifo_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<()> {
        self.enqueue(cs, e, true)
    }

    fn enqueue(&self, cs: CriticalSection<'_>, e: &QEvt, lifo: bool) -> QResult<()> {
        if e.signal().is_reserved() {
            return Err(QError::InvalidSignal);
        }
        let mut queue = self.queue.borrow_ref_mut(cs);
        if queue.is_full() {
            return Err(QError::QueueFull);
        }
        self.pools.retain_from_isr(cs, e)?;
        if lifo {
            queue.post_lifo(*e)
        } else {
            queue.post(*e)
        }
    }

    /// Take one event off the queue and run it to completion.
    ///
    /// Returns `Ok(false)` when the queue was empty. A dispatch already in
    /// flight on this object makes the call fail with `NotPermitted`.
    pub fn dispatch_one(&self) -> QResult<bool> {
        let Some(mut sm) = self.sm.try_lock() else {
            return Err(QError::NotPermitted);
        };
        let Some(e) = critical_section::with(|cs| self.queue.borrow_ref_mut(cs).get()) else {
            return Ok(false);
        };
        self.set_lifecycle(QActiveState::Running);

        let outcome = sm.dispatch(&e);
        drop(sm);
        let released = self.pools.release(&e);

        match outcome? {
            QOutcome::Transitioned(s) => debug!("{}: {} -> state {}", self.name, e, s),
            QOutcome::Ignored => trace!("{}: {} ignored", self.name, e),
            _ => {}
        }
        released?;
        Ok(true)
    }

    /// Dispatch until the queue is empty; returns how many events ran.
    pub fn dispatch_all(&self) -> QResult<usize> {
        let mut n = 0;
        while self.dispatch_one()? {
            n += 1;
        }
        Ok(n)
    }

    pub fn has_events(&self) -> bool {
        critical_section::with(|cs| !self.queue.borrow_ref(cs).is_empty())
    }

    pub fn queue_len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    pub fn queue_n_free(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).n_free())
    }

    /// Lowest number of free queue slots seen so far.
    pub fn queue_n_min(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).n_min())
    }

    /// Current leaf state, or `NotPermitted` while a dispatch is running.
    pub fn state(&self) -> QResult<StateId> {
        self.with_machine(|sm| sm.state())
    }

    /// Look at the state machine between dispatches.
    pub fn with_machine<R>(&self, f: impl FnOnce(&M) -> R) -> QResult<R> {
        let sm = self.sm.try_lock().ok_or(QError::NotPermitted)?;
        Ok(f(&sm))
    }

    /// Exit every active state, release all still-queued events and give the
    /// storage back to the memory context. Returns the workspace.
    pub fn destroy(self) -> QResult<M::Workspace> {
        let mut sm = self.sm.into_inner();
        let exited = sm.exit_to_top();

        let drained = critical_section::with(|cs| {
            let mut queue = self.queue.borrow_ref_mut(cs);
            while let Some(e) = queue.get() {
                self.pools.release_from_isr(cs, &e)?;
            }
            Ok::<_, QError>(())
        });
        self.mem.release(self.footprint)?;
        debug!("{}: destroyed, {} bytes released", self.name, self.footprint);

        exited?;
        drained?;
        Ok(sm.into_workspace())
    }

    fn set_lifecycle(&self, state: QActiveState) {
        critical_section::with(|cs| self.lifecycle.borrow(cs).set(state));
    }
}

impl<M, const N: usize> QActiveRunnable for QActive<'_, M, N>
where
    M: QStateMachine + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> QPriority {
        self.priority
    }

    fn dispatch_one(&self) -> QResult<bool> {
        QActive::dispatch_one(self)
    }

    fn has_events(&self) -> bool {
        QActive::has_events(self)
    }

    fn post(&self, e: &QEvt) -> QResult<()> {
        QActive::post(self, e)
    }

    fn post_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<()> {
        QActive::post_from_isr(self, cs, e)
    }

    fn post_lifo(&self, e: &QEvt) -> QResult<()> {
        QActive::post_lifo(self, e)
    }

    fn post_lifo_from_isr(&self, cs: CriticalSection<'_>, e: &QEvt) -> QResult<()> {
        QActive::post_lifo_from_isr(self, cs, e)
    }
}

impl<M: QStateMachine, const N: usize> fmt::Debug for QActive<'_, M, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QActive")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("lifecycle", &self.lifecycle())
            .field("queued", &self.queue_len())
            .finish()
    }
}
