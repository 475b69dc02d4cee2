#![no_std]
#![forbid(unsafe_code)]

//! # QV Cooperative Kernel
//!
//! The vanilla (cooperative) kernel: whenever any active object has queued
//! events, the highest-priority one dispatches exactly one event to
//! completion, then the ready set is evaluated again. No active object is
//! ever preempted by another in the middle of a dispatch.
//!
//! The kernel also routes published events to the active objects that
//! subscribed to their signal.

use log::{debug, trace, warn};
use qp_core::{QError, QEvt, QPriority, QPriorityMask, QResult, QSignal};
use qp_mem::EventPools;
use qp_qf::{QActiveRunnable, MAX_ACTIVE};

/// Maximum number of distinct signals with subscribers
pub const MAX_PUB_SIGNALS: usize = 32;

/// QV kernel - cooperative scheduler
pub struct QV<'a> {
    /// Registered active objects, highest priority first
    actives: heapless::Vec<&'a dyn QActiveRunnable, MAX_ACTIVE>,
    subscribers: heapless::Vec<(QSignal, QPriorityMask), MAX_PUB_SIGNALS>,
    pools: &'a EventPools,
}

impl<'a> QV<'a> {
    pub const fn new(pools: &'a EventPools) -> Self {
        Self {
            actives: heapless::Vec::new(),
            subscribers: heapless::Vec::new(),
            pools,
        }
    }

    /// Add an active object. Priorities must be unique and within the
    /// range the ready set tracks.
    pub fn register(&mut self, active: &'a dyn QActiveRunnable) -> QResult<()> {
        let prio = active.priority();
        if !prio.is_valid() {
            warn!("QV: '{}' has unusable priority {}", active.name(), prio.raw());
            return Err(QError::InvalidPriority);
        }
        if self.find(prio).is_some() {
            warn!("QV: priority {} already taken", prio.raw());
            return Err(QError::InvalidPriority);
        }
        let at = self
            .actives
            .iter()
            .position(|ao| ao.priority() < prio)
            .unwrap_or(self.actives.len());
        self.actives
            .insert(at, active)
            .map_err(|_| QError::OutOfMemory)?;
        debug!("QV: registered '{}' at priority {}", active.name(), prio.raw());
        Ok(())
    }

    /// Remove the active object at `prio` along with its subscriptions.
    pub fn unregister(&mut self, prio: QPriority) -> QResult<()> {
        let at = self
            .actives
            .iter()
            .position(|ao| ao.priority() == prio)
            .ok_or(QError::ObjectInvalid)?;
        self.actives.remove(at);
        for (_, mask) in self.subscribers.iter_mut() {
            mask.clear(prio);
        }
        self.subscribers.retain(|(_, mask)| !mask.is_empty());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.actives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actives.is_empty()
    }

    /// Deliver events with signal `sig` published later to the active
    /// object at `prio`.
    pub fn subscribe(&mut self, prio: QPriority, sig: QSignal) -> QResult<()> {
        if sig.is_reserved() {
            return Err(QError::InvalidSignal);
        }
        if self.find(prio).is_none() {
            return Err(QError::ObjectInvalid);
        }
        if let Some((_, mask)) = self.subscribers.iter_mut().find(|(s, _)| *s == sig) {
            mask.set(prio);
            return Ok(());
        }
        let mut mask = QPriorityMask::new();
        mask.set(prio);
        self.subscribers
            .push((sig, mask))
            .map_err(|_| QError::OutOfMemory)
    }

    pub fn unsubscribe(&mut self, prio: QPriority, sig: QSignal) {
        if let Some((_, mask)) = self.subscribers.iter_mut().find(|(s, _)| *s == sig) {
            mask.clear(prio);
        }
        self.subscribers.retain(|(_, mask)| !mask.is_empty());
    }

    fn subscribers_of(&self, sig: QSignal) -> QPriorityMask {
        self.subscribers
            .iter()
            .find(|(s, _)| *s == sig)
            .map_or(QPriorityMask::EMPTY, |(_, mask)| *mask)
    }

    /// Post `e` to every subscriber of its signal, highest priority first.
    ///
    /// A pooled event is locked for the duration of the multicast so that a
    /// subscriber consuming it early cannot free it under the others; the
    /// final unlock reclaims it if nobody retained it. A failed delivery does
    /// not stop delivery to the remaining subscribers; the first error is
    /// returned. Returns the number of subscribers reached.
    pub fn publish(&self, e: &QEvt) -> QResult<usize> {
        let targets = self.subscribers_of(e.signal());
        let pooled = !e.is_const();
        if pooled {
            self.pools.lock(e)?;
        }

        let mut delivered = 0;
        let mut first_err = None;
        for ao in self.actives.iter().filter(|ao| targets.is_set(ao.priority())) {
            match ao.post(e) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        if pooled {
            self.pools.unlock(e)?;
        }
        trace!("QV: published {} to {} subscribers", e, delivered);
        match first_err {
            Some(err) => Err(err),
            None => Ok(delivered),
        }
    }

    /// Priorities of all active objects with queued events.
    pub fn ready_set(&self) -> QPriorityMask {
        let mut ready = QPriorityMask::new();
        for ao in self.actives.iter().filter(|ao| ao.has_events()) {
            ready.set(ao.priority());
        }
        ready
    }

    /// Dispatch one event on the highest-priority ready active object.
    /// Returns `Ok(false)` when nothing was ready.
    pub fn run_once(&self) -> QResult<bool> {
        let Some(prio) = self.ready_set().highest() else {
            return Ok(false);
        };
        match self.find(prio) {
            Some(ao) => ao.dispatch_one(),
            None => Ok(false),
        }
    }

    /// Dispatch until every queue is empty; returns how many events ran.
    pub fn run_until_idle(&self) -> QResult<usize> {
        let mut n = 0;
        while self.run_once()? {
            n += 1;
        }
        Ok(n)
    }

    /// Scheduler loop. Whenever all queues are empty `on_idle` runs; it
    /// stands in for the idle hook of a port (sleep, wait for interrupt,
    /// drive the tick) and returns `false` to stop the loop.
    pub fn run<F>(&self, mut on_idle: F) -> QResult<()>
    where
        F: FnMut() -> bool,
    {
        debug!("QV: running {} active objects", self.actives.len());
        loop {
            self.run_until_idle()?;
            if !on_idle() {
                return Ok(());
            }
        }
    }

    fn find(&self, prio: QPriority) -> Option<&'a dyn QActiveRunnable> {
        self.actives.iter().copied().find(|ao| ao.priority() == prio)
    }
}

impl core::fmt::Debug for QV<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QV")
            .field("actives", &self.actives.len())
            .field("signals", &self.subscribers.len())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QV<'_> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "QV{{actives: {}}}", self.actives.len());
    }
}
