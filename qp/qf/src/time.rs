//! Time events
//!
//! A time event counts ticks down from the tick interrupt and posts a const
//! event carrying its signal to a target active object when the count
//! expires. One-shot events disarm themselves; periodic events reload.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use log::{trace, warn};
use qp_core::{QError, QEvt, QResult, QSignal, QTimeEvtCtr, QTimeInterval};

use crate::active::QActiveRunnable;

#[derive(Debug, Clone, Copy)]
struct Countdown {
    ctr: QTimeEvtCtr,
    /// Reload value, zero for one-shot
    period: QTimeEvtCtr,
}

pub struct QTimeEvt {
    sig: QSignal,
    countdown: Mutex<RefCell<Option<Countdown>>>,
}

impl QTimeEvt {
    pub const fn new(sig: QSignal) -> Self {
        Self {
            sig,
            countdown: Mutex::new(RefCell::new(None)),
        }
    }

    pub fn signal(&self) -> QSignal {
        self.sig
    }

    /// Start counting down. Arming an armed event is `NotPermitted`, use
    /// [`rearm`](Self::rearm) to restart it.
    pub fn arm(&self, interval: QTimeInterval) -> QResult<()> {
        let countdown = self.countdown_for(interval)?;
        critical_section::with(|cs| {
            let mut slot = self.countdown.borrow_ref_mut(cs);
            if slot.is_some() {
                return Err(QError::NotPermitted);
            }
            *slot = Some(countdown);
            Ok(())
        })
        .inspect(|_| trace!("timer {}: armed {:?}", self.sig, interval))
    }

    /// Restart the countdown whether or not it was running. Returns whether
    /// the event was armed before.
    pub fn rearm(&self, interval: QTimeInterval) -> QResult<bool> {
        let countdown = self.countdown_for(interval)?;
        Ok(critical_section::with(|cs| {
            self.countdown.borrow_ref_mut(cs).replace(countdown).is_some()
        }))
    }

    /// Stop the countdown. Returns whether the event was armed.
    pub fn disarm(&self) -> bool {
        critical_section::with(|cs| self.countdown.borrow_ref_mut(cs).take().is_some())
    }

    pub fn is_armed(&self) -> bool {
        critical_section::with(|cs| self.countdown.borrow_ref(cs).is_some())
    }

    /// Ticks left before the next expiry, zero when disarmed.
    pub fn remaining(&self) -> QTimeEvtCtr {
        critical_section::with(|cs| {
            self.countdown
                .borrow_ref(cs)
                .map_or(QTimeEvtCtr::ZERO, |c| c.ctr)
        })
    }

    /// Advance by one tick from the tick interrupt. Returns `Ok(true)` when
    /// the event expired and was posted to `target`.
    ///
    /// If the post fails the expiry is lost and the error is returned; the
    /// countdown has already been reloaded or disarmed.
    pub fn tick_from_isr(
        &self,
        cs: CriticalSection<'_>,
        target: &dyn QActiveRunnable,
    ) -> QResult<bool> {
        {
            let mut slot = self.countdown.borrow_ref_mut(cs);
            let Some(c) = slot.as_mut() else {
                return Ok(false);
            };
            if !c.ctr.decrement() {
                return Ok(false);
            }
            let one_shot = c.period.is_zero();
            c.ctr = c.period;
            if one_shot {
                *slot = None;
            }
        }
        target.post_from_isr(cs, &QEvt::constant(self.sig))?;
        Ok(true)
    }

    /// Task-context form of [`tick_from_isr`](Self::tick_from_isr).
    pub fn tick(&self, target: &dyn QActiveRunnable) -> QResult<bool> {
        critical_section::with(|cs| self.tick_from_isr(cs, target))
            .inspect_err(|err| {
                warn!("timer {}: post to {} failed: {}", self.sig, target.name(), err)
            })
    }

    fn countdown_for(&self, interval: QTimeInterval) -> QResult<Countdown> {
        if self.sig.is_reserved() {
            return Err(QError::InvalidSignal);
        }
        let ticks = interval.ticks();
        if ticks.is_zero() {
            return Err(QError::InvalidSize);
        }
        let period = if interval.is_periodic() {
            ticks
        } else {
            QTimeEvtCtr::ZERO
        };
        Ok(Countdown { ctr: ticks, period })
    }
}

impl core::fmt::Debug for QTimeEvt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QTimeEvt")
            .field("sig", &self.sig)
            .field("remaining", &self.remaining())
            .finish()
    }
}
