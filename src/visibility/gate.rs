//! One-shot startup gate.
//!
//! Commands that read locations must not run until the first full sync has
//! finished. The gate moves `NotStarted -> InProgress -> Complete` exactly
//! once; a failed first sync drops back to `NotStarted` so the next tick can
//! try again.

use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NotStarted,
    InProgress,
    Complete,
}

#[derive(Debug)]
pub struct StartupGate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl Default for StartupGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::NotStarted),
            notify: Notify::new(),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_complete(&self) -> bool {
        self.state() == GateState::Complete
    }

    /// Claim the initial sync. Only one caller gets `true`.
    pub fn begin(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == GateState::NotStarted {
            *state = GateState::InProgress;
            true
        } else {
            false
        }
    }

    /// Open the gate for good and wake every waiter.
    pub fn complete(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = GateState::Complete;
        self.notify.notify_waiters();
    }

    /// Give up an in-progress initial sync so a later caller can retry.
    ///
    /// Wakes [`wait_settled`](Self::wait_settled) callers; [`wait`](Self::wait)
    /// callers go back to sleep.
    pub fn fail(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != GateState::InProgress {
                return;
            }
            *state = GateState::NotStarted;
        }
        self.notify.notify_waiters();
    }

    /// Suspend while an initial sync is in progress and return how it ended.
    pub async fn wait_settled(&self) -> GateState {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let state = self.state();
            if state != GateState::InProgress {
                return state;
            }
            notified.await;
        }
    }

    /// Suspend until [`complete`](Self::complete) has been called.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `complete` cannot slip
            // between the check and the await.
            notified.as_mut().enable();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }
}
