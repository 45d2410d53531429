// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Copy, PartialOrd, PartialEq)]
pub enum GateState {
    Closed,
    Entered,
    Open,
}

/// One-shot rendezvous between a test and a job body.
///
/// The body calls [`Gate::enter`] and blocks until the test calls [`Gate::open`]. The test
/// can wait for the body to arrive with [`Gate::await_entered`].
#[derive(Clone, Debug)]
pub struct Gate {
    sync_state: Arc<(Mutex<GateState>, Condvar)>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        Self {
            sync_state: Arc::new((Mutex::new(GateState::Closed), Condvar::new())),
        }
    }

    fn set_state(&self, new_state: GateState) {
        let (lock, cvar) = &*self.sync_state;
        let mut current_state = lock.lock().unwrap();
        if *current_state < new_state {
            *current_state = new_state;
        }
        cvar.notify_all();
    }

    fn await_state(&self, state: GateState, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.sync_state;
        let current_state = lock.lock().unwrap();
        let (current_state, _) = cvar
            .wait_timeout_while(current_state, timeout, |current| *current < state)
            .unwrap();
        *current_state >= state
    }

    /// Called from the job body.
    pub fn enter(&self) {
        self.set_state(GateState::Entered);
        self.await_state(GateState::Open, Duration::from_secs(30));
    }

    /// Marks the body as arrived without blocking it.
    pub fn mark_entered(&self) {
        self.set_state(GateState::Entered);
    }

    pub fn open(&self) {
        self.set_state(GateState::Open);
    }

    pub fn await_entered(&self) {
        assert!(
            self.await_state(GateState::Entered, Duration::from_secs(5)),
            "job body never reached the gate"
        );
    }
}
