// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::thread;
use std::time::{Duration, Instant};

use jobdispatch::{JobDispatcher, JobHandle};

/// Plays the host's main loop: drains idle work until every job is terminal.
/// Returns `false` on timeout.
pub fn pump_until_finished(
    dispatcher: &JobDispatcher,
    handles: &[JobHandle],
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        dispatcher.run_idle_work();
        if handles.iter().all(JobHandle::is_finished) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
