// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicBool, Ordering};

/// Control signal raised by [`CancellationFlag::check`] once a cancel has been requested.
///
/// Job bodies are expected to propagate it with `?`. The dispatcher recognizes it when a
/// body returns and finalizes the job as cancelled instead of recording a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job was cancelled")]
pub struct Cancelled;

/// Cooperative cancellation signal. Set at most once, never cleared.
///
/// Nothing is interrupted: a body that never calls [`CancellationFlag::check`] runs to completion.
#[derive(Debug, Default)]
pub struct CancellationFlag {
    requested: AtomicBool,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns `true` only for the call that actually set the flag.
    pub fn cancel(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
