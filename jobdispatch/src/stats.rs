// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::Serialize;

/// Point-in-time snapshot of a dispatcher, taken under its lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub workers: usize,
    pub accepting: bool,
    pub submitted: u64,
    pub queued_async: usize,
    pub running_async: usize,
    pub queued_idle: usize,
    pub running_idle: usize,
    /// Includes faulted jobs.
    pub completed: u64,
    pub faulted: u64,
    pub cancelled: u64,
}

impl DispatcherStats {
    /// Jobs accepted but not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.queued_async + self.running_async + self.queued_idle + self.running_idle
    }
}

// Running totals kept by the dispatcher next to its queues.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub submitted: u64,
    pub completed: u64,
    pub faulted: u64,
    pub cancelled: u64,
}
