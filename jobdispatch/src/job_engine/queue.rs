// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;

use crate::job_engine::job::JobId;

/// FIFO of job identities with priority promotion and removal by identity.
///
/// The queue itself is not synchronized. The dispatcher keeps both of its queues behind
/// the same lock that guards job state, so a job moves between them atomically.
#[derive(Debug, Default)]
pub struct JobQueue {
    ids: VecDeque<JobId>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `id`. Returns `false` and leaves the queue untouched if it is already queued.
    pub fn push_back(&mut self, id: JobId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push_back(id);
        true
    }

    pub fn pop_front(&mut self) -> Option<JobId> {
        self.ids.pop_front()
    }

    pub fn remove(&mut self, id: JobId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// Moves `id` ahead of every other queued job.
    pub fn move_to_front(&mut self, id: JobId) -> bool {
        match self.position(id) {
            Some(index) => {
                if index > 0 {
                    self.ids.remove(index);
                    self.ids.push_front(id);
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        self.ids.iter().copied()
    }

    /// Empties the queue, yielding ids in queue order.
    pub fn drain(&mut self) -> impl Iterator<Item = JobId> + '_ {
        self.ids.drain(..)
    }

    fn position(&self, id: JobId) -> Option<usize> {
        self.ids.iter().position(|queued| *queued == id)
    }
}
