// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::job_engine::cancellation::{self, CancellationFlag};

/// A job body. The async body runs on a worker, the idle body on the main context.
pub(crate) type Body = Box<dyn FnOnce(&JobHandle) -> anyhow::Result<()> + Send + 'static>;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique job identity. Also the key of the dispatcher's job arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a job. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobState {
    /// Built by the caller, not yet known to a dispatcher.
    Created = 0,
    QueuedAsync = 1,
    RunningAsync = 2,
    QueuedIdle = 3,
    RunningIdle = 4,
    Completed = 5,
    Cancelled = 6,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Created,
            1 => JobState::QueuedAsync,
            2 => JobState::RunningAsync,
            3 => JobState::QueuedIdle,
            4 => JobState::RunningIdle,
            5 => JobState::Completed,
            _ => JobState::Cancelled,
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// `Completed` or `Cancelled`.
    pub state: JobState,
    /// Error or panic message raised by one of the bodies. A faulted job is still `Completed`.
    pub fault: Option<String>,
}

impl JobOutcome {
    pub(crate) fn completed() -> Self {
        Self {
            state: JobState::Completed,
            fault: None,
        }
    }

    pub(crate) fn faulted(fault: String) -> Self {
        Self {
            state: JobState::Completed,
            fault: Some(fault),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self {
            state: JobState::Cancelled,
            fault: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == JobState::Cancelled
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }
}

// The part of a job that outlives the dispatcher's record. It never points back to the
// dispatcher, so handles cannot form a cycle with it.
struct JobShared {
    id: JobId,
    desc: String,
    cancellation: CancellationFlag,
    // Mirror of the state the dispatcher keeps under its lock, for lock-free observation.
    state: AtomicU8,
    outcome: Mutex<Option<JobOutcome>>,
    finished: Condvar,
}

/// Shared handle to a job. Cheap to clone; equality is identity.
///
/// A handle never owns the job's bodies. Those belong to the dispatcher while the job is
/// queued or running and are dropped as soon as the job reaches a terminal state.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    fn new(desc: String) -> Self {
        Self {
            shared: Arc::new(JobShared {
                id: JobId::next(),
                desc,
                cancellation: CancellationFlag::new(),
                state: AtomicU8::new(JobState::Created as u8),
                outcome: Mutex::new(None),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn desc(&self) -> &str {
        &self.shared.desc
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// The only way a body observes a pending cancellation. Propagate the error with `?`.
    pub fn check_cancellation(&self) -> Result<(), cancellation::Cancelled> {
        self.shared.cancellation.check()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancellation.is_cancelled()
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.lock_outcome().clone()
    }

    /// Blocks until the job is terminal.
    ///
    /// Do not call this on the main context for a job whose idle body still has to be
    /// drained by that same context; use `JobDispatcher::sprint` instead.
    pub fn wait(&self) -> JobOutcome {
        let mut outcome = self.lock_outcome();
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return outcome.clone();
            }
            outcome = self
                .shared
                .finished
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        let outcome = self.lock_outcome();
        let (outcome, _) = self
            .shared
            .finished
            .wait_timeout_while(outcome, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        outcome.clone()
    }

    pub fn downgrade(&self) -> WeakJobHandle {
        WeakJobHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn request_cancel(&self) -> bool {
        self.shared.cancellation.cancel()
    }

    /// Publishes the terminal outcome and wakes every waiter. Only the first call counts.
    pub(crate) fn finish(&self, outcome: JobOutcome) {
        let mut slot = self.lock_outcome();
        if slot.is_some() {
            return;
        }
        self.set_state(outcome.state);
        *slot = Some(outcome);
        self.shared.finished.notify_all();
    }

    fn lock_outcome(&self) -> MutexGuard<'_, Option<JobOutcome>> {
        self.shared
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for JobHandle {}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("desc", &self.desc())
            .field("state", &self.state())
            .finish()
    }
}

/// Observer reference that does not keep the job alive.
#[derive(Debug, Clone)]
pub struct WeakJobHandle {
    shared: Weak<JobShared>,
}

impl WeakJobHandle {
    pub fn upgrade(&self) -> Option<JobHandle> {
        self.shared.upgrade().map(|shared| JobHandle { shared })
    }
}

/// A unit of two-phase work: an async body for a worker thread and an optional idle body
/// that the main context runs afterwards, usually to deliver the result.
pub struct Job {
    handle: JobHandle,
    async_body: Body,
    idle_body: Option<Body>,
}

impl Job {
    pub fn new<F>(desc: impl Into<String>, async_body: F) -> Self
    where
        F: FnOnce(&JobHandle) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            handle: JobHandle::new(desc.into()),
            async_body: Box::new(async_body),
            idle_body: None,
        }
    }

    pub fn with_idle<F>(mut self, idle_body: F) -> Self
    where
        F: FnOnce(&JobHandle) -> anyhow::Result<()> + Send + 'static,
    {
        self.idle_body = Some(Box::new(idle_body));
        self
    }

    /// Handle to the job, available before submission.
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> JobId {
        self.handle.id()
    }

    pub fn desc(&self) -> &str {
        self.handle.desc()
    }

    pub fn has_idle(&self) -> bool {
        self.idle_body.is_some()
    }

    pub(crate) fn into_parts(self) -> (JobHandle, Body, Option<Body>) {
        (self.handle, self.async_body, self.idle_body)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("desc", &self.desc())
            .field("has_idle", &self.has_idle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn noop_job(desc: &str) -> Job {
        Job::new(desc, |_job| Ok(()))
    }

    #[test]
    fn test_new_job_is_created() {
        let job = noop_job("fresh");
        let handle = job.handle();
        assert_eq!(handle.state(), JobState::Created);
        assert_eq!(handle.desc(), "fresh");
        assert!(!handle.is_finished());
        assert!(handle.outcome().is_none());
        assert!(!job.has_idle());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = noop_job("a");
        let b = noop_job("b");
        assert_ne!(a.id(), b.id());
        assert_ne!(a.handle(), b.handle());
        assert_eq!(a.handle(), a.handle());
    }

    #[test]
    fn test_finish_only_counts_once() {
        let handle = noop_job("finish").handle();
        handle.finish(JobOutcome::faulted("boom".into()));
        handle.finish(JobOutcome::cancelled());

        let outcome = handle.outcome().unwrap();
        assert!(outcome.is_completed());
        assert_eq!(outcome.fault.as_deref(), Some("boom"));
        assert_eq!(handle.state(), JobState::Completed);
    }

    #[test]
    fn test_wait_wakes_up_on_finish() {
        let handle = noop_job("wait").handle();
        let finisher = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            finisher.finish(JobOutcome::cancelled());
        });

        assert!(handle.wait().is_cancelled());
        t.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let handle = noop_job("timeout").handle();
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_weak_handle_does_not_keep_job_alive() {
        let job = noop_job("weak");
        let weak = job.handle().downgrade();
        assert!(weak.upgrade().is_some());
        drop(job);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_cancel_request_is_visible_to_body_check() {
        let handle = noop_job("check").handle();
        assert!(handle.check_cancellation().is_ok());
        assert!(handle.request_cancel());
        assert!(!handle.request_cancel());
        assert!(handle.is_cancel_requested());
        assert!(handle.check_cancellation().is_err());
    }
}
