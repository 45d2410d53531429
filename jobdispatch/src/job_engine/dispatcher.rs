// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::{DispatcherConfig, IdleBudget};
use crate::error::DispatchError;
use crate::job_engine::cancellation::Cancelled;
use crate::job_engine::job::{Body, Job, JobHandle, JobId, JobOutcome, JobState};
use crate::job_engine::queue::JobQueue;
use crate::stats::{Counters, DispatcherStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Worker(usize),
    /// The async body is being sprinted on the main context.
    Main,
}

/// Dispatcher-side record of an accepted job. Lives in the arena until the job is terminal.
struct JobRecord {
    handle: JobHandle,
    state: JobState,
    async_body: Option<Body>,
    idle_body: Option<Body>,
    owner: Option<Owner>,
}

impl JobRecord {
    fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.handle.set_state(state);
    }
}

enum BodyResult {
    Finished,
    Cancelled,
    Fault(String),
}

struct DispatchState {
    accepting: bool,
    jobs: HashMap<JobId, JobRecord>,
    async_queue: JobQueue,
    idle_queue: JobQueue,
    counters: Counters,
}

impl DispatchState {
    fn job_state(&self, id: JobId) -> Option<(JobState, Option<Owner>)> {
        self.jobs.get(&id).map(|record| (record.state, record.owner))
    }

    fn begin_async(&mut self, id: JobId, owner: Owner) -> Option<(JobHandle, Body)> {
        let record = self.jobs.get_mut(&id)?;
        let body = record.async_body.take()?;
        record.set_state(JobState::RunningAsync);
        record.owner = Some(owner);
        Some((record.handle.clone(), body))
    }

    fn complete_async(&mut self, id: JobId, result: BodyResult) {
        let Some(record) = self.jobs.get_mut(&id) else {
            return;
        };
        record.owner = None;
        let has_idle = record.idle_body.is_some();

        match result {
            BodyResult::Cancelled => {
                debug!("Job {id} observed its cancellation, skipping idle work");
                self.finalize(id, JobOutcome::cancelled());
            }
            BodyResult::Fault(fault) => {
                warn!("Async body of job {id} failed: {fault}");
                self.finalize(id, JobOutcome::faulted(fault));
            }
            BodyResult::Finished if !has_idle => {
                self.finalize(id, JobOutcome::completed());
            }
            BodyResult::Finished if !self.accepting => {
                debug!("Dispatcher closed, idle work of job {id} will not run");
                self.finalize(id, JobOutcome::cancelled());
            }
            BodyResult::Finished => {
                record.set_state(JobState::QueuedIdle);
                self.idle_queue.push_back(id);
                debug!("Job {id} queued for idle work");
            }
        }
    }

    fn begin_idle(&mut self, id: JobId) -> Option<(JobHandle, Body)> {
        let record = self.jobs.get_mut(&id)?;
        match record.idle_body.take() {
            Some(body) => {
                record.set_state(JobState::RunningIdle);
                Some((record.handle.clone(), body))
            }
            None => {
                self.finalize(id, JobOutcome::completed());
                None
            }
        }
    }

    fn complete_idle(&mut self, id: JobId, result: BodyResult) {
        let outcome = match result {
            BodyResult::Finished => JobOutcome::completed(),
            BodyResult::Cancelled => JobOutcome::cancelled(),
            BodyResult::Fault(fault) => {
                warn!("Idle body of job {id} failed: {fault}");
                JobOutcome::faulted(fault)
            }
        };
        self.finalize(id, outcome);
    }

    /// Drops the record (and with it any body that never ran) and publishes the outcome.
    fn finalize(&mut self, id: JobId, outcome: JobOutcome) {
        let Some(record) = self.jobs.remove(&id) else {
            return;
        };
        if outcome.is_cancelled() {
            self.counters.cancelled += 1;
        } else {
            self.counters.completed += 1;
            if outcome.is_faulted() {
                self.counters.faulted += 1;
            }
        }
        debug!("Job {id} finished as {:?}", outcome.state);
        record.handle.finish(outcome);
    }
}

struct Shared {
    state: Mutex<DispatchState>,
    /// Signalled when the async queue gains a job or the dispatcher closes.
    work_available: Condvar,
    /// Signalled whenever an async body returns.
    async_finished: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Schedules jobs across a fixed worker pool and a single main context.
///
/// The thread that constructs the dispatcher is the main context. It drains idle work with
/// [`JobDispatcher::run_idle_work`] and is the only thread allowed to call
/// [`JobDispatcher::cancel`], [`JobDispatcher::sprint`] and [`JobDispatcher::prioritise`].
/// `submit` works from any thread.
pub struct JobDispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: DispatcherConfig,
    main_thread: ThreadId,
}

impl JobDispatcher {
    pub fn new(workers: usize) -> Result<Self, DispatchError> {
        Self::with_config(DispatcherConfig::with_workers(workers))
    }

    pub fn with_config(config: DispatcherConfig) -> Result<Self, DispatchError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(DispatchState {
                accepting: true,
                jobs: HashMap::new(),
                async_queue: JobQueue::new(),
                idle_queue: JobQueue::new(),
                counters: Counters::default(),
            }),
            work_available: Condvar::new(),
            async_finished: Condvar::new(),
        });

        let dispatcher = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            config,
            main_thread: thread::current().id(),
        };

        for index in 0..dispatcher.config.workers {
            let shared = dispatcher.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", dispatcher.config.thread_name, index))
                .spawn(move || worker_loop(shared, index));
            match spawned {
                Ok(handle) => dispatcher.lock_workers().push(handle),
                // dropping the dispatcher joins the workers spawned so far
                Err(e) => return Err(DispatchError::Spawn(e)),
            }
        }

        info!(
            "Job dispatcher started with {} workers",
            dispatcher.config.workers
        );
        Ok(dispatcher)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn is_main_context(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// Queues the job for a worker and wakes one.
    ///
    /// After `close()` this fails with `DispatcherClosed` and the job is finalized as
    /// cancelled without running.
    pub fn submit(&self, job: Job) -> Result<JobHandle, DispatchError> {
        let (handle, async_body, idle_body) = job.into_parts();
        let id = handle.id();

        let mut state = self.shared.lock();
        if !state.accepting {
            state.counters.cancelled += 1;
            drop(state);
            warn!("Rejected job {id} ({}): dispatcher is closed", handle.desc());
            handle.finish(JobOutcome::cancelled());
            return Err(DispatchError::DispatcherClosed);
        }

        let mut record = JobRecord {
            handle: handle.clone(),
            state: JobState::Created,
            async_body: Some(async_body),
            idle_body,
            owner: None,
        };
        record.set_state(JobState::QueuedAsync);
        state.jobs.insert(id, record);
        state.async_queue.push_back(id);
        state.counters.submitted += 1;
        drop(state);

        self.shared.work_available.notify_one();
        debug!("Submitted job {id} ({})", handle.desc());
        Ok(handle)
    }

    /// Cancels a job. Main context only.
    ///
    /// A queued job is removed and finalized without running anything further. A running
    /// async body only gets its cancellation flag set; whether the idle body is skipped
    /// depends on the body observing the flag.
    pub fn cancel(&self, handle: &JobHandle) -> Result<(), DispatchError> {
        self.debug_assert_main_context("cancel");
        let id = handle.id();

        let mut state = self.shared.lock();
        let (job_state, _) = state
            .job_state(id)
            .ok_or(DispatchError::InvalidHandle(id))?;
        handle.request_cancel();

        match job_state {
            JobState::QueuedAsync => {
                state.async_queue.remove(id);
                state.finalize(id, JobOutcome::cancelled());
            }
            JobState::QueuedIdle => {
                state.idle_queue.remove(id);
                state.finalize(id, JobOutcome::cancelled());
            }
            JobState::RunningAsync => {
                debug!("Job {id} is running, cancellation flag set");
            }
            _ => {
                debug!("Job {id} is in state {job_state:?}, cancellation has no effect");
            }
        }
        Ok(())
    }

    /// Moves a job that still waits for a worker to the front of the async queue. Main
    /// context only. Returns `Ok(false)` when the job is past that point.
    pub fn prioritise(&self, handle: &JobHandle) -> Result<bool, DispatchError> {
        self.debug_assert_main_context("prioritise");
        let id = handle.id();

        let mut state = self.shared.lock();
        match state.job_state(id) {
            None => Err(DispatchError::InvalidHandle(id)),
            Some((JobState::QueuedAsync, _)) => {
                debug!("Prioritising job {id}");
                Ok(state.async_queue.move_to_front(id))
            }
            Some(_) => Ok(false),
        }
    }

    /// Drives a job to a terminal state on the calling thread. Main context only.
    ///
    /// A queued job has its remaining bodies run right here. A job whose async body is
    /// running on a worker is waited for, then its idle body runs here. No body runs twice.
    pub fn sprint(&self, handle: &JobHandle) -> Result<JobOutcome, DispatchError> {
        self.debug_assert_main_context("sprint");
        let id = handle.id();

        let mut state = self.shared.lock();
        loop {
            let (job_state, owner) = state
                .job_state(id)
                .ok_or(DispatchError::InvalidHandle(id))?;

            match job_state {
                JobState::QueuedAsync => {
                    state.async_queue.remove(id);
                    if let Some((job, body)) = state.begin_async(id, Owner::Main) {
                        drop(state);
                        debug!("Sprinting async body of job {id}");
                        let result = run_body(body, &job);
                        state = self.shared.lock();
                        state.complete_async(id, result);
                    }
                }
                JobState::RunningAsync if owner == Some(Owner::Main) => {
                    warn!("Job {id} sprinted from inside its own async body");
                    return Err(DispatchError::InvalidHandle(id));
                }
                JobState::RunningAsync => {
                    if let Some(Owner::Worker(index)) = owner {
                        debug!("Waiting for worker {index} to finish job {id}");
                    }
                    state = self
                        .shared
                        .async_finished
                        .wait_while(state, |state| {
                            matches!(state.job_state(id), Some((JobState::RunningAsync, _)))
                        })
                        .unwrap_or_else(PoisonError::into_inner);
                }
                JobState::QueuedIdle => {
                    state.idle_queue.remove(id);
                    if let Some((job, body)) = state.begin_idle(id) {
                        drop(state);
                        debug!("Sprinting idle body of job {id}");
                        let result = run_body(body, &job);
                        state = self.shared.lock();
                        state.complete_idle(id, result);
                    }
                }
                JobState::RunningIdle => {
                    warn!("Job {id} sprinted from inside its own idle body");
                    return Err(DispatchError::InvalidHandle(id));
                }
                JobState::Created | JobState::Completed | JobState::Cancelled => {
                    return Err(DispatchError::InvalidHandle(id));
                }
            }

            if let Some(outcome) = handle.outcome() {
                return Ok(outcome);
            }
        }
    }

    /// Runs queued idle bodies on the calling thread within the configured budget.
    pub fn run_idle_work(&self) -> usize {
        self.run_idle_work_with(self.config.idle_budget)
    }

    /// Runs queued idle bodies in FIFO order until the queue is empty or `budget` is used up.
    /// Never waits for workers. Returns the number of idle bodies that ran.
    pub fn run_idle_work_with(&self, budget: IdleBudget) -> usize {
        let started = Instant::now();
        let mut ran = 0;

        while !budget.is_exhausted(ran, started.elapsed()) {
            let mut state = self.shared.lock();
            let Some(id) = state.idle_queue.pop_front() else {
                break;
            };
            let Some((job, body)) = state.begin_idle(id) else {
                continue;
            };
            drop(state);

            let result = run_body(body, &job);
            self.shared.lock().complete_idle(id, result);
            ran += 1;
        }
        ran
    }

    pub fn state(&self, handle: &JobHandle) -> JobState {
        let state = self.shared.lock();
        state
            .job_state(handle.id())
            .map(|(job_state, _)| job_state)
            .unwrap_or_else(|| handle.state())
    }

    pub fn stats(&self) -> DispatcherStats {
        let state = self.shared.lock();
        let count = |wanted: JobState| {
            state
                .jobs
                .values()
                .filter(|record| record.state == wanted)
                .count()
        };
        DispatcherStats {
            workers: self.config.workers,
            accepting: state.accepting,
            submitted: state.counters.submitted,
            queued_async: state.async_queue.len(),
            running_async: count(JobState::RunningAsync),
            queued_idle: state.idle_queue.len(),
            running_idle: count(JobState::RunningIdle),
            completed: state.counters.completed,
            faulted: state.counters.faulted,
            cancelled: state.counters.cancelled,
        }
    }

    /// Stops accepting jobs and cancels everything still queued. Running async bodies keep
    /// going; their idle bodies will not run.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if !state.accepting {
            return;
        }
        state.accepting = false;

        let mut queued: Vec<JobId> = state.async_queue.drain().collect();
        queued.extend(state.idle_queue.drain());
        debug!("Cancelling {} queued jobs before shutdown", queued.len());
        for id in queued {
            if let Some(record) = state.jobs.get(&id) {
                record.handle.request_cancel();
            }
            state.finalize(id, JobOutcome::cancelled());
        }
        drop(state);

        self.shared.work_available.notify_all();
        info!("Job dispatcher closed");
    }

    /// Closes the dispatcher and joins every worker once its current async body returned.
    ///
    /// When this runs on a worker, for example because a body dropped the last owner of the
    /// dispatcher, that worker is detached instead of joined. It exits after its body returns.
    pub fn wait_until_finished(&self) {
        self.close();
        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        for worker in workers {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.thread().id() == current {
                debug!("Detaching worker thread {name}, shutdown runs on it");
                continue;
            }
            if worker.join().is_err() {
                warn!("Worker thread {name} terminated abnormally");
            }
        }
        debug!("All workers joined");
    }

    pub fn shutdown(&self) {
        self.wait_until_finished();
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn debug_assert_main_context(&self, operation: &str) {
        debug_assert!(
            self.is_main_context(),
            "{operation} must be called from the thread that created the dispatcher"
        );
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    debug!("Worker {index} started");
    let mut state = shared.lock();
    loop {
        if let Some(id) = state.async_queue.pop_front() {
            let Some((job, body)) = state.begin_async(id, Owner::Worker(index)) else {
                continue;
            };
            drop(state);

            debug!("Worker {index} executing job {id} ({})", job.desc());
            let result = run_body(body, &job);

            state = shared.lock();
            state.complete_async(id, result);
            shared.async_finished.notify_all();
            continue;
        }

        if !state.accepting {
            break;
        }
        state = shared
            .work_available
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
    debug!("Worker {index} exiting");
}

/// Execution wrapper: the only place that interprets the cancellation signal, and the
/// boundary at which errors and panics of a body are turned into a recorded fault.
fn run_body(body: Body, job: &JobHandle) -> BodyResult {
    match panic::catch_unwind(AssertUnwindSafe(|| body(job))) {
        Ok(Ok(())) => BodyResult::Finished,
        Ok(Err(err)) if err.downcast_ref::<Cancelled>().is_some() => BodyResult::Cancelled,
        Ok(Err(err)) => BodyResult::Fault(format!("{err:#}")),
        Err(payload) => BodyResult::Fault(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
