// SPDX-License-Identifier: MIT
// jobdispatch: cancellable two-phase jobs on a worker pool and a main context
//
// - Async bodies run on a fixed pool of worker threads.
// - Idle bodies run on the host's main loop via run_idle_work().
// - cancel/sprint/prioritise are issued by the main context.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod error;
pub mod job_engine;
pub mod stats;

pub use config::{DispatcherConfig, IdleBudget};
pub use error::DispatchError;
pub use job_engine::cancellation::{CancellationFlag, Cancelled};
pub use job_engine::dispatcher::JobDispatcher;
pub use job_engine::job::{Job, JobHandle, JobId, JobOutcome, JobState, WeakJobHandle};
pub use job_engine::queue::JobQueue;
pub use stats::DispatcherStats;
