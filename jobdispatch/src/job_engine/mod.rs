// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Two-Phase Job Dispatcher
//!
//! ## Overview
//! A job is split into an async body, run by one of a fixed number of worker threads,
//! and an optional idle body, run afterwards by the single main context when the host's
//! event loop calls `run_idle_work()`.
//!
//! - One lock guards both queues and every job's state.
//! - Bodies run with that lock released.
//! - Cancellation is cooperative: bodies call `check_cancellation()` and propagate the error.
//! - `cancel`, `sprint` and `prioritise` belong to the main context.
//! - Jobs live in an arena keyed by `JobId` while they are queued or running. Handles only
//!   share the job's id, cancellation flag and outcome.
//!
//!
//! ```text
//!         +--------------------------------------+
//!         |    submit()       JobDispatcher      |
//!         +----------+---------------------------+
//!                    |
//!                    v
//!         +----------+-----------+
//!         |     async queue      |  <- prioritise() moves to front
//!         +----+------+----+-----+
//!              |           |
//!         +----v----+  +---v----+
//!         |worker 0 |  |worker 1|     async bodies
//!         +----+----+  +---+----+
//!              |           |
//!         +----v-----------v-----+
//!         |      idle queue      |
//!         +----------+-----------+
//!                    |
//!         +----------v-----------+
//!         |  main context loop   |     run_idle_work() / sprint()
//!         +----------------------+
//! ```

pub mod cancellation;
pub mod dispatcher;
pub mod future_job;
pub mod job;
pub mod queue;
