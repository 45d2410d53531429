// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::job_engine::job::JobId;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Submission after `close()`. The submitted job has been finalized as cancelled.
    #[error("dispatcher is closed")]
    DispatcherClosed,

    /// Control operation on a job that already finished or was never submitted here.
    #[error("job {0} is unknown to the dispatcher or already finished")]
    InvalidHandle(JobId),

    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}
