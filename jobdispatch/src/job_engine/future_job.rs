// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::future::Future;

use crate::job_engine::job::{Job, JobHandle};

impl Job {
    /// Builds a job whose async body is a future.
    ///
    /// `task_creator` is called on the worker that picks the job up, and the future it
    /// returns is driven to completion right there. The future does not need to be `Send`.
    pub fn from_future<F, Fut>(desc: impl Into<String>, task_creator: F) -> Self
    where
        F: FnOnce(JobHandle) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Job::new(desc, move |job: &JobHandle| {
            let task = task_creator(job.clone());
            futures::executor::block_on(task)
        })
    }
}
