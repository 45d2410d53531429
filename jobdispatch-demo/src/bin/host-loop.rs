// SPDX-License-Identifier: MIT
// host-loop: drives a JobDispatcher from a simulated UI main loop
//
// - Submits a batch of jobs that compute on the workers and deliver on the main loop.
// - Exercises prioritise, cancel and sprint from the main context.
// - Prints the final dispatcher statistics as JSON.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use jobdispatch::{DispatcherConfig, IdleBudget, Job, JobDispatcher, JobHandle};
use log::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Number of jobs to submit
    #[arg(long, default_value_t = 8)]
    jobs: usize,

    /// Maximum number of idle bodies drained per tick
    #[arg(long, default_value_t = 2)]
    idle_jobs_per_tick: usize,

    /// Length of one main loop tick in milliseconds
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// Dispatcher configuration (JSON encoded). Note that this excludes --workers.
    #[arg(long, value_name = "JSON")]
    config: Option<String>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.config.is_some() && args.workers.is_some() {
        return Err("--config and --workers may not be used together".into());
    }
    if args.jobs < 3 {
        return Err("--jobs must be at least 3 to show prioritise, cancel and sprint".into());
    }
    if args.tick_ms == 0 {
        return Err("--tick-ms must be greater than zero".into());
    }
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<DispatcherConfig> {
    let mut config = match &args.config {
        Some(json) => DispatcherConfig::from_json(json).context("invalid --config")?,
        None => DispatcherConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.idle_budget = IdleBudget {
        max_jobs: Some(args.idle_jobs_per_tick),
        max_time: Some(Duration::from_millis(args.tick_ms)),
    };
    Ok(config)
}

fn add_squares(total: u64, slice: &[u64]) -> u64 {
    slice
        .iter()
        .fold(total, |acc, x| acc.wrapping_add(x.wrapping_mul(*x)))
}

/// Sums squares in slices, checking for cancellation between slices.
fn sum_of_squares_job(n: u64, results: Arc<Mutex<Vec<(u64, u64)>>>) -> Job {
    let sum = Arc::new(Mutex::new(0u64));
    let sum_for_idle = sum.clone();

    Job::new(format!("sum of squares up to {n}"), move |job| {
        let mut total = 0u64;
        for slice in (0..=n).collect::<Vec<_>>().chunks(1_000) {
            job.check_cancellation()?;
            total = add_squares(total, slice);
            thread::sleep(Duration::from_millis(2));
        }
        *sum.lock().unwrap() = total;
        Ok(())
    })
    .with_idle(move |_job| {
        // delivering on the main loop, like updating a widget
        let total = *sum_for_idle.lock().unwrap();
        results.lock().unwrap().push((n, total));
        info!("Delivered result for n={n}: {total}");
        Ok(())
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let config = build_config(&args)?;
    let dispatcher = JobDispatcher::with_config(config)?;
    let results = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<JobHandle> = (0..args.jobs)
        .map(|i| {
            let n = ((i as u64) + 1) * 5_000;
            dispatcher.submit(sum_of_squares_job(n, results.clone()))
        })
        .collect::<Result<_, _>>()?;

    // the last job is the one the user is looking at
    let last = handles.len() - 1;
    if dispatcher.prioritise(&handles[last])? {
        info!("Prioritised {:?}", handles[last]);
    }

    // the user navigated away from the first one
    dispatcher.cancel(&handles[0])?;

    // and needs the second one right now
    match dispatcher.sprint(&handles[1]) {
        Ok(outcome) => info!("Sprinted {:?}: {:?}", handles[1], outcome),
        Err(e) => warn!("Could not sprint {:?}: {e}", handles[1]),
    }

    let started = Instant::now();
    let tick = Duration::from_millis(args.tick_ms);
    let mut ticks = 0u64;
    while !handles.iter().all(JobHandle::is_finished) {
        let tick_start = Instant::now();
        dispatcher.run_idle_work();
        ticks += 1;
        if let Some(rest) = tick.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }
    info!(
        "All jobs finished after {ticks} ticks ({:?})",
        started.elapsed()
    );

    for handle in &handles {
        info!("{} -> {:?}", handle.desc(), handle.outcome());
    }
    info!("{} results delivered", results.lock().unwrap().len());

    dispatcher.shutdown();
    println!("{}", serde_json::to_string_pretty(&dispatcher.stats())?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_squares() {
        assert_eq!(add_squares(0, &[1, 2, 3]), 14);
        assert_eq!(add_squares(10, &[]), 10);
    }

    #[test]
    fn test_add_squares_wraps_instead_of_overflowing() {
        let big = u64::MAX / 2;
        assert_eq!(add_squares(0, &[big]), big.wrapping_mul(big));
        assert_eq!(add_squares(u64::MAX, &[1]), 0);
    }
}
