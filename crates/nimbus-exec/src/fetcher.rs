//! The two claim loops feeding jobs into the runner.
//!
//! `jobFetcher` drains pending jobs, `failedJobFetcher` drains failed
//! jobs whose retry time has passed. Each tick claims and runs at most
//! one job, so a long handler never starves the worker heartbeat for
//! more than one job's duration.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use nimbus_model::{JobStatus, TimerConfig};
use nimbus_store::{Database, StoreError};
use nimbus_worker::spawn_periodic;

use crate::runner::Runner;

fn claim_and_run(db: &Database, runner: &Runner, status: JobStatus) -> Result<(), StoreError> {
    match db.jobs.claim_next(status) {
        Some(job) => runner.run(&job),
        None => {
            debug!(?status, "no claimable job");
            Ok(())
        }
    }
}

/// Spawns the pending and failed claim workers. Returns their handles
/// in that order.
///
/// `JobRepo::reset_running` must have been called before this, or jobs
/// claimed by a previous process stay stuck in `Running` forever.
pub fn setup_executors(
    db: &Database,
    runner: &Runner,
    timers: &TimerConfig,
    token: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let pending = {
        let db = db.clone();
        let runner = runner.clone();
        spawn_periodic(
            "jobFetcher",
            timers.job_fetch_interval(),
            db.worker_status.clone(),
            token.clone(),
            move || claim_and_run(&db, &runner, JobStatus::Pending),
        )
    };

    let failed = {
        let db = db.clone();
        let runner = runner.clone();
        spawn_periodic(
            "failedJobFetcher",
            timers.failed_job_fetch_interval(),
            db.worker_status.clone(),
            token.clone(),
            move || claim_and_run(&db, &runner, JobStatus::Failed),
        )
    };

    vec![pending, failed]
}
