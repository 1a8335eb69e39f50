//! Executes one claimed job end to end.
//!
//! Order per run: terminate predicate, entry hook, handler, exit hook,
//! outcome recording. The exit hook runs whatever the handler returned,
//! so activity flags never leak past a failed run. A job that fails its
//! fifth attempt is terminated instead of retried.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use nimbus_model::Job;
use nimbus_store::{Database, StoreResult};

use crate::backoff::retry_delay;
use crate::registry::{JobOutcome, Registry};

/// A job that has failed this many attempts is terminated.
pub const MAX_ATTEMPTS: u32 = 5;

/// Runs claimed jobs against the registry.
#[derive(Clone)]
pub struct Runner {
    db: Database,
    registry: Arc<Registry>,
}

impl Runner {
    /// Creates a runner over a shared database handle and registry.
    #[must_use]
    pub fn new(db: Database, registry: Arc<Registry>) -> Self {
        Self { db, registry }
    }

    /// Executes one claimed job and records the outcome. The job must
    /// already be in `Running` (the claim moved it there).
    pub fn run(&self, job: &Job) -> StoreResult<()> {
        let Some(def) = self.registry.get(job.kind) else {
            warn!(job_id = %job.id, kind = %job.kind, "no handler registered");
            return self
                .db
                .jobs
                .mark_terminated(&job.id, &format!("no handler for kind {}", job.kind));
        };

        if let Some(pred) = &def.should_terminate {
            match pred(&self.db, job) {
                Ok(false) => {}
                Ok(true) => {
                    info!(job_id = %job.id, kind = %job.kind, "target gone, terminating");
                    return self.db.jobs.mark_terminated(&job.id, "target resource gone");
                }
                Err(e) => {
                    return self.db.jobs.mark_terminated(&job.id, &e.to_string());
                }
            }
        }

        if let Some(entry) = &def.entry {
            if let Err(e) = entry(&self.db, job) {
                warn!(job_id = %job.id, kind = %job.kind, error = %e, "entry hook failed");
                return self.db.jobs.mark_terminated(&job.id, &e.to_string());
            }
        }

        let outcome = (def.run)(&self.db, job);

        if let Some(exit) = &def.exit {
            if let Err(e) = exit(&self.db, job) {
                // The outcome still gets recorded; a leaked activity is
                // recoverable, a lost job record is not.
                warn!(job_id = %job.id, kind = %job.kind, error = %e, "exit hook failed");
            }
        }

        match outcome {
            JobOutcome::Ok => {
                info!(job_id = %job.id, kind = %job.kind, "job completed");
                self.db.jobs.mark_completed(&job.id)
            }
            JobOutcome::Terminate(reason) => {
                info!(job_id = %job.id, kind = %job.kind, %reason, "job terminated");
                self.db.jobs.mark_terminated(&job.id, &reason)
            }
            JobOutcome::Fail(reason) => {
                let attempts = job.attempts + 1;
                if attempts >= MAX_ATTEMPTS {
                    warn!(job_id = %job.id, kind = %job.kind, attempts, %reason,
                        "attempt limit reached, terminating");
                    self.db
                        .jobs
                        .mark_terminated(&job.id, &format!("attempt limit reached: {reason}"))
                } else {
                    let delay = retry_delay(job.kind, attempts);
                    let delay = ChronoDuration::from_std(delay)
                        .unwrap_or_else(|_| ChronoDuration::seconds(60));
                    warn!(job_id = %job.id, kind = %job.kind, attempts, %reason, "job failed");
                    self.db
                        .jobs
                        .mark_failed(&job.id, Utc::now() + delay, attempts, &reason)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_model::{Activity, Deployment, JobKind, JobStatus, ResourceMeta};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn deployment(id: &str) -> Deployment {
        Deployment {
            meta: ResourceMeta::new(id, "web", "u1", "se-flem"),
            image: "nginx:latest".into(),
            k8s: Default::default(),
            harbor: Default::default(),
            custom_domain: None,
            disabled: false,
        }
    }

    fn resource_job(id: &str, kind: JobKind, target: &str) -> Job {
        let mut args = HashMap::new();
        args.insert("id".to_string(), Value::from(target));
        Job::new(id, "u1", kind, args)
    }

    fn setup() -> (Database, Runner) {
        let db = Database::default();
        let runner = Runner::new(db.clone(), Arc::new(Registry::standard()));
        (db, runner)
    }

    #[test]
    fn claimed_job_runs_to_completed() {
        let (db, runner) = setup();
        db.deployments.create(deployment("d1")).unwrap();
        db.jobs
            .create(resource_job("j1", JobKind::CreateDeployment, "d1"))
            .unwrap();

        let claimed = db.jobs.claim_next(JobStatus::Pending).unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        runner.run(&claimed).unwrap();

        assert_eq!(db.jobs.get("j1").unwrap().status, JobStatus::Completed);
        // Entry hook kept being-created during the run, exit cleared it.
        let d = db.deployments.get("d1").unwrap();
        assert!(!d.meta.activities.contains(Activity::BeingCreated));
        assert!(!d.k8s.all_deleted());
    }

    #[test]
    fn failing_job_retries_with_backoff_then_terminates() {
        let db = Database::default();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let mut registry = Registry::standard();
        registry.register(
            JobKind::UpdateVm,
            Registry::definition(Arc::new(move |_db, _job| {
                counter.fetch_add(1, Ordering::SeqCst);
                JobOutcome::Fail("still converging".into())
            })),
        );
        let runner = Runner::new(db.clone(), Arc::new(registry));

        db.jobs
            .create(resource_job("j1", JobKind::UpdateVm, "v1"))
            .unwrap();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut job = db.jobs.get("j1").unwrap();
            // Simulate the fetcher claiming once the retry delay passed.
            job.status = JobStatus::Running;
            runner.run(&job).unwrap();

            let stored = db.jobs.get("j1").unwrap();
            if attempt < MAX_ATTEMPTS {
                assert_eq!(stored.status, JobStatus::Failed);
                assert_eq!(stored.attempts, attempt);
                assert!(stored.run_after > Utc::now());
            } else {
                assert_eq!(stored.status, JobStatus::Terminated);
            }
        }
        assert_eq!(runs.load(Ordering::SeqCst), MAX_ATTEMPTS);
        let stored = db.jobs.get("j1").unwrap();
        assert_eq!(stored.error_logs.len(), MAX_ATTEMPTS as usize);
    }

    #[test]
    fn bad_args_terminate_without_retry() {
        let (db, runner) = setup();
        db.deployments.create(deployment("d1")).unwrap();
        // do-vm-action with a nonsense action string
        let mut args = HashMap::new();
        args.insert("id".to_string(), Value::from("d1"));
        args.insert("action".to_string(), Value::from("explode"));
        db.jobs
            .create(Job::new("j1", "u1", JobKind::DoVmAction, args))
            .unwrap();

        let claimed = db.jobs.claim_next(JobStatus::Pending).unwrap();
        runner.run(&claimed).unwrap();

        let stored = db.jobs.get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Terminated);
        assert_eq!(stored.attempts, 0);
    }

    #[test]
    fn repair_of_deleted_target_terminates_gracefully() {
        let (db, runner) = setup();
        db.jobs
            .create(resource_job("j1", JobKind::RepairDeployment, "gone"))
            .unwrap();

        let claimed = db.jobs.claim_next(JobStatus::Pending).unwrap();
        runner.run(&claimed).unwrap();

        assert_eq!(db.jobs.get("j1").unwrap().status, JobStatus::Terminated);
    }

    #[test]
    fn repair_skips_resource_being_deleted() {
        let (db, runner) = setup();
        let mut d = deployment("d1");
        d.meta.activities.remove(Activity::BeingCreated);
        db.deployments.create(d).unwrap();
        db.deployments
            .start_activity("d1", Activity::BeingDeleted)
            .unwrap();
        db.jobs
            .create(resource_job("j1", JobKind::RepairDeployment, "d1"))
            .unwrap();

        let claimed = db.jobs.claim_next(JobStatus::Pending).unwrap();
        runner.run(&claimed).unwrap();

        assert_eq!(db.jobs.get("j1").unwrap().status, JobStatus::Terminated);
        assert!(db.deployments.get("d1").unwrap().meta.repaired_at.is_none());
    }

    #[test]
    fn exit_hook_runs_even_when_handler_fails() {
        let db = Database::default();
        let mut d = deployment("d1");
        d.meta.activities.remove(Activity::BeingCreated);
        db.deployments.create(d).unwrap();

        let mut registry = Registry::standard();
        let standard = Registry::standard();
        let mut def = standard.get(JobKind::UpdateDeployment).unwrap().clone();
        def.run = Arc::new(|_db, _job| JobOutcome::Fail("flaky".into()));
        registry.register(JobKind::UpdateDeployment, def);
        let runner = Runner::new(db.clone(), Arc::new(registry));

        db.jobs
            .create(resource_job("j1", JobKind::UpdateDeployment, "d1"))
            .unwrap();
        let claimed = db.jobs.claim_next(JobStatus::Pending).unwrap();
        runner.run(&claimed).unwrap();

        assert_eq!(db.jobs.get("j1").unwrap().status, JobStatus::Failed);
        let d = db.deployments.get("d1").unwrap();
        assert!(!d.meta.activities.contains(Activity::Updating));
    }
}
