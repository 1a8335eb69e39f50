//! Job records with an atomic claim.
//!
//! `claim_next` is the serialization point of the whole executor fleet:
//! the repository holds one lock across find-and-update, so two
//! concurrent executors can never claim the same job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use nimbus_model::{Job, JobKind, JobStatus};

use crate::error::{StoreError, StoreResult};

/// Fluent filter over job records.
///
/// Build one with the `with_*` methods and pass it to
/// [`JobRepo::list`] / [`JobRepo::exists`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    include_kinds: Vec<JobKind>,
    include_status: Vec<JobStatus>,
    exclude_status: Vec<JobStatus>,
    args_eq: Vec<(String, Value)>,
    exclude_scheduled: bool,
    user_id: Option<String>,
}

impl JobFilter {
    /// An empty filter matching every job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only jobs of the given kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[JobKind]) -> Self {
        self.include_kinds.extend_from_slice(kinds);
        self
    }

    /// Only jobs in the given statuses.
    #[must_use]
    pub fn with_status(mut self, status: &[JobStatus]) -> Self {
        self.include_status.extend_from_slice(status);
        self
    }

    /// Excludes jobs in the given statuses.
    #[must_use]
    pub fn without_status(mut self, status: &[JobStatus]) -> Self {
        self.exclude_status.extend_from_slice(status);
        self
    }

    /// Only jobs whose `args[key]` equals `value`.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args_eq.push((key.into(), value.into()));
        self
    }

    /// Excludes jobs scheduled in the future (`run_after > now`).
    #[must_use]
    pub fn exclude_scheduled(mut self) -> Self {
        self.exclude_scheduled = true;
        self
    }

    /// Only jobs created for the given user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn matches(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if !self.include_kinds.is_empty() && !self.include_kinds.contains(&job.kind) {
            return false;
        }
        if !self.include_status.is_empty() && !self.include_status.contains(&job.status) {
            return false;
        }
        if self.exclude_status.contains(&job.status) {
            return false;
        }
        if self.exclude_scheduled && job.run_after > now {
            return false;
        }
        if let Some(ref user) = self.user_id {
            if &job.user_id != user {
                return false;
            }
        }
        self.args_eq
            .iter()
            .all(|(k, v)| job.args.get(k) == Some(v))
    }
}

/// Repository of durable job records.
///
/// Cloning is cheap; clones share the same records.
#[derive(Clone, Default)]
pub struct JobRepo {
    // A single mutex (not RwLock) so claim_next's read-modify-write is
    // one critical section.
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new job record. Fails if the id already exists.
    pub fn create(&self, job: Job) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::non_unique("id", job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Creates a job scheduled to run no earlier than `run_after`.
    pub fn create_scheduled(
        &self,
        id: impl Into<String>,
        user_id: impl Into<String>,
        kind: JobKind,
        run_after: DateTime<Utc>,
        args: HashMap<String, Value>,
    ) -> StoreResult<()> {
        let mut job = Job::new(id, user_id, kind, args);
        job.run_after = run_after;
        self.create(job)
    }

    /// Returns a job by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    /// Atomically claims the next runnable job in `status`
    /// (`Pending` or `Failed`): newest `created_at` first among jobs with
    /// `run_after <= now`. The claimed job is moved to `Running` with
    /// `last_run_at = now` before the lock is released.
    ///
    /// Newest-first keeps bursty user actions ahead of stale retries,
    /// at the cost of possible starvation under sustained backlog.
    #[must_use]
    pub fn claim_next(&self, status: JobStatus) -> Option<Job> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let id = jobs
            .values()
            .filter(|j| j.status == status && j.run_after <= now)
            .max_by_key(|j| j.created_at)
            .map(|j| j.id.clone())?;

        let job = jobs.get_mut(&id)?;
        job.status = JobStatus::Running;
        job.last_run_at = Some(now);
        debug!(job_id = %job.id, kind = %job.kind, "claimed job");
        Some(job.clone())
    }

    /// Marks a job completed.
    pub fn mark_completed(&self, id: &str) -> StoreResult<()> {
        self.finish(id, JobStatus::Completed, None)
    }

    /// Marks a job terminated with a reason. Terminated is absorbing.
    pub fn mark_terminated(&self, id: &str, reason: &str) -> StoreResult<()> {
        self.finish(id, JobStatus::Terminated, Some(reason))
    }

    fn finish(&self, id: &str, status: JobStatus, reason: Option<&str>) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.status = status;
        job.finished_at = Some(Utc::now());
        if let Some(reason) = reason {
            job.error_logs.push(reason.to_string());
        }
        Ok(())
    }

    /// Marks a job failed: bumps `attempts`, pushes `reason` onto the
    /// error log and schedules the retry at `run_after`.
    pub fn mark_failed(
        &self,
        id: &str,
        run_after: DateTime<Utc>,
        attempts: u32,
        reason: &str,
    ) -> StoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.status = JobStatus::Failed;
        job.attempts = attempts;
        job.run_after = run_after;
        job.error_logs.push(reason.to_string());
        Ok(())
    }

    /// Crash recovery: moves every `Running` job back to `Pending`.
    /// Called exactly once at startup, before any executor tick.
    /// Returns the number of jobs reset.
    pub fn reset_running(&self) -> usize {
        let mut jobs = self.jobs.lock();
        let mut reset = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Pending;
                reset += 1;
            }
        }
        if reset > 0 {
            debug!(count = reset, "reset running jobs to pending");
        }
        reset
    }

    /// Lists jobs matching the filter, oldest first.
    #[must_use]
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let now = Utc::now();
        let jobs = self.jobs.lock();
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| filter.matches(j, now))
            .cloned()
            .collect();
        out.sort_by_key(|j| j.created_at);
        out
    }

    /// Returns true if any job matches the filter.
    #[must_use]
    pub fn exists(&self, filter: &JobFilter) -> bool {
        let now = Utc::now();
        self.jobs.lock().values().any(|j| filter.matches(j, now))
    }

    /// Counts jobs matching the filter.
    #[must_use]
    pub fn count(&self, filter: &JobFilter) -> usize {
        let now = Utc::now();
        self.jobs
            .lock()
            .values()
            .filter(|j| filter.matches(j, now))
            .count()
    }
}
