//! Persistence layer for job and work-item state.
//!
//! The store owns all durable state. The run loop keeps only transient
//! counters that it flushes through [`StateStore::update_progress`], so a
//! crashed process can be resumed from the store alone. Row claiming is a
//! store-level conditional write ([`StateStore::try_claim`]), never an
//! in-process lock, so concurrent workers race safely.

mod memory_store;
mod sqlite_store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promptbench_provider::classify::ErrorMeta;
use promptbench_provider::TokenUsage;

use crate::error::SchedResult;
use crate::job::{BatchJob, BatchJobId, RunState, WorkItem, WorkItemId};

/// Durable per-job counters plus summed token usage, as derived from the
/// work-item rows. Used to seed the run loop on start or resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub completed_rows: u64,
    pub failed_rows: u64,
    /// Rows that needed at least one retry.
    pub retried_rows: u64,
    pub usage: TokenUsage,
}

/// Trait for persistent state storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Save a job to the store (insert or full replace).
    async fn save_job(&self, job: &BatchJob) -> SchedResult<()>;

    /// Load a job from the store.
    async fn load_job(&self, job_id: &BatchJobId) -> SchedResult<Option<BatchJob>>;

    /// List all jobs, newest first.
    async fn list_jobs(&self) -> SchedResult<Vec<BatchJob>>;

    /// Set the job's run state. Stamps `started_at` on the first
    /// transition to `Running` and `completed_at` on terminal states.
    async fn update_run_state(&self, job_id: &BatchJobId, state: RunState) -> SchedResult<()>;

    /// Open (`Some(until)`) or clear (`None`) a global pause window.
    /// Opening sets the run state to `Paused`; clearing sets it back to
    /// `Running`.
    async fn set_pause(
        &self,
        job_id: &BatchJobId,
        until: Option<DateTime<Utc>>,
    ) -> SchedResult<()>;

    /// Flag the job for cooperative cancellation. Returns false if the
    /// job does not exist.
    async fn request_cancel(&self, job_id: &BatchJobId) -> SchedResult<bool>;

    /// Flush counters and stamp the heartbeat.
    async fn update_progress(
        &self,
        job_id: &BatchJobId,
        progress: &JobProgress,
    ) -> SchedResult<()>;

    /// Record the most recent error message on the job.
    async fn set_last_error(&self, job_id: &BatchJobId, message: &str) -> SchedResult<()>;

    /// Record the estimated batch-pricing savings on the job.
    async fn set_estimated_savings(&self, job_id: &BatchJobId, usd: f64) -> SchedResult<()>;

    /// Insert work items for a job.
    async fn insert_work_items(&self, items: &[WorkItem]) -> SchedResult<()>;

    /// Load one work item.
    async fn load_work_item(&self, item_id: &WorkItemId) -> SchedResult<Option<WorkItem>>;

    /// List a job's work items ordered by row index.
    async fn list_work_items(&self, job_id: &BatchJobId) -> SchedResult<Vec<WorkItem>>;

    /// The pending work item with the lowest row index, if any.
    async fn next_pending(&self, job_id: &BatchJobId) -> SchedResult<Option<WorkItem>>;

    /// Atomically claim a work item: `Pending` -> `Running`, bumping
    /// `updated_at`. Returns false if the item was no longer pending
    /// (another worker won the race).
    async fn try_claim(&self, item_id: &WorkItemId) -> SchedResult<bool>;

    /// Release a claimed item back to `Pending` (rate-limit pause path).
    /// Does not touch the retry count.
    async fn release_claim(&self, item_id: &WorkItemId) -> SchedResult<()>;

    /// Reset `Running` items whose `updated_at` is older than the given
    /// age back to `Pending`, annotating them as recovered. Returns the
    /// number of items reset.
    async fn recover_stale(
        &self,
        job_id: &BatchJobId,
        older_than: Duration,
    ) -> SchedResult<usize>;

    /// Persist a successful row: output, usage, retries, latency.
    async fn complete_work_item(
        &self,
        item_id: &WorkItemId,
        output: &str,
        usage: TokenUsage,
        retries: u32,
        latency_ms: u64,
    ) -> SchedResult<()>;

    /// Persist a failed row with its classified error.
    async fn fail_work_item(
        &self,
        item_id: &WorkItemId,
        meta: &ErrorMeta,
        retries: u32,
    ) -> SchedResult<()>;

    /// Persist an updated retry count mid-attempt (best-effort progress
    /// reporting; the row stays `Running`).
    async fn record_retry(&self, item_id: &WorkItemId, retries: u32) -> SchedResult<()>;

    /// Mark all `Pending`/`Running` rows of a job as failed with the
    /// given message. Used when a fatal error escapes the run loop.
    async fn fail_open_rows(&self, job_id: &BatchJobId, message: &str) -> SchedResult<usize>;

    /// Derive durable counters and summed usage from the job's rows.
    async fn job_progress(&self, job_id: &BatchJobId) -> SchedResult<JobProgress>;
}
