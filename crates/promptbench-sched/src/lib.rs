//! Batch Execution Engine for LLM Prompt Jobs
//!
//! This crate drives batches of compiled prompts against a rate-limited,
//! fallible generation API with durable progress tracking, pause/resume,
//! retry-with-backoff, stale-row recovery, and cooperative cancellation.
//!
//! # Overview
//!
//! A job's lifecycle:
//! 1. **Creation**: a [`job::BatchJob`] plus its [`job::WorkItem`] rows are
//!    written to a [`persistence::StateStore`]
//! 2. **Scheduling**: [`registry::JobRegistry::schedule`] spawns one
//!    detached run loop per job, rejecting duplicates and missing keys
//! 3. **Execution**: the [`runner::JobRunner`] claims rows through a
//!    store-level CAS, throttles calls with the
//!    [`limiter::RateLimitedQueue`], and retries transient failures with
//!    exponential backoff
//! 4. **Completion**: counters, usage, and estimated batch-pricing
//!    savings are persisted; the job lands in a terminal state exactly once
//!
//! # Key Features
//!
//! - **Resumable**: all progress lives in the store; a restarted process
//!   picks up half-finished jobs without double counting
//! - **Crash-safe claims**: rows stuck `Running` past a staleness
//!   threshold are recovered to `Pending`
//! - **Rate-limit aware**: provider throttling pauses the whole job for a
//!   fixed window instead of burning row retries
//! - **Persistence**: SQLite ([`persistence::SqliteStore`]) or in-memory
//!   ([`persistence::MemoryStore`]) storage behind one trait
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use promptbench_sched::job::{BatchJob, WorkItem};
//! use promptbench_sched::persistence::{SqliteStore, StateStore};
//! use promptbench_sched::registry::JobRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::new("promptbench.db")?);
//!
//!     let job = BatchJob::new("gemini-1.5-flash");
//!     store.save_job(&job).await?;
//!     let rows: Vec<_> = ["First prompt", "Second prompt"]
//!         .iter()
//!         .enumerate()
//!         .map(|(i, p)| WorkItem::new(job.id.clone(), i as u32, *p))
//!         .collect();
//!     store.insert_work_items(&rows).await?;
//!
//!     let registry = JobRegistry::new(store.clone());
//!     let outcome = registry.schedule(&job.id, None).await?;
//!     println!("scheduled: {}", outcome.scheduled);
//!     Ok(())
//! }
//! ```

pub mod claim;
pub mod cost;
pub mod error;
pub mod job;
pub mod limiter;
pub mod persistence;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod status;

pub use claim::{claim_next, MAX_CLAIM_ATTEMPTS};
pub use cost::{calculate_savings, format_usd, CostEstimate};
pub use error::{SchedError, SchedResult};
pub use job::{
    BatchJob, BatchJobId, GenerationParams, RowStatus, RunState, WorkItem, WorkItemId,
};
pub use limiter::{RateLimitedQueue, RateLimiterConfig};
pub use persistence::{JobProgress, MemoryStore, SqliteStore, StateStore};
pub use policy::{effective_rpm, rate_policy, RatePolicy, RATE_WINDOW};
pub use registry::{JobRegistry, RejectReason, ScheduleOutcome};
pub use retry::{execute_with_retry, ExecutionError, RetryConfig, RetryNotice};
pub use runner::{JobRunner, RunnerConfig};
pub use status::{derive_group_status, GroupStatus, MemberSnapshot};
