//! In-memory state store for tests and ephemeral runs.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promptbench_provider::classify::ErrorMeta;
use promptbench_provider::TokenUsage;
use rustc_hash::FxHashMap;

use crate::error::{SchedError, SchedResult};
use crate::job::{BatchJob, BatchJobId, RowStatus, RunState, WorkItem, WorkItemId};
use crate::persistence::{JobProgress, StateStore};

/// Non-durable state store backed by hash maps. Same claim semantics as
/// the SQLite store, with the map lock standing in for the database.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<FxHashMap<BatchJobId, BatchJob>>,
    items: RwLock<FxHashMap<WorkItemId, WorkItem>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<R>(
        &self,
        job_id: &BatchJobId,
        f: impl FnOnce(&mut BatchJob) -> R,
    ) -> SchedResult<R> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))?;
        Ok(f(job))
    }

    fn with_item<R>(
        &self,
        item_id: &WorkItemId,
        f: impl FnOnce(&mut WorkItem) -> R,
    ) -> SchedResult<R> {
        let mut items = self
            .items
            .write()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?;
        let item = items
            .get_mut(item_id)
            .ok_or_else(|| SchedError::RowNotFound(item_id.to_string()))?;
        Ok(f(item))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_job(&self, job: &BatchJob) -> SchedResult<()> {
        self.jobs
            .write()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &BatchJobId) -> SchedResult<Option<BatchJob>> {
        Ok(self
            .jobs
            .read()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?
            .get(job_id)
            .cloned())
    }

    async fn list_jobs(&self) -> SchedResult<Vec<BatchJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn update_run_state(&self, job_id: &BatchJobId, state: RunState) -> SchedResult<()> {
        self.with_job(job_id, |job| {
            job.run_state = state;
            let now = Utc::now();
            if state == RunState::Running && job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if state.is_terminal() {
                job.completed_at = Some(now);
            }
        })
    }

    async fn set_pause(
        &self,
        job_id: &BatchJobId,
        until: Option<DateTime<Utc>>,
    ) -> SchedResult<()> {
        self.with_job(job_id, |job| match until {
            Some(until) => {
                job.run_state = RunState::Paused;
                job.paused_until = Some(until);
            }
            None => {
                job.run_state = RunState::Running;
                job.paused_until = None;
            }
        })
    }

    async fn request_cancel(&self, job_id: &BatchJobId) -> SchedResult<bool> {
        match self.with_job(job_id, |job| job.cancel_requested = true) {
            Ok(()) => Ok(true),
            Err(SchedError::JobNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn update_progress(
        &self,
        job_id: &BatchJobId,
        progress: &JobProgress,
    ) -> SchedResult<()> {
        self.with_job(job_id, |job| {
            job.completed_rows = progress.completed_rows;
            job.failed_rows = progress.failed_rows;
            job.retried_rows = progress.retried_rows;
            job.heartbeat_at = Some(Utc::now());
        })
    }

    async fn set_last_error(&self, job_id: &BatchJobId, message: &str) -> SchedResult<()> {
        self.with_job(job_id, |job| job.last_error = Some(message.to_string()))
    }

    async fn set_estimated_savings(&self, job_id: &BatchJobId, usd: f64) -> SchedResult<()> {
        self.with_job(job_id, |job| job.estimated_savings_usd = Some(usd))
    }

    async fn insert_work_items(&self, items: &[WorkItem]) -> SchedResult<()> {
        let mut map = self
            .items
            .write()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?;
        for item in items {
            map.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }

    async fn load_work_item(&self, item_id: &WorkItemId) -> SchedResult<Option<WorkItem>> {
        Ok(self
            .items
            .read()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?
            .get(item_id)
            .cloned())
    }

    async fn list_work_items(&self, job_id: &BatchJobId) -> SchedResult<Vec<WorkItem>> {
        let mut items: Vec<_> = self
            .items
            .read()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?
            .values()
            .filter(|item| &item.job_id == job_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.row_index);
        Ok(items)
    }

    async fn next_pending(&self, job_id: &BatchJobId) -> SchedResult<Option<WorkItem>> {
        Ok(self
            .items
            .read()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?
            .values()
            .filter(|item| &item.job_id == job_id && item.status == RowStatus::Pending)
            .min_by_key(|item| item.row_index)
            .cloned())
    }

    async fn try_claim(&self, item_id: &WorkItemId) -> SchedResult<bool> {
        self.with_item(item_id, |item| {
            if item.status == RowStatus::Pending {
                item.status = RowStatus::Running;
                item.updated_at = Utc::now();
                true
            } else {
                false
            }
        })
    }

    async fn release_claim(&self, item_id: &WorkItemId) -> SchedResult<()> {
        self.with_item(item_id, |item| {
            if item.status == RowStatus::Running {
                item.status = RowStatus::Pending;
                item.updated_at = Utc::now();
            }
        })
    }

    async fn recover_stale(
        &self,
        job_id: &BatchJobId,
        older_than: Duration,
    ) -> SchedResult<usize> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        let mut items = self
            .items
            .write()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?;
        let mut recovered = 0;
        for item in items.values_mut() {
            if &item.job_id == job_id
                && item.status == RowStatus::Running
                && item.updated_at < cutoff
            {
                item.status = RowStatus::Pending;
                item.error = Some("recovered after stalled claim".to_string());
                item.error_kind = None;
                item.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn complete_work_item(
        &self,
        item_id: &WorkItemId,
        output: &str,
        usage: TokenUsage,
        retries: u32,
        latency_ms: u64,
    ) -> SchedResult<()> {
        self.with_item(item_id, |item| {
            item.status = RowStatus::Completed;
            item.output = Some(output.to_string());
            item.usage = usage;
            item.retries = retries;
            item.latency_ms = Some(latency_ms);
            item.error = None;
            item.error_kind = None;
            item.updated_at = Utc::now();
        })
    }

    async fn fail_work_item(
        &self,
        item_id: &WorkItemId,
        meta: &ErrorMeta,
        retries: u32,
    ) -> SchedResult<()> {
        self.with_item(item_id, |item| {
            item.status = RowStatus::Failed;
            item.error = Some(meta.message.clone());
            item.error_kind = Some(meta.kind.as_str().to_string());
            item.retries = retries;
            item.updated_at = Utc::now();
        })
    }

    async fn record_retry(&self, item_id: &WorkItemId, retries: u32) -> SchedResult<()> {
        self.with_item(item_id, |item| {
            item.retries = retries;
            item.updated_at = Utc::now();
        })
    }

    async fn fail_open_rows(&self, job_id: &BatchJobId, message: &str) -> SchedResult<usize> {
        let mut items = self
            .items
            .write()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?;
        let now = Utc::now();
        let mut failed = 0;
        for item in items.values_mut() {
            if &item.job_id == job_id
                && matches!(item.status, RowStatus::Pending | RowStatus::Running)
            {
                item.status = RowStatus::Failed;
                item.error = Some(message.to_string());
                item.error_kind = Some("runtime_error".to_string());
                item.updated_at = now;
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn job_progress(&self, job_id: &BatchJobId) -> SchedResult<JobProgress> {
        let items = self
            .items
            .read()
            .map_err(|e| SchedError::PersistenceError(e.to_string()))?;
        let mut progress = JobProgress::default();
        for item in items.values().filter(|item| &item.job_id == job_id) {
            match item.status {
                RowStatus::Completed => progress.completed_rows += 1,
                RowStatus::Failed => progress.failed_rows += 1,
                _ => {}
            }
            if item.retries > 0 {
                progress.retried_rows += 1;
            }
            progress.usage.prompt_tokens += item.usage.prompt_tokens;
            progress.usage.completion_tokens += item.usage.completion_tokens;
            progress.usage.total_tokens += item.usage.total_tokens;
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_semantics_match_sqlite() {
        let store = MemoryStore::new();
        let job = BatchJob::new("gemini-1.5-flash");
        store.save_job(&job).await.unwrap();
        let items = vec![
            WorkItem::new(job.id.clone(), 0, "a"),
            WorkItem::new(job.id.clone(), 1, "b"),
        ];
        store.insert_work_items(&items).await.unwrap();

        let first = store.next_pending(&job.id).await.unwrap().unwrap();
        assert_eq!(first.row_index, 0);
        assert!(store.try_claim(&first.id).await.unwrap());
        assert!(!store.try_claim(&first.id).await.unwrap());

        store.release_claim(&first.id).await.unwrap();
        assert!(store.try_claim(&first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_progress_aggregation() {
        let store = MemoryStore::new();
        let job = BatchJob::new("gemini-1.5-flash");
        store.save_job(&job).await.unwrap();
        let items = vec![
            WorkItem::new(job.id.clone(), 0, "a"),
            WorkItem::new(job.id.clone(), 1, "b"),
        ];
        store.insert_work_items(&items).await.unwrap();

        store
            .complete_work_item(&items[0].id, "out", TokenUsage::new(20, 10), 1, 50)
            .await
            .unwrap();

        let progress = store.job_progress(&job.id).await.unwrap();
        assert_eq!(progress.completed_rows, 1);
        assert_eq!(progress.failed_rows, 0);
        assert_eq!(progress.retried_rows, 1);
        assert_eq!(progress.usage.total_tokens, 30);
    }
}
