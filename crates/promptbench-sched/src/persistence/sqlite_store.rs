//! SQLite-based persistence for production use.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use promptbench_provider::classify::ErrorMeta;
use promptbench_provider::TokenUsage;
use rusqlite::Connection;

use crate::error::{SchedError, SchedResult};
use crate::job::{BatchJob, BatchJobId, GenerationParams, RowStatus, RunState, WorkItem, WorkItemId};
use crate::persistence::{JobProgress, StateStore};

/// SQLite-based state store.
///
/// Work items use explicit columns so that claiming and stale recovery
/// are single conditional UPDATE statements; the database is the point
/// of mutual exclusion between workers.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

const TERMINAL_STATES: &str = "('completed', 'failed', 'cancelled')";

// Fixed-width UTC timestamps so SQL string comparison orders correctly.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> SchedResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedError::PersistenceError(format!("bad timestamp {s:?}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> SchedResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new(path: impl AsRef<Path>) -> SchedResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    /// Create a new in-memory SQLite store.
    pub fn in_memory() -> SchedResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn conn(&self) -> SchedResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))
    }

    fn init_schema_sync(&self) -> SchedResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                params TEXT NOT NULL,
                safety_mode INTEGER NOT NULL,
                run_state TEXT NOT NULL,
                completed_rows INTEGER NOT NULL,
                failed_rows INTEGER NOT NULL,
                retried_rows INTEGER NOT NULL,
                paused_until TEXT,
                cancel_requested INTEGER NOT NULL,
                last_error TEXT,
                heartbeat_at TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                estimated_savings_usd REAL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_run_state ON jobs(run_state);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                row_index INTEGER NOT NULL,
                prompt TEXT NOT NULL,
                status TEXT NOT NULL,
                retries INTEGER NOT NULL,
                output TEXT,
                error TEXT,
                error_kind TEXT,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                latency_ms INTEGER,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id)
            );

            CREATE INDEX IF NOT EXISTS idx_items_job_status ON work_items(job_id, status);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_items_job_row ON work_items(job_id, row_index);
            "#,
        )?;
        Ok(())
    }

    fn job_from_row(row: &rusqlite::Row<'_>) -> SchedResult<BatchJob> {
        let id: String = row.get("id")?;
        let params: String = row.get("params")?;
        let run_state: String = row.get("run_state")?;
        let completed_rows: i64 = row.get("completed_rows")?;
        let failed_rows: i64 = row.get("failed_rows")?;
        let retried_rows: i64 = row.get("retried_rows")?;
        let created_at: String = row.get("created_at")?;

        Ok(BatchJob {
            id: BatchJobId::parse(&id)
                .map_err(|e| SchedError::PersistenceError(format!("bad job id {id:?}: {e}")))?,
            model: row.get("model")?,
            params: serde_json::from_str::<GenerationParams>(&params)?,
            safety_mode: row.get::<_, i64>("safety_mode")? != 0,
            run_state: RunState::from_str_name(&run_state).ok_or_else(|| {
                SchedError::PersistenceError(format!("bad run state {run_state:?}"))
            })?,
            completed_rows: completed_rows as u64,
            failed_rows: failed_rows as u64,
            retried_rows: retried_rows as u64,
            paused_until: parse_opt_ts(row.get("paused_until")?)?,
            cancel_requested: row.get::<_, i64>("cancel_requested")? != 0,
            last_error: row.get("last_error")?,
            heartbeat_at: parse_opt_ts(row.get("heartbeat_at")?)?,
            created_at: parse_ts(&created_at)?,
            started_at: parse_opt_ts(row.get("started_at")?)?,
            completed_at: parse_opt_ts(row.get("completed_at")?)?,
            estimated_savings_usd: row.get("estimated_savings_usd")?,
        })
    }

    fn item_from_row(row: &rusqlite::Row<'_>) -> SchedResult<WorkItem> {
        let id: String = row.get("id")?;
        let job_id: String = row.get("job_id")?;
        let status: String = row.get("status")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(WorkItem {
            id: WorkItemId::parse(&id)
                .map_err(|e| SchedError::PersistenceError(format!("bad item id {id:?}: {e}")))?,
            job_id: BatchJobId::parse(&job_id).map_err(|e| {
                SchedError::PersistenceError(format!("bad job id {job_id:?}: {e}"))
            })?,
            row_index: row.get::<_, i64>("row_index")? as u32,
            prompt: row.get("prompt")?,
            status: RowStatus::from_str_name(&status).ok_or_else(|| {
                SchedError::PersistenceError(format!("bad row status {status:?}"))
            })?,
            retries: row.get::<_, i64>("retries")? as u32,
            output: row.get("output")?,
            error: row.get("error")?,
            error_kind: row.get("error_kind")?,
            usage: TokenUsage {
                prompt_tokens: row.get::<_, i64>("prompt_tokens")? as u64,
                completion_tokens: row.get::<_, i64>("completion_tokens")? as u64,
                total_tokens: row.get::<_, i64>("total_tokens")? as u64,
            },
            latency_ms: row.get::<_, Option<i64>>("latency_ms")?.map(|v| v as u64),
            updated_at: parse_ts(&updated_at)?,
        })
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn save_job(&self, job: &BatchJob) -> SchedResult<()> {
        let conn = self.conn()?;
        let params = serde_json::to_string(&job.params)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO jobs
                (id, model, params, safety_mode, run_state,
                 completed_rows, failed_rows, retried_rows,
                 paused_until, cancel_requested, last_error, heartbeat_at,
                 created_at, started_at, completed_at, estimated_savings_usd)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            rusqlite::params![
                job.id.to_string(),
                job.model,
                params,
                job.safety_mode as i64,
                job.run_state.as_str(),
                job.completed_rows as i64,
                job.failed_rows as i64,
                job.retried_rows as i64,
                job.paused_until.map(ts),
                job.cancel_requested as i64,
                job.last_error,
                job.heartbeat_at.map(ts),
                ts(job.created_at),
                job.started_at.map(ts),
                job.completed_at.map(ts),
                job.estimated_savings_usd,
            ],
        )?;

        Ok(())
    }

    async fn load_job(&self, job_id: &BatchJobId) -> SchedResult<Option<BatchJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query(rusqlite::params![job_id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::job_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    async fn list_jobs(&self) -> SchedResult<Vec<BatchJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC")?;
        let mut rows = stmt.query([])?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(Self::job_from_row(row)?);
        }
        Ok(jobs)
    }

    async fn update_run_state(&self, job_id: &BatchJobId, state: RunState) -> SchedResult<()> {
        let conn = self.conn()?;
        let now = ts(Utc::now());
        let changed = conn.execute(
            &format!(
                r#"
                UPDATE jobs SET
                    run_state = ?2,
                    started_at = CASE
                        WHEN ?2 = 'running' AND started_at IS NULL THEN ?3
                        ELSE started_at
                    END,
                    completed_at = CASE
                        WHEN ?2 IN {TERMINAL_STATES} THEN ?3
                        ELSE completed_at
                    END
                WHERE id = ?1
                "#
            ),
            rusqlite::params![job_id.to_string(), state.as_str(), now],
        )?;
        if changed == 0 {
            return Err(SchedError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn set_pause(
        &self,
        job_id: &BatchJobId,
        until: Option<DateTime<Utc>>,
    ) -> SchedResult<()> {
        let conn = self.conn()?;
        let changed = match until {
            Some(until) => conn.execute(
                "UPDATE jobs SET run_state = 'paused', paused_until = ?2 WHERE id = ?1",
                rusqlite::params![job_id.to_string(), ts(until)],
            )?,
            None => conn.execute(
                "UPDATE jobs SET run_state = 'running', paused_until = NULL WHERE id = ?1",
                rusqlite::params![job_id.to_string()],
            )?,
        };
        if changed == 0 {
            return Err(SchedError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn request_cancel(&self, job_id: &BatchJobId) -> SchedResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET cancel_requested = 1 WHERE id = ?1",
            rusqlite::params![job_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    async fn update_progress(
        &self,
        job_id: &BatchJobId,
        progress: &JobProgress,
    ) -> SchedResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE jobs SET
                completed_rows = ?2,
                failed_rows = ?3,
                retried_rows = ?4,
                heartbeat_at = ?5
            WHERE id = ?1
            "#,
            rusqlite::params![
                job_id.to_string(),
                progress.completed_rows as i64,
                progress.failed_rows as i64,
                progress.retried_rows as i64,
                ts(Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(SchedError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn set_last_error(&self, job_id: &BatchJobId, message: &str) -> SchedResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET last_error = ?2 WHERE id = ?1",
            rusqlite::params![job_id.to_string(), message],
        )?;
        Ok(())
    }

    async fn set_estimated_savings(&self, job_id: &BatchJobId, usd: f64) -> SchedResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE jobs SET estimated_savings_usd = ?2 WHERE id = ?1",
            rusqlite::params![job_id.to_string(), usd],
        )?;
        Ok(())
    }

    async fn insert_work_items(&self, items: &[WorkItem]) -> SchedResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for item in items {
            tx.execute(
                r#"
                INSERT INTO work_items
                    (id, job_id, row_index, prompt, status, retries,
                     output, error, error_kind,
                     prompt_tokens, completion_tokens, total_tokens,
                     latency_ms, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
                rusqlite::params![
                    item.id.to_string(),
                    item.job_id.to_string(),
                    item.row_index as i64,
                    item.prompt,
                    item.status.as_str(),
                    item.retries as i64,
                    item.output,
                    item.error,
                    item.error_kind,
                    item.usage.prompt_tokens as i64,
                    item.usage.completion_tokens as i64,
                    item.usage.total_tokens as i64,
                    item.latency_ms.map(|v| v as i64),
                    ts(item.updated_at),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn load_work_item(&self, item_id: &WorkItemId) -> SchedResult<Option<WorkItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM work_items WHERE id = ?1")?;
        let mut rows = stmt.query(rusqlite::params![item_id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::item_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    async fn list_work_items(&self, job_id: &BatchJobId) -> SchedResult<Vec<WorkItem>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM work_items WHERE job_id = ?1 ORDER BY row_index ASC")?;
        let mut rows = stmt.query(rusqlite::params![job_id.to_string()])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(Self::item_from_row(row)?);
        }
        Ok(items)
    }

    async fn next_pending(&self, job_id: &BatchJobId) -> SchedResult<Option<WorkItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM work_items
            WHERE job_id = ?1 AND status = 'pending'
            ORDER BY row_index ASC
            LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query(rusqlite::params![job_id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::item_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    async fn try_claim(&self, item_id: &WorkItemId) -> SchedResult<bool> {
        let conn = self.conn()?;
        // Succeeds only if the item is still pending.
        let changed = conn.execute(
            r#"
            UPDATE work_items SET status = 'running', updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
            rusqlite::params![item_id.to_string(), ts(Utc::now())],
        )?;
        Ok(changed == 1)
    }

    async fn release_claim(&self, item_id: &WorkItemId) -> SchedResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE work_items SET status = 'pending', updated_at = ?2
            WHERE id = ?1 AND status = 'running'
            "#,
            rusqlite::params![item_id.to_string(), ts(Utc::now())],
        )?;
        Ok(())
    }

    async fn recover_stale(
        &self,
        job_id: &BatchJobId,
        older_than: Duration,
    ) -> SchedResult<usize> {
        let conn = self.conn()?;
        let now = Utc::now();
        let cutoff = now - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        let changed = conn.execute(
            r#"
            UPDATE work_items SET
                status = 'pending',
                error = 'recovered after stalled claim',
                error_kind = NULL,
                updated_at = ?3
            WHERE job_id = ?1 AND status = 'running' AND updated_at < ?2
            "#,
            rusqlite::params![job_id.to_string(), ts(cutoff), ts(now)],
        )?;
        Ok(changed)
    }

    async fn complete_work_item(
        &self,
        item_id: &WorkItemId,
        output: &str,
        usage: TokenUsage,
        retries: u32,
        latency_ms: u64,
    ) -> SchedResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE work_items SET
                status = 'completed',
                output = ?2,
                prompt_tokens = ?3,
                completion_tokens = ?4,
                total_tokens = ?5,
                retries = ?6,
                latency_ms = ?7,
                error = NULL,
                error_kind = NULL,
                updated_at = ?8
            WHERE id = ?1
            "#,
            rusqlite::params![
                item_id.to_string(),
                output,
                usage.prompt_tokens as i64,
                usage.completion_tokens as i64,
                usage.total_tokens as i64,
                retries as i64,
                latency_ms as i64,
                ts(Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(SchedError::RowNotFound(item_id.to_string()));
        }
        Ok(())
    }

    async fn fail_work_item(
        &self,
        item_id: &WorkItemId,
        meta: &ErrorMeta,
        retries: u32,
    ) -> SchedResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE work_items SET
                status = 'failed',
                error = ?2,
                error_kind = ?3,
                retries = ?4,
                updated_at = ?5
            WHERE id = ?1
            "#,
            rusqlite::params![
                item_id.to_string(),
                meta.message,
                meta.kind.as_str(),
                retries as i64,
                ts(Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(SchedError::RowNotFound(item_id.to_string()));
        }
        Ok(())
    }

    async fn record_retry(&self, item_id: &WorkItemId, retries: u32) -> SchedResult<()> {
        let conn = self.conn()?;
        // Also refreshes updated_at, keeping the claim from looking stale
        // through a long backoff.
        conn.execute(
            "UPDATE work_items SET retries = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![item_id.to_string(), retries as i64, ts(Utc::now())],
        )?;
        Ok(())
    }

    async fn fail_open_rows(&self, job_id: &BatchJobId, message: &str) -> SchedResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE work_items SET
                status = 'failed',
                error = ?2,
                error_kind = 'runtime_error',
                updated_at = ?3
            WHERE job_id = ?1 AND status IN ('pending', 'running')
            "#,
            rusqlite::params![job_id.to_string(), message, ts(Utc::now())],
        )?;
        Ok(changed)
    }

    async fn job_progress(&self, job_id: &BatchJobId) -> SchedResult<JobProgress> {
        let conn = self.conn()?;
        let (completed, failed, retried, prompt_tokens, completion_tokens): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN retries > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(prompt_tokens), 0),
                COALESCE(SUM(completion_tokens), 0)
            FROM work_items WHERE job_id = ?1
            "#,
            rusqlite::params![job_id.to_string()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        Ok(JobProgress {
            completed_rows: completed as u64,
            failed_rows: failed as u64,
            retried_rows: retried as u64,
            usage: TokenUsage::new(prompt_tokens as u64, completion_tokens as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptbench_provider::classify::ErrorKind;

    async fn seeded_job(store: &SqliteStore, rows: u32) -> (BatchJob, Vec<WorkItem>) {
        let job = BatchJob::new("gemini-1.5-flash");
        let items: Vec<_> = (0..rows)
            .map(|i| WorkItem::new(job.id.clone(), i, format!("prompt {i}")))
            .collect();
        store.save_job(&job).await.unwrap();
        store.insert_work_items(&items).await.unwrap();
        (job, items)
    }

    #[tokio::test]
    async fn test_job_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let (job, _) = seeded_job(&store, 0).await;

        let loaded = store.load_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.model, "gemini-1.5-flash");
        assert_eq!(loaded.run_state, RunState::Queued);
        assert!(!loaded.cancel_requested);

        assert!(store
            .load_job(&BatchJobId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_run_state_stamps_timestamps() {
        let store = SqliteStore::in_memory().unwrap();
        let (job, _) = seeded_job(&store, 0).await;

        store
            .update_run_state(&job.id, RunState::Running)
            .await
            .unwrap();
        let running = store.load_job(&job.id).await.unwrap().unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        store
            .update_run_state(&job.id, RunState::Completed)
            .await
            .unwrap();
        let done = store.load_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.started_at, running.started_at);
        assert!(done.completed_at.is_some());

        let missing = store
            .update_run_state(&BatchJobId::new(), RunState::Running)
            .await;
        assert!(matches!(missing, Err(SchedError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = SqliteStore::in_memory().unwrap();
        let (job, items) = seeded_job(&store, 2).await;

        let first = store.next_pending(&job.id).await.unwrap().unwrap();
        assert_eq!(first.row_index, 0);

        assert!(store.try_claim(&first.id).await.unwrap());
        assert!(!store.try_claim(&first.id).await.unwrap());

        // The lowest pending row is now the second one.
        let second = store.next_pending(&job.id).await.unwrap().unwrap();
        assert_eq!(second.id, items[1].id);

        store.release_claim(&first.id).await.unwrap();
        let released = store.next_pending(&job.id).await.unwrap().unwrap();
        assert_eq!(released.id, first.id);
        assert_eq!(released.retries, 0);
    }

    #[tokio::test]
    async fn test_stale_recovery() {
        let store = SqliteStore::in_memory().unwrap();
        let (job, items) = seeded_job(&store, 2).await;

        assert!(store.try_claim(&items[0].id).await.unwrap());

        // Fresh claims are untouched.
        assert_eq!(
            store
                .recover_stale(&job.id, Duration::from_secs(300))
                .await
                .unwrap(),
            0
        );

        // Zero-age threshold treats the claim as stale immediately.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            store
                .recover_stale(&job.id, Duration::ZERO)
                .await
                .unwrap(),
            1
        );
        let recovered = store.load_work_item(&items[0].id).await.unwrap().unwrap();
        assert_eq!(recovered.status, RowStatus::Pending);
        assert_eq!(
            recovered.error.as_deref(),
            Some("recovered after stalled claim")
        );
    }

    #[tokio::test]
    async fn test_complete_and_fail_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let (job, items) = seeded_job(&store, 3).await;

        store
            .complete_work_item(&items[0].id, "output text", TokenUsage::new(100, 40), 2, 1234)
            .await
            .unwrap();
        let done = store.load_work_item(&items[0].id).await.unwrap().unwrap();
        assert_eq!(done.status, RowStatus::Completed);
        assert_eq!(done.output.as_deref(), Some("output text"));
        assert_eq!(done.usage.total_tokens, 140);
        assert_eq!(done.retries, 2);
        assert_eq!(done.latency_ms, Some(1234));

        let meta = ErrorMeta {
            message: "400 Bad Request".to_string(),
            status_code: Some(400),
            kind: ErrorKind::ClientError,
            retryable: false,
            rate_limited: false,
        };
        store.fail_work_item(&items[1].id, &meta, 0).await.unwrap();
        let failed = store.load_work_item(&items[1].id).await.unwrap().unwrap();
        assert_eq!(failed.status, RowStatus::Failed);
        assert_eq!(failed.error_kind.as_deref(), Some("client_error"));

        let progress = store.job_progress(&job.id).await.unwrap();
        assert_eq!(progress.completed_rows, 1);
        assert_eq!(progress.failed_rows, 1);
        assert_eq!(progress.retried_rows, 1);
        assert_eq!(progress.usage.prompt_tokens, 100);
        assert_eq!(progress.usage.completion_tokens, 40);
    }

    #[tokio::test]
    async fn test_fail_open_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let (job, items) = seeded_job(&store, 3).await;

        assert!(store.try_claim(&items[0].id).await.unwrap());
        store
            .complete_work_item(&items[2].id, "done", TokenUsage::new(1, 1), 0, 10)
            .await
            .unwrap();

        let failed = store.fail_open_rows(&job.id, "store exploded").await.unwrap();
        assert_eq!(failed, 2);

        let items = store.list_work_items(&job.id).await.unwrap();
        assert_eq!(items[0].status, RowStatus::Failed);
        assert_eq!(items[0].error.as_deref(), Some("store exploded"));
        assert_eq!(items[1].status, RowStatus::Failed);
        assert_eq!(items[2].status, RowStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_and_cancel() {
        let store = SqliteStore::in_memory().unwrap();
        let (job, _) = seeded_job(&store, 0).await;

        let until = Utc::now() + chrono::Duration::seconds(10);
        store.set_pause(&job.id, Some(until)).await.unwrap();
        let paused = store.load_job(&job.id).await.unwrap().unwrap();
        assert_eq!(paused.run_state, RunState::Paused);
        let stored_until = paused.paused_until.expect("pause window recorded");
        assert!((stored_until - until).num_milliseconds().abs() < 2);

        store.set_pause(&job.id, None).await.unwrap();
        let resumed = store.load_job(&job.id).await.unwrap().unwrap();
        assert_eq!(resumed.run_state, RunState::Running);
        assert!(resumed.paused_until.is_none());

        assert!(store.request_cancel(&job.id).await.unwrap());
        assert!(!store.request_cancel(&BatchJobId::new()).await.unwrap());
        let cancelled = store.load_job(&job.id).await.unwrap().unwrap();
        assert!(cancelled.cancel_requested);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        let job_id = {
            let store = SqliteStore::new(&path).unwrap();
            let (job, _) = seeded_job(&store, 1).await;
            job.id
        };

        let reopened = SqliteStore::new(&path).unwrap();
        let job = reopened.load_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.run_state, RunState::Queued);
        assert_eq!(reopened.list_work_items(&job_id).await.unwrap().len(), 1);
    }
}
