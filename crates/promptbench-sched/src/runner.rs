//! Job run loop.
//!
//! One runner drives one job's rows to completion: claim a row, execute
//! it through the rate-limited queue and the retry executor, persist the
//! outcome, flush counters, repeat. Rows are processed sequentially
//! (concurrency 1) so the pause/retry protocol stays ordered; the
//! per-minute budget from the rate policy is the limiter's interval cap.
//!
//! The loop resumes cleanly: counters and summed usage are re-derived
//! from the store on start, so a second run over a half-finished job
//! picks up where the first stopped without double counting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use promptbench_provider::{GenerateRequest, GenerationProvider};
use tracing::{error, info, warn};

use crate::claim::claim_next;
use crate::cost::calculate_savings;
use crate::error::{SchedError, SchedResult};
use crate::job::{BatchJob, BatchJobId, RunState, WorkItem};
use crate::limiter::{RateLimitedQueue, RateLimiterConfig};
use crate::persistence::StateStore;
use crate::policy::{effective_rpm, RATE_WINDOW};
use crate::retry::{execute_with_retry, ExecutionError, RetryConfig, RetryNotice};

/// Run loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Retry/backoff parameters for each row.
    pub retry: RetryConfig,
    /// Global pause taken when the provider rate-limits us.
    pub pause_window: Duration,
    /// Age after which a `Running` claim is considered abandoned.
    pub staleness: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            pause_window: Duration::from_secs(10),
            staleness: Duration::from_secs(300),
        }
    }
}

/// Drives one batch job against a provider.
pub struct JobRunner {
    store: Arc<dyn StateStore>,
    provider: Arc<dyn GenerationProvider>,
    config: RunnerConfig,
}

impl JobRunner {
    /// Create a runner with default tuning.
    pub fn new(store: Arc<dyn StateStore>, provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            store,
            provider,
            config: RunnerConfig::default(),
        }
    }

    /// Override the run loop tuning.
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the job to a terminal state.
    ///
    /// An error escaping the loop is fatal: the job and all of its open
    /// rows are marked failed before the error is returned.
    pub async fn run(&self, job_id: &BatchJobId) -> SchedResult<RunState> {
        match self.run_inner(job_id).await {
            Ok(state) => Ok(state),
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job_id, error = %message, "run loop aborted");
                // Best-effort cleanup; the original error is what matters.
                if let Err(cleanup) = self.fail_job(job_id, &message).await {
                    error!(job_id = %job_id, error = %cleanup, "cleanup after abort failed");
                }
                Err(e)
            }
        }
    }

    async fn fail_job(&self, job_id: &BatchJobId, message: &str) -> SchedResult<()> {
        self.store.set_last_error(job_id, message).await?;
        let open = self.store.fail_open_rows(job_id, message).await?;
        if open > 0 {
            warn!(job_id = %job_id, rows = open, "marked open rows failed");
        }
        let progress = self.store.job_progress(job_id).await?;
        self.store.update_progress(job_id, &progress).await?;
        self.store.update_run_state(job_id, RunState::Failed).await?;
        Ok(())
    }

    async fn run_inner(&self, job_id: &BatchJobId) -> SchedResult<RunState> {
        let job = self
            .store
            .load_job(job_id)
            .await?
            .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))?;

        // Seed counters from the store so resumed jobs don't double count.
        let mut progress = self.store.job_progress(job_id).await?;
        self.store
            .update_run_state(job_id, RunState::Running)
            .await?;

        let rpm = effective_rpm(&job.model, job.safety_mode);
        let limiter = RateLimitedQueue::new(RateLimiterConfig::new(1, rpm, RATE_WINDOW));
        info!(
            job_id = %job_id,
            model = %job.model,
            rpm,
            safety_mode = job.safety_mode,
            completed = progress.completed_rows,
            failed = progress.failed_rows,
            "run loop started"
        );

        loop {
            let current = self
                .store
                .load_job(job_id)
                .await?
                .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))?;

            // Cancellation wins over everything, including a live pause
            // window.
            if current.cancel_requested {
                info!(job_id = %job_id, "cancellation requested, stopping");
                self.store.update_progress(job_id, &progress).await?;
                self.store
                    .update_run_state(job_id, RunState::Cancelled)
                    .await?;
                return Ok(RunState::Cancelled);
            }

            // A pause window inherited from a previous run (or opened by
            // the last iteration) is honored before any further claims.
            if let Some(until) = current.paused_until {
                let remaining = (until - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                if !remaining.is_zero() {
                    info!(
                        job_id = %job_id,
                        remaining_ms = remaining.as_millis() as u64,
                        "honoring pause window"
                    );
                    self.store.update_run_state(job_id, RunState::Paused).await?;
                    tokio::time::sleep(remaining).await;
                }
                self.store.set_pause(job_id, None).await?;
                // A cancel may have landed during the sleep; re-read the
                // job before claiming anything.
                continue;
            }

            let recovered = self.store.recover_stale(job_id, self.config.staleness).await?;
            if recovered > 0 {
                warn!(job_id = %job_id, rows = recovered, "recovered stalled claims");
            }

            let Some(item) = claim_next(self.store.as_ref(), job_id).await? else {
                break;
            };

            self.process_row(&job, &item, &limiter).await?;

            // Counters are re-derived from the rows rather than kept as a
            // running tally, so a resumed job never double counts.
            progress = self.store.job_progress(job_id).await?;
            self.store.update_progress(job_id, &progress).await?;
        }

        limiter.idle().await;

        let estimate = calculate_savings(&job.model, progress.usage);
        self.store
            .set_estimated_savings(job_id, estimate.savings_usd)
            .await?;

        let terminal = if progress.completed_rows == 0 && progress.failed_rows > 0 {
            RunState::Failed
        } else {
            RunState::Completed
        };
        self.store.update_progress(job_id, &progress).await?;
        self.store.update_run_state(job_id, terminal).await?;
        info!(
            job_id = %job_id,
            state = %terminal,
            completed = progress.completed_rows,
            failed = progress.failed_rows,
            retried = progress.retried_rows,
            total_tokens = progress.usage.total_tokens,
            savings_usd = estimate.savings_usd,
            "run loop finished"
        );
        Ok(terminal)
    }

    /// Execute one claimed row and persist its outcome.
    async fn process_row(
        &self,
        job: &BatchJob,
        item: &WorkItem,
        limiter: &RateLimitedQueue,
    ) -> SchedResult<()> {
        let mut request = GenerateRequest::new(item.prompt.clone(), job.model.clone())
            .with_temperature(job.params.temperature)
            .with_max_output_tokens(job.params.max_output_tokens);
        if let Some(instruction) = &job.params.system_instruction {
            request = request.with_system_instruction(instruction.clone());
        }

        let store = Arc::clone(&self.store);
        let item_id = item.id.clone();
        let job_id = job.id.clone();
        let on_retry = move |notice: RetryNotice| {
            let store = Arc::clone(&store);
            let item_id = item_id.clone();
            let job_id = job_id.clone();
            async move {
                // Progress reporting only; a store hiccup here must not
                // fail the attempt.
                if let Err(e) = store.record_retry(&item_id, notice.attempt).await {
                    warn!(item_id = %item_id, error = %e, "could not persist retry count");
                }
                if let Err(e) = store.update_run_state(&job_id, RunState::RetryWait).await {
                    warn!(job_id = %job_id, error = %e, "could not mark retry wait");
                }
            }
        };

        let result = limiter
            .submit(execute_with_retry(
                self.provider.as_ref(),
                &request,
                &self.config.retry,
                on_retry,
            ))
            .await;

        match result {
            Ok(execution) => {
                if execution.retries > 0 {
                    // Leave the transient retry_wait sub-state.
                    self.store
                        .update_run_state(&job.id, RunState::Running)
                        .await?;
                }
                self.store
                    .complete_work_item(
                        &item.id,
                        &execution.text,
                        execution.usage,
                        execution.retries,
                        execution.latency.as_millis() as u64,
                    )
                    .await?;
            }
            Err(ExecutionError::RateLimitPause(meta)) => {
                // The row goes back to the pool with its retry budget
                // intact; the whole job waits out the pause window.
                warn!(
                    job_id = %job.id,
                    item_id = %item.id,
                    "provider rate limit hit, pausing job"
                );
                self.store.release_claim(&item.id).await?;
                self.store.set_last_error(&job.id, &meta.message).await?;
                let until = Utc::now()
                    + chrono::Duration::milliseconds(self.config.pause_window.as_millis() as i64);
                self.store.set_pause(&job.id, Some(until)).await?;
            }
            Err(ExecutionError::Failed { meta, retries }) => {
                warn!(
                    job_id = %job.id,
                    item_id = %item.id,
                    kind = meta.kind.as_str(),
                    retries,
                    "row failed"
                );
                if retries > 0 {
                    self.store
                        .update_run_state(&job.id, RunState::Running)
                        .await?;
                }
                self.store.fail_work_item(&item.id, &meta, retries).await?;
                self.store.set_last_error(&job.id, &meta.message).await?;
            }
        }
        Ok(())
    }
}
