//! Job and work-item types for the batch engine.
//!
//! The job state machine:
//!
//! ```text
//!   Queued ──→ Running ⇄ RetryWait
//!                 │ ⇅
//!                 │ Paused
//!                 │
//!                 ├──→ Completed
//!                 ├──→ Failed
//!                 └──→ Cancelled
//! ```
//!
//! `Paused` and `RetryWait` are transient sub-states of a running job kept
//! for observability. Terminal states are permanent; only an external
//! resume action may reset a terminal job back to `Queued`.

use chrono::{DateTime, Utc};
use promptbench_provider::TokenUsage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchJobId(pub Uuid);

impl BatchJobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for BatchJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a work item (one row of a job).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    /// Create a new random work item ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a work item ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, waiting for a run loop.
    Queued,
    /// The run loop is processing rows.
    Running,
    /// Global rate-limit pause window in effect.
    Paused,
    /// Backing off before retrying the current row.
    RetryWait,
    /// All rows processed, at least one completed.
    Completed,
    /// No rows completed and at least one failed, or a fatal error.
    Failed,
    /// Cancellation was requested and honored.
    Cancelled,
}

impl RunState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    /// Check if the job is actively being processed (including transient
    /// pause/backoff sub-states).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Running | RunState::Paused | RunState::RetryWait
        )
    }

    /// Stable snake_case name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::RetryWait => "retry_wait",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted state name.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunState::Queued),
            "running" => Some(RunState::Running),
            "paused" => Some(RunState::Paused),
            "retry_wait" => Some(RunState::RetryWait),
            "completed" => Some(RunState::Completed),
            "failed" => Some(RunState::Failed),
            "cancelled" => Some(RunState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generation parameters carried by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Optional system instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// Sampling temperature.
    pub temperature: f64,

    /// Maximum output tokens.
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            system_instruction: None,
            temperature: 0.7,
            max_output_tokens: 1024,
        }
    }
}

/// A batch job: one set of compiled prompts against one model/config.
///
/// Persisted state is owned by the store; the run loop mutates it only
/// through [`crate::persistence::StateStore`] and reaches a terminal state
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Unique job identifier.
    pub id: BatchJobId,

    /// Model identifier.
    pub model: String,

    /// Generation parameters.
    pub params: GenerationParams,

    /// Use the conservative rate budget.
    pub safety_mode: bool,

    /// Current run state.
    pub run_state: RunState,

    /// Rows completed so far.
    pub completed_rows: u64,

    /// Rows failed so far.
    pub failed_rows: u64,

    /// Retry attempts consumed across all rows.
    pub retried_rows: u64,

    /// End of the current global pause window, if any.
    pub paused_until: Option<DateTime<Utc>>,

    /// Cooperative cancellation flag, polled once per loop iteration.
    pub cancel_requested: bool,

    /// Last error message surfaced to consumers.
    pub last_error: Option<String>,

    /// Liveness heartbeat, refreshed on every counter flush.
    pub heartbeat_at: Option<DateTime<Utc>>,

    /// Job creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Run loop start timestamp.
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,

    /// Estimated batch-pricing savings, set at completion.
    pub estimated_savings_usd: Option<f64>,
}

impl BatchJob {
    /// Create a new queued job for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: BatchJobId::new(),
            model: model.into(),
            params: GenerationParams::default(),
            safety_mode: false,
            run_state: RunState::Queued,
            completed_rows: 0,
            failed_rows: 0,
            retried_rows: 0,
            paused_until: None,
            cancel_requested: false,
            last_error: None,
            heartbeat_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_savings_usd: None,
        }
    }

    /// Set the generation parameters.
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Enable the conservative rate budget.
    pub fn with_safety_mode(mut self, safety_mode: bool) -> Self {
        self.safety_mode = safety_mode;
        self
    }
}

/// Status of a single work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a run loop.
    Running,
    /// Output persisted.
    Completed,
    /// Rejected or retry budget exhausted.
    Failed,
}

impl RowStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RowStatus::Completed | RowStatus::Failed)
    }

    /// Stable snake_case name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Pending => "pending",
            RowStatus::Running => "running",
            RowStatus::Completed => "completed",
            RowStatus::Failed => "failed",
        }
    }

    /// Parse a persisted status name.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RowStatus::Pending),
            "running" => Some(RowStatus::Running),
            "completed" => Some(RowStatus::Completed),
            "failed" => Some(RowStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One compiled prompt within a job: the unit of claiming and retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique work item identifier.
    pub id: WorkItemId,

    /// Owning job.
    pub job_id: BatchJobId,

    /// Processing order within the job.
    pub row_index: u32,

    /// Compiled prompt text.
    pub prompt: String,

    /// Current status.
    pub status: RowStatus,

    /// Retry attempts consumed.
    pub retries: u32,

    /// Generated output, set on completion.
    pub output: Option<String>,

    /// Last error message.
    pub error: Option<String>,

    /// Machine-checkable error kind (snake_case, see the provider taxonomy).
    pub error_kind: Option<String>,

    /// Token accounting for the completing call.
    pub usage: TokenUsage,

    /// Call latency in milliseconds.
    pub latency_ms: Option<u64>,

    /// Last state-change timestamp; drives staleness recovery.
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a pending work item.
    pub fn new(job_id: BatchJobId, row_index: u32, prompt: impl Into<String>) -> Self {
        Self {
            id: WorkItemId::new(),
            job_id,
            row_index,
            prompt: prompt.into(),
            status: RowStatus::Pending,
            retries: 0,
            output: None,
            error: None,
            error_kind: None,
            usage: TokenUsage::default(),
            latency_ms: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_unique() {
        let id1 = BatchJobId::new();
        let id2 = BatchJobId::new();
        assert_ne!(id1, id2);

        let parsed = BatchJobId::parse(&id1.to_string()).unwrap();
        assert_eq!(id1, parsed);
    }

    #[test]
    fn test_run_state_predicates() {
        assert!(!RunState::Queued.is_terminal());
        assert!(!RunState::Queued.is_active());

        for state in [RunState::Running, RunState::Paused, RunState::RetryWait] {
            assert!(state.is_active());
            assert!(!state.is_terminal());
        }

        for state in [RunState::Completed, RunState::Failed, RunState::Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.is_active());
        }
    }

    #[test]
    fn test_run_state_round_trip() {
        for state in [
            RunState::Queued,
            RunState::Running,
            RunState::Paused,
            RunState::RetryWait,
            RunState::Completed,
            RunState::Failed,
            RunState::Cancelled,
        ] {
            assert_eq!(RunState::from_str_name(state.as_str()), Some(state));
        }
        assert_eq!(RunState::from_str_name("bogus"), None);
    }

    #[test]
    fn test_row_status_round_trip() {
        for status in [
            RowStatus::Pending,
            RowStatus::Running,
            RowStatus::Completed,
            RowStatus::Failed,
        ] {
            assert_eq!(RowStatus::from_str_name(status.as_str()), Some(status));
        }
        assert!(RowStatus::Completed.is_terminal());
        assert!(!RowStatus::Running.is_terminal());
    }

    #[test]
    fn test_job_builder() {
        let job = BatchJob::new("gemini-1.5-pro")
            .with_safety_mode(true)
            .with_params(GenerationParams {
                system_instruction: Some("Be brief.".to_string()),
                temperature: 0.2,
                max_output_tokens: 256,
            });

        assert_eq!(job.model, "gemini-1.5-pro");
        assert!(job.safety_mode);
        assert_eq!(job.run_state, RunState::Queued);
        assert_eq!(job.params.max_output_tokens, 256);
        assert!(!job.cancel_requested);
    }

    #[test]
    fn test_work_item_starts_pending() {
        let job_id = BatchJobId::new();
        let item = WorkItem::new(job_id.clone(), 3, "prompt text");
        assert_eq!(item.job_id, job_id);
        assert_eq!(item.row_index, 3);
        assert_eq!(item.status, RowStatus::Pending);
        assert_eq!(item.retries, 0);
        assert!(item.output.is_none());
    }
}
