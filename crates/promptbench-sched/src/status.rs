//! Aggregate status over a group of related jobs.
//!
//! A comparison group runs one child job per model over the same rows;
//! consumers want a single status for the group. The derivation is a pure
//! function of the children's run states and row counters, so it is
//! idempotent: terminal inputs always map to the same terminal output.

use serde::{Deserialize, Serialize};

use crate::job::{BatchJob, RunState};

/// Aggregate status of a job group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Queued,
    Running,
    Completed,
    /// All children terminal, with both successes and failures.
    PartialFailed,
    Failed,
    Cancelled,
}

/// The slice of per-job state the derivation looks at.
#[derive(Debug, Clone, Copy)]
pub struct MemberSnapshot {
    pub run_state: RunState,
    pub completed_rows: u64,
    pub failed_rows: u64,
}

impl From<&BatchJob> for MemberSnapshot {
    fn from(job: &BatchJob) -> Self {
        Self {
            run_state: job.run_state,
            completed_rows: job.completed_rows,
            failed_rows: job.failed_rows,
        }
    }
}

/// Derive the group status from its members.
///
/// Any cancelled child cancels the group. While any child is still
/// non-terminal, the group is `Running` if anything is active and
/// `Queued` otherwise. Once every child is terminal the row counters
/// decide: no failures is `Completed`, a mix is `PartialFailed`, and
/// failures without a single success is `Failed`.
pub fn derive_group_status(members: &[MemberSnapshot]) -> GroupStatus {
    if members.is_empty() {
        return GroupStatus::Queued;
    }

    if members
        .iter()
        .any(|m| m.run_state == RunState::Cancelled)
    {
        return GroupStatus::Cancelled;
    }

    if !members.iter().all(|m| m.run_state.is_terminal()) {
        if members.iter().any(|m| m.run_state.is_active()) {
            return GroupStatus::Running;
        }
        return GroupStatus::Queued;
    }

    let completed: u64 = members.iter().map(|m| m.completed_rows).sum();
    let failed: u64 = members.iter().map(|m| m.failed_rows).sum();

    if failed == 0 {
        GroupStatus::Completed
    } else if completed > 0 {
        GroupStatus::PartialFailed
    } else {
        GroupStatus::Failed
    }
}
