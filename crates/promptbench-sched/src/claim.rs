//! Row claim protocol.
//!
//! Claiming is read-then-CAS: read the lowest-index pending row, then ask
//! the store for a conditional `Pending` -> `Running` transition. A lost
//! race (another worker claimed the row between read and write) retries
//! the whole cycle a bounded number of times. Mutual exclusion lives
//! entirely in the store's conditional write.

use tracing::debug;

use crate::error::SchedResult;
use crate::job::{BatchJobId, RowStatus, WorkItem};
use crate::persistence::StateStore;

/// Read-then-claim cycles before giving up on a contended job.
pub const MAX_CLAIM_ATTEMPTS: u32 = 5;

/// Claim the next pending row of a job.
///
/// Returns `None` when no pending row exists, or when every attempt lost
/// the claim race (another worker is draining this job).
pub async fn claim_next(
    store: &dyn StateStore,
    job_id: &BatchJobId,
) -> SchedResult<Option<WorkItem>> {
    for attempt in 0..MAX_CLAIM_ATTEMPTS {
        let Some(mut item) = store.next_pending(job_id).await? else {
            return Ok(None);
        };
        if store.try_claim(&item.id).await? {
            item.status = RowStatus::Running;
            return Ok(Some(item));
        }
        debug!(
            job_id = %job_id,
            item_id = %item.id,
            attempt,
            "lost claim race, re-reading"
        );
    }
    Ok(None)
}
