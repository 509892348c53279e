//! The optimistic lease claim protocol (spec.md §4.2).
//!
//! At most one runner executes a given (commit, context) to success,
//! without peer-to-peer coordination: write a claim, sleep through a race
//! window, read back, and only proceed if the read-back still matches what
//! was written.

use chrono::Utc;
use tracing::info;

use crate::error::ClaimError;
use crate::lease::Lease;
use crate::model::{Commit, Status, TaskState};
use crate::platform::Platform;

/// The default race window: must exceed the platform's worst-case
/// propagation delay (spec.md §4.2, glossary "race window").
pub const DEFAULT_RACE_WINDOW: std::time::Duration = std::time::Duration::from_secs(20);

/// A task claimed by this runner, carrying the lease it must defend before
/// publishing a terminal result.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub commit: Commit,
    pub context: String,
    pub lease: Lease,
    pub description: String,
}

/// Attempt to claim (commit, context) for `runner_id`.
///
/// Implements the 5-step algorithm from spec.md §4.2:
/// 1. Re-read; abort if not unassigned.
/// 2. Write `Taken by <runner_id> on <now>`.
/// 3. Sleep the race window.
/// 4. Re-read; abort if the description changed underneath us.
/// 5. Return the claimed task carrying the lease.
pub async fn claim_task(
    platform: &dyn Platform,
    commit: &Commit,
    context: &str,
    runner_id: &str,
    race_window: std::time::Duration,
) -> anyhow::Result<Result<ClaimedTask, ClaimError>> {
    let already_taken = || ClaimError::AlreadyTaken {
        commit: commit.clone(),
        context: context.to_string(),
    };

    // Step 1: re-read, abort if not unassigned.
    let current = platform.get_status(commit, context).await?;
    match &current {
        Some(status) if status.is_unassigned() => {}
        _ => return Ok(Err(already_taken())),
    }

    // Step 2: write the claim.
    let lease = Lease::new(runner_id, Utc::now());
    let description = lease.encode();
    let write = Status {
        context: context.to_string(),
        state: TaskState::Pending,
        description: description.clone(),
        target_url: None,
    };
    platform.create_status(commit, &write).await?;

    // Step 3: sleep through the race window.
    tokio::time::sleep(race_window).await;

    // Step 4: read back and compare.
    let readback = platform.get_status(commit, context).await?;
    match readback {
        Some(status) if status.description == description => {
            info!(%commit, context, runner_id, "claimed task");
            Ok(Ok(ClaimedTask {
                commit: commit.clone(),
                context: context.to_string(),
                lease,
                description,
            }))
        }
        _ => {
            info!(%commit, context, runner_id, "lost claim race");
            Ok(Err(already_taken()))
        }
    }
}
