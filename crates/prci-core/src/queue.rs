//! The Queue: materializes tasks as statuses, sweeps stale leases, and
//! enumerates claimable work for one scan (spec.md §4.1).

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::lease::Lease;
use crate::model::{Commit, Label, PullRequest, Status, TaskState};
use crate::platform::Platform;
use crate::registry::JobRegistry;
use crate::task_def::{TaskDefError, TaskDefinition};

/// Stale-lease grace period, added on top of a task's own timeout
/// (spec.md §3, glossary "stale").
pub const STALE_GRACE: Duration = Duration::seconds(300);

/// A task ready to be claimed: its definition plus where it lives.
#[derive(Debug, Clone)]
pub struct ClaimableTask {
    pub pr: u64,
    pub commit: Commit,
    pub context: String,
    pub priority: i32,
    pub prioritized: bool,
    pub tasks_done_on_pr: usize,
}

/// Load the task-definition document for a PR: from the head commit if
/// `tasks_file` was modified in the PR's changed files, otherwise from the
/// base branch (spec.md §4.1 "Loading the task-definition").
///
/// Validates every job's class against `registry` before returning, so an
/// unknown class is caught here -- a per-PR, non-fatal `TaskDefError` the
/// caller skips the PR on -- rather than at claim time, where it would
/// surface deep inside the scheduler loop (spec.md §7, §9).
pub async fn load_task_definition(
    platform: &dyn Platform,
    pr: &PullRequest,
    tasks_file: &str,
    modified_in_pr: bool,
    registry: &JobRegistry,
) -> Result<TaskDefinition, TaskDefError> {
    let reference = if modified_in_pr {
        pr.head.0.as_str()
    } else {
        pr.base_branch.as_str()
    };
    let bytes = platform
        .fetch_file(reference, tasks_file)
        .await
        .map_err(|_| TaskDefError::NotFound)?
        .ok_or(TaskDefError::NotFound)?;
    let definition = TaskDefinition::parse(&bytes)?;

    for entry in definition.jobs.values() {
        if registry.get(&entry.job.class).is_none() {
            return Err(TaskDefError::UnknownJobClass(entry.job.class.clone()));
        }
    }

    Ok(definition)
}

/// Materialize a PR's declared tasks as statuses on its head commit.
///
/// Gating, per spec.md §4.1: for a PR with no existing statuses, only
/// materialize if the author is whitelisted OR the `re-run` label is
/// present. When `re-run` is present: remove the label first (so a crash
/// mid-pass cannot loop forever relabeling -- see DESIGN.md), reset any
/// FAILURE/ERROR status to PENDING/unassigned, then re-scan the
/// definition and create any task whose context is still missing
/// ("create-missing" pass). This never removes an existing context.
pub async fn materialize_tasks(
    platform: &dyn Platform,
    pr: &PullRequest,
    definition: &TaskDefinition,
    whitelist: &HashSet<String>,
) -> anyhow::Result<()> {
    let existing = platform_statuses(platform, &pr.head, definition).await?;
    let has_any_status = !existing.is_empty();
    let rerun = pr.has_label(&Label::ReRun);

    if !has_any_status {
        if !(whitelist.contains(&pr.author) || rerun) {
            return Ok(());
        }
        if rerun {
            platform.remove_label(pr.number, &Label::ReRun.to_string()).await?;
        }
        create_missing(platform, pr, definition, &existing).await?;
        return Ok(());
    }

    if rerun {
        platform.remove_label(pr.number, &Label::ReRun.to_string()).await?;
        for (context, status) in &existing {
            if matches!(status.state, TaskState::Failure | TaskState::Error) {
                platform
                    .create_status(&pr.head, &Status::unassigned(context.clone()))
                    .await?;
            }
        }
        let refreshed = platform_statuses(platform, &pr.head, definition).await?;
        create_missing(platform, pr, definition, &refreshed).await?;
    }

    Ok(())
}

async fn platform_statuses(
    platform: &dyn Platform,
    commit: &Commit,
    definition: &TaskDefinition,
) -> anyhow::Result<Vec<(String, Status)>> {
    let mut found = Vec::new();
    for name in definition.task_names() {
        if let Some(status) = platform.get_status(commit, &name).await? {
            found.push((name, status));
        }
    }
    Ok(found)
}

async fn create_missing(
    platform: &dyn Platform,
    pr: &PullRequest,
    definition: &TaskDefinition,
    existing: &[(String, Status)],
) -> anyhow::Result<()> {
    let present: HashSet<&str> = existing.iter().map(|(c, _)| c.as_str()).collect();
    for name in definition.task_names() {
        if !present.contains(name.as_str()) {
            platform.create_status(&pr.head, &Status::unassigned(name.clone())).await?;
            info!(pr = pr.number, task = name, "materialized task");
        }
    }
    Ok(())
}

/// Reset stale leases to PENDING/unassigned.
///
/// A lease is stale when `claimed_at + timeout + grace < now`. Idempotent:
/// running this twice with no intervening writes leaves the same status
/// set (a reset status is no longer a lease, so the second pass is a
/// no-op on it).
pub async fn stale_sweep(
    platform: &dyn Platform,
    pr: &PullRequest,
    definition: &TaskDefinition,
    grace: Duration,
) -> anyhow::Result<()> {
    for (name, entry) in &definition.jobs {
        let timeout_secs = match entry.job.timeout {
            Some(t) if t > 0 => t,
            _ => continue,
        };
        let Some(status) = platform.get_status(&pr.head, name).await? else {
            continue;
        };
        let Ok(lease) = Lease::parse(&status.description) else {
            continue;
        };
        let timeout = Duration::seconds(timeout_secs as i64);
        if lease.is_stale(timeout, grace, Utc::now()) {
            warn!(pr = pr.number, task = name, "resetting stale lease");
            platform
                .create_status(&pr.head, &Status::unassigned(name.clone()))
                .await?;
        }
    }
    Ok(())
}

/// Whether all of `requires` have state SUCCESS on `commit`.
async fn dependencies_satisfied(
    platform: &dyn Platform,
    commit: &Commit,
    requires: &std::collections::BTreeSet<String>,
) -> anyhow::Result<bool> {
    for dep in requires {
        match platform.get_status(commit, dep).await? {
            Some(status) if status.state == TaskState::Success => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Enumerate claimable tasks across all open PRs: PENDING, unassigned, and
/// dependency-satisfied. Callers sort with [`sort_key`] descending.
pub async fn enumerate_claimable(
    platform: &dyn Platform,
    prs: &[(PullRequest, TaskDefinition)],
) -> anyhow::Result<Vec<ClaimableTask>> {
    let mut out = Vec::new();
    for (pr, definition) in prs {
        let tasks_done = count_done(platform, pr, definition).await?;
        for (name, entry) in &definition.jobs {
            let Some(status) = platform.get_status(&pr.head, name).await? else {
                continue;
            };
            if !status.is_unassigned() {
                continue;
            }
            if !dependencies_satisfied(platform, &pr.head, &entry.requires).await? {
                continue;
            }
            out.push(ClaimableTask {
                pr: pr.number,
                commit: pr.head.clone(),
                context: name.clone(),
                priority: entry.priority,
                prioritized: pr.has_label(&Label::Prioritize),
                tasks_done_on_pr: tasks_done,
            });
        }
    }
    out.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
    Ok(out)
}

async fn count_done(
    platform: &dyn Platform,
    pr: &PullRequest,
    definition: &TaskDefinition,
) -> anyhow::Result<usize> {
    let mut done = 0;
    for name in definition.task_names() {
        if let Some(status) = platform.get_status(&pr.head, &name).await? {
            if status.is_terminal() {
                done += 1;
            }
        }
    }
    Ok(done)
}

/// The composite ordering key from spec.md §4.1:
/// `(prioritize_label_on_pr, task.priority, tasks_done_on_pr)`, descending.
pub fn sort_key(task: &ClaimableTask) -> (bool, i32, usize) {
    (task.prioritized, task.priority, task.tasks_done_on_pr)
}
