//! The scheduler loop: one long-lived loop per machine that owns the
//! Resource Budget and the Queue cursor, claims ready tasks, admits them
//! against local capacity, and spawns an Executor per admitted task
//! (spec.md §5).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::budget::{ResourceBudget, Resources};
use crate::claim::{claim_task, ClaimedTask, DEFAULT_RACE_WINDOW};
use crate::error::ClaimError;
use crate::executor::{run_task, Job};
use crate::platform::Platform;
use crate::queue::{enumerate_claimable, ClaimableTask};
use crate::registry::JobRegistry;
use crate::task_def::TaskDefinition;

/// Configuration for one scheduler loop instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub runner_id: String,
    /// Sleep duration when a scan finds no claimable work.
    pub no_task_backoff: Duration,
    /// Sleep duration when the resource budget is below minimum.
    pub budget_backoff: Duration,
    /// Free-below-minimum thresholds (spec.md §4.3).
    pub min_cpu: u32,
    pub min_memory: u64,
    pub race_window: Duration,
    /// Root directory under which each task gets its own fresh working
    /// directory (spec.md §5 "no shared on-disk state").
    pub jobs_root: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            runner_id: "runner".to_string(),
            no_task_backoff: Duration::from_secs(60),
            budget_backoff: Duration::from_secs(10),
            min_cpu: 2,
            min_memory: 900 * 1024 * 1024,
            race_window: DEFAULT_RACE_WINDOW,
            jobs_root: std::env::temp_dir().join("prci-jobs"),
        }
    }
}

/// Message sent from a spawned executor task back to the scheduler loop.
struct ExecutionDone {
    commit: crate::model::Commit,
    context: String,
}

/// Why the scheduler loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// SIGINT: finished in-flight work, stopped cleanly.
    Finished,
    /// SIGTERM: aborted in-flight work within the drain deadline.
    Aborted,
}

/// Run the scheduler loop until `cancel` fires.
///
/// `cancel` encodes the SIGINT=finish semantics: cancelling it stops the
/// loop from taking new tasks and, once in-flight work completes (or the
/// drain deadline passes), returns. Callers implementing SIGTERM=abort on
/// top of this should race a shorter drain deadline at the call site.
pub async fn run_scheduler(
    platform: Arc<dyn Platform>,
    registry: Arc<JobRegistry>,
    budget: Arc<ResourceBudget>,
    definitions: impl Fn() -> Vec<(crate::model::PullRequest, TaskDefinition)> + Send + Sync + 'static,
    config: SchedulerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<SchedulerExit> {
    let (tx, mut rx) = mpsc::channel::<ExecutionDone>(64);
    let mut in_flight: usize = 0;

    loop {
        if cancel.is_cancelled() {
            info!("scheduler cancelled, draining in-flight tasks");
            let drain_deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while in_flight > 0 {
                match tokio::time::timeout_at(drain_deadline, rx.recv()).await {
                    Ok(Some(_)) => in_flight -= 1,
                    _ => break,
                }
            }
            if in_flight > 0 {
                warn!(remaining = in_flight, "drain timeout expired");
                return Ok(SchedulerExit::Aborted);
            }
            return Ok(SchedulerExit::Finished);
        }

        while let Ok(done) = rx.try_recv() {
            in_flight -= 1;
            budget.release(&done.commit, &done.context);
        }

        if budget.below_minimum(config.min_cpu, config.min_memory) {
            tokio::select! {
                _ = tokio::time::sleep(config.budget_backoff) => {}
                _ = cancel.cancelled() => continue,
            }
            continue;
        }

        let prs = definitions();
        let claimable = enumerate_claimable(platform.as_ref(), &prs).await?;

        if claimable.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(config.no_task_backoff) => {}
                _ = cancel.cancelled() => continue,
            }
            continue;
        }

        let definition_for = |pr_number: u64| prs.iter().find(|(pr, _)| pr.number == pr_number).map(|(_, d)| d.clone());

        let mut spawned_any = false;
        for candidate in &claimable {
            if admit_and_spawn(
                &platform,
                &registry,
                &budget,
                candidate,
                definition_for(candidate.pr),
                &config,
                &tx,
            )
            .await?
            {
                in_flight += 1;
                spawned_any = true;
            }
        }

        if !spawned_any {
            tokio::select! {
                _ = tokio::time::sleep(config.no_task_backoff) => {}
                _ = cancel.cancelled() => continue,
            }
        }
    }
}

/// Claim one candidate, admit it against the budget, and if both succeed,
/// spawn its execution. Returns whether a task was spawned.
async fn admit_and_spawn(
    platform: &Arc<dyn Platform>,
    registry: &Arc<JobRegistry>,
    budget: &Arc<ResourceBudget>,
    candidate: &ClaimableTask,
    definition: Option<TaskDefinition>,
    config: &SchedulerConfig,
    tx: &mpsc::Sender<ExecutionDone>,
) -> anyhow::Result<bool> {
    let Some(definition) = definition else {
        return Ok(false);
    };
    let Some(entry) = definition.jobs.get(&candidate.context) else {
        return Ok(false);
    };

    let claimed = match claim_task(
        platform.as_ref(),
        &candidate.commit,
        &candidate.context,
        &config.runner_id,
        config.race_window,
    )
    .await?
    {
        Ok(claimed) => claimed,
        Err(ClaimError::AlreadyTaken { .. }) => return Ok(false),
    };

    let requested = match &entry.job.topology {
        Some(topo) => Resources {
            cpu: topo.cpu,
            memory: topo.memory,
        },
        // No topology specified: default to exclusive use of the machine
        // (spec.md §4.3), rather than an unbounded/zero request.
        None => budget.total(),
    };

    if budget
        .allocate(candidate.commit.clone(), candidate.context.clone(), requested)
        .is_err()
    {
        // Release the claim back to unassigned so another runner (or this
        // one, later) can pick it up once capacity frees.
        platform
            .create_status(
                &candidate.commit,
                &crate::model::Status::unassigned(candidate.context.clone()),
            )
            .await?;
        return Ok(false);
    }

    // The class was already validated when the definition was loaded
    // (queue::load_task_definition); this is defense in depth, not the
    // primary check, so a failure here is logged and the candidate skipped
    // rather than propagated out of the scheduler loop.
    let job = match registry.build(&entry.job) {
        Ok(job) => job,
        Err(e) => {
            warn!(pr = candidate.pr, context = %candidate.context, error = %e, "unbuildable job at claim time");
            budget.release(&candidate.commit, &candidate.context);
            platform
                .create_status(
                    &candidate.commit,
                    &crate::model::Status::unassigned(candidate.context.clone()),
                )
                .await?;
            return Ok(false);
        }
    };
    spawn_execution(platform.clone(), claimed, job, tx.clone(), config.jobs_root.clone());
    Ok(true)
}

fn spawn_execution(
    platform: Arc<dyn Platform>,
    claimed: ClaimedTask,
    job: Job,
    tx: mpsc::Sender<ExecutionDone>,
    jobs_root: PathBuf,
) {
    tokio::spawn(async move {
        let commit = claimed.commit.clone();
        let context = claimed.context.clone();

        match run_task(platform.as_ref(), &claimed, &job, &jobs_root).await {
            Ok(Ok(())) => {
                info!(%commit, context = %context, "task published terminal status");
            }
            Ok(Err(e)) => {
                info!(%commit, context = %context, error = %e, "task result discarded");
            }
            Err(e) => {
                warn!(%commit, context = %context, error = %e, "task execution errored");
            }
        }

        let _ = tx.send(ExecutionDone { commit, context }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Commit, Mergeability, PullRequest};
    use crate::registry::ShellJobClass;
    use prci_test_utils::FakePlatform;
    use std::collections::HashSet;

    const DOC: &str = r#"
jobs:
  a:
    job:
      class: shell
      args:
        program: "true"
"#;

    #[tokio::test]
    async fn scheduler_claims_and_executes_a_single_task_then_finishes_on_cancel() {
        let platform = FakePlatform::new();
        let def = TaskDefinition::parse(DOC.as_bytes()).unwrap();
        let pr = PullRequest {
            number: 1,
            author: "trusted".to_string(),
            base_branch: "main".to_string(),
            mergeable: Mergeability::Mergeable,
            labels: vec![],
            head: Commit::from("sha-1"),
        };
        let whitelist: HashSet<String> = ["trusted".to_string()].into_iter().collect();
        crate::queue::materialize_tasks(&platform, &pr, &def, &whitelist)
            .await
            .unwrap();

        let mut registry = JobRegistry::new();
        registry.register(ShellJobClass);
        let registry = Arc::new(registry);
        let budget = Arc::new(ResourceBudget::new(Resources { cpu: 8, memory: 16 }));
        let platform_dyn: Arc<dyn Platform> = Arc::new(platform.clone());

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let def_clone = def.clone();
        let pr_clone = pr.clone();

        let config = SchedulerConfig {
            race_window: Duration::from_millis(1),
            no_task_backoff: Duration::from_millis(10),
            ..SchedulerConfig::default()
        };

        let handle = tokio::spawn(run_scheduler(
            platform_dyn,
            registry,
            budget,
            move || vec![(pr_clone.clone(), def_clone.clone())],
            config,
            cancel_clone,
        ));

        // Let it run one iteration, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let exit = handle.await.unwrap().unwrap();
        assert_eq!(exit, SchedulerExit::Finished);

        let status = platform.get_status(&pr.head, "a").await.unwrap().unwrap();
        assert_eq!(status.state, crate::model::TaskState::Success);
    }
}
