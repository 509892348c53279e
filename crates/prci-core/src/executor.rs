//! The Executor: runs a claimed task, supervises its process, and
//! publishes a terminal status atomically with respect to the lease
//! (spec.md §4.4).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::claim::ClaimedTask;
use crate::error::ExecutorError;
use crate::lease::{truncate_description, DESCRIPTION_LIMIT};
use crate::model::{Status, TaskState};
use crate::platform::Platform;
use crate::workdir::{create_workdir, remove_workdir};

/// The job to run: resolved executable plus arguments, handed off by the
/// registry (spec.md §9 "dynamic dispatch on task class").
#[derive(Debug, Clone)]
pub struct Job {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// The outcome of running a job, before it is mapped to a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure { description: String },
    Error { description: String },
}

/// Run `job`'s process in its own session, rooted at `workdir`, so the
/// whole process tree can be signaled together, enforcing `job.timeout`.
/// Maps an exception-shaped spawn failure, a nonzero exit, or a timeout to
/// {ERROR, FAILURE} per spec.md §7.
pub async fn run_job(job: &Job, workdir: &Path) -> JobOutcome {
    let mut command = Command::new(&job.program);
    command
        .args(&job.args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        command.pre_exec(|| {
            // Start a new session so SIGTERM/SIGKILL to the group reaches
            // the whole job, not just the immediate child.
            libc::setsid();
            Ok(())
        });
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return JobOutcome::Error {
                description: format!("spawn error: {e}"),
            };
        }
    };

    match tokio::time::timeout(job.timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => JobOutcome::Success,
        Ok(Ok(status)) => JobOutcome::Failure {
            description: format!("exited with {status}"),
        },
        Ok(Err(e)) => JobOutcome::Error {
            description: format!("wait error: {e}"),
        },
        Err(_) => {
            kill_process_group(&mut child).await;
            JobOutcome::Error {
                description: format!("timed out after {}s", job.timeout.as_secs()),
            }
        }
    }
}

/// Kill the whole process group `setsid()` placed the job in, not just the
/// immediate child -- a timed-out job may have spawned children of its own.
#[cfg(unix)]
async fn kill_process_group(child: &mut tokio::process::Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: pid is a valid process id from a child we spawned with
    // setsid(), so it is also that process's group id.
    let ret = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if ret != 0 {
        warn!(pid, "failed to kill job process group, falling back to single-process kill");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
async fn kill_process_group(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

/// Run a claimed task end to end: invoke the job, then re-check the lease
/// before publishing. Returns `Ok(())` on a normal publish, or
/// `Err(ExecutorError::Superseded)` if another runner overwrote the lease
/// first -- in which case nothing is written (spec.md §4.4 step 3).
pub async fn run_task(
    platform: &dyn Platform,
    task: &ClaimedTask,
    job: &Job,
    jobs_root: &Path,
) -> anyhow::Result<Result<(), ExecutorError>> {
    let workdir = create_workdir(jobs_root)?;
    let outcome = run_job(job, &workdir).await;
    if let Err(e) = remove_workdir(&workdir) {
        warn!(dir = %workdir.display(), error = %e, "failed to remove task working directory");
    }

    let current = platform.get_status(&task.commit, &task.context).await?;
    let intact = matches!(&current, Some(status) if status.description == task.description);
    if !intact {
        info!(
            commit = %task.commit,
            context = %task.context,
            "lease superseded, discarding result"
        );
        return Ok(Err(ExecutorError::Superseded {
            commit: task.commit.clone(),
            context: task.context.clone(),
        }));
    }

    let (state, description) = match outcome {
        JobOutcome::Success => (TaskState::Success, "passed".to_string()),
        JobOutcome::Failure { description } => (TaskState::Failure, description),
        JobOutcome::Error { description } => (TaskState::Error, description),
    };
    let description = truncate_description(&description);
    debug_assert!(description.len() <= DESCRIPTION_LIMIT);

    platform
        .create_status(
            &task.commit,
            &Status {
                context: task.context.clone(),
                state,
                description,
                target_url: None,
            },
        )
        .await?;

    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::Lease;
    use crate::model::Commit;
    use chrono::Utc;
    use prci_test_utils::FakePlatform;

    fn claimed(commit: &Commit, context: &str) -> ClaimedTask {
        let lease = Lease::new("runner-1", Utc::now());
        ClaimedTask {
            commit: commit.clone(),
            context: context.to_string(),
            description: lease.encode(),
            lease,
        }
    }

    #[tokio::test]
    async fn publishes_success_when_job_exits_zero() {
        let platform = FakePlatform::new();
        let commit = Commit::from("abc");
        let task = claimed(&commit, "build");
        platform
            .create_status(&commit, &Status { context: "build".to_string(), state: TaskState::Pending, description: task.description.clone(), target_url: None })
            .await
            .unwrap();

        let jobs_root = tempfile::tempdir().unwrap();
        let job = Job { program: "true".to_string(), args: vec![], timeout: Duration::from_secs(5) };
        let result = run_task(&platform, &task, &job, jobs_root.path()).await.unwrap();
        assert!(result.is_ok());

        let status = platform.get_status(&commit, "build").await.unwrap().unwrap();
        assert_eq!(status.state, TaskState::Success);
    }

    #[tokio::test]
    async fn publishes_failure_when_job_exits_nonzero() {
        let platform = FakePlatform::new();
        let commit = Commit::from("abc");
        let task = claimed(&commit, "build");
        platform
            .create_status(&commit, &Status { context: "build".to_string(), state: TaskState::Pending, description: task.description.clone(), target_url: None })
            .await
            .unwrap();

        let jobs_root = tempfile::tempdir().unwrap();
        let job = Job { program: "false".to_string(), args: vec![], timeout: Duration::from_secs(5) };
        let result = run_task(&platform, &task, &job, jobs_root.path()).await.unwrap();
        assert!(result.is_ok());

        let status = platform.get_status(&commit, "build").await.unwrap().unwrap();
        assert_eq!(status.state, TaskState::Failure);
    }

    #[tokio::test]
    async fn times_out_and_reports_error() {
        let platform = FakePlatform::new();
        let commit = Commit::from("abc");
        let task = claimed(&commit, "build");
        platform
            .create_status(&commit, &Status { context: "build".to_string(), state: TaskState::Pending, description: task.description.clone(), target_url: None })
            .await
            .unwrap();

        let jobs_root = tempfile::tempdir().unwrap();
        let job = Job {
            program: "sleep".to_string(),
            args: vec!["5".to_string()],
            timeout: Duration::from_millis(50),
        };
        let result = run_task(&platform, &task, &job, jobs_root.path()).await.unwrap();
        assert!(result.is_ok());

        let status = platform.get_status(&commit, "build").await.unwrap().unwrap();
        assert_eq!(status.state, TaskState::Error);
        assert!(status.description.contains("timed out"));
    }

    #[tokio::test]
    async fn superseded_lease_discards_result_without_writing() {
        let platform = FakePlatform::new();
        let commit = Commit::from("abc");
        let task = claimed(&commit, "build");
        // A peer overwrote the lease before we finished.
        platform
            .create_status(&commit, &Status { context: "build".to_string(), state: TaskState::Pending, description: "Taken by runner-2 on 2024-01-01 00:00 UTC".to_string(), target_url: None })
            .await
            .unwrap();

        let jobs_root = tempfile::tempdir().unwrap();
        let job = Job { program: "true".to_string(), args: vec![], timeout: Duration::from_secs(5) };
        let call_count_before = platform.create_status_call_count().await;
        let result = run_task(&platform, &task, &job, jobs_root.path()).await.unwrap();

        assert!(matches!(result, Err(ExecutorError::Superseded { .. })));
        assert_eq!(platform.create_status_call_count().await, call_count_before);
    }

    #[tokio::test]
    async fn run_task_gives_each_invocation_its_own_working_directory_and_cleans_up() {
        let platform = FakePlatform::new();
        let commit = Commit::from("abc");
        let task = claimed(&commit, "build");
        platform
            .create_status(&commit, &Status { context: "build".to_string(), state: TaskState::Pending, description: task.description.clone(), target_url: None })
            .await
            .unwrap();

        let jobs_root = tempfile::tempdir().unwrap();
        assert_eq!(std::fs::read_dir(jobs_root.path()).unwrap().count(), 0);

        let job = Job { program: "touch".to_string(), args: vec!["marker".to_string()], timeout: Duration::from_secs(5) };
        run_task(&platform, &task, &job, jobs_root.path()).await.unwrap().unwrap();

        // The per-task directory is removed again once the job completes.
        assert_eq!(std::fs::read_dir(jobs_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn run_job_runs_in_the_given_working_directory() {
        let jobs_root = tempfile::tempdir().unwrap();
        let workdir = create_workdir(jobs_root.path()).unwrap();
        std::fs::write(workdir.join("needle.txt"), b"x").unwrap();

        // `ls` with no path argument lists the process's cwd.
        let job = Job { program: "ls".to_string(), args: vec![], timeout: Duration::from_secs(5) };
        let outcome = run_job(&job, &workdir).await;
        assert_eq!(outcome, JobOutcome::Success);
    }
}
