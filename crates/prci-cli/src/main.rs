mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use prci_core::budget::{ResourceBudget, Resources};
use prci_core::error::QueueError;
use prci_core::model::PullRequest;
use prci_core::platform::Platform;
use prci_core::queue::{load_task_definition, materialize_tasks, stale_sweep};
use prci_core::reboot;
use prci_core::registry::{JobRegistry, ShellJobClass};
use prci_core::scheduler::{run_scheduler, SchedulerConfig, SchedulerExit};
use prci_core::task_def::TaskDefinition;
use prci_platform::HttpPlatform;

use config::{CliOverrides, ResolvedConfig};

#[derive(Parser)]
#[command(name = "prci", about = "Coordination-free distributed CI task runner")]
struct Cli {
    /// This runner's identity, embedded in leases it claims.
    id: String,

    /// Path to the config file (defaults to the XDG location).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Platform API token (overrides PRCI_PLATFORM_TOKEN and the config file).
    #[arg(long)]
    token: Option<String>,

    /// Repository owner (overrides PRCI_REPOSITORY_OWNER and the config file).
    #[arg(long)]
    owner: Option<String>,

    /// Repository name (overrides PRCI_REPOSITORY_NAME and the config file).
    #[arg(long)]
    repo: Option<String>,

    /// Path (within the repository) to the task-definition file.
    #[arg(long)]
    tasks_file: Option<String>,

    /// Path to the persisted next-reboot timestamp file.
    #[arg(long, default_value = "/var/lib/prci/next_reboot")]
    reboot_file: PathBuf,
}

/// Probe this machine's allocatable capacity. `PRCI_MEMORY_BYTES` lets an
/// operator cap memory explicitly; without it we assume 2GiB per core,
/// which is conservative for typical CI runner instance shapes.
fn probe_resources() -> Resources {
    let cpu = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    let memory = std::env::var("PRCI_MEMORY_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(u64::from(cpu) * 2 * 1024 * 1024 * 1024);
    Resources { cpu, memory }
}

/// Background loop: periodically refresh the set of open PRs and their
/// parsed task definitions, materializing new tasks and sweeping stale
/// leases along the way. The scheduler's `definitions` closure reads the
/// last snapshot synchronously, so this loop is what keeps it fresh.
async fn refresh_loop(
    platform: Arc<dyn Platform>,
    registry: Arc<JobRegistry>,
    tasks_file: String,
    whitelist: std::collections::HashSet<String>,
    snapshot: Arc<RwLock<Vec<(PullRequest, TaskDefinition)>>>,
    cancel: CancellationToken,
    poll_interval: std::time::Duration,
    stale_grace: chrono::Duration,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match platform.get_pull_requests().await {
            Ok(prs) => {
                let mut fresh = Vec::new();
                for pr in prs {
                    let modified_in_pr = match platform.list_changed_files(pr.number).await {
                        Ok(files) => files.iter().any(|f| f == &tasks_file),
                        Err(e) => {
                            warn!(pr = pr.number, error = %e, "failed to list changed files, assuming task definition unchanged");
                            false
                        }
                    };

                    let definition = match load_task_definition(
                        platform.as_ref(),
                        &pr,
                        &tasks_file,
                        modified_in_pr,
                        &registry,
                    )
                    .await
                    {
                        Ok(d) => d,
                        Err(source) => {
                            let err = QueueError::InvalidDefinition { pr: pr.number, source };
                            warn!(pr = pr.number, error = %err, "skipping PR: task definition unavailable");
                            continue;
                        }
                    };

                    if let Err(e) = materialize_tasks(platform.as_ref(), &pr, &definition, &whitelist).await {
                        warn!(pr = pr.number, error = %e, "failed to materialize tasks");
                        continue;
                    }
                    if let Err(e) = stale_sweep(platform.as_ref(), &pr, &definition, stale_grace).await {
                        warn!(pr = pr.number, error = %e, "failed to sweep stale leases");
                    }

                    fresh.push((pr, definition));
                }

                *snapshot.write().unwrap() = fresh;
            }
            Err(e) => {
                warn!(error = %e, "failed to list pull requests");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

/// Drive `cancel` from process signals per spec.md §5: SIGINT finishes
/// in-flight work and stops; SIGTERM aborts within the drain deadline. A
/// second signal of either kind forces an immediate exit.
#[cfg(unix)]
fn spawn_signal_handlers(cancel: CancellationToken, reboot_file: PathBuf, reboot_due: Arc<AtomicBool>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigalrm = signal(SignalKind::alarm()).expect("install SIGALRM handler");

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    if cancel.is_cancelled() {
                        warn!("second signal received, forcing immediate exit");
                        std::process::exit(130);
                    }
                    info!("SIGINT received, finishing in-flight work");
                    cancel.cancel();
                }
                _ = sigterm.recv() => {
                    if cancel.is_cancelled() {
                        warn!("second signal received, forcing immediate exit");
                        std::process::exit(143);
                    }
                    info!("SIGTERM received, aborting after drain deadline");
                    cancel.cancel();
                }
                _ = sigalrm.recv() => {
                    if reboot::is_due(&reboot_file, chrono::Utc::now()) {
                        info!("scheduled reboot is due, finishing in-flight work");
                        reboot_due.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_handlers(_cancel: CancellationToken, _reboot_file: PathBuf, _reboot_due: Arc<AtomicBool>) {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let overrides = CliOverrides {
        token: cli.token.clone(),
        owner: cli.owner.clone(),
        repo: cli.repo.clone(),
        tasks_file: cli.tasks_file.clone(),
    };
    let resolved = ResolvedConfig::resolve(cli.config.as_deref(), &overrides)
        .context("failed to resolve configuration")?;

    let platform: Arc<dyn Platform> = Arc::new(HttpPlatform::new(resolved.platform.clone()));
    let budget = Arc::new(ResourceBudget::new(probe_resources()));

    let mut registry = JobRegistry::new();
    registry.register(ShellJobClass);
    let registry = Arc::new(registry);

    if let Err(e) = reboot::ensure_scheduled(&cli.reboot_file, chrono::Utc::now()) {
        warn!(error = %e, path = %cli.reboot_file.display(), "failed to persist next reboot time");
    }

    let cancel = CancellationToken::new();
    let reboot_due = Arc::new(AtomicBool::new(false));
    spawn_signal_handlers(cancel.clone(), cli.reboot_file.clone(), reboot_due.clone());

    let snapshot: Arc<RwLock<Vec<(PullRequest, TaskDefinition)>>> = Arc::new(RwLock::new(Vec::new()));
    let stale_grace = chrono::Duration::from_std(resolved.stale_grace)
        .unwrap_or_else(|_| prci_core::queue::STALE_GRACE);
    let refresh_handle = tokio::spawn(refresh_loop(
        platform.clone(),
        registry.clone(),
        resolved.tasks_file.clone(),
        resolved.whitelist.clone(),
        snapshot.clone(),
        cancel.clone(),
        resolved.no_task_backoff,
        stale_grace,
    ));

    let scheduler_config = SchedulerConfig {
        runner_id: cli.id.clone(),
        no_task_backoff: resolved.no_task_backoff,
        budget_backoff: resolved.error_backoff,
        race_window: resolved.race_window,
        ..SchedulerConfig::default()
    };

    let definitions_snapshot = snapshot.clone();
    let exit = run_scheduler(
        platform,
        registry,
        budget,
        move || definitions_snapshot.read().unwrap().clone(),
        scheduler_config,
        cancel,
    )
    .await
    .context("scheduler loop failed")?;

    let _ = refresh_handle.await;

    if reboot_due.load(Ordering::SeqCst) {
        let _ = std::fs::remove_file(&cli.reboot_file);
        info!(runner = %cli.id, "rebooting machine");
        match tokio::process::Command::new("systemctl").arg("reboot").status().await {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(runner = %cli.id, %status, "systemctl reboot exited non-zero"),
            Err(e) => warn!(runner = %cli.id, error = %e, "failed to invoke systemctl reboot"),
        }
    }

    match exit {
        SchedulerExit::Finished => {
            info!(runner = %cli.id, "runner stopped cleanly");
            Ok(())
        }
        SchedulerExit::Aborted => {
            warn!(runner = %cli.id, "runner aborted with tasks still in flight");
            std::process::exit(1);
        }
    }
}
