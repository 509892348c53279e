//! Configuration file management for `prci`.
//!
//! Provides a TOML-based config file at `~/.config/prci/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use prci_platform::PlatformConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub repository: RepositorySection,
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub tasks: TasksSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepositorySection {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsSection {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct TasksSection {
    pub tasks_file: Option<String>,
    pub whitelist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub no_task_backoff_time: u64,
    pub error_backoff_time: u64,
    pub race_window_seconds: u64,
    pub stale_grace_seconds: u64,
    pub ephemeral_floor: u32,
    pub retry_max: u32,
    pub retry_delay_seconds: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        SchedulerSection {
            no_task_backoff_time: 60,
            error_backoff_time: 10,
            race_window_seconds: 20,
            stale_grace_seconds: 300,
            ephemeral_floor: 60,
            retry_max: 3,
            retry_delay_seconds: 1,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the prci config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/prci` or `~/.config/prci`. We
/// intentionally ignore the platform-specific `dirs::config_dir()` (which
/// returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("prci");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("prci")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config(path: &std::path::Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix (the file holds a platform token).
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub platform: PlatformConfig,
    pub tasks_file: String,
    pub whitelist: HashSet<String>,
    pub no_task_backoff: Duration,
    pub error_backoff: Duration,
    pub race_window: Duration,
    pub stale_grace: Duration,
}

/// CLI-supplied overrides. `None` means "fall through to the next link in
/// the chain".
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub token: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub tasks_file: Option<String>,
}

impl ResolvedConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    pub fn resolve(config_path: Option<&std::path::Path>, overrides: &CliOverrides) -> Result<Self> {
        let path = config_path.map(PathBuf::from).unwrap_or_else(self::config_path);
        let file_config = load_config(&path).ok();

        let token = overrides
            .token
            .clone()
            .or_else(|| std::env::var("PRCI_PLATFORM_TOKEN").ok())
            .or_else(|| file_config.as_ref().map(|c| c.credentials.token.clone()))
            .context("platform token not found; set PRCI_PLATFORM_TOKEN or add it to the config file")?;

        let owner = overrides
            .owner
            .clone()
            .or_else(|| std::env::var("PRCI_REPOSITORY_OWNER").ok())
            .or_else(|| file_config.as_ref().map(|c| c.repository.owner.clone()))
            .context("repository owner not found; set PRCI_REPOSITORY_OWNER or add it to the config file")?;

        let repo = overrides
            .repo
            .clone()
            .or_else(|| std::env::var("PRCI_REPOSITORY_NAME").ok())
            .or_else(|| file_config.as_ref().map(|c| c.repository.name.clone()))
            .context("repository name not found; set PRCI_REPOSITORY_NAME or add it to the config file")?;

        let base_url = std::env::var("PRCI_PLATFORM_BASE_URL").ok().or_else(|| {
            file_config
                .as_ref()
                .and_then(|c| c.repository.base_url.clone())
        });

        let scheduler = file_config
            .as_ref()
            .map(|c| &c.scheduler)
            .cloned()
            .unwrap_or_default();

        let tasks_file = overrides
            .tasks_file
            .clone()
            .or_else(|| file_config.as_ref().and_then(|c| c.tasks.tasks_file.clone()))
            .unwrap_or_else(|| "tasks.yaml".to_string());

        let whitelist: HashSet<String> = file_config
            .as_ref()
            .and_then(|c| c.tasks.whitelist.clone())
            .unwrap_or_default()
            .into_iter()
            .collect();

        if token.trim().is_empty() {
            bail!("platform token is empty");
        }

        Ok(ResolvedConfig {
            platform: PlatformConfig {
                base_url: base_url.unwrap_or_else(|| PlatformConfig::DEFAULT_BASE_URL.to_string()),
                token,
                owner,
                repo,
                ephemeral_floor: scheduler.ephemeral_floor,
                retry_max: scheduler.retry_max,
                retry_delay: Duration::from_secs(scheduler.retry_delay_seconds),
            },
            tasks_file,
            whitelist,
            no_task_backoff: Duration::from_secs(scheduler.no_task_backoff_time),
            error_backoff: Duration::from_secs(scheduler.error_backoff_time),
            race_window: Duration::from_secs(scheduler.race_window_seconds),
            stale_grace: Duration::from_secs(scheduler.stale_grace_seconds),
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
