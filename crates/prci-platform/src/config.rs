//! Platform adapter configuration: token, target repository, and the
//! tuning knobs for retries/rate-limiting. Resolved the way
//! `gator-db::config::DbConfig::from_env` resolves its own settings.

use std::time::Duration;

/// Configuration for [`crate::http::HttpPlatform`].
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub token: String,
    pub owner: String,
    pub repo: String,
    /// Below this many remaining requests, the adapter pre-emptively
    /// sleeps until reset before any further call (spec.md §4.5).
    pub ephemeral_floor: u32,
    pub retry_max: u32,
    pub retry_delay: Duration,
}

impl PlatformConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.github.com";

    /// Build configuration from environment variables, erroring if the
    /// required ones are absent.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("PRCI_PLATFORM_TOKEN")
            .map_err(|_| anyhow::anyhow!("PRCI_PLATFORM_TOKEN is not set"))?;
        let owner = std::env::var("PRCI_REPOSITORY_OWNER")
            .map_err(|_| anyhow::anyhow!("PRCI_REPOSITORY_OWNER is not set"))?;
        let repo = std::env::var("PRCI_REPOSITORY_NAME")
            .map_err(|_| anyhow::anyhow!("PRCI_REPOSITORY_NAME is not set"))?;
        let base_url = std::env::var("PRCI_PLATFORM_BASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());

        Ok(PlatformConfig {
            base_url,
            token,
            owner,
            repo,
            ephemeral_floor: 60,
            retry_max: 3,
            retry_delay: Duration::from_secs(1),
        })
    }
}
