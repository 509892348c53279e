//! The `Platform` trait -- the seam between scheduling logic and the
//! hosted code-review platform.
//!
//! Mirrors `gator-core::harness::trait_def::Harness`: an object-safe
//! `#[async_trait]` trait so the concrete (HTTP) implementation lives in a
//! separate crate ([`prci-platform`], not a dependency of this one) and
//! tests can substitute an in-memory fake.

use async_trait::async_trait;

use crate::model::{Commit, PullRequest, Status};

/// A rate-limit snapshot for one of the platform's independently-limited
/// resources (REST, GraphQL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

/// A platform resource class, since REST and GraphQL are rate-limited
/// independently (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResource {
    Rest,
    GraphQl,
}

/// Adapter interface for the hosted code-review platform.
///
/// # Object Safety
///
/// Every method returns a concrete, owned type, so this trait can be
/// stored as `Box<dyn Platform>` or `Arc<dyn Platform>`.
#[async_trait]
pub trait Platform: Send + Sync {
    /// List open pull requests for the configured repository.
    async fn get_pull_requests(&self) -> anyhow::Result<Vec<PullRequest>>;

    /// Read the current status for (commit, context), if one exists.
    async fn get_status(&self, commit: &Commit, context: &str) -> anyhow::Result<Option<Status>>;

    /// Create (append) a new status for (commit, context).
    async fn create_status(&self, commit: &Commit, status: &Status) -> anyhow::Result<()>;

    /// Add a label to a pull request.
    async fn add_label(&self, pr: u64, label: &str) -> anyhow::Result<()>;

    /// Remove a label from a pull request.
    async fn remove_label(&self, pr: u64, label: &str) -> anyhow::Result<()>;

    /// Fetch a file's raw bytes at a given ref.
    async fn fetch_file(&self, reference: &str, path: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// List the paths changed by a pull request, for deciding whether a
    /// path of interest (e.g. the task-definition file) should be read from
    /// the head commit instead of the base branch (spec.md §4.1).
    async fn list_changed_files(&self, pr: u64) -> anyhow::Result<Vec<String>>;

    /// Current rate-limit snapshot for the given resource.
    async fn rate_limit(&self, resource: RateLimitResource) -> anyhow::Result<RateLimit>;
}

// Compile-time assertion: Platform must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Platform) {}
};
