//! An in-memory [`Platform`] implementation for deterministic tests.
//!
//! Plays the role `gator-test-utils` plays for the teacher's Postgres
//! fixtures: a reusable test double imported by sibling crates' test
//! suites. Since the platform adapter has no database to spin up, this is
//! a plain `Mutex`-guarded struct rather than a testcontainer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prci_core::model::{Commit, PullRequest, Status};
use prci_core::platform::{Platform, RateLimit, RateLimitResource};

#[derive(Default)]
struct Inner {
    statuses: HashMap<(Commit, String), Status>,
    pull_requests: Vec<PullRequest>,
    files: HashMap<(String, String), Vec<u8>>,
    changed_files: HashMap<u64, Vec<String>>,
    labels: HashMap<u64, Vec<String>>,
    create_status_calls: u32,
}

/// A shared, in-memory stand-in for the hosted code-review platform.
///
/// Cloning shares the underlying state (it is `Arc`-backed), so a test can
/// hand one clone to the code under test and keep another to assert on or
/// to simulate a concurrent peer runner.
#[derive(Clone, Default)]
pub struct FakePlatform {
    inner: Arc<Mutex<Inner>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a status for (commit, context) as if the platform already had
    /// one, bypassing `create_status`.
    pub async fn seed_status(&self, commit: &Commit, status: Status) {
        let mut inner = self.inner.lock().unwrap();
        let key = (commit.clone(), status.context.clone());
        inner.statuses.insert(key, status);
    }

    /// Seed the list of open pull requests returned by
    /// `get_pull_requests`.
    pub async fn seed_pull_request(&self, pr: PullRequest) {
        let mut inner = self.inner.lock().unwrap();
        inner.pull_requests.push(pr);
    }

    /// Seed a file's bytes at (reference, path), as returned by
    /// `fetch_file`.
    pub async fn seed_file(&self, reference: &str, path: &str, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .files
            .insert((reference.to_string(), path.to_string()), bytes);
    }

    /// Seed the list of paths changed by a PR, as returned by
    /// `list_changed_files`.
    pub async fn seed_changed_files(&self, pr: u64, files: Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.changed_files.insert(pr, files);
    }

    /// All statuses currently recorded for a commit, keyed by context.
    pub async fn statuses_for(&self, commit: &Commit) -> HashMap<String, Status> {
        let inner = self.inner.lock().unwrap();
        inner
            .statuses
            .iter()
            .filter(|((c, _), _)| c == commit)
            .map(|((_, ctx), status)| (ctx.clone(), status.clone()))
            .collect()
    }

    /// Labels currently attached to a PR.
    pub async fn labels_for(&self, pr: u64) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.labels.get(&pr).cloned().unwrap_or_default()
    }

    /// Number of times `create_status` has been called, for assertions
    /// about single-write terminal publication (spec.md §8).
    pub async fn create_status_call_count(&self) -> u32 {
        self.inner.lock().unwrap().create_status_calls
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn get_pull_requests(&self) -> anyhow::Result<Vec<PullRequest>> {
        Ok(self.inner.lock().unwrap().pull_requests.clone())
    }

    async fn get_status(&self, commit: &Commit, context: &str) -> anyhow::Result<Option<Status>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.statuses.get(&(commit.clone(), context.to_string())).cloned())
    }

    async fn create_status(&self, commit: &Commit, status: &Status) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.create_status_calls += 1;
        inner
            .statuses
            .insert((commit.clone(), status.context.clone()), status.clone());
        Ok(())
    }

    async fn add_label(&self, pr: u64, label: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let labels = inner.labels.entry(pr).or_default();
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
        Ok(())
    }

    async fn remove_label(&self, pr: u64, label: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(labels) = inner.labels.get_mut(&pr) {
            labels.retain(|l| l != label);
        }
        Ok(())
    }

    async fn fetch_file(&self, reference: &str, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .files
            .get(&(reference.to_string(), path.to_string()))
            .cloned())
    }

    async fn list_changed_files(&self, pr: u64) -> anyhow::Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.changed_files.get(&pr).cloned().unwrap_or_default())
    }

    async fn rate_limit(&self, _resource: RateLimitResource) -> anyhow::Result<RateLimit> {
        Ok(RateLimit {
            limit: 5000,
            remaining: 5000,
            reset_at: chrono::Utc::now() + chrono::Duration::hours(1),
        })
    }
}
