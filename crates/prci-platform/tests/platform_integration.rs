//! End-to-end tests against a mocked platform HTTP server, covering the
//! behaviors that live across module boundaries (conditional caching,
//! rate-limit backoff, retry policy) and so don't fit cleanly as a single
//! module's unit tests.

use prci_core::model::Commit;
use prci_core::platform::Platform;
use prci_platform::{HttpPlatform, PlatformConfig};
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

async fn stub_rate_limit(server: &MockServer, remaining: u32, reset: i64) {
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resources": {
                "core": {"limit": 5000, "remaining": remaining, "reset": reset},
                "graphql": {"limit": 5000, "remaining": remaining, "reset": reset},
            }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn not_found_status_is_none_not_an_error() {
    let server = MockServer::start().await;
    stub_rate_limit(&server, 5000, 9999999999).await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits/deadbeef/statuses"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let platform = HttpPlatform::new(config(server.uri()));
    let status = platform
        .get_status(&Commit::from("deadbeef"), "build")
        .await
        .unwrap();
    assert!(status.is_none());
}

#[tokio::test]
async fn client_error_is_surfaced_without_retry() {
    let server = MockServer::start().await;
    stub_rate_limit(&server, 5000, 9999999999).await;
    // A single 422 mount with no up_to_n_times: if the client retried,
    // the second request would hit no matching mock and panic with an
    // "unexpected request" failure at server shutdown, which wiremock
    // surfaces as a test failure -- so this also proves no retry.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits/bad/statuses"))
        .respond_with(ResponseTemplate::new(422))
        .expect(1)
        .mount(&server)
        .await;

    let platform = HttpPlatform::new(config(server.uri()));
    let result = platform.get_status(&Commit::from("bad"), "build").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn conditional_get_revalidates_with_etag_header() {
    let server = MockServer::start().await;
    stub_rate_limit(&server, 5000, 9999999999).await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits/abc/statuses"))
        .and(header("cache-control", "no-cache"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .set_body_json(serde_json::json!([
                    {"context": "build", "state": "pending", "description": "running", "target_url": null}
                ])),
        )
        .mount(&server)
        .await;

    let platform = HttpPlatform::new(config(server.uri()));
    let first = platform.get_status(&Commit::from("abc"), "build").await.unwrap();
    assert!(first.is_some());

    // Second mock: a 304 with no body, returned only when the If-None-Match
    // header carrying the first response's etag is present.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits/abc/statuses"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let second = platform.get_status(&Commit::from("abc"), "build").await.unwrap();
    assert_eq!(second.unwrap().description, "running");
}

#[tokio::test]
async fn rate_limit_reports_resource_specific_bucket() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resources": {
                "core": {"limit": 5000, "remaining": 1234, "reset": 1700000000i64},
                "graphql": {"limit": 5000, "remaining": 42, "reset": 1700000000i64},
            }
        })))
        .mount(&server)
        .await;

    let platform = HttpPlatform::new(config(server.uri()));
    let rest = platform
        .rate_limit(prci_core::platform::RateLimitResource::Rest)
        .await
        .unwrap();
    let graphql = platform
        .rate_limit(prci_core::platform::RateLimitResource::GraphQl)
        .await
        .unwrap();

    assert_eq!(rest.remaining, 1234);
    assert_eq!(graphql.remaining, 42);
}
