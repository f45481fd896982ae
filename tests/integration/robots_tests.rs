//! Integration tests for robots.txt handling
//!
//! These tests use wiremock to serve robots.txt files and check fetching,
//! caching and the fail-open behaviour end-to-end.

use feed_refresher::robots::{RobotsError, RobotsPolicy};
use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn policy() -> RobotsPolicy {
    RobotsPolicy::with_limits(Client::new(), chrono::Duration::hours(12), 64 * 1024)
}

async fn serve_robots(server: &MockServer, status: u16, body: &str, expected_fetches: u64) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .expect(expected_fetches)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_second_lookup_uses_cache() {
    let server = MockServer::start().await;
    serve_robots(&server, 200, "User-agent: *\nDisallow: /private", 1).await;

    let policy = policy();
    let allowed = policy
        .is_allowed(&format!("{}/public/page", server.uri()), "feed-refresher")
        .await;
    let denied = policy
        .is_allowed(&format!("{}/private/page", server.uri()), "feed-refresher")
        .await;

    assert!(allowed.allowed);
    assert!(allowed.error.is_none());
    assert!(!denied.allowed);
    assert_eq!(policy.cache().len().await, 1);
}

#[tokio::test]
async fn test_missing_robots_allows_everything_and_is_cached() {
    let server = MockServer::start().await;
    serve_robots(&server, 404, "", 1).await;

    let policy = policy();
    for page in ["/a", "/b"] {
        let verdict = policy
            .is_allowed(&format!("{}{}", server.uri(), page), "feed-refresher")
            .await;
        assert!(verdict.allowed);
        assert!(verdict.error.is_none());
    }
}

#[tokio::test]
async fn test_server_error_fails_open_without_caching() {
    let server = MockServer::start().await;
    serve_robots(&server, 500, "oops", 2).await;

    let policy = policy();
    for _ in 0..2 {
        let verdict = policy
            .is_allowed(&format!("{}/page", server.uri()), "feed-refresher")
            .await;
        assert!(verdict.allowed);
        assert!(matches!(
            verdict.error,
            Some(RobotsError::UnexpectedStatus { status: 500, .. })
        ));
    }
    assert!(policy.cache().is_empty().await);
}

#[tokio::test]
async fn test_disallow_all() {
    let server = MockServer::start().await;
    serve_robots(&server, 200, "User-agent: *\nDisallow: /\n", 1).await;

    let verdict = policy()
        .is_allowed(&format!("{}/posts/1?ref=feed", server.uri()), "feed-refresher")
        .await;
    assert!(!verdict.allowed);
    assert!(verdict.error.is_none());
}

#[tokio::test]
async fn test_allow_overrides_shorter_disallow() {
    let server = MockServer::start().await;
    serve_robots(
        &server,
        200,
        "User-agent: *\nDisallow: /\nAllow: /public\n",
        1,
    )
    .await;

    let policy = policy();
    let public = policy
        .is_allowed(&format!("{}/public/page", server.uri()), "feed-refresher")
        .await;
    let private = policy
        .is_allowed(&format!("{}/private", server.uri()), "feed-refresher")
        .await;

    assert!(public.allowed);
    assert!(!private.allowed);
}

#[tokio::test]
async fn test_named_group_preferred_over_wildcard() {
    let server = MockServer::start().await;
    serve_robots(
        &server,
        200,
        "User-agent: *\nDisallow: /\n\nUser-agent: Feed-Refresher\nDisallow: /drafts\n",
        1,
    )
    .await;

    let policy = policy();
    let named = policy
        .is_allowed(&format!("{}/posts/1", server.uri()), "feed-refresher")
        .await;
    let other = policy
        .is_allowed(&format!("{}/posts/1", server.uri()), "otherbot")
        .await;

    assert!(named.allowed);
    assert!(!other.allowed);
}

#[tokio::test]
async fn test_oversized_robots_fails_open() {
    let server = MockServer::start().await;
    let huge = format!("User-agent: *\nDisallow: /\n{}", "# padding\n".repeat(1000));
    serve_robots(&server, 200, &huge, 1).await;

    let small = RobotsPolicy::with_limits(Client::new(), chrono::Duration::hours(12), 1024);
    let verdict = small
        .is_allowed(&format!("{}/page", server.uri()), "feed-refresher")
        .await;

    assert!(verdict.allowed);
    assert!(matches!(
        verdict.error,
        Some(RobotsError::TooLarge { limit: 1024, .. })
    ));
    assert!(small.cache().is_empty().await);
}

#[tokio::test]
async fn test_unreachable_host_fails_open() {
    let verdict = policy()
        .is_allowed("http://127.0.0.1:1/page", "feed-refresher")
        .await;
    assert!(verdict.allowed);
    assert!(matches!(verdict.error, Some(RobotsError::Http { .. })));
}

#[tokio::test]
async fn test_non_http_scheme_allowed_without_fetch() {
    let verdict = policy()
        .is_allowed("ftp://example.com/file", "feed-refresher")
        .await;
    assert!(verdict.allowed);
    assert!(verdict.error.is_none());
}
