//! Integration tests for the update checker
//!
//! These tests run the checker against wiremock servers and an in-memory
//! SQLite database, covering the conditional request flow, retries, robots
//! compliance and the compare-and-swap write.

use chrono::{Duration as ChronoDuration, Utc};
use feed_refresher::checker::{CheckError, CheckOutcome, RetryPolicy, UpdateChecker};
use feed_refresher::model::{Article, ArticleCheckEvent, NewArticle};
use feed_refresher::robots::RobotsPolicy;
use feed_refresher::storage::{
    ArticleStore, ArticleUpdate, CandidateLister, CheckWindow, FeedStore, SqliteStorage,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARTICLE_PATH: &str = "/posts/1";

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_initial: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        jitter: false,
    }
}

/// Stores one article pointing at the mock server, optionally with validators
async fn seed_article(
    server: &MockServer,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> Arc<SqliteStorage> {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let feed_id = storage
        .insert_feed(&format!("{}/feed.xml", server.uri()), Some("Test"))
        .unwrap();

    storage
        .insert_article(&NewArticle {
            feed_id,
            url: format!("{}{}", server.uri(), ARTICLE_PATH),
            title: Some("Post".to_string()),
            content: "<p>original</p>".to_string(),
            description: "original".to_string(),
            published_at: Utc::now() - ChronoDuration::hours(1),
        })
        .await
        .unwrap();

    if etag.is_some() || last_modified.is_some() {
        let changed = storage
            .update_article_on_change(&ArticleUpdate {
                article_id: 1,
                content: "<p>original</p>".to_string(),
                description: "original".to_string(),
                etag: etag.map(str::to_string),
                last_modified: last_modified.map(str::to_string),
                checked_at: Utc::now() - ChronoDuration::minutes(30),
                expected_etag: None,
                expected_last_modified: None,
            })
            .await
            .unwrap();
        assert!(changed);
    }

    storage
}

/// Builds the event the scheduler would publish for the seeded article
async fn scheduled_event(storage: &SqliteStorage) -> ArticleCheckEvent {
    let now = Utc::now();
    let window = CheckWindow {
        published_since: now - ChronoDuration::days(3),
        last_checked_before: now + ChronoDuration::days(1),
    };
    let page = storage
        .list_articles_to_check(window, 10, None)
        .await
        .unwrap();
    let candidate = page.candidates.into_iter().next().unwrap();
    ArticleCheckEvent::scheduled(candidate, now)
}

async fn article(storage: &SqliteStorage) -> Article {
    storage.get_article(1).await.unwrap()
}

fn checker(storage: &Arc<SqliteStorage>) -> UpdateChecker {
    UpdateChecker::new(Client::new(), storage.clone(), fast_policy(3))
}

#[tokio::test]
async fn test_head_not_modified_only_marks_checked() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, Some("\"v0\""), None).await;
    let before = article(&storage).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .and(header("If-None-Match", "\"v0\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>new</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Unchanged);

    let after = article(&storage).await;
    assert_eq!(after.content, before.content);
    assert_eq!(after.http_etag.as_deref(), Some("\"v0\""));
    assert!(after.last_checked_at > before.last_checked_at);
}

#[tokio::test]
async fn test_changed_article_is_persisted_with_head_etag() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v1\""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_string("<p>updated</p>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Updated);

    let stored = article(&storage).await;
    assert!(stored.content.contains("updated"));
    assert_eq!(stored.description, "updated");
    assert_eq!(stored.http_etag.as_deref(), Some("\"v1\""));
    assert!(stored.last_checked_at.is_some());
}

#[tokio::test]
async fn test_get_validators_win_over_head() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"head\"")
                .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"get\"")
                .set_body_string("<p>body</p>"),
        )
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    checker(&storage).check(&event).await.unwrap();

    let stored = article(&storage).await;
    assert_eq!(stored.http_etag.as_deref(), Some("\"get\""));
    assert_eq!(
        stored.http_last_modified.as_deref(),
        Some("2015-10-21T07:28:00Z")
    );
}

#[tokio::test]
async fn test_if_modified_since_sent_as_http_date() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, Some("2015-10-21T07:28:00Z")).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .and(header("If-Modified-Since", "Wed, 21 Oct 2015 07:28:00 GMT"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Unchanged);
}

#[tokio::test]
async fn test_robots_disallow_skips_all_requests() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>never</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let robots = Arc::new(RobotsPolicy::with_limits(
        Client::new(),
        ChronoDuration::hours(12),
        64 * 1024,
    ));
    let checker = checker(&storage).with_robots(robots, "feed-refresher");

    let event = scheduled_event(&storage).await;
    let outcome = checker.check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Disallowed);

    let stored = article(&storage).await;
    assert_eq!(stored.content, "<p>original</p>");
    assert!(stored.http_etag.is_none());
    assert!(stored.last_checked_at.is_some());
}

#[tokio::test]
async fn test_concurrent_change_is_skipped() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;
    let event = scheduled_event(&storage).await;

    // Another writer updates the row after the event was scheduled.
    storage
        .update_article_on_change(&ArticleUpdate {
            article_id: 1,
            content: "<p>fresher</p>".to_string(),
            description: "fresher".to_string(),
            etag: Some("\"other\"".to_string()),
            last_modified: None,
            checked_at: Utc::now() - ChronoDuration::minutes(5),
            expected_etag: None,
            expected_last_modified: None,
        })
        .await
        .unwrap();
    let before = article(&storage).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v2\""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>stale</p>"))
        .mount(&server)
        .await;

    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Skipped);

    let after = article(&storage).await;
    assert_eq!(after.content, "<p>fresher</p>");
    assert_eq!(after.http_etag.as_deref(), Some("\"other\""));
    assert!(after.last_checked_at > before.last_checked_at);
}

#[tokio::test]
async fn test_retryable_status_is_retried() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, Some("\"v0\""), None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Unchanged);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted_is_an_error() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let checker = UpdateChecker::new(Client::new(), storage.clone(), fast_policy(2));
    let event = scheduled_event(&storage).await;
    let result = checker.check(&event).await;

    assert!(matches!(
        result,
        Err(CheckError::RetriesExhausted {
            attempts: 2,
            status: 429,
            ..
        })
    ));
    assert!(article(&storage).await.last_checked_at.is_none());
}

#[tokio::test]
async fn test_oversized_body_is_not_persisted() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let checker = checker(&storage).with_max_content_bytes(1024);
    let event = scheduled_event(&storage).await;
    let result = checker.check(&event).await;

    assert!(matches!(
        result,
        Err(CheckError::ContentTooLarge { limit: 1024, .. })
    ));
    let stored = article(&storage).await;
    assert_eq!(stored.content, "<p>original</p>");
    assert!(stored.last_checked_at.is_none());
}

#[tokio::test]
async fn test_head_not_allowed_falls_back_to_get() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(405))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"g1\"")
                .set_body_string("<p>via get</p>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Updated);
    assert_eq!(article(&storage).await.http_etag.as_deref(), Some("\"g1\""));
}

#[tokio::test]
async fn test_head_not_implemented_falls_back_to_get() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    // 501 is a server error but must not be retried on HEAD.
    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(501))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"g1\"")
                .set_body_string("<p>via get</p>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Updated);

    let stored = article(&storage).await;
    assert_eq!(stored.http_etag.as_deref(), Some("\"g1\""));
    assert!(stored.content.contains("via get"));
}

#[tokio::test]
async fn test_get_server_error_is_still_retried() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(501))
        .expect(2)
        .mount(&server)
        .await;

    let checker = UpdateChecker::new(Client::new(), storage.clone(), fast_policy(2));
    let event = scheduled_event(&storage).await;
    let result = checker.check(&event).await;

    assert!(matches!(
        result,
        Err(CheckError::RetriesExhausted {
            attempts: 2,
            status: 501,
            ..
        })
    ));
}

#[tokio::test]
async fn test_redirect_loop_is_not_retried() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}{}", server.uri(), ARTICLE_PATH).as_str()),
        )
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let result = checker(&storage).check(&event).await;

    assert!(matches!(
        result,
        Err(CheckError::Request { attempts: 1, .. })
    ));

    // One attempt follows at most the client's redirect limit.
    let heads = server.received_requests().await.unwrap().len();
    assert!(heads <= 11, "expected a single attempt, saw {} requests", heads);
    assert!(article(&storage).await.last_checked_at.is_none());
}

#[tokio::test]
async fn test_client_error_is_unchanged_without_get() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Unchanged);
    assert!(article(&storage).await.last_checked_at.is_some());
}

#[tokio::test]
async fn test_get_not_modified_is_unchanged() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, Some("\"v0\""), None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .and(header("If-None-Match", "\"v0\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    let outcome = checker(&storage).check(&event).await.unwrap();
    assert_eq!(outcome, CheckOutcome::Unchanged);
    assert_eq!(article(&storage).await.content, "<p>original</p>");
}

#[tokio::test]
async fn test_plain_text_body_is_wrapped() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    Mock::given(method("HEAD"))
        .and(path(ARTICLE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARTICLE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/plain")
                .set_body_string("a < b"),
        )
        .mount(&server)
        .await;

    let event = scheduled_event(&storage).await;
    checker(&storage).check(&event).await.unwrap();

    let stored = article(&storage).await;
    assert_eq!(stored.content, "<pre>a &lt; b</pre>");
    assert_eq!(stored.description, "a < b");
}

#[tokio::test]
async fn test_missing_url_fails_fast() {
    let server = MockServer::start().await;
    let storage = seed_article(&server, None, None).await;

    let mut event = scheduled_event(&storage).await;
    event.url = String::new();
    assert!(matches!(
        checker(&storage).check(&event).await,
        Err(CheckError::MissingUrl(1))
    ));

    event.url = "not a url".to_string();
    assert!(matches!(
        checker(&storage).check(&event).await,
        Err(CheckError::InvalidUrl { .. })
    ));
}
