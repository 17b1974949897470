//! End-to-end task pipeline tests
//!
//! Deduplication, retries, pre-request hooks, direct mode and transforms,
//! each against a mock server.

use crate::common::{assert_no_more, collect, page, recorder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_lanes::{CrawlEvent, Crawler, CrawlerOptions, PreRequestError, TaskOptions, Transform};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_html(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page(route), "text/html"))
        .mount(server)
        .await;
}

fn crawler_with(options: CrawlerOptions) -> Crawler {
    Crawler::new(options).expect("Failed to create crawler")
}

#[tokio::test]
async fn test_fetch_and_transform() {
    let server = MockServer::start().await;
    mount_html(&server, "/index").await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    crawler.queue([TaskOptions::new(format!("{}/index", server.uri())).callback(callback)]);

    let records = collect(&mut rx, 1).await;
    let record = &records[0];
    assert_eq!(record.status, Some(200));
    assert_eq!(record.title.as_deref(), Some("/index"));
    assert_eq!(record.charset.as_deref(), Some("utf-8"));
    assert!(record.has_document);

    crawler.drained().await;
    let stats = crawler.stats().snapshot();
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn test_non_success_status_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_raw(page("Not Found"), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    crawler.queue([TaskOptions::new(format!("{}/missing", server.uri())).callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(404));
    assert!(record.error.is_none());
    assert_eq!(record.title.as_deref(), Some("Not Found"));
    assert_eq!(crawler.stats().snapshot().retried, 0);
}

#[tokio::test]
async fn test_duplicates_are_fetched_once() {
    let server = MockServer::start().await;
    mount_html(&server, "/dup").await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(
        CrawlerOptions::default()
            .skip_duplicates(true)
            .defaults(TaskOptions::default().callback(callback)),
    );

    let uri = format!("{}/dup", server.uri());
    crawler.queue([uri.clone(), uri.clone(), uri.clone()]);
    crawler.queue([TaskOptions::new(uri.clone()).search_param("page", "2")]);

    collect(&mut rx, 2).await;
    assert_no_more(&mut rx, Duration::from_millis(200)).await;

    let received = server.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 2);
    assert_eq!(crawler.stats().snapshot().deduplicated, 2);
    assert!(crawler.skip_duplicates());
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hang"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(page("late"), "text/html")
                .set_delay(Duration::from_secs(2)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default().skip_duplicates(true));
    crawler.queue([TaskOptions::new(format!("{}/hang", server.uri()))
        .timeout(Duration::from_millis(100))
        .retries(2)
        .retry_timeout(Duration::from_millis(10))
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    let error = record.error.expect("expected a failure");
    assert!(error.contains("when fetching"), "unexpected error: {}", error);
    assert!(error.ends_with("/hang"), "unexpected error: {}", error);
    assert_eq!(record.retries, 0);

    crawler.drained().await;
    let stats = crawler.stats().snapshot();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 1);
    // A retry turns duplicate skipping off for good
    assert!(!crawler.skip_duplicates());
}

#[tokio::test]
async fn test_retry_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(page("late"), "text/html")
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_html(&server, "/flaky").await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    crawler.queue([TaskOptions::new(format!("{}/flaky", server.uri()))
        .timeout(Duration::from_millis(200))
        .retry_timeout(Duration::from_millis(10))
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(200));
    assert_eq!(record.title.as_deref(), Some("/flaky"));
    assert_eq!(record.retries, 2);
    assert_no_more(&mut rx, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_pre_request_queue_keeps_retries() {
    let server = MockServer::start().await;
    mount_html(&server, "/later").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::clone(&calls);

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    crawler.queue([TaskOptions::new(format!("{}/later", server.uri()))
        .pre_request_fn(move |_task| {
            if hook_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PreRequestError::queue("not yet"))
            } else {
                Ok(())
            }
        })
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(200));
    assert_eq!(record.retries, sumi_lanes::task::DEFAULT_RETRIES);
    assert_no_more(&mut rx, Duration::from_millis(200)).await;

    crawler.drained().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(crawler.stats().snapshot().requeued, 1);
    assert_eq!(crawler.queue_size(), 0);
}

#[tokio::test]
async fn test_pre_request_abort_and_fail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page("never"), "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(
        CrawlerOptions::default().defaults(TaskOptions::default().callback(callback)),
    );

    crawler.queue([
        TaskOptions::new(format!("{}/abort", server.uri()))
            .pre_request_fn(|_task| Err(PreRequestError::abort("skip"))),
        TaskOptions::new(format!("{}/fail", server.uri()))
            .pre_request_fn(|_task| Err(PreRequestError::fail("blocked"))),
    ]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert!(record.uri.ends_with("/fail"));
    assert_eq!(record.error.as_deref(), Some("Error in preRequest, blocked"));

    crawler.drained().await;
    assert_no_more(&mut rx, Duration::from_millis(100)).await;
    assert_eq!(crawler.stats().snapshot().aborted, 1);
}

#[tokio::test]
async fn test_pre_request_can_rewrite_the_task() {
    let server = MockServer::start().await;
    mount_html(&server, "/rewritten").await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    let target = format!("{}/rewritten", server.uri());
    crawler.queue([TaskOptions::new(format!("{}/original", server.uri()))
        .pre_request_fn(move |task| {
            task.target = sumi_lanes::Target::Uri(target.clone());
            Ok(())
        })
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(200));
    assert_eq!(record.title.as_deref(), Some("/rewritten"));
}

#[tokio::test]
async fn test_direct_bypasses_groups_and_events() {
    let server = MockServer::start().await;
    mount_html(&server, "/direct").await;

    let crawler = crawler_with(CrawlerOptions::default().max_connections(1));
    let mut events = crawler.subscribe();

    let (callback, mut rx) = recorder();
    crawler
        .direct(TaskOptions::new(format!("{}/direct", server.uri())).callback(callback))
        .expect("direct task rejected");
    assert_eq!(crawler.queue_size(), 0);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(200));
    assert_eq!(record.retries, 0);

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, CrawlEvent::Request(_) | CrawlEvent::Schedule(_)),
            "unexpected {} event",
            event.name()
        );
    }

    // The request event can be asked for explicitly
    let (callback, mut rx) = recorder();
    crawler
        .direct(
            TaskOptions::new(format!("{}/direct", server.uri()))
                .skip_event_request(false)
                .callback(callback),
        )
        .expect("direct task rejected");
    collect(&mut rx, 1).await;

    let mut saw_request = false;
    while let Ok(event) = events.try_recv() {
        if let CrawlEvent::Request(request) = event {
            assert_eq!(request.method, "GET");
            saw_request = true;
        }
    }
    assert!(saw_request);
}

#[tokio::test]
async fn test_direct_requires_callback() {
    let crawler = crawler_with(CrawlerOptions::default());
    let result = crawler.direct(TaskOptions::new("http://127.0.0.1:9/nothing"));
    assert!(matches!(
        result,
        Err(sumi_lanes::LanesError::MissingCallback { .. })
    ));
}

#[tokio::test]
async fn test_queue_emits_schedule_request_and_drain() {
    let server = MockServer::start().await;
    mount_html(&server, "/events").await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    let mut events = crawler.subscribe();

    crawler.queue([TaskOptions::new(format!("{}/events", server.uri()))
        .header("x-lane", "test")
        .callback(callback)]);
    collect(&mut rx, 1).await;
    crawler.drained().await;

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CrawlEvent::Request(request) = &event {
            assert_eq!(request.header("X-Lane"), Some("test"));
        }
        names.push(event.name());
    }
    assert_eq!(names, vec!["schedule", "request", "drain"]);
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(wiremock::matchers::body_json(serde_json::json!({ "lane": 1 })))
        .respond_with(ResponseTemplate::new(201).set_body_raw("{}", "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    crawler.queue([TaskOptions::new(format!("{}/api", server.uri()))
        .method("post")
        .json(serde_json::json!({ "lane": 1 }))
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(201));
    // JSON is not transformable
    assert!(!record.has_document);
    assert_eq!(record.text.as_deref(), Some("{}"));
}

#[tokio::test]
async fn test_head_request_skips_transform() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/head"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&server)
        .await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(CrawlerOptions::default());
    crawler.queue([TaskOptions::new(format!("{}/head", server.uri()))
        .method("HEAD")
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(200));
    assert!(!record.has_document);
}

#[tokio::test]
async fn test_transform_disabled_and_inline() {
    let server = MockServer::start().await;
    mount_html(&server, "/plain").await;

    let (callback, mut rx) = recorder();
    let crawler = crawler_with(
        CrawlerOptions::default().defaults(TaskOptions::default().callback(callback)),
    );

    crawler.queue([TaskOptions::new(format!("{}/plain", server.uri())).transform(false)]);
    let record = collect(&mut rx, 1).await.remove(0);
    assert!(!record.has_document);
    assert!(record.text.unwrap_or_default().contains("<title>/plain</title>"));

    crawler.queue([TaskOptions::inline(page("Inline"))]);
    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.status, Some(200));
    assert_eq!(record.title.as_deref(), Some("Inline"));

    crawler.queue([TaskOptions::new(format!("{}/plain", server.uri()))
        .transform(Transform::default())]);
    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.title.as_deref(), Some("/plain"));
}
