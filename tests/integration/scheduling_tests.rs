//! Priority, rate limiting and group isolation over real HTTP

use crate::common::{collect, page, recorder};
use std::time::Duration;
use sumi_lanes::{Crawler, CrawlerOptions, TaskOptions};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_page(server: &MockServer, route: &str, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(page(route), "text/html")
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_priority_order_with_single_connection() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/first", Duration::from_millis(200)).await;
    for route in ["/p1", "/p2", "/p3", "/p4", "/default"] {
        mount_page(&server, route, Duration::ZERO).await;
    }

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(
        CrawlerOptions::default()
            .max_connections(1)
            .defaults(TaskOptions::default().callback(callback)),
    )
    .expect("Failed to create crawler");

    // Occupies the only slot while the others queue up
    crawler.queue([format!("{}/first", base)]);
    crawler.queue([
        TaskOptions::new(format!("{}/p4", base)).priority(4),
        TaskOptions::new(format!("{}/p3", base)).priority(3),
        TaskOptions::new(format!("{}/p2", base)).priority(2),
        TaskOptions::new(format!("{}/p1", base)).priority(1),
        TaskOptions::new(format!("{}/default", base)),
    ]);

    let records = collect(&mut rx, 6).await;
    let order: Vec<String> = records
        .iter()
        .map(|record| record.uri.trim_start_matches(&base).to_string())
        .collect();

    assert_eq!(order, vec!["/first", "/p1", "/p2", "/p3", "/p4", "/default"]);
    crawler.drained().await;
    assert_eq!(crawler.queue_size(), 0);
}

#[tokio::test]
async fn test_rate_limit_spacing() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/limited", Duration::ZERO).await;

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(
        CrawlerOptions::default()
            .max_connections(5)
            .rate_limit(Duration::from_millis(300))
            .defaults(TaskOptions::default().callback(callback)),
    )
    .expect("Failed to create crawler");

    crawler.queue((0..3).map(|i| format!("{}/limited?i={}", base, i)));

    let records = collect(&mut rx, 3).await;
    for pair in records.windows(2) {
        let gap = pair[1].at.duration_since(pair[0].at);
        assert!(
            gap >= Duration::from_millis(250),
            "admissions only {:?} apart",
            gap
        );
    }

    // A rate limit serializes the group
    assert_eq!(crawler.registry().group(None).max_concurrent(), 1);
}

#[tokio::test]
async fn test_groups_are_isolated() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/slow", Duration::ZERO).await;
    mount_page(&server, "/fast", Duration::ZERO).await;

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(
        CrawlerOptions::default()
            .max_connections(2)
            .defaults(TaskOptions::default().callback(callback)),
    )
    .expect("Failed to create crawler");

    crawler
        .set_group_property(Some("slow"), "rateLimit", "1000")
        .expect("Failed to set rate limit");

    crawler.queue(
        (0..2).map(|i| TaskOptions::new(format!("{}/slow?i={}", base, i)).group("slow")),
    );
    crawler.queue(
        (0..3).map(|i| TaskOptions::new(format!("{}/fast?i={}", base, i)).group("fast")),
    );

    let records = collect(&mut rx, 5).await;
    let second_slow = records
        .iter()
        .filter(|record| record.uri.contains("/slow"))
        .nth(1)
        .expect("missing second slow task")
        .at;
    for fast in records.iter().filter(|record| record.uri.contains("/fast")) {
        assert!(fast.at < second_slow, "fast lane waited for the slow lane");
    }

    assert_eq!(
        crawler.registry().group(Some("slow")).rate_limit(),
        Duration::from_millis(1000)
    );
    assert_eq!(crawler.registry().group(Some("fast")).rate_limit(), Duration::ZERO);
}

#[tokio::test]
async fn test_status_and_shrink() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/busy", Duration::from_millis(300)).await;

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(
        CrawlerOptions::default()
            .max_connections(1)
            .defaults(TaskOptions::default().callback(callback)),
    )
    .expect("Failed to create crawler");

    crawler.queue(
        (0..2).map(|i| TaskOptions::new(format!("{}/busy?i={}", base, i)).group("g")),
    );

    assert_eq!(crawler.status(), "group: g,running: 1,pending: 1");
    assert_eq!(crawler.queue_size(), 2);
    assert!(!crawler.shrink(), "shrink must refuse while tasks are pending");

    collect(&mut rx, 2).await;
    crawler.drained().await;

    assert_eq!(crawler.status(), "group: g,running: 0,pending: 0");
    assert!(crawler.shrink());
    assert!(crawler.registry().groups().is_empty());
    assert_eq!(crawler.status(), "");
}
