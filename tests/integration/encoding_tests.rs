//! Charset handling over real HTTP

use crate::common::{collect, recorder};
use sumi_lanes::{Crawler, CrawlerOptions, TaskOptions};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// "Jörg" in ISO-8859-1
const LATIN1_PAGE: &[u8] = b"<html><head><title>J\xf6rg</title></head><body></body></html>";

/// "中文" in GBK
const GBK_PAGE: &[u8] = b"<html><head><title>\xd6\xd0\xce\xc4</title></head></html>";

async fn mount_bytes(server: &MockServer, route: &str, body: &[u8], mime: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), mime))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_force_utf8_transcodes_latin1() {
    let server = MockServer::start().await;
    mount_bytes(&server, "/latin1", LATIN1_PAGE, "text/html; charset=ISO-8859-1").await;

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(
        CrawlerOptions::default().defaults(TaskOptions::default().callback(callback)),
    )
    .expect("Failed to create crawler");

    crawler.queue([TaskOptions::new(format!("{}/latin1", server.uri())).force_utf8(true)]);
    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.charset.as_deref(), Some("ISO-8859-1"));
    assert_eq!(record.title.as_deref(), Some("Jörg"));

    // Without force_utf8 the bytes are read as UTF-8
    crawler.queue([TaskOptions::new(format!("{}/latin1", server.uri()))]);
    let record = collect(&mut rx, 1).await.remove(0);
    assert_ne!(record.title.as_deref(), Some("Jörg"));
    assert!(record.text.unwrap_or_default().contains('\u{fffd}'));
}

#[tokio::test]
async fn test_gb2312_is_read_as_gbk() {
    let server = MockServer::start().await;
    mount_bytes(&server, "/gb", GBK_PAGE, "text/html; charset=GB2312").await;

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(CrawlerOptions::default()).expect("Failed to create crawler");
    crawler.queue([TaskOptions::new(format!("{}/gb", server.uri()))
        .force_utf8(true)
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.charset.as_deref(), Some("gbk"));
    assert_eq!(record.title.as_deref(), Some("中文"));
}

#[tokio::test]
async fn test_charset_sniffed_from_body_and_override() {
    let server = MockServer::start().await;
    let sniffed = b"<html><head><meta charset=\"iso-8859-1\"><title>J\xf6rg</title></head></html>";
    mount_bytes(&server, "/meta", sniffed, "text/html").await;
    mount_bytes(&server, "/override", LATIN1_PAGE, "text/html; charset=utf-8").await;

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(
        CrawlerOptions::default()
            .defaults(TaskOptions::default().force_utf8(true).callback(callback)),
    )
    .expect("Failed to create crawler");

    crawler.queue([format!("{}/meta", server.uri())]);
    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.charset.as_deref(), Some("iso-8859-1"));
    assert_eq!(record.title.as_deref(), Some("Jörg"));

    crawler.queue([TaskOptions::new(format!("{}/override", server.uri()))
        .incoming_encoding("latin1")]);
    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.charset.as_deref(), Some("latin1"));
    assert_eq!(record.title.as_deref(), Some("Jörg"));
}

#[tokio::test]
async fn test_raw_body_is_untouched() {
    let server = MockServer::start().await;
    mount_bytes(&server, "/raw", LATIN1_PAGE, "text/html; charset=ISO-8859-1").await;

    let (callback, mut rx) = recorder();
    let crawler = Crawler::new(CrawlerOptions::default()).expect("Failed to create crawler");
    crawler.queue([TaskOptions::new(format!("{}/raw", server.uri()))
        .raw(true)
        .force_utf8(true)
        .callback(callback)]);

    let record = collect(&mut rx, 1).await.remove(0);
    assert_eq!(record.charset, None);
    assert_eq!(record.raw.as_deref(), Some(LATIN1_PAGE));
    assert!(record.text.is_none());
}
