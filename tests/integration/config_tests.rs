//! Crawling from a configuration file

use crate::common::{collect, page, recorder};
use std::io::Write;
use std::time::Duration;
use sumi_lanes::config::load_config_with_hash;
use sumi_lanes::{ConfigError, Crawler, CrawlerOptions};
use tempfile::NamedTempFile;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

#[tokio::test]
async fn test_crawl_seeds_from_config() {
    let server = MockServer::start().await;
    for route in ["/a", "/b"] {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("user-agent", "lanes-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page(route), "text/html"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let file = write_config(&format!(
        r#"
[scheduler]
max-connections = 1
skip-duplicates = true

[defaults]
retries = 0
user-agent = "lanes-test/1.0"

[defaults.request]
timeout = 2000

[[seed]]
uri = "{base}/a"
group = "seeds"
priority = 2

[[seed]]
uri = "{base}/b"
group = "seeds"
priority = 1

[[seed]]
uri = "{base}/a"
group = "seeds"
"#,
        base = server.uri()
    ));

    let (config, hash) = load_config_with_hash(file.path()).expect("Failed to load config");
    assert_eq!(hash.len(), 64);
    assert_eq!(config.seeds.len(), 3);

    let (callback, mut rx) = recorder();
    let mut options = CrawlerOptions::from(&config);
    options.defaults = std::mem::take(&mut options.defaults).callback(callback);
    assert_eq!(options.defaults.request.timeout(), Duration::from_millis(2000));

    let crawler = Crawler::new(options).expect("Failed to create crawler");
    crawler.queue(config.seed_tasks());

    let records = collect(&mut rx, 2).await;
    assert!(records.iter().all(|record| record.status == Some(200)));
    assert_eq!(crawler.registry().groups(), vec!["seeds".to_string()]);

    crawler.drained().await;
    assert_eq!(crawler.stats().snapshot().deduplicated, 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let file = write_config(
        r#"
[scheduler]
max-connections = 0
"#,
    );
    assert!(matches!(
        load_config_with_hash(file.path()),
        Err(ConfigError::Validation(_))
    ));

    let file = write_config(
        r#"
[[seed]]
uri = "ftp://example.com/"
"#,
    );
    assert!(load_config_with_hash(file.path()).is_err());
}
