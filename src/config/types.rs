use crate::task::TransformOptions;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Sumi-Lanes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default, rename = "seed")]
    pub seeds: Vec<SeedEntry>,
}

/// Crawler-wide scheduling settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Maximum number of concurrent tasks per group
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Minimum time between two admissions in a group (milliseconds)
    #[serde(default)]
    pub rate_limit: u64,

    /// Number of priority buckets per group
    #[serde(default = "default_priority_range")]
    pub priority_range: usize,

    /// Drop requests whose fingerprint was already seen
    #[serde(default)]
    pub skip_duplicates: bool,

    /// Rotate through the user-agent list, one per request
    #[serde(default)]
    pub rotate_ua: bool,

    /// Periodically remove groups that have been idle for a while
    #[serde(default)]
    pub auto_cleanup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            rate_limit: 0,
            priority_range: default_priority_range(),
            skip_duplicates: false,
            rotate_ua: false,
            auto_cleanup: false,
        }
    }
}

fn default_max_connections() -> usize {
    10
}

fn default_priority_range() -> usize {
    10
}

/// Per-task defaults; anything unset falls back to the built-in value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DefaultsConfig {
    pub priority: Option<i64>,
    pub retries: Option<u32>,

    /// Wait before a failed task is queued again (milliseconds)
    pub retry_timeout: Option<u64>,

    pub force_utf8: Option<bool>,
    pub incoming_encoding: Option<String>,
    pub raw: Option<bool>,
    pub transform: Option<TransformConfig>,
    pub user_agent: Option<UserAgentConfig>,

    #[serde(default)]
    pub request: RequestConfig,
}

/// `transform = false` or `[defaults.transform]` with options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TransformConfig {
    Enabled(bool),
    Options(TransformOptions),
}

/// A single user agent or a list to rotate through
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UserAgentConfig {
    Single(String),
    List(Vec<String>),
}

/// Transport defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestConfig {
    pub method: Option<String>,

    /// Transport timeout (milliseconds)
    pub timeout: Option<u64>,

    pub follow_redirect: Option<bool>,
    pub decompress: Option<bool>,
    pub proxy: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A URI queued when the crawl starts
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub uri: String,
    pub group: Option<String>,
    pub priority: Option<i64>,
}

impl Config {
    /// Seeds as task specifications
    pub fn seed_tasks(&self) -> Vec<crate::task::TaskOptions> {
        self.seeds
            .iter()
            .map(|seed| {
                let mut options = crate::task::TaskOptions::new(seed.uri.clone());
                options.group = seed.group.clone();
                options.priority = seed.priority;
                options
            })
            .collect()
    }
}
