//! Output module for crawl reporting
//!
//! This module records crawl statistics and prints them at the end of a run.

pub mod stats;

pub use stats::{print_statistics, CrawlStatistics, StatisticsSnapshot};
