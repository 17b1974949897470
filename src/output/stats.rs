//! Crawl statistics
//!
//! This module keeps lock-free counters updated by the pipeline and renders
//! them as a short report.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one crawler
#[derive(Debug)]
pub struct CrawlStatistics {
    started_at: DateTime<Utc>,
    scheduled: AtomicU64,
    deduplicated: AtomicU64,
    requests: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    aborted: AtomicU64,
    requeued: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub started_at: DateTime<Utc>,

    /// Tasks accepted into a group (retries and requeues included)
    pub scheduled: u64,

    /// Tasks dropped as duplicates
    pub deduplicated: u64,

    /// Transport calls made
    pub requests: u64,

    /// Tasks that reached their callback with a response
    pub succeeded: u64,

    /// Tasks that reached their callback with an error
    pub failed: u64,

    /// Retries scheduled after a failure
    pub retried: u64,

    /// Tasks aborted by a pre-request hook
    pub aborted: u64,

    /// Tasks put back into their group by a pre-request hook
    pub requeued: u64,
}

impl Default for CrawlStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlStatistics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            scheduled: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
        }
    }

    pub fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            started_at: self.started_at,
            scheduled: self.scheduled.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }
}

impl StatisticsSnapshot {
    /// Share of completed tasks that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let completed = self.succeeded + self.failed;
        if completed == 0 {
            0.0
        } else {
            (self.succeeded as f64 / completed as f64) * 100.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StatisticsSnapshot) {
    println!("=== Crawl Statistics ===\n");

    let elapsed = Utc::now() - stats.started_at;
    println!("Overview:");
    println!("  Started: {}", stats.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Elapsed: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    println!("  Tasks scheduled: {}", stats.scheduled);
    println!("  Requests made: {}", stats.requests);
    println!();

    println!("Outcomes:");
    println!("  Succeeded: {}", stats.succeeded);
    println!("  Failed: {}", stats.failed);
    println!("  Deduplicated: {}", stats.deduplicated);
    println!("  Aborted: {}", stats.aborted);
    println!();

    if stats.retried > 0 || stats.requeued > 0 {
        println!("Resubmissions:");
        println!("  Retried: {}", stats.retried);
        println!("  Requeued: {}", stats.requeued);
        println!();
    }

    println!("Success rate: {:.1}%", stats.success_rate());
}
