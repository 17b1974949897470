//! Sumi-Lanes main entry point
//!
//! This is the command-line interface for the Sumi-Lanes crawl scheduler.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use sumi_lanes::config::{load_config_with_hash, Config};
use sumi_lanes::output::print_statistics;
use sumi_lanes::{CrawlOutcome, Crawler, CrawlerOptions, Release, TaskOptions};
use tracing_subscriber::EnvFilter;

/// Sumi-Lanes: a grouped, rate-limited crawl scheduler
///
/// Sumi-Lanes fetches the seeds of a configuration (plus any URIs given on
/// the command line) through isolated per-group lanes, each with its own
/// concurrency ceiling and rate limit.
#[derive(Parser, Debug)]
#[command(name = "sumi-lanes")]
#[command(version = "1.0.0")]
#[command(about = "A grouped, rate-limited crawl scheduler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Extra URIs to fetch in addition to the configured seeds
    #[arg(value_name = "URI")]
    uris: Vec<String>,

    /// Group the extra URIs are queued in
    #[arg(short, long)]
    group: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be fetched without fetching
    #[arg(long)]
    dry_run: bool,

    /// Log the group status every N milliseconds while crawling
    #[arg(long, value_name = "MS")]
    status_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    let mut tasks = config.seed_tasks();
    for uri in &cli.uris {
        let mut task = TaskOptions::new(uri.clone());
        task.group = cli.group.clone();
        tasks.push(task);
    }

    if cli.dry_run {
        handle_dry_run(&config, &tasks);
        return Ok(());
    }

    handle_crawl(&config, tasks, cli.status_interval).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_lanes=info,warn"),
            1 => EnvFilter::new("sumi_lanes=debug,info"),
            2 => EnvFilter::new("sumi_lanes=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the resolved configuration and tasks
fn handle_dry_run(config: &Config, tasks: &[TaskOptions]) {
    let options = CrawlerOptions::from(config);

    println!("=== Sumi-Lanes Dry Run ===\n");

    println!("Scheduler:");
    println!("  Max connections per group: {}", options.max_connections);
    println!("  Rate limit: {}ms", options.rate_limit.as_millis());
    println!("  Priority range: {}", options.priority_range);
    println!("  Skip duplicates: {}", options.skip_duplicates);
    println!("  Rotate user agents: {}", options.rotate_ua);
    println!("  Auto cleanup: {}", options.auto_cleanup);

    let defaults = &options.defaults;
    println!("\nTask defaults:");
    println!("  Method: {}", defaults.request.method());
    println!("  Timeout: {}ms", defaults.request.timeout().as_millis());
    println!("  Priority: {}", defaults.priority.unwrap_or_default());
    println!("  Retries: {}", defaults.retries.unwrap_or_default());
    println!(
        "  Retry timeout: {}ms",
        defaults.retry_timeout.unwrap_or_default().as_millis()
    );
    println!("  Transform: {:?}", defaults.transform);

    println!("\nTasks ({}):", tasks.len());
    for task in tasks {
        let uri = task
            .target
            .as_ref()
            .and_then(|target| target.uri())
            .unwrap_or("<none>");
        println!(
            "  - {} [group: {}, priority: {}]",
            uri,
            task.group.as_deref().unwrap_or("default"),
            task.priority
                .or(defaults.priority)
                .map(|p| p.to_string())
                .unwrap_or_default()
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Logs the outcome of one task
fn log_outcome(outcome: CrawlOutcome, release: Release) {
    match outcome {
        Ok(response) => {
            let title = response
                .document
                .as_ref()
                .and_then(|document| document.title())
                .unwrap_or_default();
            tracing::info!(
                "{} {} ({} bytes) {}",
                response.status,
                response.task.describe(),
                response.body.len(),
                title
            );
        }
        Err(failure) => {
            tracing::warn!("{}", failure.error);
        }
    }
    release.release();
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: &Config,
    tasks: Vec<TaskOptions>,
    status_interval: Option<u64>,
) -> anyhow::Result<()> {
    if tasks.is_empty() {
        tracing::warn!("Nothing to fetch: no seeds configured and no URIs given");
        return Ok(());
    }

    let mut options = CrawlerOptions::from(config);
    options.defaults = std::mem::take(&mut options.defaults).callback(log_outcome);
    let crawler = Crawler::new(options).context("Failed to start crawler")?;

    tracing::info!("Queueing {} task(s)", tasks.len());
    crawler.queue(tasks);

    let reporter = status_interval.map(|ms| {
        let crawler = crawler.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(ms.max(1)));
            loop {
                ticker.tick().await;
                tracing::info!("Status: {}", crawler.status());
            }
        })
    });

    crawler.drained().await;
    if let Some(reporter) = reporter {
        reporter.abort();
    }
    crawler.stop_auto_cleanup();

    tracing::info!("Crawl completed");
    print_statistics(&crawler.stats().snapshot());
    Ok(())
}
