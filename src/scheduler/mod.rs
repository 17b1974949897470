//! Grouped admission control
//!
//! This module handles:
//! - Per-group concurrency ceilings and admission spacing (`GroupWorker`)
//! - Lazy creation, status and cleanup of named groups (`GroupRegistry`)

mod registry;
mod worker;

pub use registry::{GroupRegistry, CLEANUP_INTERVAL, DEFAULT_GROUP, IDLE_GROUP_TTL};
pub use worker::{Done, GroupWorker, Runnable, WorkerSettings};
