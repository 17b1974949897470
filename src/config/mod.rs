//! Configuration module for Sumi-Lanes
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_lanes::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("lanes.toml")).unwrap();
//! println!("Groups admit {} tasks at once", config.scheduler.max_connections);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DefaultsConfig, RequestConfig, SchedulerConfig, SeedEntry, TransformConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
