//! Integration tests for Sumi-Lanes
//!
//! These tests use wiremock to create mock HTTP servers and drive whole
//! tasks through the crawler, from queueing to their callback.

mod common;
mod config_tests;
mod crawl_tests;
mod encoding_tests;
mod scheduling_tests;
