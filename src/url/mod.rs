//! Request fingerprinting
//!
//! This module computes the canonical fingerprint used to deduplicate tasks
//! and the query-string helpers shared with the transport.

mod normalize;

pub use normalize::{encode_pairs, normalize_request, with_search_params};
