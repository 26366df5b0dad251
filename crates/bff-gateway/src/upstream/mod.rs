//! Calls to the user, order and product services.
//!
//! Every call is a single attempt bounded by its own timeout and yields an
//! [`UpstreamOutcome`]; deciding whether an outcome degrades or fails a
//! profile is left to the aggregator.

pub mod client;
pub mod types;

pub use client::UpstreamClient;
pub use types::{FailureReason, Upstream, UpstreamOutcome, Upstreams, classify};
