//! HTTP probing for the vigil health monitor.
//!
//! [`probe_json`] performs a single timeboxed JSON GET and returns either
//! a parsed body or a typed [`ProbeError`]. The [`NodeApi`] facade on top
//! collapses probe errors to sentinel values, because the detectors treat
//! absence as evidence rather than an exception.

mod client;
mod probe;

pub use client::{HttpNodeApi, NodeApi};
pub use probe::{probe_json, probe_url, ProbeError, CLUSTER_PROBE_TIMEOUT, HYPERGRAPH_PROBE_TIMEOUT};
