//! Detection engine for the vigil health monitor.
//!
//! The [`ConditionEngine`] runs the detectors in priority order each
//! tick — fork, then snapshot stall, then unreachable nodes — and stops
//! at the first detected condition, producing at most one actionable
//! [`vigil_types::HealthEvent`] per tick. The hypergraph detector runs
//! last and only ever produces detection-only events.

mod engine;
mod fork;
mod hypergraph;
mod stall;
mod unhealthy;

pub use engine::{ConditionEngine, PROBE_CONCURRENCY};
pub use fork::{analyze_views, detect_fork, view_key, ForkReport};
pub use hypergraph::{HypergraphConfig, HypergraphDetector};
pub use stall::{Observation, StallTracker, CLUSTER_NODE_ID};
pub use unhealthy::{detect_unhealthy, LayerProbe};
