//! Domain types for the vigil health monitor.
//!
//! These types represent the monitored cluster (nodes, layers, ports),
//! the per-tick observations (cluster views, ordinal snapshots), the
//! classified health events, and the restart history used for rate
//! limiting. All types are serializable to JSON for notifier payloads
//! and structured logs.

mod history;
mod types;

pub use history::*;
pub use types::*;
