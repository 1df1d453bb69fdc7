//! Stall tracker — last-seen ordinal and time-of-change per (node, layer).

use std::collections::HashMap;

use vigil_types::{Layer, NodeId, OrdinalSnapshot};

/// Synthetic node id under which the cluster-wide canonical ordinal is
/// tracked. Any real node advancing resets this entry's stall clock.
pub const CLUSTER_NODE_ID: &str = "\u{27c2}cluster";

/// What an [`StallTracker::update`] call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First observation, or the ordinal strictly advanced.
    Advanced,
    /// The ordinal did not advance; stalled since the given timestamp.
    Stalled { since: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracked {
    last_ordinal: u64,
    last_changed_at: u64,
}

/// Tracks ordinal progress over time.
///
/// Owned exclusively by the monitor loop; never decreases a tracked
/// ordinal. A first observation counts as not-stalled — the clock only
/// starts once we have something to compare against.
#[derive(Debug, Default)]
pub struct StallTracker {
    entries: HashMap<(NodeId, Layer), Tracked>,
}

impl StallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed ordinal; `snap.timestamp` is the observation
    /// time.
    pub fn update(&mut self, snap: &OrdinalSnapshot) -> Observation {
        match self
            .entries
            .get_mut(&(snap.node_id.clone(), snap.layer))
        {
            None => {
                self.entries.insert(
                    (snap.node_id.clone(), snap.layer),
                    Tracked {
                        last_ordinal: snap.ordinal,
                        last_changed_at: snap.timestamp,
                    },
                );
                Observation::Advanced
            }
            Some(entry) if snap.ordinal > entry.last_ordinal => {
                entry.last_ordinal = snap.ordinal;
                entry.last_changed_at = snap.timestamp;
                Observation::Advanced
            }
            Some(entry) => Observation::Stalled {
                since: entry.last_changed_at,
            },
        }
    }

    /// Seconds since the tracked ordinal last advanced, `None` if the
    /// key was never observed.
    pub fn stale_secs(&self, node_id: &str, layer: Layer, now: u64) -> Option<u64> {
        self.entries
            .get(&(node_id.to_string(), layer))
            .map(|e| now.saturating_sub(e.last_changed_at))
    }

    /// Last ordinal recorded for a key.
    pub fn last_ordinal(&self, node_id: &str, layer: Layer) -> Option<u64> {
        self.entries
            .get(&(node_id.to_string(), layer))
            .map(|e| e.last_ordinal)
    }

    /// A layer is cluster-stalled iff every tracked node on it is stale
    /// for at least `threshold_secs`, and at least one node is tracked.
    pub fn cluster_stalled(&self, layer: Layer, threshold_secs: u64, now: u64) -> bool {
        let mut tracked_any = false;
        for ((_, l), entry) in &self.entries {
            if *l != layer {
                continue;
            }
            tracked_any = true;
            if now.saturating_sub(entry.last_changed_at) < threshold_secs {
                return false;
            }
        }
        tracked_any
    }
}
