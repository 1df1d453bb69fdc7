//! Fork detector — reduces per-node cluster views to a majority /
//! minority / unreachable partition.

use std::collections::BTreeMap;

use vigil_types::{
    ClusterSnapshot, HealthCondition, HealthEvent, NodeClusterView, NodeId, RestartScope,
};

/// Key prefix for error views; each error view forms its own group.
const ERROR_KEY_PREFIX: &str = "\u{27c2}ERROR:";

/// Key shared by all healthy-but-empty views.
const EMPTY_KEY: &str = "\u{27c2}EMPTY";

/// Canonical key of a view: the sorted set of peer IDs.
///
/// The key is order-insensitive — permuting the peer list leaves it
/// unchanged — and only peer identity participates, not addresses.
pub fn view_key(view: &NodeClusterView) -> String {
    if view.is_error() {
        return format!("{ERROR_KEY_PREFIX}{}", view.node_id);
    }
    if view.peers.is_empty() {
        return EMPTY_KEY.to_string();
    }
    let mut ids: Vec<&str> = view.peers.iter().map(|p| p.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.join(",")
}

/// Result of reducing one layer's views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkReport {
    /// Key of the winning (largest) healthy group, if any view was healthy.
    pub majority_key: Option<String>,
    /// Nodes in the winning group.
    pub majority: Vec<NodeId>,
    /// Healthy nodes outside the winning group.
    pub minority: Vec<NodeId>,
    /// Nodes whose view errored.
    pub unreachable: Vec<NodeId>,
}

impl ForkReport {
    /// A fork exists iff some healthy node disagrees with the majority.
    pub fn is_forked(&self) -> bool {
        !self.minority.is_empty()
    }
}

/// Group views by canonical key and pick the majority.
///
/// Ties between equally large healthy groups break by lexicographic key
/// order, so the reduction is deterministic.
pub fn analyze_views(snapshot: &ClusterSnapshot) -> ForkReport {
    let mut groups: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    let mut unreachable = Vec::new();

    for view in &snapshot.views {
        if view.is_error() {
            unreachable.push(view.node_id.clone());
        } else {
            groups
                .entry(view_key(view))
                .or_default()
                .push(view.node_id.clone());
        }
    }

    // Ascending key iteration + strict greater-than keeps the smallest
    // key among groups of equal size.
    let mut majority_key: Option<String> = None;
    let mut majority_len = 0;
    for (key, members) in &groups {
        if members.len() > majority_len {
            majority_key = Some(key.clone());
            majority_len = members.len();
        }
    }

    let mut majority = Vec::new();
    let mut minority = Vec::new();
    for (key, members) in groups {
        if Some(&key) == majority_key.as_ref() {
            majority = members;
        } else {
            minority.extend(members);
        }
    }
    minority.sort();

    ForkReport {
        majority_key,
        majority,
        minority,
        unreachable,
    }
}

/// Classify one layer's snapshot.
///
/// Returns a `ForkDetected` event when healthy views disagree, scoped to
/// an individual restart when the minority is strictly smaller than the
/// majority and to a full-layer restart otherwise. When every view
/// errored there is no majority to compare against, so the result is a
/// detection-only `NodeUnreachable` event for the whole set.
pub fn detect_fork(snapshot: &ClusterSnapshot) -> Option<HealthEvent> {
    let report = analyze_views(snapshot);

    if report.majority.is_empty() {
        if report.unreachable.is_empty() {
            return None;
        }
        return Some(HealthEvent {
            condition: HealthCondition::NodeUnreachable,
            layer: Some(snapshot.layer),
            node_ids: report.unreachable.clone(),
            description: format!(
                "no node answered the {} cluster probe ({} unreachable)",
                snapshot.layer,
                report.unreachable.len()
            ),
            timestamp: snapshot.timestamp,
            suggested_action: RestartScope::NoAction,
        });
    }

    if !report.is_forked() {
        return None;
    }

    let suggested_action = if report.minority.len() < report.majority.len() {
        RestartScope::IndividualNode
    } else {
        RestartScope::FullLayer
    };

    Some(HealthEvent {
        condition: HealthCondition::ForkDetected,
        layer: Some(snapshot.layer),
        node_ids: report.minority.clone(),
        description: format!(
            "{} fork: {} node(s) disagree with a majority of {} (unreachable: {})",
            snapshot.layer,
            report.minority.len(),
            report.majority.len(),
            report.unreachable.len()
        ),
        timestamp: snapshot.timestamp,
        suggested_action,
    })
}
