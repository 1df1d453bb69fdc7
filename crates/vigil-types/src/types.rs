//! Cluster topology, observations, and health events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a node in the monitored cluster.
pub type NodeId = String;

// ── Topology ──────────────────────────────────────────────────────

/// One of the four layer processes running on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Global L0 (hypergraph consensus).
    GlobalL0,
    /// Metagraph L0 (metagraph consensus).
    MetagraphL0,
    /// Currency L1.
    CurrencyL1,
    /// Data L1.
    DataL1,
}

impl Layer {
    /// All layers, in startup order.
    pub const ALL: [Layer; 4] = Self::START_ORDER;

    /// Startup order used during a full-metagraph restart.
    pub const START_ORDER: [Layer; 4] = [
        Layer::MetagraphL0,
        Layer::GlobalL0,
        Layer::CurrencyL1,
        Layer::DataL1,
    ];

    /// Stop order — the reverse of the startup order.
    pub const STOP_ORDER: [Layer; 4] = [
        Layer::DataL1,
        Layer::CurrencyL1,
        Layer::GlobalL0,
        Layer::MetagraphL0,
    ];

    /// Layers checked for forks, highest priority first.
    pub const FORK_PRIORITY: [Layer; 3] =
        [Layer::MetagraphL0, Layer::CurrencyL1, Layer::DataL1];

    /// Short name used in logs and command templates.
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::GlobalL0 => "gl0",
            Layer::MetagraphL0 => "ml0",
            Layer::CurrencyL1 => "cl1",
            Layer::DataL1 => "dl1",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-layer endpoint ports on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSet {
    pub public: u16,
    pub p2p: u16,
    pub cli: u16,
}

/// A monitored node. Identity is `id`; `host` is the network address.
///
/// Built once at startup from configuration and immutable for the
/// process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub layers: HashMap<Layer, PortSet>,
}

impl Node {
    /// The public (HTTP API) port for a layer, if the node runs it.
    pub fn public_port(&self, layer: Layer) -> Option<u16> {
        self.layers.get(&layer).map(|p| p.public)
    }
}

// ── Observations ──────────────────────────────────────────────────

/// A peer entry as reported by `GET /cluster/info`.
///
/// Only `id` participates in the fork-detection view key; the rest is
/// carried for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPeer {
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default, rename = "publicPort")]
    pub public_port: Option<u16>,
    #[serde(default, rename = "p2pPort")]
    pub p2p_port: Option<u16>,
}

impl ClusterPeer {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
            ip: None,
            public_port: None,
            p2p_port: None,
        }
    }
}

/// The body of `GET /node/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoPayload {
    pub state: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub public_port: Option<u16>,
    #[serde(default)]
    pub p2p_port: Option<u16>,
    #[serde(default)]
    pub snapshot_ordinal: Option<i64>,
    #[serde(default)]
    pub last_snapshot_ordinal: Option<i64>,
}

impl NodeInfoPayload {
    /// States that count as healthy for the unhealthy-node detector.
    pub fn is_operational(&self) -> bool {
        matches!(self.state.as_str(), "Ready" | "Observing")
    }
}

/// One node's answer to "who are the peers of this layer?".
///
/// Invariant: `error.is_some()` ⟺ the view failed, and a failed view
/// carries no peers. Use the constructors to keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeClusterView {
    pub node_id: NodeId,
    pub layer: Layer,
    pub peers: Vec<ClusterPeer>,
    /// Unix timestamp (seconds) when this view was polled.
    pub polled_at: u64,
    pub error: Option<String>,
}

impl NodeClusterView {
    /// A successfully polled view. May be empty.
    pub fn healthy(
        node_id: impl Into<NodeId>,
        layer: Layer,
        peers: Vec<ClusterPeer>,
        polled_at: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            layer,
            peers,
            polled_at,
            error: None,
        }
    }

    /// A failed poll with its diagnostic.
    pub fn unreachable(
        node_id: impl Into<NodeId>,
        layer: Layer,
        error: impl Into<String>,
        polled_at: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            layer,
            peers: Vec::new(),
            polled_at,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// All nodes' views of one layer, gathered in a single tick.
///
/// `(node_id, layer)` is unique within a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub layer: Layer,
    /// Unix timestamp (seconds) when the snapshot was taken.
    pub timestamp: u64,
    pub views: Vec<NodeClusterView>,
}

/// A single observed snapshot ordinal for a (node, layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinalSnapshot {
    pub node_id: NodeId,
    pub layer: Layer,
    pub ordinal: u64,
    /// Unix timestamp (seconds) of the observation.
    pub timestamp: u64,
}

// ── Health events ─────────────────────────────────────────────────

/// Classified cluster condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCondition {
    Healthy,
    ForkDetected,
    SnapshotStall,
    NodeUnreachable,
    HypergraphHealth,
}

impl fmt::Display for HealthCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthCondition::Healthy => "healthy",
            HealthCondition::ForkDetected => "fork_detected",
            HealthCondition::SnapshotStall => "snapshot_stall",
            HealthCondition::NodeUnreachable => "node_unreachable",
            HealthCondition::HypergraphHealth => "hypergraph_health",
        };
        f.write_str(s)
    }
}

/// How much of the cluster a recovery procedure touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartScope {
    /// Detection-only event; the orchestrator takes no action.
    NoAction,
    /// Restart single nodes on one layer, rejoining a majority seed.
    IndividualNode,
    /// Restart one layer on all nodes, electing a genesis node.
    FullLayer,
    /// Restart every layer on every node in the fixed layer order.
    FullMetagraph,
}

impl fmt::Display for RestartScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartScope::NoAction => "no_action",
            RestartScope::IndividualNode => "individual_node",
            RestartScope::FullLayer => "full_layer",
            RestartScope::FullMetagraph => "full_metagraph",
        };
        f.write_str(s)
    }
}

/// A detected condition with its suggested recovery.
///
/// At most one actionable event is produced per monitor tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub condition: HealthCondition,
    /// The layer the condition was detected on, when layer-specific.
    pub layer: Option<Layer>,
    /// Nodes the suggested action targets (minority side for forks).
    pub node_ids: Vec<NodeId>,
    pub description: String,
    /// Unix timestamp (seconds) of detection.
    pub timestamp: u64,
    pub suggested_action: RestartScope,
}

impl HealthEvent {
    /// Whether the orchestrator should act on this event.
    pub fn is_actionable(&self) -> bool {
        self.suggested_action != RestartScope::NoAction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_stop_order_is_reverse_of_start_order() {
        let mut reversed = Layer::START_ORDER;
        reversed.reverse();
        assert_eq!(reversed, Layer::STOP_ORDER);
    }

    #[test]
    fn error_view_has_no_peers() {
        let view = NodeClusterView::unreachable("n1", Layer::MetagraphL0, "timeout", 100);
        assert!(view.is_error());
        assert!(view.peers.is_empty());
    }

    #[test]
    fn cluster_peer_decodes_wire_field_names() {
        let json = r#"{"id":"p1","state":"Ready","ip":"10.0.0.1","publicPort":9100,"p2pPort":9101}"#;
        let peer: ClusterPeer = serde_json::from_str(json).unwrap();
        assert_eq!(peer.id, "p1");
        assert_eq!(peer.public_port, Some(9100));
    }

    #[test]
    fn node_info_decodes_optional_ordinals() {
        let json = r#"{"state":"Ready","snapshotOrdinal":42}"#;
        let info: NodeInfoPayload = serde_json::from_str(json).unwrap();
        assert!(info.is_operational());
        assert_eq!(info.snapshot_ordinal, Some(42));
        assert_eq!(info.last_snapshot_ordinal, None);
    }

    #[test]
    fn operational_states() {
        let mut info: NodeInfoPayload = serde_json::from_str(r#"{"state":"Observing"}"#).unwrap();
        assert!(info.is_operational());
        info.state = "WaitingForDownload".to_string();
        assert!(!info.is_operational());
    }

    #[test]
    fn no_action_events_are_not_actionable() {
        let event = HealthEvent {
            condition: HealthCondition::HypergraphHealth,
            layer: None,
            node_ids: vec![],
            description: "hypergraph unreachable".to_string(),
            timestamp: 0,
            suggested_action: RestartScope::NoAction,
        };
        assert!(!event.is_actionable());
    }
}
