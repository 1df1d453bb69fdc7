//! Condition engine — runs the detectors in priority order per tick.
//!
//! Priority is fork → stall → unhealthy nodes: a fork can masquerade as
//! a stall, and a stall must be ruled out before per-node health is
//! interpreted. The engine stops at the first actionable condition, so
//! a tick produces at most one actionable event. Detection-only events
//! (an all-unreachable layer, hypergraph alerts) are held back and only
//! returned when nothing actionable was found.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use vigil_probe::NodeApi;
use vigil_types::{
    ClusterSnapshot, HealthCondition, HealthEvent, Layer, Node, NodeClusterView, OrdinalSnapshot,
    RestartScope,
};

use crate::fork::detect_fork;
use crate::hypergraph::HypergraphDetector;
use crate::stall::{StallTracker, CLUSTER_NODE_ID};
use crate::unhealthy::{detect_unhealthy, LayerProbe};

/// Cap on concurrently in-flight probes within one tick.
pub const PROBE_CONCURRENCY: usize = 16;

/// Per-tick detector pipeline.
///
/// Owns the node API port and the probe fan-out; the stall tracker is
/// owned by the monitor loop and passed in by reference each tick.
pub struct ConditionEngine {
    api: Arc<dyn NodeApi>,
    nodes: Arc<Vec<Node>>,
    snapshot_stall_secs: u64,
    limiter: Arc<Semaphore>,
    hypergraph: Option<HypergraphDetector>,
}

impl ConditionEngine {
    pub fn new(api: Arc<dyn NodeApi>, nodes: Vec<Node>, snapshot_stall_secs: u64) -> Self {
        Self {
            api,
            nodes: Arc::new(nodes),
            snapshot_stall_secs,
            limiter: Arc::new(Semaphore::new(PROBE_CONCURRENCY)),
            hypergraph: None,
        }
    }

    /// Enable the external hypergraph detector.
    pub fn with_hypergraph(mut self, detector: HypergraphDetector) -> Self {
        self.hypergraph = Some(detector);
        self
    }

    /// Run one detection pass. Returns at most one event; an actionable
    /// event short-circuits the remaining detectors.
    pub async fn tick(&mut self, tracker: &mut StallTracker, now: u64) -> Option<HealthEvent> {
        let mut fallback: Option<HealthEvent> = None;

        // 1. Forks, in layer priority order. The first forked layer wins
        //    and later layers are not probed this tick.
        for layer in Layer::FORK_PRIORITY {
            let snapshot = self.poll_layer(layer, now).await;
            if let Some(event) = detect_fork(&snapshot) {
                if event.is_actionable() {
                    return Some(event);
                }
                if fallback.is_none() {
                    fallback = Some(event);
                }
            }
        }

        // 2. Snapshot stall on the canonical cluster ordinal.
        if let Some(event) = self.check_snapshot_stall(tracker, now).await {
            return Some(event);
        }

        // 3. Per-process reachability sweep.
        if let Some(event) = self.check_unhealthy(now).await {
            return Some(event);
        }

        // 4. Hypergraph connectivity, never actionable.
        if self.hypergraph.is_some() {
            let gl0 = self.poll_layer(Layer::GlobalL0, now).await;
            let node_count = self.nodes.len();
            if let Some(detector) = self.hypergraph.as_mut() {
                if let Some(event) = detector.check(&gl0, node_count, now).await {
                    if fallback.is_none() {
                        fallback = Some(event);
                    }
                }
            }
        }

        if fallback.is_none() {
            debug!(now, "tick complete, no condition detected");
        }
        fallback
    }

    /// Gather every node's view of one layer concurrently.
    pub async fn poll_layer(&self, layer: Layer, now: u64) -> ClusterSnapshot {
        let mut handles = Vec::new();
        for node in self.nodes.iter() {
            let Some(port) = node.public_port(layer) else {
                continue;
            };
            let api = Arc::clone(&self.api);
            let limiter = Arc::clone(&self.limiter);
            let node_id = node.id.clone();
            let host = node.host.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_owned().await;
                let result = api.cluster_info(&host, port).await;
                (node_id, result)
            }));
        }

        let mut views = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((node_id, Ok(peers))) => {
                    views.push(NodeClusterView::healthy(node_id, layer, peers, now));
                }
                Ok((node_id, Err(error))) => {
                    views.push(NodeClusterView::unreachable(node_id, layer, error, now));
                }
                Err(e) => warn!(error = %e, "cluster probe task failed"),
            }
        }

        ClusterSnapshot {
            layer,
            timestamp: now,
            views,
        }
    }

    /// Track the cluster-wide canonical ordinal and flag a stall.
    ///
    /// The first non-negative ordinal in configured node order is
    /// canonical: any node seeing progress counts as chain liveness.
    async fn check_snapshot_stall(
        &self,
        tracker: &mut StallTracker,
        now: u64,
    ) -> Option<HealthEvent> {
        let mut canonical: Option<u64> = None;
        for node in self.nodes.iter() {
            let Some(port) = node.public_port(Layer::MetagraphL0) else {
                continue;
            };
            let ordinal = self.api.ordinal(&node.host, port, Layer::MetagraphL0).await;
            if ordinal >= 0 {
                canonical = Some(ordinal as u64);
                break;
            }
        }

        // No node produced an ordinal: that is a reachability problem,
        // not a stall.
        let ordinal = canonical?;

        tracker.update(&OrdinalSnapshot {
            node_id: CLUSTER_NODE_ID.to_string(),
            layer: Layer::MetagraphL0,
            ordinal,
            timestamp: now,
        });
        let stale = tracker.stale_secs(CLUSTER_NODE_ID, Layer::MetagraphL0, now)?;
        if stale < self.snapshot_stall_secs {
            return None;
        }

        Some(HealthEvent {
            condition: HealthCondition::SnapshotStall,
            layer: Some(Layer::MetagraphL0),
            node_ids: self.nodes.iter().map(|n| n.id.clone()).collect(),
            description: format!(
                "ml0 ordinal {ordinal} unchanged for {stale}s across the cluster; \
                 full restart of ml0, cl1, dl1 on all nodes"
            ),
            timestamp: now,
            suggested_action: RestartScope::FullMetagraph,
        })
    }

    /// Probe `/node/info` for every (node, layer) pair concurrently.
    async fn check_unhealthy(&self, now: u64) -> Option<HealthEvent> {
        let mut handles = Vec::new();
        for node in self.nodes.iter() {
            for layer in Layer::ALL {
                let Some(port) = node.public_port(layer) else {
                    continue;
                };
                let api = Arc::clone(&self.api);
                let limiter = Arc::clone(&self.limiter);
                let node_id = node.id.clone();
                let host = node.host.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = limiter.acquire_owned().await;
                    match api.node_info(&host, port).await {
                        None => LayerProbe::failed(node_id, layer, "unreachable"),
                        Some(info) if !info.is_operational() => {
                            LayerProbe::failed(node_id, layer, format!("state {}", info.state))
                        }
                        Some(_) => LayerProbe::healthy(node_id, layer),
                    }
                }));
            }
        }

        // Awaiting in spawn order keeps the report deterministic.
        let mut probes = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(probe) => probes.push(probe),
                Err(e) => warn!(error = %e, "node info probe task failed"),
            }
        }

        detect_unhealthy(&probes, now)
    }
}
