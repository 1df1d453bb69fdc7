//! External hypergraph connectivity checks.
//!
//! Detection-only: events from this detector always carry
//! `RestartScope::NoAction`. The monitor never actuates against the
//! external hypergraph.

use std::time::Duration;

use tracing::debug;

use vigil_probe::{probe_url, HYPERGRAPH_PROBE_TIMEOUT};
use vigil_types::{ClusterSnapshot, HealthCondition, HealthEvent, Layer, RestartScope};

/// Configuration for the optional external-hypergraph block.
#[derive(Debug, Clone)]
pub struct HypergraphConfig {
    pub enabled: bool,
    /// External global-L0 base URLs, probed at `/cluster/info`.
    pub l0_urls: Vec<String>,
    /// Check every N monitor ticks.
    pub check_interval_multiplier: u32,
}

impl Default for HypergraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            l0_urls: Vec::new(),
            check_interval_multiplier: 5,
        }
    }
}

/// Probes external global-L0 endpoints and applies a local connectivity
/// heuristic against the cluster's own gl0 views.
#[derive(Debug)]
pub struct HypergraphDetector {
    config: HypergraphConfig,
    probe_timeout: Duration,
    ticks: u64,
}

impl HypergraphDetector {
    pub fn new(config: HypergraphConfig) -> Self {
        Self {
            config,
            probe_timeout: HYPERGRAPH_PROBE_TIMEOUT,
            ticks: 0,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Run the check if this tick is due.
    ///
    /// `local_gl0` is the cluster's own global-L0 snapshot from this
    /// tick; `node_count` the number of locally configured nodes.
    pub async fn check(
        &mut self,
        local_gl0: &ClusterSnapshot,
        node_count: usize,
        now: u64,
    ) -> Option<HealthEvent> {
        if !self.config.enabled {
            return None;
        }

        let every = u64::from(self.config.check_interval_multiplier.max(1));
        let due = self.ticks % every == 0;
        self.ticks += 1;
        if !due {
            return None;
        }

        // External endpoints: all unreachable means we cannot see the
        // hypergraph at all.
        if !self.config.l0_urls.is_empty() {
            let mut reachable = 0usize;
            for url in &self.config.l0_urls {
                let url = format!("{}/cluster/info", url.trim_end_matches('/'));
                match probe_url(&url, self.probe_timeout).await {
                    Ok(_) => reachable += 1,
                    Err(e) => debug!(%url, error = %e, "hypergraph probe failed"),
                }
            }
            if reachable == 0 {
                return Some(HealthEvent {
                    condition: HealthCondition::HypergraphHealth,
                    layer: Some(Layer::GlobalL0),
                    node_ids: Vec::new(),
                    description: format!(
                        "all {} external hypergraph endpoints unreachable",
                        self.config.l0_urls.len()
                    ),
                    timestamp: now,
                    suggested_action: RestartScope::NoAction,
                });
            }
        }

        // Local heuristic: a gl0 view no larger than the local node
        // count suggests the cluster is cut off from the hypergraph.
        // Weak for clusters of more than three nodes, kept as-is.
        let largest_view = local_gl0
            .views
            .iter()
            .filter(|v| !v.is_error())
            .map(|v| v.peers.len())
            .max()
            .unwrap_or(0);

        if largest_view > 0 && largest_view <= node_count {
            return Some(HealthEvent {
                condition: HealthCondition::HypergraphHealth,
                layer: Some(Layer::GlobalL0),
                node_ids: local_gl0.views.iter().map(|v| v.node_id.clone()).collect(),
                description: format!(
                    "gl0 cluster view holds {largest_view} peers for {node_count} local nodes; \
                     possibly disconnected from the hypergraph"
                ),
                timestamp: now,
                suggested_action: RestartScope::NoAction,
            });
        }

        None
    }
}
