//! Typed facade over the node HTTP API.
//!
//! Probe errors collapse to sentinel values here — a diagnostic string
//! for cluster views, ordinal `-1`, a missing node info — so the
//! detectors downstream can interpret absence as evidence.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use vigil_types::{ClusterPeer, Layer, NodeInfoPayload};

use crate::probe::{probe_json, CLUSTER_PROBE_TIMEOUT};

/// Port through which detectors observe the cluster.
///
/// Implemented over HTTP by [`HttpNodeApi`]; tests substitute scripted
/// implementations.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Peers this node sees on a layer, or a diagnostic string when the
    /// probe failed. An `Ok` empty list means the node answered and sees
    /// nobody — the fork detector treats those two cases differently.
    async fn cluster_info(&self, host: &str, port: u16) -> Result<Vec<ClusterPeer>, String>;

    /// Latest snapshot ordinal for a layer, `-1` on failure.
    async fn ordinal(&self, host: &str, port: u16, layer: Layer) -> i64;

    /// Node info for a layer process, `None` on failure.
    async fn node_info(&self, host: &str, port: u16) -> Option<NodeInfoPayload>;
}

/// The production [`NodeApi`] over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpNodeApi {
    timeout: Duration,
}

impl HttpNodeApi {
    pub fn new() -> Self {
        Self {
            timeout: CLUSTER_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpNodeApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    async fn cluster_info(&self, host: &str, port: u16) -> Result<Vec<ClusterPeer>, String> {
        let address = format!("{host}:{port}");
        match probe_json(&address, "/cluster/info", self.timeout).await {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| format!("malformed /cluster/info body: {e}")),
            Err(e) => {
                debug!(%address, error = %e, "cluster info probe failed");
                Err(e.to_string())
            }
        }
    }

    async fn ordinal(&self, host: &str, port: u16, layer: Layer) -> i64 {
        let address = format!("{host}:{port}");
        match layer {
            // The metagraph L0 exposes a dedicated checkpoint endpoint.
            Layer::MetagraphL0 => {
                match probe_json(&address, "/data-application/v1/checkpoint", self.timeout).await {
                    Ok(value) => value["ordinal"].as_i64().unwrap_or(-1),
                    Err(e) => {
                        debug!(%address, error = %e, "checkpoint probe failed");
                        -1
                    }
                }
            }
            // Other layers report their ordinal through /node/info.
            _ => match probe_json(&address, "/node/info", self.timeout).await {
                Ok(value) => value["snapshotOrdinal"]
                    .as_i64()
                    .or_else(|| value["lastSnapshotOrdinal"].as_i64())
                    .unwrap_or(0),
                Err(e) => {
                    debug!(%address, error = %e, "node info probe failed");
                    -1
                }
            },
        }
    }

    async fn node_info(&self, host: &str, port: u16) -> Option<NodeInfoPayload> {
        let address = format!("{host}:{port}");
        match probe_json(&address, "/node/info", self.timeout).await {
            Ok(value) => serde_json::from_value(value).ok(),
            Err(e) => {
                debug!(%address, error = %e, "node info probe failed");
                None
            }
        }
    }
}
