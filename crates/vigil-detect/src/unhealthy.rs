//! Unhealthy node detector — classifies failed `/node/info` probes.

use std::collections::BTreeMap;

use vigil_types::{HealthCondition, HealthEvent, Layer, NodeId, RestartScope};

/// Result of probing one (node, layer) process. `failure` is `None`
/// when the process answered and is in an operational state.
#[derive(Debug, Clone)]
pub struct LayerProbe {
    pub node_id: NodeId,
    pub layer: Layer,
    pub failure: Option<String>,
}

impl LayerProbe {
    pub fn healthy(node_id: impl Into<NodeId>, layer: Layer) -> Self {
        Self {
            node_id: node_id.into(),
            layer,
            failure: None,
        }
    }

    pub fn failed(node_id: impl Into<NodeId>, layer: Layer, reason: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            layer,
            failure: Some(reason.into()),
        }
    }
}

/// Classify a full sweep of `/node/info` probes.
///
/// Scope escalates with blast radius: individual restarts while fewer
/// than half of all (node, layer) pairs fail, a full-layer restart of
/// the worst-hit layer once half or more fail, and a full-metagraph
/// restart when two or more layers have lost their majority.
pub fn detect_unhealthy(probes: &[LayerProbe], now: u64) -> Option<HealthEvent> {
    let failing: Vec<&LayerProbe> = probes.iter().filter(|p| p.failure.is_some()).collect();
    if failing.is_empty() {
        return None;
    }

    let mut layer_totals: BTreeMap<Layer, usize> = BTreeMap::new();
    let mut layer_failing: BTreeMap<Layer, usize> = BTreeMap::new();
    for probe in probes {
        *layer_totals.entry(probe.layer).or_default() += 1;
        if probe.failure.is_some() {
            *layer_failing.entry(probe.layer).or_default() += 1;
        }
    }

    let majority_down = layer_failing
        .iter()
        .filter(|(layer, failing)| **failing * 2 > layer_totals[*layer])
        .count();

    // Worst-hit layer: most failing pairs, ties broken by startup order.
    let mut worst_layer = None;
    let mut worst_count = 0;
    for layer in Layer::ALL {
        let count = layer_failing.get(&layer).copied().unwrap_or(0);
        if count > worst_count {
            worst_count = count;
            worst_layer = Some(layer);
        }
    }

    let mut description = format!(
        "{}/{} layer processes unhealthy: ",
        failing.len(),
        probes.len()
    );
    description.push_str(
        &failing
            .iter()
            .map(|p| {
                format!(
                    "{}/{} ({})",
                    p.node_id,
                    p.layer,
                    p.failure.as_deref().unwrap_or("unknown")
                )
            })
            .collect::<Vec<_>>()
            .join(", "),
    );

    let (suggested_action, layer, node_ids) = if majority_down >= 2 {
        let mut nodes: Vec<NodeId> = failing.iter().map(|p| p.node_id.clone()).collect();
        nodes.sort();
        nodes.dedup();
        (RestartScope::FullMetagraph, None, nodes)
    } else if failing.len() * 2 >= probes.len() {
        let layer = worst_layer?;
        let mut nodes: Vec<NodeId> = failing
            .iter()
            .filter(|p| p.layer == layer)
            .map(|p| p.node_id.clone())
            .collect();
        nodes.sort();
        nodes.dedup();
        (RestartScope::FullLayer, Some(layer), nodes)
    } else {
        // Individual restarts target the worst-hit layer this tick;
        // remaining pairs are picked up on subsequent ticks.
        let layer = worst_layer?;
        let mut nodes: Vec<NodeId> = failing
            .iter()
            .filter(|p| p.layer == layer)
            .map(|p| p.node_id.clone())
            .collect();
        nodes.sort();
        nodes.dedup();
        (RestartScope::IndividualNode, Some(layer), nodes)
    };

    Some(HealthEvent {
        condition: HealthCondition::NodeUnreachable,
        layer,
        node_ids,
        description,
        timestamp: now,
        suggested_action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probes for `nodes × Layer::ALL` with the given failing pairs.
    fn sweep(nodes: &[&str], failing: &[(&str, Layer)]) -> Vec<LayerProbe> {
        let mut probes = Vec::new();
        for &node in nodes {
            for layer in Layer::ALL {
                if failing.contains(&(node, layer)) {
                    probes.push(LayerProbe::failed(node, layer, "unreachable"));
                } else {
                    probes.push(LayerProbe::healthy(node, layer));
                }
            }
        }
        probes
    }

    #[test]
    fn all_healthy_is_silent() {
        assert!(detect_unhealthy(&sweep(&["n1", "n2", "n3"], &[]), 0).is_none());
    }

    #[test]
    fn single_failing_pair_suggests_individual_restart() {
        let probes = sweep(&["n1", "n2", "n3"], &[("n3", Layer::DataL1)]);
        let event = detect_unhealthy(&probes, 50).unwrap();
        assert_eq!(event.condition, HealthCondition::NodeUnreachable);
        assert_eq!(event.suggested_action, RestartScope::IndividualNode);
        assert_eq!(event.layer, Some(Layer::DataL1));
        assert_eq!(event.node_ids, vec!["n3".to_string()]);
        assert_eq!(event.timestamp, 50);
    }

    #[test]
    fn half_failing_suggests_full_layer_of_worst_layer() {
        // All of ml0 down plus one node on each other layer: 6 of 12
        // pairs fail, but only ml0 has lost its majority.
        let probes = sweep(
            &["n1", "n2", "n3"],
            &[
                ("n1", Layer::MetagraphL0),
                ("n2", Layer::MetagraphL0),
                ("n3", Layer::MetagraphL0),
                ("n1", Layer::GlobalL0),
                ("n1", Layer::CurrencyL1),
                ("n1", Layer::DataL1),
            ],
        );
        let event = detect_unhealthy(&probes, 0).unwrap();
        assert_eq!(event.suggested_action, RestartScope::FullLayer);
        assert_eq!(event.layer, Some(Layer::MetagraphL0));
        assert_eq!(event.node_ids.len(), 3);
    }

    #[test]
    fn two_layers_majority_down_suggests_full_metagraph() {
        let probes = sweep(
            &["n1", "n2", "n3"],
            &[
                ("n1", Layer::MetagraphL0),
                ("n2", Layer::MetagraphL0),
                ("n1", Layer::DataL1),
                ("n2", Layer::DataL1),
            ],
        );
        let event = detect_unhealthy(&probes, 0).unwrap();
        assert_eq!(event.suggested_action, RestartScope::FullMetagraph);
        assert_eq!(event.layer, None);
        assert_eq!(event.node_ids, vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn description_lists_all_failing_pairs() {
        let probes = sweep(
            &["n1", "n2", "n3"],
            &[("n2", Layer::GlobalL0), ("n3", Layer::DataL1)],
        );
        let event = detect_unhealthy(&probes, 0).unwrap();
        assert!(event.description.contains("n2/gl0"));
        assert!(event.description.contains("n3/dl1"));
    }
}
