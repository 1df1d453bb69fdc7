//! Restart orchestrator — gated, ordered recovery procedures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use vigil_types::{
    HealthEvent, Layer, Node, RestartHistory, RestartOutcome, RestartRecord, RestartScope,
};

use crate::command::CommandPort;

/// Rolling window for the restart rate limit.
const RATE_WINDOW_SECS: u64 = 3_600;

/// Why the orchestrator declined to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The previous procedure finished too recently.
    Cooldown,
    /// Too many procedures in the rolling window.
    RateLimit,
    /// The event carries no suggested action.
    NotActionable,
}

/// Result of [`Orchestrator::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The procedure ran to completion.
    Restarted,
    /// Nothing was executed.
    Skipped(SkipReason),
    /// A step failed; the procedure was aborted.
    Failed(String),
}

/// Cooldown and rate-limit settings.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub cooldown_secs: u64,
    pub max_per_hour: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 600,
            max_per_hour: 6,
        }
    }
}

/// Waits between procedure steps. Zeroed in tests.
#[derive(Debug, Clone, Copy)]
pub struct StepWaits {
    /// After stopping an individual node.
    pub individual_stop: Duration,
    /// After an individual node rejoined.
    pub individual_join: Duration,
    /// After stopping a whole layer.
    pub layer_stop: Duration,
    /// After starting a genesis node.
    pub genesis_boot: Duration,
    /// After each non-genesis node joined.
    pub layer_join: Duration,
    /// Between layer stops during a full-metagraph restart.
    pub metagraph_stop: Duration,
    /// Between layer starts during a full-metagraph restart.
    pub metagraph_layer_gap: Duration,
}

impl Default for StepWaits {
    fn default() -> Self {
        Self {
            individual_stop: Duration::from_secs(5),
            individual_join: Duration::from_secs(15),
            layer_stop: Duration::from_secs(5),
            genesis_boot: Duration::from_secs(30),
            layer_join: Duration::from_secs(10),
            metagraph_stop: Duration::from_secs(3),
            metagraph_layer_gap: Duration::from_secs(20),
        }
    }
}

impl StepWaits {
    /// No waiting at all — test procedures run instantly.
    pub fn none() -> Self {
        Self {
            individual_stop: Duration::ZERO,
            individual_join: Duration::ZERO,
            layer_stop: Duration::ZERO,
            genesis_boot: Duration::ZERO,
            layer_join: Duration::ZERO,
            metagraph_stop: Duration::ZERO,
            metagraph_layer_gap: Duration::ZERO,
        }
    }
}

/// Executes recovery procedures through the command port.
///
/// `execute` runs serially by contract: the monitor loop awaits each
/// call before starting the next tick, so at most one restart of any
/// scope is in flight process-wide.
pub struct Orchestrator {
    command: Arc<dyn CommandPort>,
    /// Configured node order; the first member of a layer is its
    /// genesis candidate.
    nodes: Vec<Node>,
    policy: RestartPolicy,
    waits: StepWaits,
}

impl Orchestrator {
    pub fn new(command: Arc<dyn CommandPort>, nodes: Vec<Node>) -> Self {
        Self {
            command,
            nodes,
            policy: RestartPolicy::default(),
            waits: StepWaits::default(),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_waits(mut self, waits: StepWaits) -> Self {
        self.waits = waits;
        self
    }

    /// Act on a health event, recording the outcome in `history`.
    pub async fn execute(
        &self,
        event: &HealthEvent,
        history: &mut RestartHistory,
        now: u64,
    ) -> Outcome {
        if !event.is_actionable() {
            debug!(condition = %event.condition, "event is detection-only, no action");
            return Outcome::Skipped(SkipReason::NotActionable);
        }

        if let Some(last) = history.last_action_finished_at() {
            let since = now.saturating_sub(last);
            if since < self.policy.cooldown_secs {
                info!(
                    since_secs = since,
                    cooldown_secs = self.policy.cooldown_secs,
                    "restart suppressed by cooldown"
                );
                history.record(self.skip_record(event, now));
                return Outcome::Skipped(SkipReason::Cooldown);
            }
        }

        if history.actions_started_within(RATE_WINDOW_SECS, now)
            >= self.policy.max_per_hour as usize
        {
            info!(
                max_per_hour = self.policy.max_per_hour,
                "restart suppressed by rate limit"
            );
            history.record(self.skip_record(event, now));
            return Outcome::Skipped(SkipReason::RateLimit);
        }

        info!(
            scope = %event.suggested_action,
            layer = ?event.layer,
            nodes = ?event.node_ids,
            "starting recovery procedure"
        );

        let clock = Instant::now();
        let result = match event.suggested_action {
            RestartScope::NoAction => return Outcome::Skipped(SkipReason::NotActionable),
            RestartScope::IndividualNode => self.restart_individual(event).await,
            RestartScope::FullLayer => match event.layer {
                Some(layer) => self.restart_full_layer(layer).await,
                None => Err("full-layer event missing its layer".to_string()),
            },
            RestartScope::FullMetagraph => self.restart_full_metagraph().await,
        };
        let finished_at = now + clock.elapsed().as_secs();

        match result {
            Ok(()) => {
                info!(scope = %event.suggested_action, "recovery procedure completed");
                history.record(RestartRecord {
                    scope: event.suggested_action,
                    layer: event.layer,
                    node_ids: event.node_ids.clone(),
                    started_at: now,
                    finished_at,
                    outcome: RestartOutcome::Success,
                });
                Outcome::Restarted
            }
            Err(err) => {
                warn!(error = %err, "recovery procedure aborted");
                history.record(RestartRecord {
                    scope: event.suggested_action,
                    layer: event.layer,
                    node_ids: event.node_ids.clone(),
                    started_at: now,
                    finished_at,
                    outcome: RestartOutcome::Failed,
                });
                Outcome::Failed(err)
            }
        }
    }

    fn skip_record(&self, event: &HealthEvent, now: u64) -> RestartRecord {
        RestartRecord {
            scope: event.suggested_action,
            layer: event.layer,
            node_ids: event.node_ids.clone(),
            started_at: now,
            finished_at: now,
            outcome: RestartOutcome::Skipped,
        }
    }

    /// Restart each affected node alone, rejoining through a majority
    /// seed. With nobody left to seed from, the whole layer restarts.
    async fn restart_individual(&self, event: &HealthEvent) -> Result<(), String> {
        let layer = event
            .layer
            .ok_or_else(|| "individual restart event missing its layer".to_string())?;

        for target_id in &event.node_ids {
            let target = self
                .nodes
                .iter()
                .find(|n| n.id == *target_id)
                .ok_or_else(|| format!("unknown node {target_id}"))?;

            let seed = self
                .nodes
                .iter()
                .filter(|n| !event.node_ids.contains(&n.id) && n.layers.contains_key(&layer))
                .min_by(|a, b| a.id.cmp(&b.id));

            let Some(seed) = seed else {
                warn!(%target_id, %layer, "no seed available, downgrading to full-layer restart");
                return self.restart_full_layer(layer).await;
            };

            self.command
                .stop(&target.host, layer)
                .await
                .map_err(|e| format!("stop {layer} on {target_id}: {e}"))?;
            sleep(self.waits.individual_stop).await;

            self.command
                .start_and_join(&target.host, layer, &seed.host)
                .await
                .map_err(|e| format!("rejoin {layer} on {target_id}: {e}"))?;
            sleep(self.waits.individual_join).await;
        }
        Ok(())
    }

    /// Stop the layer everywhere, then bring it back up behind a
    /// genesis node.
    async fn restart_full_layer(&self, layer: Layer) -> Result<(), String> {
        self.stop_layer(layer).await?;
        sleep(self.waits.layer_stop).await;
        self.start_layer(layer).await
    }

    /// Stop then start every layer in the fixed metagraph order.
    async fn restart_full_metagraph(&self) -> Result<(), String> {
        for layer in Layer::STOP_ORDER {
            self.stop_layer(layer).await?;
            sleep(self.waits.metagraph_stop).await;
        }
        for (i, layer) in Layer::START_ORDER.iter().enumerate() {
            self.start_layer(*layer).await?;
            if i + 1 < Layer::START_ORDER.len() {
                sleep(self.waits.metagraph_layer_gap).await;
            }
        }
        Ok(())
    }

    /// Stop one layer on all its nodes in parallel.
    async fn stop_layer(&self, layer: Layer) -> Result<(), String> {
        let mut handles = Vec::new();
        for node in self.nodes.iter().filter(|n| n.layers.contains_key(&layer)) {
            let command = Arc::clone(&self.command);
            let host = node.host.clone();
            let id = node.id.clone();
            handles.push(tokio::spawn(async move {
                command
                    .stop(&host, layer)
                    .await
                    .map_err(|e| format!("stop {layer} on {id}: {e}"))
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| format!("stop task panicked: {e}"))??;
        }
        Ok(())
    }

    /// Start genesis first, then join the remaining nodes in order.
    async fn start_layer(&self, layer: Layer) -> Result<(), String> {
        let members: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| n.layers.contains_key(&layer))
            .collect();
        let Some((genesis, rest)) = members.split_first() else {
            return Ok(());
        };

        self.command
            .start_genesis(&genesis.host, layer)
            .await
            .map_err(|e| format!("start {layer} genesis on {}: {e}", genesis.id))?;
        sleep(self.waits.genesis_boot).await;

        for node in rest {
            self.command
                .start_and_join(&node.host, layer, &genesis.host)
                .await
                .map_err(|e| format!("join {layer} on {}: {e}", node.id))?;
            sleep(self.waits.layer_join).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use vigil_types::{HealthCondition, PortSet};

    /// Records every invocation; optionally fails on one command.
    #[derive(Default)]
    struct MockPort {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl MockPort {
        fn failing_on(call: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(call.to_string()),
            }
        }

        fn invoke(&self, call: String) -> Result<(), CommandError> {
            if self.fail_on.as_deref() == Some(call.as_str()) {
                return Err(CommandError::NonZero {
                    status: 1,
                    stderr: "boom".to_string(),
                });
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandPort for MockPort {
        async fn stop(&self, host: &str, layer: Layer) -> Result<(), CommandError> {
            self.invoke(format!("stop {layer} {host}"))
        }

        async fn start_genesis(&self, host: &str, layer: Layer) -> Result<(), CommandError> {
            self.invoke(format!("genesis {layer} {host}"))
        }

        async fn start_and_join(
            &self,
            host: &str,
            layer: Layer,
            seed_host: &str,
        ) -> Result<(), CommandError> {
            self.invoke(format!("join {layer} {host} via {seed_host}"))
        }
    }

    fn nodes(count: usize) -> Vec<Node> {
        (1..=count)
            .map(|i| Node {
                id: format!("n{i}"),
                host: format!("10.0.0.{i}"),
                layers: Layer::ALL
                    .iter()
                    .enumerate()
                    .map(|(j, layer)| {
                        (
                            *layer,
                            PortSet {
                                public: 9000 + (j as u16) * 100,
                                p2p: 9001 + (j as u16) * 100,
                                cli: 9002 + (j as u16) * 100,
                            },
                        )
                    })
                    .collect::<HashMap<_, _>>(),
            })
            .collect()
    }

    fn event(scope: RestartScope, layer: Option<Layer>, node_ids: &[&str]) -> HealthEvent {
        HealthEvent {
            condition: HealthCondition::ForkDetected,
            layer,
            node_ids: node_ids.iter().map(|s| s.to_string()).collect(),
            description: "test event".to_string(),
            timestamp: 0,
            suggested_action: scope,
        }
    }

    fn orchestrator(port: Arc<MockPort>, count: usize) -> Orchestrator {
        Orchestrator::new(port, nodes(count)).with_waits(StepWaits::none())
    }

    #[tokio::test]
    async fn individual_restart_rejoins_through_lowest_id_seed() {
        let port = Arc::new(MockPort::default());
        let orch = orchestrator(Arc::clone(&port), 3);
        let mut history = RestartHistory::new();

        let event = event(
            RestartScope::IndividualNode,
            Some(Layer::MetagraphL0),
            &["n3"],
        );
        let outcome = orch.execute(&event, &mut history, 1_000).await;
        assert_eq!(outcome, Outcome::Restarted);
        assert_eq!(
            port.calls(),
            vec![
                "stop ml0 10.0.0.3".to_string(),
                "join ml0 10.0.0.3 via 10.0.0.1".to_string(),
            ]
        );
        assert_eq!(history.last_action_finished_at(), Some(1_000));
    }

    #[tokio::test]
    async fn individual_restart_downgrades_without_a_seed() {
        let port = Arc::new(MockPort::default());
        let orch = orchestrator(Arc::clone(&port), 3);
        let mut history = RestartHistory::new();

        // Every node is affected: nobody can seed the rejoin.
        let event = event(
            RestartScope::IndividualNode,
            Some(Layer::CurrencyL1),
            &["n1", "n2", "n3"],
        );
        let outcome = orch.execute(&event, &mut history, 0).await;
        assert_eq!(outcome, Outcome::Restarted);

        let calls = port.calls();
        // Full-layer shape: three stops, one genesis, two joins.
        assert_eq!(calls.iter().filter(|c| c.starts_with("stop")).count(), 3);
        assert!(calls.contains(&"genesis cl1 10.0.0.1".to_string()));
        assert_eq!(calls.iter().filter(|c| c.starts_with("join")).count(), 2);
    }

    #[tokio::test]
    async fn full_layer_restart_orders_genesis_before_joins() {
        let port = Arc::new(MockPort::default());
        let orch = orchestrator(Arc::clone(&port), 3);
        let mut history = RestartHistory::new();

        let event = event(RestartScope::FullLayer, Some(Layer::CurrencyL1), &[]);
        let outcome = orch.execute(&event, &mut history, 0).await;
        assert_eq!(outcome, Outcome::Restarted);

        let calls = port.calls();
        assert_eq!(calls.len(), 6);
        // Stops run in parallel; all three precede the genesis start.
        let mut stops: Vec<String> = calls[..3].to_vec();
        stops.sort();
        assert_eq!(
            stops,
            vec![
                "stop cl1 10.0.0.1",
                "stop cl1 10.0.0.2",
                "stop cl1 10.0.0.3"
            ]
        );
        assert_eq!(calls[3], "genesis cl1 10.0.0.1");
        assert_eq!(calls[4], "join cl1 10.0.0.2 via 10.0.0.1");
        assert_eq!(calls[5], "join cl1 10.0.0.3 via 10.0.0.1");
    }

    #[tokio::test]
    async fn full_metagraph_stops_reverse_and_starts_forward() {
        let port = Arc::new(MockPort::default());
        let orch = orchestrator(Arc::clone(&port), 2);
        let mut history = RestartHistory::new();

        let event = event(RestartScope::FullMetagraph, None, &["n1", "n2"]);
        let outcome = orch.execute(&event, &mut history, 0).await;
        assert_eq!(outcome, Outcome::Restarted);

        let calls = port.calls();
        // 2 stops per layer x 4 layers, then (genesis + join) x 4 layers.
        assert_eq!(calls.len(), 16);

        let stop_layers: Vec<&str> = calls[..8]
            .iter()
            .map(|c| c.split_whitespace().nth(1).unwrap())
            .collect();
        assert_eq!(stop_layers, ["dl1", "dl1", "cl1", "cl1", "gl0", "gl0", "ml0", "ml0"]);

        let start_sequence: Vec<String> = calls[8..]
            .iter()
            .map(|c| {
                let mut parts = c.split_whitespace();
                format!("{} {}", parts.next().unwrap(), parts.next().unwrap())
            })
            .collect();
        assert_eq!(
            start_sequence,
            vec![
                "genesis ml0", "join ml0", "genesis gl0", "join gl0", "genesis cl1", "join cl1",
                "genesis dl1", "join dl1"
            ]
        );
    }

    #[tokio::test]
    async fn cooldown_skips_without_touching_the_command_port() {
        let port = Arc::new(MockPort::default());
        let orch = orchestrator(Arc::clone(&port), 3);
        let mut history = RestartHistory::new();

        let stall = event(RestartScope::FullMetagraph, None, &["n1", "n2", "n3"]);
        assert_eq!(orch.execute(&stall, &mut history, 0).await, Outcome::Restarted);
        let calls_after_first = port.calls().len();

        // Two minutes later, cooldown is 10 minutes.
        let outcome = orch.execute(&stall, &mut history, 120).await;
        assert_eq!(outcome, Outcome::Skipped(SkipReason::Cooldown));
        assert_eq!(port.calls().len(), calls_after_first);

        // The skip is recorded but does not shift the cooldown window.
        assert_eq!(history.last_action_finished_at(), Some(0));
    }

    #[tokio::test]
    async fn rate_limit_caps_the_rolling_hour() {
        let port = Arc::new(MockPort::default());
        let orch = orchestrator(Arc::clone(&port), 3).with_policy(RestartPolicy {
            cooldown_secs: 60,
            max_per_hour: 2,
        });
        let mut history = RestartHistory::new();

        let fork = event(
            RestartScope::IndividualNode,
            Some(Layer::MetagraphL0),
            &["n3"],
        );
        assert_eq!(orch.execute(&fork, &mut history, 0).await, Outcome::Restarted);
        assert_eq!(
            orch.execute(&fork, &mut history, 1_200).await,
            Outcome::Restarted
        );

        let outcome = orch.execute(&fork, &mut history, 2_400).await;
        assert_eq!(outcome, Outcome::Skipped(SkipReason::RateLimit));

        // Once the first attempt ages out of the window, action resumes.
        let outcome = orch.execute(&fork, &mut history, 3_700).await;
        assert_eq!(outcome, Outcome::Restarted);
    }

    #[tokio::test]
    async fn failed_step_aborts_and_applies_cooldown() {
        let port = Arc::new(MockPort::failing_on("genesis cl1 10.0.0.1"));
        let orch = orchestrator(Arc::clone(&port), 3);
        let mut history = RestartHistory::new();

        let event = event(RestartScope::FullLayer, Some(Layer::CurrencyL1), &[]);
        let outcome = orch.execute(&event, &mut history, 0).await;
        assert!(matches!(outcome, Outcome::Failed(_)));

        // The stops ran, but nothing started after the failure.
        let calls = port.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("stop")).count(), 3);
        assert!(!calls.iter().any(|c| c.starts_with("join")));

        // The failed attempt still triggers the cooldown.
        let retry = orch.execute(&event, &mut history, 60).await;
        assert_eq!(retry, Outcome::Skipped(SkipReason::Cooldown));
    }

    #[tokio::test]
    async fn detection_only_events_are_never_executed() {
        let port = Arc::new(MockPort::default());
        let orch = orchestrator(Arc::clone(&port), 3);
        let mut history = RestartHistory::new();

        let event = event(RestartScope::NoAction, None, &[]);
        let outcome = orch.execute(&event, &mut history, 0).await;
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotActionable));
        assert!(port.calls().is_empty());
        assert!(history.is_empty());
    }
}
