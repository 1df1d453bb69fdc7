//! Monitor loop — ticks the condition engine and routes events.
//!
//! The loop exclusively owns the stall tracker and the restart history;
//! detectors and the orchestrator borrow them per tick. A new tick only
//! begins after the previous orchestrator call returned, so restart
//! procedures are never interleaved.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_detect::{ConditionEngine, StallTracker};
use vigil_notify::Notifier;
use vigil_restart::{Orchestrator, Outcome};
use vigil_types::{HealthCondition, HealthEvent, Layer, RestartHistory, RestartScope};

pub struct MonitorLoop {
    engine: ConditionEngine,
    orchestrator: Orchestrator,
    notifier: Arc<dyn Notifier>,
    tracker: StallTracker,
    history: RestartHistory,
    interval: Duration,
    /// Condition last sent to the notifier, for repeat suppression.
    last_notified: Option<(HealthCondition, Option<Layer>)>,
}

impl MonitorLoop {
    pub fn new(
        engine: ConditionEngine,
        orchestrator: Orchestrator,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            notifier,
            tracker: StallTracker::new(),
            history: RestartHistory::new(),
            interval,
            last_notified: None,
        }
    }

    /// Single health check, returning a summary event.
    pub async fn run_once(&mut self) -> HealthEvent {
        let now = epoch_secs();
        match self.tick_at(now).await {
            Some(event) => event,
            None => HealthEvent {
                condition: HealthCondition::Healthy,
                layer: None,
                node_ids: Vec::new(),
                description: "all nodes reachable, ordinals advancing".to_string(),
                timestamp: now,
                suggested_action: RestartScope::NoAction,
            },
        }
    }

    /// Tick until the shutdown signal fires. An in-progress tick (and
    /// any restart procedure inside it) finishes before the loop exits.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "monitor loop started");
        loop {
            self.tick_at(epoch_secs()).await;
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("shutdown requested, monitor loop stopping");
                    break;
                }
            }
        }
    }

    /// One tick at an explicit timestamp; time is a parameter so
    /// scenario tests control it.
    pub async fn tick_at(&mut self, now: u64) -> Option<HealthEvent> {
        let Some(event) = self.engine.tick(&mut self.tracker, now).await else {
            debug!("cluster healthy");
            self.last_notified = None;
            return None;
        };

        warn!(
            condition = %event.condition,
            layer = ?event.layer,
            nodes = ?event.node_ids,
            action = %event.suggested_action,
            "health condition detected"
        );

        let outcome = self
            .orchestrator
            .execute(&event, &mut self.history, now)
            .await;

        // One notification per detected condition: a cooldown or
        // rate-limit skip of an already-reported condition stays quiet.
        let key = (event.condition, event.layer);
        let acted = matches!(outcome, Outcome::Restarted | Outcome::Failed(_));
        if acted || self.last_notified != Some(key) {
            self.notifier.notify(&event).await;
            self.last_notified = Some(key);
        } else {
            debug!(condition = %event.condition, "suppressing repeat notification");
        }

        match &outcome {
            Outcome::Restarted => info!(scope = %event.suggested_action, "recovery executed"),
            Outcome::Skipped(reason) => info!(?reason, "recovery skipped"),
            Outcome::Failed(err) => {
                let failure = HealthEvent {
                    condition: event.condition,
                    layer: event.layer,
                    node_ids: event.node_ids.clone(),
                    description: format!("recovery failed: {err}"),
                    timestamp: now,
                    suggested_action: RestartScope::NoAction,
                };
                self.notifier.notify(&failure).await;
            }
        }

        Some(event)
    }

    pub fn history(&self) -> &RestartHistory {
        &self.history
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
