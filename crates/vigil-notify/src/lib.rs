//! Notifier port — fire-and-forget delivery of health events.
//!
//! The monitor never inspects a notification result beyond logging
//! failure; a broken webhook must not stall detection or recovery.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use vigil_types::HealthEvent;

/// Bound on a single webhook delivery.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Port through which health events leave the monitor.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an event. Never fails; errors are logged and dropped.
    async fn notify(&self, event: &HealthEvent);
}

/// Default notifier when no webhook is configured.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, event: &HealthEvent) {
        debug!(condition = %event.condition, "no notifier configured, event dropped");
    }
}

/// Posts events to a chat webhook as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    fn payload(event: &HealthEvent) -> serde_json::Value {
        let nodes = if event.node_ids.is_empty() {
            "-".to_string()
        } else {
            event.node_ids.join(", ")
        };
        let layer = event
            .layer
            .map(|l| l.to_string())
            .unwrap_or_else(|| "all".to_string());
        json!({
            "text": format!(
                "[{}] layer {} nodes {} — {} (suggested: {})",
                event.condition, layer, nodes, event.description, event.suggested_action
            ),
            "event": event,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &HealthEvent) {
        let payload = Self::payload(event);
        let result = self
            .client
            .post(&self.url)
            .timeout(NOTIFY_TIMEOUT)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(condition = %event.condition, "health event notified");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "notifier webhook rejected the event");
            }
            Err(e) => {
                warn!(error = %e, "notifier webhook delivery failed");
            }
        }
    }
}
