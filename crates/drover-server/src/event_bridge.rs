use std::sync::Arc;

use drover_core::events::FleetEvent;
use tokio::sync::broadcast;

use crate::client::ClientRegistry;

/// Subscribes to the fleet's event broadcast and forwards every event to all
/// connected control clients.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn start(&self, mut rx: broadcast::Receiver<FleetEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(json) = serialize_event(&event) {
                            registry.broadcast(&json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<FleetEvent>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}

/// Wire form of an event: `{"type": "...", ...fields}`.
pub fn serialize_event(event: &FleetEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(event = event.event_type(), error = %e, "failed to serialize event");
            None
        }
    }
}
