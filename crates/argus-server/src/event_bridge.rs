use std::sync::Arc;

use tokio::sync::broadcast;

use argus_core::BroadcastMessage;

use crate::client::ClientRegistry;

/// Subscribes to the ingestion path's broadcast channel and forwards each
/// published message to every connected live-viewer.
///
/// Publishing is fire-and-forget for producers: the channel send never waits
/// on subscriber I/O, and the per-client enqueue downstream is non-blocking.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Start the bridge. Spawns a task that reads from the broadcast channel,
    /// serializes each message once, and fans it out through the registry.
    pub fn start(
        &self,
        mut rx: broadcast::Receiver<BroadcastMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if let Some(json) = serialize_message(&message) {
                            registry.broadcast_all(&json);
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

/// Create an event bridge wired to a broadcast channel.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    let bridge = EventBridge::new(registry);
    bridge.start(rx)
}

/// Serialize a message into its `{type, data}` wire envelope.
pub fn serialize_message(message: &BroadcastMessage) -> Option<String> {
    serde_json::to_string(message).ok()
}
