//! Inbound event handlers.

use async_trait::async_trait;
use takbridge_client::TakHandler;
use takbridge_cot::Event;
use takbridge_store::CotStore;
use tracing::{debug, error};

/// Persists every inbound event on the primary connection.
pub struct StoreHandler {
    store: CotStore,
}

impl StoreHandler {
    pub fn new(store: CotStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TakHandler for StoreHandler {
    async fn on_cot(&self, event: Event) {
        debug!(uid = %event.uid, cot_type = %event.event_type, "Received CoT");
        if let Err(e) = self.store.put(&event).await {
            error!(uid = %event.uid, error = %e, "Failed to store CoT");
        }
    }

    async fn on_ping(&self) {
        match self.store.get_all().await {
            Ok(events) => debug!(stored = events.len(), "Ping received"),
            Err(e) => error!(error = %e, "Failed to read store on ping"),
        }
    }
}

/// Persists chat addressed to a contact connection.
pub struct ContactChatHandler {
    store: CotStore,
}

impl ContactChatHandler {
    pub fn new(store: CotStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TakHandler for ContactChatHandler {
    async fn on_cot(&self, event: Event) {
        if !event.is_chat() {
            return;
        }
        debug!(uid = %event.uid, "Received chat for contact");
        if let Err(e) = self.store.put(&event).await {
            error!(uid = %event.uid, error = %e, "Failed to store contact chat");
        }
    }
}
