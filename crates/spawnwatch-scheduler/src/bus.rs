//! In-process event bus.
//!
//! Publishing awaits every current subscriber in registration order. Nothing is
//! persisted or replayed. A subscriber error is logged and never reaches the
//! publisher.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spawnwatch_core::error::Result;

/// Events that drive the scheduler and reconciler out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// Run a full tick for one tenant now.
    TickRequested { tenant_id: String },
    /// Remove stale pings for these entities after a state change.
    ReconcileRequested {
        tenant_id: String,
        entities: Vec<String>,
    },
    /// Refresh the tenant's dashboard only.
    SideRefreshRequested { tenant_id: String },
}

impl BusEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BusEvent::TickRequested { .. } => "tick_requested",
            BusEvent::ReconcileRequested { .. } => "reconcile_requested",
            BusEvent::SideRefreshRequested { .. } => "side_refresh_requested",
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            BusEvent::TickRequested { tenant_id }
            | BusEvent::ReconcileRequested { tenant_id, .. }
            | BusEvent::SideRefreshRequested { tenant_id } => tenant_id,
        }
    }
}

/// A bus subscriber. Handlers must be idempotent.
#[async_trait]
pub trait BusSubscriber: Send + Sync {
    fn name(&self) -> &str;

    /// Handle one event. Events a subscriber does not care about are ignored.
    async fn on_event(&self, event: &BusEvent) -> Result<()>;
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn BusSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn BusSubscriber>) {
        match self.subscribers.write() {
            Ok(mut subs) => {
                tracing::debug!("🔌 Bus subscriber registered: {}", subscriber.name());
                subs.push(subscriber);
            }
            Err(_) => tracing::warn!("⚠️ Bus lock poisoned, dropping subscriber"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver to the subscribers registered right now. Returns how many
    /// handled the event without error.
    pub async fn publish(&self, event: BusEvent) -> usize {
        let snapshot: Vec<Arc<dyn BusSubscriber>> = match self.subscribers.read() {
            Ok(subs) => subs.clone(),
            Err(_) => return 0,
        };
        tracing::debug!(
            event_type = event.event_type(),
            tenant = event.tenant_id(),
            subscriber_count = snapshot.len(),
            "EventBus publish"
        );

        let mut handled = 0;
        for sub in snapshot {
            match sub.on_event(&event).await {
                Ok(()) => handled += 1,
                Err(e) => tracing::warn!(
                    "⚠️ Subscriber '{}' failed on {}: {e}",
                    sub.name(),
                    event.event_type()
                ),
            }
        }
        handled
    }
}
