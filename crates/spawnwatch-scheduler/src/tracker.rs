//! Trigger applier: the mutating entry points the command layer calls.
//!
//! Every successful mutation publishes a reconcile request for the affected
//! entities followed by an immediate tick for the tenant. Storage failures
//! propagate before anything is published.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use spawnwatch_core::error::{Result, SpawnWatchError};

use crate::bus::{BusEvent, EventBus};
use crate::model::{EntityState, EntityStatus, TenantConfig, TenantConfigPatch, TriggerKind};
use crate::persistence::StateStore;
use crate::window::compute_window;

pub struct Tracker {
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
}

impl Tracker {
    pub fn new(store: Arc<StateStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Record a normal completion at `ts`, replacing any previous trigger.
    pub async fn record_normal_trigger(
        &self,
        tenant_id: &str,
        entity: &str,
        ts: DateTime<Utc>,
    ) -> Result<EntityState> {
        let meta = self.store.resolve_entity(entity)?;
        if !meta.is_trackable() {
            return Err(SpawnWatchError::Validation(format!(
                "'{}' has no respawn timer",
                meta.name
            )));
        }
        let state = self
            .store
            .record_trigger(tenant_id, &meta.name, ts, TriggerKind::Normal)?;
        tracing::info!("🗡️ [{tenant_id}] {} triggered at {ts}", meta.name);
        self.after_mutation(tenant_id, vec![meta.name]).await;
        Ok(state)
    }

    /// Clear an entity's trigger. False when it had none.
    pub async fn clear_state(&self, tenant_id: &str, entity: &str) -> Result<bool> {
        let meta = self.store.resolve_entity(entity)?;
        let cleared = self.store.clear_trigger(tenant_id, &meta.name)?;
        if cleared {
            tracing::info!("🧹 [{tenant_id}] {} cleared", meta.name);
            self.after_mutation(tenant_id, vec![meta.name]).await;
        }
        Ok(cleared)
    }

    /// Server reset at `ts`: every reset-eligible entity restarts at once.
    pub async fn apply_reset_trigger_bulk(
        &self,
        tenant_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let updated = self.store.apply_reset_bulk(tenant_id, ts)?;
        tracing::info!(
            "🔄 [{tenant_id}] server reset at {ts}: {} entities",
            updated.len()
        );
        if !updated.is_empty() {
            self.after_mutation(tenant_id, updated.clone()).await;
        }
        Ok(updated)
    }

    /// Current state and freshly computed window.
    pub fn status(&self, tenant_id: &str, entity: &str) -> Result<EntityStatus> {
        let metadata = self.store.resolve_entity(entity)?;
        let state = self.store.get_state(tenant_id, &metadata.name)?;
        let window = compute_window(&state, &metadata);
        Ok(EntityStatus {
            metadata,
            state,
            window,
        })
    }

    /// Update tenant settings and refresh the dashboard.
    pub async fn configure_tenant(
        &self,
        tenant_id: &str,
        patch: TenantConfigPatch,
    ) -> Result<TenantConfig> {
        let config = self.store.upsert_tenant_config(tenant_id, patch)?;
        self.bus
            .publish(BusEvent::SideRefreshRequested {
                tenant_id: tenant_id.to_string(),
            })
            .await;
        Ok(config)
    }

    async fn after_mutation(&self, tenant_id: &str, entities: Vec<String>) {
        self.bus
            .publish(BusEvent::ReconcileRequested {
                tenant_id: tenant_id.to_string(),
                entities,
            })
            .await;
        self.bus
            .publish(BusEvent::TickRequested {
                tenant_id: tenant_id.to_string(),
            })
            .await;
    }
}
