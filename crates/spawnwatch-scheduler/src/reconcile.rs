//! Stale ping reconciler.
//!
//! A new trigger or a clear invalidates the window an already-sent ping
//! describes. Expiry cleanup would only remove it after the old window plus
//! grace, so on every state change the recent broadcast history is scanned and
//! pings that no longer match the current window are deleted right away.

use std::sync::Arc;

use async_trait::async_trait;
use spawnwatch_core::error::{Result, TransportError};
use spawnwatch_core::traits::Transport;

use crate::bus::{BusEvent, BusSubscriber};
use crate::notify::parse_ping;
use crate::persistence::StateStore;
use crate::window::compute_window;

pub struct Reconciler {
    store: Arc<StateStore>,
    transport: Arc<dyn Transport>,
    scan_limit: usize,
}

impl Reconciler {
    pub fn new(store: Arc<StateStore>, transport: Arc<dyn Transport>, scan_limit: usize) -> Self {
        Self {
            store,
            transport,
            scan_limit,
        }
    }

    /// Delete this tenant's pings for `entities` that do not describe the
    /// current window. Returns the number deleted.
    pub async fn reconcile(&self, tenant_id: &str, entities: &[String]) -> Result<usize> {
        let Some(channel) = self
            .store
            .get_tenant_config(tenant_id)?
            .and_then(|c| c.broadcast_channel)
        else {
            return Ok(0);
        };

        let recent = match self.transport.recent(&channel, self.scan_limit).await {
            Ok(msgs) => msgs,
            Err(e) => {
                tracing::warn!("⚠️ [{tenant_id}] reconcile scan of {channel} failed: {e}");
                return Ok(0);
            }
        };

        let mut deleted = 0;
        for name in entities {
            let window = match self.store.get_entity(name)? {
                Some(meta) => {
                    let state = self.store.get_state(tenant_id, &meta.name)?;
                    compute_window(&state, &meta)
                }
                None => None,
            };

            for msg in recent.iter().filter(|m| m.from_self) {
                let Some(ping) = parse_ping(&msg.content) else {
                    continue;
                };
                if !ping.entity.eq_ignore_ascii_case(name) {
                    continue;
                }
                if window.is_some_and(|w| ping.matches(&w)) {
                    continue;
                }
                match self.transport.delete(&msg.reference).await {
                    Ok(()) | Err(TransportError::NotFound) => {
                        self.store.mark_message_deleted(&msg.reference)?;
                        tracing::info!(
                            "🧽 [{tenant_id}] stale ping for {name} removed ({})",
                            msg.reference
                        );
                        deleted += 1;
                    }
                    Err(e) => tracing::warn!(
                        "⚠️ [{tenant_id}] could not remove stale ping {}: {e}",
                        msg.reference
                    ),
                }
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl BusSubscriber for Reconciler {
    fn name(&self) -> &str {
        "reconciler"
    }

    async fn on_event(&self, event: &BusEvent) -> Result<()> {
        if let BusEvent::ReconcileRequested {
            tenant_id,
            entities,
        } = event
        {
            self.reconcile(tenant_id, entities).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bounds, EntityMetadata, TenantConfigPatch, TriggerKind, Window};
    use crate::notify::render_ping;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use spawnwatch_channels::MemoryTransport;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    fn setup() -> (Arc<StateStore>, Arc<MemoryTransport>, Reconciler) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store
            .seed_entities(
                &[
                    EntityMetadata::new("Drake", Some(Bounds::new(10.0, 14.0)), None),
                    EntityMetadata::new("Golem", Some(Bounds::new(5.0, 5.0)), None),
                ],
                &[],
            )
            .unwrap();
        store
            .upsert_tenant_config(
                "g1",
                TenantConfigPatch {
                    broadcast_channel: Some("c1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let reconciler = Reconciler::new(store.clone(), transport.clone(), 50);
        (store, transport, reconciler)
    }

    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> Window {
        Window {
            start,
            end,
            triggered_at: at(0),
            kind: TriggerKind::Normal,
        }
    }

    #[tokio::test]
    async fn test_stale_deleted_current_kept() {
        let (store, transport, reconciler) = setup();
        // Ping for the old 10:00-14:00 window.
        transport.inject("c1", &render_ping("Drake", &window(at(10), at(14)), None));
        // New trigger moves the window to 11:00-15:00.
        store
            .record_trigger("g1", "Drake", at(1), TriggerKind::Normal)
            .unwrap();
        let current = transport.inject("c1", &render_ping("Drake", &window(at(11), at(15)), None));
        // Unrelated chatter and other entities are left alone.
        transport.inject("c1", "gg");
        transport.inject("c1", &render_ping("Golem", &window(at(5), at(5)), None));

        let deleted = reconciler.reconcile("g1", &["Drake".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);

        let left = transport.messages("c1");
        assert_eq!(left.len(), 3);
        assert!(transport.fetch(&current).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_window_deletes_all_matches() {
        let (store, transport, reconciler) = setup();
        store
            .record_trigger("g1", "Drake", at(0), TriggerKind::Normal)
            .unwrap();
        transport.inject("c1", &render_ping("Drake", &window(at(10), at(14)), Some("r")));
        store.clear_trigger("g1", "Drake").unwrap();

        let deleted = reconciler.reconcile("g1", &["Drake".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(transport.messages("c1").is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_marks_ledger() {
        let (store, transport, reconciler) = setup();
        let stale = transport.inject("c1", &render_ping("Drake", &window(at(10), at(14)), None));
        store.claim_delivery("g1", "Drake", "w-old", at(15)).unwrap();
        store
            .record_delivery_message("g1", "Drake", "w-old", &stale)
            .unwrap();

        reconciler.reconcile("g1", &["Drake".to_string()]).await.unwrap();
        let rec = store.get_delivery("g1", "Drake", "w-old").unwrap().unwrap();
        assert!(rec.deleted);
        assert!(store.deliveries_due("g1", at(16)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subsecond_drift_is_current() {
        let (store, transport, reconciler) = setup();
        let ts = at(0) + Duration::milliseconds(250);
        store
            .record_trigger("g1", "Golem", ts, TriggerKind::Normal)
            .unwrap();
        transport.inject("c1", &render_ping("Golem", &window(at(5), at(5)), None));
        let deleted = reconciler.reconcile("g1", &["Golem".to_string()]).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_failed_delete_left_for_cleanup() {
        let (store, transport, reconciler) = setup();
        let stale = transport.inject("c1", &render_ping("Drake", &window(at(10), at(14)), None));
        store.claim_delivery("g1", "Drake", "w-old", at(15)).unwrap();
        store
            .record_delivery_message("g1", "Drake", "w-old", &stale)
            .unwrap();
        transport.set_fail_deletes(true);

        let deleted = reconciler.reconcile("g1", &["Drake".to_string()]).await.unwrap();
        assert_eq!(deleted, 0);
        assert!(!store.get_delivery("g1", "Drake", "w-old").unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_unconfigured_tenant() {
        let (_, transport, reconciler) = setup();
        transport.inject("c1", &render_ping("Drake", &window(at(10), at(14)), None));
        assert_eq!(
            reconciler.reconcile("g9", &["Drake".to_string()]).await.unwrap(),
            0
        );
        assert_eq!(transport.messages("c1").len(), 1);
    }
}
