//! Dedup ledger: broadcast delivery records and per-subscriber alert records.
//!
//! Both tables are claim-first. A row is inserted with `ON CONFLICT DO NOTHING`
//! before anything is sent; only the caller whose insert changed a row goes on
//! to send. Interleaved ticks therefore send at most once per window identity.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use spawnwatch_core::error::Result;
use spawnwatch_core::types::MessageRef;

use crate::model::DeliveryRecord;
use crate::persistence::{StateStore, storage};
use crate::time::{from_sql, to_sql};

const DELIVERY_SELECT: &str = "SELECT tenant_id, entity_name, window_identity, delivered, channel_ref, message_ref, delete_after_ts, deleted FROM broadcast_delivery";

fn row_to_delivery(row: &rusqlite::Row) -> rusqlite::Result<DeliveryRecord> {
    let channel: Option<String> = row.get(4)?;
    let message: Option<String> = row.get(5)?;
    let delete_after: Option<String> = row.get(6)?;
    Ok(DeliveryRecord {
        tenant_id: row.get(0)?,
        entity: row.get(1)?,
        window_id: row.get(2)?,
        delivered: row.get(3)?,
        message: channel.zip(message).map(|(c, m)| MessageRef::new(c, m)),
        delete_after: delete_after.as_deref().and_then(from_sql),
        deleted: row.get(7)?,
    })
}

impl StateStore {
    // ─── Broadcast deliveries ─────────────────────────────────

    /// Claim the right to ping for one window. True only for the first caller.
    pub fn claim_delivery(
        &self,
        tenant_id: &str,
        entity: &str,
        window_id: &str,
        delete_after: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = self
            .conn()?
            .execute(
                "INSERT INTO broadcast_delivery
                   (tenant_id, entity_name, window_identity, delivered, delete_after_ts, deleted)
                 VALUES (?1, ?2, ?3, 0, ?4, 0)
                 ON CONFLICT(tenant_id, entity_name, window_identity) DO NOTHING",
                params![tenant_id, entity, window_id, to_sql(delete_after)],
            )
            .map_err(storage("Claim delivery"))?;
        Ok(inserted == 1)
    }

    /// Attach the sent message to a claimed delivery.
    pub fn record_delivery_message(
        &self,
        tenant_id: &str,
        entity: &str,
        window_id: &str,
        message: &MessageRef,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE broadcast_delivery
                    SET delivered = 1, channel_ref = ?4, message_ref = ?5
                  WHERE tenant_id = ?1 AND entity_name = ?2 AND window_identity = ?3",
                params![tenant_id, entity, window_id, message.channel_id, message.message_id],
            )
            .map_err(storage("Record delivery"))?;
        Ok(())
    }

    pub fn get_delivery(
        &self,
        tenant_id: &str,
        entity: &str,
        window_id: &str,
    ) -> Result<Option<DeliveryRecord>> {
        self.conn()?
            .query_row(
                &format!(
                    "{DELIVERY_SELECT} WHERE tenant_id = ?1 AND entity_name = ?2 AND window_identity = ?3"
                ),
                params![tenant_id, entity, window_id],
                row_to_delivery,
            )
            .optional()
            .map_err(storage("Get delivery"))
    }

    /// Undeleted records whose scheduled deletion has passed.
    pub fn deliveries_due(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<Vec<DeliveryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{DELIVERY_SELECT}
                  WHERE tenant_id = ?1 AND deleted = 0
                    AND delete_after_ts IS NOT NULL AND delete_after_ts <= ?2
                  ORDER BY delete_after_ts"
            ))
            .map_err(storage("Due deliveries"))?;
        let rows = stmt
            .query_map(params![tenant_id, to_sql(now)], row_to_delivery)
            .map_err(storage("Due deliveries"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("Due deliveries"))
    }

    pub fn mark_deleted(&self, tenant_id: &str, entity: &str, window_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE broadcast_delivery SET deleted = 1
                  WHERE tenant_id = ?1 AND entity_name = ?2 AND window_identity = ?3",
                params![tenant_id, entity, window_id],
            )
            .map_err(storage("Mark deleted"))?;
        Ok(())
    }

    /// Mark every record pointing at `message` deleted. Returns rows changed.
    pub fn mark_message_deleted(&self, message: &MessageRef) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE broadcast_delivery SET deleted = 1
                  WHERE channel_ref = ?1 AND message_ref = ?2 AND deleted = 0",
                params![message.channel_id, message.message_id],
            )
            .map_err(storage("Mark message deleted"))
    }

    // ─── Subscriber alerts ────────────────────────────────────

    /// Claim the right to DM one subscriber for one window.
    pub fn claim_user_alert(
        &self,
        subscriber_id: &str,
        tenant_id: &str,
        entity: &str,
        window_id: &str,
    ) -> Result<bool> {
        let inserted = self
            .conn()?
            .execute(
                "INSERT INTO user_alert
                   (subscriber_id, tenant_id, entity_name, window_identity, delivered)
                 VALUES (?1, ?2, ?3, ?4, 0)
                 ON CONFLICT DO NOTHING",
                params![subscriber_id, tenant_id, entity, window_id],
            )
            .map_err(storage("Claim user alert"))?;
        Ok(inserted == 1)
    }

    pub fn set_user_alert_delivered(
        &self,
        subscriber_id: &str,
        tenant_id: &str,
        entity: &str,
        window_id: &str,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE user_alert SET delivered = 1
                  WHERE subscriber_id = ?1 AND tenant_id = ?2
                    AND entity_name = ?3 AND window_identity = ?4",
                params![subscriber_id, tenant_id, entity, window_id],
            )
            .map_err(storage("User alert delivered"))?;
        Ok(())
    }

    /// `Some(delivered)` if an alert was attempted for this window.
    pub fn user_alert(
        &self,
        subscriber_id: &str,
        tenant_id: &str,
        entity: &str,
        window_id: &str,
    ) -> Result<Option<bool>> {
        self.conn()?
            .query_row(
                "SELECT delivered FROM user_alert
                  WHERE subscriber_id = ?1 AND tenant_id = ?2
                    AND entity_name = ?3 AND window_identity = ?4",
                params![subscriber_id, tenant_id, entity, window_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage("Get user alert"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_claim_is_unique_per_window() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.claim_delivery("g1", "Drake", "w1", t(15)).unwrap());
        assert!(!store.claim_delivery("g1", "Drake", "w1", t(15)).unwrap());
        // Different window or tenant is a new claim.
        assert!(store.claim_delivery("g1", "Drake", "w2", t(15)).unwrap());
        assert!(store.claim_delivery("g2", "Drake", "w1", t(15)).unwrap());
    }

    #[test]
    fn test_delivery_lifecycle() {
        let store = StateStore::open_in_memory().unwrap();
        store.claim_delivery("g1", "Drake", "w1", t(15)).unwrap();
        let rec = store.get_delivery("g1", "Drake", "w1").unwrap().unwrap();
        assert!(!rec.delivered);
        assert!(rec.message.is_none());

        let msg = MessageRef::new("c1", "m1");
        store.record_delivery_message("g1", "Drake", "w1", &msg).unwrap();
        let rec = store.get_delivery("g1", "Drake", "w1").unwrap().unwrap();
        assert!(rec.delivered);
        assert_eq!(rec.message, Some(msg.clone()));
        assert_eq!(rec.delete_after, Some(t(15)));

        assert!(store.deliveries_due("g1", t(14)).unwrap().is_empty());
        assert_eq!(store.deliveries_due("g1", t(15)).unwrap().len(), 1);

        assert_eq!(store.mark_message_deleted(&msg).unwrap(), 1);
        assert!(store.deliveries_due("g1", t(16)).unwrap().is_empty());
        assert_eq!(store.mark_message_deleted(&msg).unwrap(), 0);
    }

    #[test]
    fn test_mark_deleted_by_key() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .claim_delivery("g1", "Drake", "w1", t(1) - Duration::minutes(1))
            .unwrap();
        store.mark_deleted("g1", "Drake", "w1").unwrap();
        assert!(store.get_delivery("g1", "Drake", "w1").unwrap().unwrap().deleted);
        assert!(store.deliveries_due("g1", t(2)).unwrap().is_empty());
    }

    #[test]
    fn test_user_alert_claim() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.user_alert("u1", "g1", "Drake", "w1").unwrap(), None);
        assert!(store.claim_user_alert("u1", "g1", "Drake", "w1").unwrap());
        assert!(!store.claim_user_alert("u1", "g1", "Drake", "w1").unwrap());
        assert_eq!(store.user_alert("u1", "g1", "Drake", "w1").unwrap(), Some(false));

        store.set_user_alert_delivered("u1", "g1", "Drake", "w1").unwrap();
        assert_eq!(store.user_alert("u1", "g1", "Drake", "w1").unwrap(), Some(true));
        assert!(store.claim_user_alert("u2", "g1", "Drake", "w1").unwrap());
    }
}
