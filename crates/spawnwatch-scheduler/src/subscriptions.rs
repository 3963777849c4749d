//! Subscriber opt-ins and lead-time preferences.

use rusqlite::{OptionalExtension, params};
use spawnwatch_core::error::{Result, SpawnWatchError};

use crate::model::Subscriber;
use crate::persistence::{StateStore, storage};
use crate::time::validate_lead_minutes;

impl StateStore {
    /// Subscribe to one entity. False if already subscribed.
    pub fn subscribe(&self, subscriber_id: &str, tenant_id: &str, entity: &str) -> Result<bool> {
        let meta = self
            .get_entity(entity)?
            .ok_or_else(|| SpawnWatchError::NotFound(format!("unknown entity '{entity}'")))?;
        let added = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO subscription (subscriber_id, tenant_id, entity_name)
                 VALUES (?1, ?2, ?3)",
                params![subscriber_id, tenant_id, meta.name],
            )
            .map_err(storage("Subscribe"))?;
        self.ensure_preference(subscriber_id, tenant_id)?;
        Ok(added > 0)
    }

    /// Subscribe to every entity with normal bounds. Returns newly added names.
    pub fn subscribe_all(&self, subscriber_id: &str, tenant_id: &str) -> Result<Vec<String>> {
        let mut added = Vec::new();
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction().map_err(storage("Subscribe all"))?;
            let names: Vec<String> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT name FROM entity_metadata
                          WHERE normal_min IS NOT NULL AND normal_max IS NOT NULL
                          ORDER BY name",
                    )
                    .map_err(storage("Subscribe all"))?;
                let rows = stmt
                    .query_map([], |row| row.get(0))
                    .map_err(storage("Subscribe all"))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(storage("Subscribe all"))?
            };
            for name in names {
                let n = tx
                    .execute(
                        "INSERT OR IGNORE INTO subscription (subscriber_id, tenant_id, entity_name)
                         VALUES (?1, ?2, ?3)",
                        params![subscriber_id, tenant_id, name],
                    )
                    .map_err(storage("Subscribe all"))?;
                if n > 0 {
                    added.push(name);
                }
            }
            tx.commit().map_err(storage("Subscribe all"))?;
        }
        self.ensure_preference(subscriber_id, tenant_id)?;
        Ok(added)
    }

    pub fn unsubscribe(&self, subscriber_id: &str, tenant_id: &str, entity: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM subscription
                  WHERE subscriber_id = ?1 AND tenant_id = ?2 AND entity_name = ?3 COLLATE NOCASE",
                params![subscriber_id, tenant_id, entity],
            )
            .map_err(storage("Unsubscribe"))?;
        Ok(removed > 0)
    }

    pub fn unsubscribe_all(&self, subscriber_id: &str, tenant_id: &str) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM subscription WHERE subscriber_id = ?1 AND tenant_id = ?2",
                params![subscriber_id, tenant_id],
            )
            .map_err(storage("Unsubscribe all"))
    }

    pub fn subscriptions(&self, subscriber_id: &str, tenant_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity_name FROM subscription
                  WHERE subscriber_id = ?1 AND tenant_id = ?2 ORDER BY entity_name",
            )
            .map_err(storage("Subscriptions"))?;
        let rows = stmt
            .query_map(params![subscriber_id, tenant_id], |row| row.get(0))
            .map_err(storage("Subscriptions"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("Subscriptions"))
    }

    pub fn set_alert_minutes(&self, subscriber_id: &str, tenant_id: &str, minutes: i64) -> Result<()> {
        validate_lead_minutes(minutes)?;
        self.conn()?
            .execute(
                "INSERT INTO alert_preference (subscriber_id, tenant_id, lead_minutes)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(subscriber_id, tenant_id) DO UPDATE SET lead_minutes = excluded.lead_minutes",
                params![subscriber_id, tenant_id, minutes],
            )
            .map_err(storage("Set alert minutes"))?;
        Ok(())
    }

    pub fn alert_minutes(&self, subscriber_id: &str, tenant_id: &str) -> Result<Option<i64>> {
        let minutes: Option<Option<i64>> = self
            .conn()?
            .query_row(
                "SELECT lead_minutes FROM alert_preference WHERE subscriber_id = ?1 AND tenant_id = ?2",
                params![subscriber_id, tenant_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage("Get alert minutes"))?;
        Ok(minutes.flatten())
    }

    /// Subscribers of a tenant with a lead time and at least one subscription.
    pub fn alert_subscribers(&self, tenant_id: &str) -> Result<Vec<Subscriber>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT p.subscriber_id, p.lead_minutes FROM alert_preference p
                  WHERE p.tenant_id = ?1 AND p.lead_minutes IS NOT NULL
                    AND EXISTS (SELECT 1 FROM subscription s
                                 WHERE s.subscriber_id = p.subscriber_id AND s.tenant_id = p.tenant_id)
                  ORDER BY p.subscriber_id",
            )
            .map_err(storage("Alert subscribers"))?;
        let rows = stmt
            .query_map([tenant_id], |row| {
                Ok(Subscriber {
                    subscriber_id: row.get(0)?,
                    lead_minutes: row.get(1)?,
                })
            })
            .map_err(storage("Alert subscribers"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("Alert subscribers"))
    }

    fn ensure_preference(&self, subscriber_id: &str, tenant_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO alert_preference (subscriber_id, tenant_id, lead_minutes)
                 VALUES (?1, ?2, ?3)",
                params![subscriber_id, tenant_id, self.defaults.alert_minutes],
            )
            .map_err(storage("Default alert preference"))?;
        Ok(())
    }
}
