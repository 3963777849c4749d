//! SQLite-backed state store: entity metadata, per-tenant trigger state and
//! tenant configuration. The dedup ledger and subscriptions live in
//! `ledger.rs` and `subscriptions.rs` as further `impl StateStore` blocks.
//!
//! One connection behind a mutex; the lock is never held across an await.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use spawnwatch_core::error::{Result, SpawnWatchError};
use spawnwatch_core::types::MessageRef;

use crate::model::{
    Bounds, EntityMetadata, EntityState, TenantConfig, TenantConfigPatch, TrackedEntity,
    TriggerKind,
};
use crate::time::{from_sql, to_sql, validate_lead_minutes, validate_lookahead_hours};

/// Defaults applied when a tenant or subscriber has not chosen a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantDefaults {
    pub lookahead_hours: i64,
    pub ping_minutes: i64,
    pub alert_minutes: i64,
}

impl Default for TenantDefaults {
    fn default() -> Self {
        Self {
            lookahead_hours: 3,
            ping_minutes: 30,
            alert_minutes: 30,
        }
    }
}

/// Shared state store for all tenants.
pub struct StateStore {
    conn: Mutex<Connection>,
    pub(crate) defaults: TenantDefaults,
}

/// Map a rusqlite error to a storage error with context.
pub(crate) fn storage(ctx: &'static str) -> impl FnOnce(rusqlite::Error) -> SpawnWatchError {
    move |e| SpawnWatchError::Storage(format!("{ctx}: {e}"))
}

/// Dedup key for one trigger occurrence.
pub fn window_id(entity: &str, ts: DateTime<Utc>) -> String {
    format!("{entity}:{}", to_sql(ts))
}

const ENTITY_SELECT: &str =
    "SELECT name, location, normal_min, normal_max, reset_min, reset_max FROM entity_metadata";

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<EntityMetadata> {
    Ok(EntityMetadata {
        name: row.get(0)?,
        location: row.get(1)?,
        normal: Bounds::from_columns(row.get(2)?, row.get(3)?),
        reset: Bounds::from_columns(row.get(4)?, row.get(5)?),
    })
}

fn row_to_state(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<EntityState> {
    let ts: Option<String> = row.get(offset + 2)?;
    let kind: Option<String> = row.get(offset + 3)?;
    Ok(EntityState {
        tenant_id: row.get(offset)?,
        entity: row.get(offset + 1)?,
        last_trigger: ts.as_deref().and_then(from_sql),
        kind: TriggerKind::parse(kind.as_deref()),
        window_id: row.get(offset + 4)?,
    })
}

fn normalize_name(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '\'' | '’' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

impl StateStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage("DB open"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(storage("DB pragma"))?;
        Self::from_connection(conn)
    }

    /// Fresh in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage("DB open"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            defaults: TenantDefaults::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn with_defaults(mut self, defaults: TenantDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SpawnWatchError::Storage("connection mutex poisoned".into()))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS entity_metadata (
                name TEXT PRIMARY KEY COLLATE NOCASE,
                location TEXT,
                normal_min REAL,
                normal_max REAL,
                reset_min REAL,
                reset_max REAL
            );

            CREATE TABLE IF NOT EXISTS tenant_entity_state (
                tenant_id TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                last_trigger_ts TEXT,
                trigger_kind TEXT,
                window_identity TEXT,
                PRIMARY KEY (tenant_id, entity_name),
                FOREIGN KEY (entity_name) REFERENCES entity_metadata(name) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS broadcast_delivery (
                tenant_id TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                window_identity TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                channel_ref TEXT,
                message_ref TEXT,
                delete_after_ts TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tenant_id, entity_name, window_identity)
            );

            CREATE TABLE IF NOT EXISTS user_alert (
                subscriber_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                window_identity TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (subscriber_id, tenant_id, entity_name, window_identity)
            );

            CREATE TABLE IF NOT EXISTS subscription (
                subscriber_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                PRIMARY KEY (subscriber_id, tenant_id, entity_name)
            );

            CREATE TABLE IF NOT EXISTS alert_preference (
                subscriber_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                lead_minutes INTEGER,
                PRIMARY KEY (subscriber_id, tenant_id)
            );

            CREATE TABLE IF NOT EXISTS tenant_config (
                tenant_id TEXT PRIMARY KEY,
                broadcast_channel_ref TEXT,
                ping_role_ref TEXT,
                lookahead_hours INTEGER NOT NULL,
                ping_lead_minutes INTEGER NOT NULL,
                dashboard_channel_ref TEXT,
                dashboard_message_ref TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_delivery_due
                ON broadcast_delivery(tenant_id, deleted, delete_after_ts);
         ",
            )
            .map_err(storage("Migration"))
    }

    // ─── Entity metadata ──────────────────────────────────────

    /// Insert catalog entries, never overwriting existing rows. Rows named in
    /// `stale` (base names of entries that now expand per location) are removed.
    pub fn seed_entities(&self, entities: &[EntityMetadata], stale: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage("Seed begin"))?;
        let mut inserted = 0;
        for e in entities {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO entity_metadata
                     (name, location, normal_min, normal_max, reset_min, reset_max)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        e.name,
                        e.location,
                        e.normal.map(|b| b.min_hours),
                        e.normal.map(|b| b.max_hours),
                        e.reset.map(|b| b.min_hours),
                        e.reset.map(|b| b.max_hours),
                    ],
                )
                .map_err(storage("Seed entity"))?;
        }
        for name in stale {
            tx.execute("DELETE FROM entity_metadata WHERE name = ?1", [name])
                .map_err(storage("Remove stale entity"))?;
        }
        tx.commit().map_err(storage("Seed commit"))?;
        Ok(inserted)
    }

    /// Insert or replace one entity's metadata.
    pub fn upsert_entity(&self, e: &EntityMetadata) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO entity_metadata
                 (name, location, normal_min, normal_max, reset_min, reset_max)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                   location = excluded.location,
                   normal_min = excluded.normal_min,
                   normal_max = excluded.normal_max,
                   reset_min = excluded.reset_min,
                   reset_max = excluded.reset_max",
                params![
                    e.name,
                    e.location,
                    e.normal.map(|b| b.min_hours),
                    e.normal.map(|b| b.max_hours),
                    e.reset.map(|b| b.min_hours),
                    e.reset.map(|b| b.max_hours),
                ],
            )
            .map_err(storage("Upsert entity"))?;
        Ok(())
    }

    /// Case-insensitive lookup by name.
    pub fn get_entity(&self, name: &str) -> Result<Option<EntityMetadata>> {
        let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
        self.conn()?
            .query_row(
                &format!("{ENTITY_SELECT} WHERE name = ?1 COLLATE NOCASE"),
                [normalized],
                row_to_entity,
            )
            .optional()
            .map_err(storage("Get entity"))
    }

    pub fn list_entities(&self) -> Result<Vec<EntityMetadata>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{ENTITY_SELECT} ORDER BY name"))
            .map_err(storage("List entities"))?;
        let rows = stmt
            .query_map([], row_to_entity)
            .map_err(storage("List entities"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("List entities"))
    }

    /// Tolerant name resolution: exact (any case), then ignoring spacing and
    /// the separators `_ ' -`.
    pub fn resolve_entity(&self, input: &str) -> Result<EntityMetadata> {
        if let Some(e) = self.get_entity(input)? {
            return Ok(e);
        }
        let all = self.list_entities()?;
        let target = normalize_name(input);
        if let Some(e) = all.iter().find(|e| normalize_name(&e.name) == target) {
            return Ok(e.clone());
        }
        let known: Vec<&str> = all.iter().map(|e| e.name.as_str()).collect();
        Err(SpawnWatchError::NotFound(format!(
            "unknown entity '{input}'. Known: {}",
            known.join(", ")
        )))
    }

    // ─── Tenant entity state ──────────────────────────────────

    /// Current state; an untriggered placeholder when no row exists.
    pub fn get_state(&self, tenant_id: &str, entity: &str) -> Result<EntityState> {
        let state = self
            .conn()?
            .query_row(
                "SELECT tenant_id, entity_name, last_trigger_ts, trigger_kind, window_identity
                   FROM tenant_entity_state WHERE tenant_id = ?1 AND entity_name = ?2",
                params![tenant_id, entity],
                |row| row_to_state(row, 0),
            )
            .optional()
            .map_err(storage("Get state"))?;
        Ok(state.unwrap_or_else(|| EntityState::untriggered(tenant_id, entity)))
    }

    /// Entities with an active trigger in a tenant, joined with metadata.
    pub fn tracked_entities(&self, tenant_id: &str) -> Result<Vec<TrackedEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT m.name, m.location, m.normal_min, m.normal_max, m.reset_min, m.reset_max,
                        s.tenant_id, s.entity_name, s.last_trigger_ts, s.trigger_kind, s.window_identity
                   FROM tenant_entity_state s
                   JOIN entity_metadata m ON m.name = s.entity_name
                  WHERE s.tenant_id = ?1 AND s.last_trigger_ts IS NOT NULL
                  ORDER BY m.name",
            )
            .map_err(storage("Tracked entities"))?;
        let rows = stmt
            .query_map([tenant_id], |row| {
                Ok(TrackedEntity {
                    metadata: row_to_entity(row)?,
                    state: row_to_state(row, 6)?,
                })
            })
            .map_err(storage("Tracked entities"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("Tracked entities"))
    }

    /// Upsert a trigger. Overwrites any previous trigger for the entity.
    pub fn record_trigger(
        &self,
        tenant_id: &str,
        entity: &str,
        ts: DateTime<Utc>,
        kind: TriggerKind,
    ) -> Result<EntityState> {
        let wid = window_id(entity, ts);
        self.conn()?
            .execute(
                "INSERT INTO tenant_entity_state
                   (tenant_id, entity_name, last_trigger_ts, trigger_kind, window_identity)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant_id, entity_name) DO UPDATE SET
                   last_trigger_ts = excluded.last_trigger_ts,
                   trigger_kind    = excluded.trigger_kind,
                   window_identity = excluded.window_identity",
                params![tenant_id, entity, to_sql(ts), kind.as_str(), wid],
            )
            .map_err(storage("Record trigger"))?;
        Ok(EntityState {
            tenant_id: tenant_id.to_string(),
            entity: entity.to_string(),
            last_trigger: Some(ts),
            kind,
            window_id: Some(wid),
        })
    }

    /// Clear an active trigger. False when there was none; never creates a row.
    pub fn clear_trigger(&self, tenant_id: &str, entity: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE tenant_entity_state
                    SET last_trigger_ts = NULL, trigger_kind = ?3, window_identity = NULL
                  WHERE tenant_id = ?1 AND entity_name = ?2 AND last_trigger_ts IS NOT NULL",
                params![tenant_id, entity, TriggerKind::None.as_str()],
            )
            .map_err(storage("Clear trigger"))?;
        Ok(changed > 0)
    }

    /// Reset-trigger every reset-eligible entity in one transaction.
    pub fn apply_reset_bulk(&self, tenant_id: &str, ts: DateTime<Utc>) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage("Reset begin"))?;
        let eligible: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT name FROM entity_metadata
                      WHERE reset_min IS NOT NULL AND reset_max IS NOT NULL
                      ORDER BY name",
                )
                .map_err(storage("Reset eligible"))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(storage("Reset eligible"))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(storage("Reset eligible"))?
        };

        let mut updated = Vec::with_capacity(eligible.len());
        for name in eligible {
            let changed = tx
                .execute(
                    "INSERT INTO tenant_entity_state
                       (tenant_id, entity_name, last_trigger_ts, trigger_kind, window_identity)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(tenant_id, entity_name) DO UPDATE SET
                       last_trigger_ts = excluded.last_trigger_ts,
                       trigger_kind    = excluded.trigger_kind,
                       window_identity = excluded.window_identity",
                    params![
                        tenant_id,
                        name,
                        to_sql(ts),
                        TriggerKind::Reset.as_str(),
                        window_id(&name, ts)
                    ],
                )
                .map_err(storage("Reset upsert"))?;
            if changed > 0 {
                updated.push(name);
            }
        }
        tx.commit().map_err(storage("Reset commit"))?;
        Ok(updated)
    }

    // ─── Tenant configuration ─────────────────────────────────

    pub fn get_tenant_config(&self, tenant_id: &str) -> Result<Option<TenantConfig>> {
        self.conn()?
            .query_row(
                &format!("{TENANT_SELECT} WHERE tenant_id = ?1"),
                [tenant_id],
                row_to_tenant,
            )
            .optional()
            .map_err(storage("Get tenant config"))
    }

    pub fn list_tenant_configs(&self) -> Result<Vec<TenantConfig>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{TENANT_SELECT} ORDER BY tenant_id"))
            .map_err(storage("List tenants"))?;
        let rows = stmt
            .query_map([], row_to_tenant)
            .map_err(storage("List tenants"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage("List tenants"))
    }

    /// Merge `patch` onto the existing row (or defaults) and save.
    pub fn upsert_tenant_config(
        &self,
        tenant_id: &str,
        patch: TenantConfigPatch,
    ) -> Result<TenantConfig> {
        if let Some(h) = patch.lookahead_hours {
            validate_lookahead_hours(h)?;
        }
        if let Some(m) = patch.ping_minutes {
            validate_lead_minutes(m)?;
        }
        let existing = self.get_tenant_config(tenant_id)?;
        let merged = TenantConfig {
            tenant_id: tenant_id.to_string(),
            broadcast_channel: patch
                .broadcast_channel
                .or_else(|| existing.as_ref().and_then(|e| e.broadcast_channel.clone())),
            ping_role: patch
                .ping_role
                .or_else(|| existing.as_ref().and_then(|e| e.ping_role.clone())),
            lookahead_hours: patch
                .lookahead_hours
                .or(existing.as_ref().map(|e| e.lookahead_hours))
                .unwrap_or(self.defaults.lookahead_hours),
            ping_minutes: patch
                .ping_minutes
                .or(existing.as_ref().map(|e| e.ping_minutes))
                .unwrap_or(self.defaults.ping_minutes),
            dashboard_message: existing.and_then(|e| e.dashboard_message),
        };

        self.conn()?
            .execute(
                "INSERT INTO tenant_config
                   (tenant_id, broadcast_channel_ref, ping_role_ref, lookahead_hours,
                    ping_lead_minutes, dashboard_channel_ref, dashboard_message_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                   broadcast_channel_ref = excluded.broadcast_channel_ref,
                   ping_role_ref = excluded.ping_role_ref,
                   lookahead_hours = excluded.lookahead_hours,
                   ping_lead_minutes = excluded.ping_lead_minutes",
                params![
                    merged.tenant_id,
                    merged.broadcast_channel,
                    merged.ping_role,
                    merged.lookahead_hours,
                    merged.ping_minutes,
                    merged.dashboard_message.as_ref().map(|m| m.channel_id.clone()),
                    merged.dashboard_message.as_ref().map(|m| m.message_id.clone()),
                ],
            )
            .map_err(storage("Upsert tenant config"))?;
        Ok(merged)
    }

    /// Remember the tenant's persistent dashboard message.
    pub fn set_dashboard_message(&self, tenant_id: &str, message: &MessageRef) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE tenant_config
                    SET dashboard_channel_ref = ?2, dashboard_message_ref = ?3
                  WHERE tenant_id = ?1",
                params![tenant_id, message.channel_id, message.message_id],
            )
            .map_err(storage("Set dashboard message"))?;
        if changed == 0 {
            return Err(SpawnWatchError::NotFound(format!("tenant '{tenant_id}'")));
        }
        Ok(())
    }
}

const TENANT_SELECT: &str = "SELECT tenant_id, broadcast_channel_ref, ping_role_ref, lookahead_hours, ping_lead_minutes, dashboard_channel_ref, dashboard_message_ref FROM tenant_config";

fn row_to_tenant(row: &rusqlite::Row) -> rusqlite::Result<TenantConfig> {
    let channel: Option<String> = row.get(5)?;
    let message: Option<String> = row.get(6)?;
    Ok(TenantConfig {
        tenant_id: row.get(0)?,
        broadcast_channel: row.get(1)?,
        ping_role: row.get(2)?,
        lookahead_hours: row.get(3)?,
        ping_minutes: row.get(4)?,
        dashboard_message: channel.zip(message).map(|(c, m)| MessageRef::new(c, m)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .seed_entities(
                &[
                    EntityMetadata::new("Drake", Some(Bounds::new(10.0, 14.0)), None),
                    EntityMetadata::new(
                        "Ice Queen",
                        Some(Bounds::new(6.0, 8.0)),
                        Some(Bounds::new(1.0, 2.0)),
                    ),
                    EntityMetadata::new("Gatekeeper", None, Some(Bounds::new(3.0, 3.0))),
                    EntityMetadata::new("Statue", None, None),
                ],
                &[],
            )
            .unwrap();
        store
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_seed_never_overwrites() {
        let store = store();
        let again = store
            .seed_entities(
                &[EntityMetadata::new("Drake", Some(Bounds::new(1.0, 1.0)), None)],
                &[],
            )
            .unwrap();
        assert_eq!(again, 0);
        let drake = store.get_entity("drake").unwrap().unwrap();
        assert_eq!(drake.normal, Some(Bounds::new(10.0, 14.0)));
    }

    #[test]
    fn test_seed_removes_stale_base_rows() {
        let store = store();
        store.seed_entities(&[], &["Statue".to_string()]).unwrap();
        assert!(store.get_entity("Statue").unwrap().is_none());
    }

    #[test]
    fn test_resolve_entity_is_tolerant() {
        let store = store();
        assert_eq!(store.resolve_entity("ICE QUEEN").unwrap().name, "Ice Queen");
        assert_eq!(store.resolve_entity("ice_queen").unwrap().name, "Ice Queen");
        assert_eq!(store.resolve_entity("  ice   queen ").unwrap().name, "Ice Queen");
        assert!(matches!(
            store.resolve_entity("Balrog"),
            Err(SpawnWatchError::NotFound(_))
        ));
    }

    #[test]
    fn test_state_row_only_after_trigger() {
        let store = store();
        let s = store.get_state("g1", "Drake").unwrap();
        assert_eq!(s, EntityState::untriggered("g1", "Drake"));
        assert!(store.tracked_entities("g1").unwrap().is_empty());

        let s = store
            .record_trigger("g1", "Drake", t0(), TriggerKind::Normal)
            .unwrap();
        assert_eq!(s.window_id.as_deref(), Some("Drake:2024-01-01T00:00:00.000Z"));
        assert_eq!(store.get_state("g1", "Drake").unwrap(), s);

        // Tenants are isolated.
        assert_eq!(store.tracked_entities("g1").unwrap().len(), 1);
        assert!(store.tracked_entities("g2").unwrap().is_empty());
    }

    #[test]
    fn test_retrigger_changes_window_id() {
        let store = store();
        let a = store
            .record_trigger("g1", "Drake", t0(), TriggerKind::Normal)
            .unwrap();
        let b = store
            .record_trigger("g1", "Drake", t0() + chrono::Duration::hours(4), TriggerKind::Normal)
            .unwrap();
        assert_ne!(a.window_id, b.window_id);
    }

    #[test]
    fn test_clear_trigger() {
        let store = store();
        assert!(!store.clear_trigger("g1", "Drake").unwrap());
        assert!(store.tracked_entities("g1").unwrap().is_empty());

        store
            .record_trigger("g1", "Drake", t0(), TriggerKind::Normal)
            .unwrap();
        assert!(store.clear_trigger("g1", "Drake").unwrap());
        let s = store.get_state("g1", "Drake").unwrap();
        assert_eq!(s.last_trigger, None);
        assert_eq!(s.kind, TriggerKind::None);
        assert_eq!(s.window_id, None);
        assert!(!store.clear_trigger("g1", "Drake").unwrap());
    }

    #[test]
    fn test_reset_bulk_touches_only_reset_eligible() {
        let store = store();
        store
            .record_trigger("g1", "Drake", t0(), TriggerKind::Normal)
            .unwrap();
        let later = t0() + chrono::Duration::hours(1);
        let updated = store.apply_reset_bulk("g1", later).unwrap();
        assert_eq!(updated, vec!["Gatekeeper".to_string(), "Ice Queen".to_string()]);

        // Drake untouched.
        let drake = store.get_state("g1", "Drake").unwrap();
        assert_eq!(drake.last_trigger, Some(t0()));
        assert_eq!(drake.kind, TriggerKind::Normal);

        let queen = store.get_state("g1", "Ice Queen").unwrap();
        assert_eq!(queen.kind, TriggerKind::Reset);
        assert_eq!(queen.last_trigger, Some(later));

        // Same timestamp again: same identity, still written.
        let again = store.apply_reset_bulk("g1", later).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(store.get_state("g1", "Ice Queen").unwrap().window_id, queen.window_id);
    }

    #[test]
    fn test_tenant_config_merge() {
        let store = store();
        let cfg = store
            .upsert_tenant_config(
                "g1",
                TenantConfigPatch {
                    broadcast_channel: Some("c1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cfg.lookahead_hours, 3);
        assert_eq!(cfg.ping_minutes, 30);

        store
            .set_dashboard_message("g1", &MessageRef::new("c1", "m1"))
            .unwrap();
        let cfg = store
            .upsert_tenant_config(
                "g1",
                TenantConfigPatch {
                    ping_minutes: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cfg.broadcast_channel.as_deref(), Some("c1"));
        assert_eq!(cfg.ping_minutes, 5);
        assert_eq!(
            store.get_tenant_config("g1").unwrap().unwrap().dashboard_message,
            Some(MessageRef::new("c1", "m1"))
        );
    }

    #[test]
    fn test_tenant_config_validation() {
        let store = store();
        let err = store
            .upsert_tenant_config(
                "g1",
                TenantConfigPatch {
                    ping_minutes: Some(0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SpawnWatchError::Validation(_)));
        assert!(store.get_tenant_config("g1").unwrap().is_none());
    }
}
