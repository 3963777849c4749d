//! Data model: static entity metadata, per-tenant trigger state, and the
//! dedup ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spawnwatch_core::types::MessageRef;

/// Respawn duration range, in hours after a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_hours: f64,
    pub max_hours: f64,
}

impl Bounds {
    pub fn new(min_hours: f64, max_hours: f64) -> Self {
        Self { min_hours, max_hours }
    }

    /// Finite, non-negative and ordered.
    pub fn is_valid(&self) -> bool {
        self.min_hours.is_finite()
            && self.max_hours.is_finite()
            && self.min_hours >= 0.0
            && self.min_hours <= self.max_hours
    }

    /// Both ends present, or nothing.
    pub fn from_columns(min: Option<f64>, max: Option<f64>) -> Option<Self> {
        Some(Self::new(min?, max?))
    }
}

/// Static, tenant-independent description of a trackable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Unique key.
    pub name: String,
    pub location: Option<String>,
    /// None: cannot be triggered by normal completion.
    pub normal: Option<Bounds>,
    /// None: not affected by a tenant-wide reset.
    pub reset: Option<Bounds>,
}

impl EntityMetadata {
    pub fn new(name: &str, normal: Option<Bounds>, reset: Option<Bounds>) -> Self {
        Self {
            name: name.to_string(),
            location: None,
            normal,
            reset,
        }
    }

    pub fn is_trackable(&self) -> bool {
        self.normal.is_some()
    }
}

/// What restarted an entity's countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    None,
    Normal,
    Reset,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::None => "none",
            TriggerKind::Normal => "normal",
            TriggerKind::Reset => "reset",
        }
    }

    /// Unknown or missing values read as `None`.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("normal") => TriggerKind::Normal,
            Some("reset") => TriggerKind::Reset,
            _ => TriggerKind::None,
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-(tenant, entity) trigger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub tenant_id: String,
    pub entity: String,
    pub last_trigger: Option<DateTime<Utc>>,
    pub kind: TriggerKind,
    pub window_id: Option<String>,
}

impl EntityState {
    /// State of an entity never triggered in a tenant.
    pub fn untriggered(tenant_id: &str, entity: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            entity: entity.to_string(),
            last_trigger: None,
            kind: TriggerKind::None,
            window_id: None,
        }
    }
}

/// Computed availability interval. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub triggered_at: DateTime<Utc>,
    pub kind: TriggerKind,
}

impl Window {
    /// Zero-width windows render as a single instant.
    pub fn is_point(&self) -> bool {
        self.start == self.end
    }

    /// Key used to order the dashboard: `max(start, now)`.
    pub fn sort_key(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.start.max(now)
    }
}

/// Metadata joined with a tenant's state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub metadata: EntityMetadata,
    pub state: EntityState,
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpcomingEntry {
    pub entity: String,
    pub window: Window,
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityStatus {
    pub metadata: EntityMetadata,
    pub state: EntityState,
    pub window: Option<Window>,
}

/// Per-tenant scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub broadcast_channel: Option<String>,
    pub ping_role: Option<String>,
    pub lookahead_hours: i64,
    pub ping_minutes: i64,
    pub dashboard_message: Option<MessageRef>,
}

/// Partial update merged onto an existing [`TenantConfig`].
#[derive(Debug, Clone, Default)]
pub struct TenantConfigPatch {
    pub broadcast_channel: Option<String>,
    pub ping_role: Option<String>,
    pub lookahead_hours: Option<i64>,
    pub ping_minutes: Option<i64>,
}

/// Broadcast-scope dedup record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub tenant_id: String,
    pub entity: String,
    pub window_id: String,
    pub delivered: bool,
    pub message: Option<MessageRef>,
    pub delete_after: Option<DateTime<Utc>>,
    pub deleted: bool,
}

/// A subscriber with a configured lead time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub subscriber_id: String,
    pub lead_minutes: i64,
}
