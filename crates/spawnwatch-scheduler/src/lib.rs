//! # SpawnWatch Scheduler
//!
//! Multi-tenant respawn-window tracking: trigger state per tenant, window
//! computation, deduplicated pings and DMs, and stale-ping cleanup.
//!
//! ## Design Principles
//! - SQLite persistence; uniqueness constraints do the dedup
//! - Windows are always recomputed from state, never cached
//! - Tokio timers only, plus on-demand ticks via the bus
//! - Transport failures never block forward progress
//!
//! ## Architecture
//! ```text
//! Tracker (command layer entry points)
//!   ├── record_normal_trigger / clear_state / apply_reset_trigger_bulk
//!   └── publish → EventBus
//!                   ├── ReconcileRequested → Reconciler (delete stale pings)
//!                   ├── TickRequested      → Scheduler::run_tick(tenant)
//!                   └── SideRefreshRequested → Scheduler::refresh_dashboard
//!
//! Scheduler (tokio interval, every tenant)
//!   ├── 1. dashboard refresh (one persistent message)
//!   ├── 2. broadcast ping      (claim → send, once per window)
//!   ├── 3. subscriber DMs      (claim → attempt, once per window)
//!   └── 4. expiry cleanup      (one delete attempt per record)
//! ```

pub mod bus;
pub mod catalog;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod persistence;
pub mod reconcile;
pub mod subscriptions;
pub mod time;
pub mod tracker;
pub mod window;

pub use bus::{BusEvent, BusSubscriber, EventBus};
pub use catalog::Catalog;
pub use engine::{Scheduler, TickReport, spawn_scheduler};
pub use model::{
    Bounds, EntityMetadata, EntityState, EntityStatus, TenantConfig, TenantConfigPatch,
    TriggerKind, UpcomingEntry, Window,
};
pub use persistence::{StateStore, TenantDefaults};
pub use reconcile::Reconciler;
pub use tracker::Tracker;
pub use window::compute_window;
