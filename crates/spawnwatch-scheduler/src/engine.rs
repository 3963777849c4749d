//! Scheduler engine: the periodic tick over every configured tenant.
//! Uses tokio::interval; an on-demand tick for one tenant runs the same code
//! out-of-band via the event bus.
//!
//! Per tenant, in order: dashboard refresh, broadcast pings, subscriber DMs,
//! expiry cleanup. Transport failures are logged and swallowed; the dedup
//! records are still written so the next tick does not retry forever.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use spawnwatch_core::config::SchedulerConfig;
use spawnwatch_core::error::{Result, SpawnWatchError, TransportError};
use spawnwatch_core::traits::Transport;
use spawnwatch_core::types::Destination;

use crate::bus::{BusEvent, BusSubscriber};
use crate::model::{TenantConfig, UpcomingEntry, Window};
use crate::notify::{render_dashboard, render_dm, render_ping};
use crate::persistence::{StateStore, window_id};
use crate::time::validate_lookahead_hours;
use crate::window::compute_window;

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tenants: usize,
    pub pings: usize,
    pub alerts: usize,
    pub cleaned: usize,
    pub failed_tenants: usize,
}

impl TickReport {
    fn absorb(&mut self, other: TickReport) {
        self.tenants += other.tenants;
        self.pings += other.pings;
        self.alerts += other.alerts;
        self.cleaned += other.cleaned;
        self.failed_tenants += other.failed_tenants;
    }
}

/// Whether `now` is inside `[start - lead, start)`.
fn in_lead_window(window: &Window, lead_minutes: i64, now: DateTime<Utc>) -> bool {
    let opens = Duration::try_minutes(lead_minutes).and_then(|d| window.start.checked_sub_signed(d));
    opens.is_some_and(|opens| opens <= now) && now < window.start
}

pub struct Scheduler {
    store: Arc<StateStore>,
    transport: Arc<dyn Transport>,
    grace: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<StateStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            grace: Duration::minutes(60),
        }
    }

    pub fn from_config(
        store: Arc<StateStore>,
        transport: Arc<dyn Transport>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::new(store, transport).with_grace(Duration::minutes(config.cleanup_grace_minutes))
    }

    /// Time a ping stays up after its window ends.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Tick one tenant, or every tenant when `tenant_id` is None.
    pub async fn run_tick(&self, tenant_id: Option<&str>) -> Result<TickReport> {
        self.run_tick_at(tenant_id, Utc::now()).await
    }

    pub async fn run_tick_at(
        &self,
        tenant_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TickReport> {
        let tenants = match tenant_id {
            Some(id) => self.store.get_tenant_config(id)?.into_iter().collect(),
            None => self.store.list_tenant_configs()?,
        };

        let mut report = TickReport::default();
        for config in tenants {
            if config.broadcast_channel.is_none() {
                continue;
            }
            match self.tick_tenant(&config, now).await {
                Ok(r) => report.absorb(r),
                Err(e) => {
                    tracing::warn!("⚠️ [{}] tick failed: {e}", config.tenant_id);
                    report.failed_tenants += 1;
                }
            }
        }
        Ok(report)
    }

    async fn tick_tenant(&self, config: &TenantConfig, now: DateTime<Utc>) -> Result<TickReport> {
        self.refresh_dashboard(config, now).await?;
        let pings = self.ping_due(config, now).await?;
        let alerts = self.alert_subscribers(config, now).await?;
        let cleaned = self.cleanup_expired(&config.tenant_id, now).await?;
        Ok(TickReport {
            tenants: 1,
            pings,
            alerts,
            cleaned,
            failed_tenants: 0,
        })
    }

    /// Entities whose window starts within `hours` and has not ended, soonest first.
    pub fn upcoming(
        &self,
        tenant_id: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<UpcomingEntry>> {
        let hours = validate_lookahead_hours(hours)?;
        let horizon = now
            .checked_add_signed(Duration::hours(hours))
            .ok_or_else(|| SpawnWatchError::Validation(format!("lookahead {hours}h out of range")))?;
        let mut entries: Vec<UpcomingEntry> = self
            .store
            .tracked_entities(tenant_id)?
            .into_iter()
            .filter_map(|t| {
                let window = compute_window(&t.state, &t.metadata)?;
                (window.end > now && window.start <= horizon).then(|| UpcomingEntry {
                    entity: t.metadata.name,
                    window,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.window
                .sort_key(now)
                .cmp(&b.window.sort_key(now))
                .then_with(|| a.entity.cmp(&b.entity))
        });
        Ok(entries)
    }

    /// Overwrite the tenant's single dashboard message.
    pub async fn refresh_dashboard(&self, config: &TenantConfig, now: DateTime<Utc>) -> Result<()> {
        let Some(channel) = config.broadcast_channel.as_deref() else {
            return Ok(());
        };
        let entries = self.upcoming(&config.tenant_id, config.lookahead_hours, now)?;
        let content = render_dashboard(config.lookahead_hours, &entries);

        match &config.dashboard_message {
            // Broadcast channel moved: retire the old dashboard, post a fresh one below.
            Some(existing) if existing.channel_id != channel => {
                match self.transport.delete(existing).await {
                    Ok(()) | Err(TransportError::NotFound) => {}
                    Err(e) => tracing::warn!(
                        "⚠️ [{}] old dashboard delete failed: {e}",
                        config.tenant_id
                    ),
                }
            }
            Some(existing) => match self.transport.fetch(existing).await {
                Ok(msg) if msg.content == content => {
                    tracing::debug!("[{}] dashboard unchanged", config.tenant_id);
                    return Ok(());
                }
                Ok(_) => match self.transport.edit(existing, &content).await {
                    Ok(()) => return Ok(()),
                    Err(TransportError::NotFound) => {}
                    Err(e) => {
                        tracing::warn!("⚠️ [{}] dashboard edit failed: {e}", config.tenant_id);
                        return Ok(());
                    }
                },
                Err(TransportError::NotFound) => {}
                Err(e) => {
                    tracing::warn!("⚠️ [{}] dashboard fetch failed: {e}", config.tenant_id);
                    return Ok(());
                }
            },
            None => {}
        }

        match self
            .transport
            .send(&Destination::Channel(channel.to_string()), &content)
            .await
        {
            Ok(msg) => {
                tracing::info!("📋 [{}] dashboard posted ({msg})", config.tenant_id);
                self.store.set_dashboard_message(&config.tenant_id, &msg)?;
            }
            Err(e) => tracing::warn!("⚠️ [{}] dashboard send failed: {e}", config.tenant_id),
        }
        Ok(())
    }

    /// Send at most one broadcast ping per window identity.
    pub async fn ping_due(&self, config: &TenantConfig, now: DateTime<Utc>) -> Result<usize> {
        let Some(channel) = config.broadcast_channel.as_deref() else {
            return Ok(0);
        };
        let destination = Destination::Channel(channel.to_string());
        let tenant = config.tenant_id.as_str();
        let mut sent = 0;

        for tracked in self.store.tracked_entities(tenant)? {
            let Some(window) = compute_window(&tracked.state, &tracked.metadata) else {
                continue;
            };
            if !in_lead_window(&window, config.ping_minutes, now) {
                continue;
            }
            let entity = tracked.metadata.name.as_str();
            let delete_after = window.end.checked_add_signed(self.grace).unwrap_or(window.end);
            let wid = tracked
                .state
                .window_id
                .clone()
                .unwrap_or_else(|| window_id(entity, window.triggered_at));

            if !self
                .store
                .claim_delivery(tenant, entity, &wid, delete_after)?
            {
                tracing::debug!("[{tenant}] ping for {wid} already claimed");
                continue;
            }

            let content = render_ping(entity, &window, config.ping_role.as_deref());
            match self.transport.send(&destination, &content).await {
                Ok(msg) => {
                    self.store.record_delivery_message(tenant, entity, &wid, &msg)?;
                    tracing::info!("🔔 [{tenant}] ping sent for {entity} ({msg})");
                    sent += 1;
                }
                Err(e) => tracing::warn!("⚠️ [{tenant}] ping for {entity} failed: {e}"),
            }
        }
        Ok(sent)
    }

    /// DM each subscriber once per window of every subscribed entity.
    pub async fn alert_subscribers(
        &self,
        config: &TenantConfig,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let tenant = config.tenant_id.as_str();
        let subscribers = self.store.alert_subscribers(tenant)?;
        if subscribers.is_empty() {
            return Ok(0);
        }

        let windows: HashMap<String, (Window, String)> = self
            .store
            .tracked_entities(tenant)?
            .into_iter()
            .filter_map(|t| {
                let window = compute_window(&t.state, &t.metadata)?;
                let wid = t
                    .state
                    .window_id
                    .unwrap_or_else(|| window_id(&t.metadata.name, window.triggered_at));
                Some((t.metadata.name, (window, wid)))
            })
            .collect();

        let mut delivered = 0;
        for sub in subscribers {
            let user = Destination::User(sub.subscriber_id.clone());
            for entity in self.store.subscriptions(&sub.subscriber_id, tenant)? {
                let Some((window, wid)) = windows.get(&entity) else {
                    continue;
                };
                if !in_lead_window(window, sub.lead_minutes, now) {
                    continue;
                }
                if !self
                    .store
                    .claim_user_alert(&sub.subscriber_id, tenant, &entity, wid)?
                {
                    continue;
                }
                match self.transport.send(&user, &render_dm(&entity, window)).await {
                    Ok(_) => {
                        self.store
                            .set_user_alert_delivered(&sub.subscriber_id, tenant, &entity, wid)?;
                        delivered += 1;
                    }
                    Err(e) => tracing::warn!(
                        "⚠️ [{tenant}] DM to {} for {entity} failed: {e}",
                        sub.subscriber_id
                    ),
                }
            }
        }
        Ok(delivered)
    }

    /// Delete expired pings. Each record gets exactly one delete attempt.
    pub async fn cleanup_expired(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut cleaned = 0;
        for record in self.store.deliveries_due(tenant_id, now)? {
            if let Some(msg) = &record.message {
                match self.transport.delete(msg).await {
                    Ok(()) | Err(TransportError::NotFound) => {}
                    Err(e) => tracing::warn!("⚠️ [{tenant_id}] delete {msg} failed: {e}"),
                }
            }
            self.store
                .mark_deleted(tenant_id, &record.entity, &record.window_id)?;
            cleaned += 1;
        }
        if cleaned > 0 {
            tracing::info!("🗑️ [{tenant_id}] {cleaned} expired pings cleaned");
        }
        Ok(cleaned)
    }
}

#[async_trait]
impl BusSubscriber for Scheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn on_event(&self, event: &BusEvent) -> Result<()> {
        match event {
            BusEvent::TickRequested { tenant_id } => {
                self.run_tick(Some(tenant_id)).await?;
            }
            BusEvent::SideRefreshRequested { tenant_id } => {
                if let Some(config) = self.store.get_tenant_config(tenant_id)? {
                    self.refresh_dashboard(&config, Utc::now()).await?;
                }
            }
            BusEvent::ReconcileRequested { .. } => {}
        }
        Ok(())
    }
}

/// Spawn the scheduler loop as a background tokio task.
pub async fn spawn_scheduler(scheduler: Arc<Scheduler>, check_interval_secs: u64) {
    let check_interval_secs = check_interval_secs.max(1);
    tracing::info!(
        "⏰ Scheduler started (check every {}s)",
        check_interval_secs
    );

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(check_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match scheduler.run_tick(None).await {
            Ok(report) if report.pings + report.alerts + report.cleaned > 0 => {
                tracing::info!(
                    "📣 Tick: {} tenants, {} pings, {} DMs, {} cleaned",
                    report.tenants,
                    report.pings,
                    report.alerts,
                    report.cleaned
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("⚠️ Tick failed: {e}"),
        }
    }
}
