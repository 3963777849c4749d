//! Full flow through the event bus: trigger, dashboard, one ping, retrigger.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use spawnwatch_channels::MemoryTransport;
use spawnwatch_core::types::Destination;
use spawnwatch_scheduler::{
    Bounds, BusEvent, EntityMetadata, EventBus, Reconciler, Scheduler, StateStore,
    TenantConfigPatch, Tracker,
};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

struct Harness {
    store: Arc<StateStore>,
    transport: Arc<MemoryTransport>,
    scheduler: Arc<Scheduler>,
    bus: Arc<EventBus>,
    tracker: Tracker,
}

fn harness() -> Harness {
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
    let transport = Arc::new(MemoryTransport::new());
    let scheduler = Arc::new(Scheduler::new(store.clone(), transport.clone()));
    let reconciler = Arc::new(Reconciler::new(store.clone(), transport.clone(), 50));
    let bus = Arc::new(EventBus::new());
    bus.subscribe(reconciler);
    bus.subscribe(scheduler.clone());
    let tracker = Tracker::new(store.clone(), bus.clone());
    Harness {
        store,
        transport,
        scheduler,
        bus,
        tracker,
    }
}

fn ping_count(transport: &MemoryTransport, channel: &str) -> usize {
    transport
        .sends()
        .iter()
        .filter(|(d, c)| *d == Destination::Channel(channel.into()) && c.contains("Spawn Approaching"))
        .count()
}

#[tokio::test]
async fn test_drake_window_pinged_once() {
    let h = harness();
    for (tenant, channel) in [("g1", "c1"), ("g2", "c2")] {
        h.tracker
            .configure_tenant(
                tenant,
                TenantConfigPatch {
                    broadcast_channel: Some(channel.into()),
                    lookahead_hours: Some(3),
                    ping_minutes: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    h.tracker
        .record_normal_trigger("g1", "Drake", at(0, 0))
        .await
        .unwrap();
    let status = h.tracker.status("g1", "Drake").unwrap();
    let window = status.window.unwrap();
    assert_eq!((window.start, window.end), (at(10, 0), at(14, 0)));

    // 08:00 with a 3h lookahead: Drake is on the dashboard.
    h.scheduler.run_tick_at(Some("g1"), at(8, 0)).await.unwrap();
    let dash = h.transport.messages("c1");
    assert_eq!(dash.len(), 1);
    assert!(dash[0].contains("**Drake**"));
    assert!(dash[0].contains("<t:1704103200:f> ~ <t:1704117600:f>"));

    h.scheduler.run_tick_at(Some("g1"), at(9, 54)).await.unwrap();
    assert_eq!(ping_count(&h.transport, "c1"), 0);

    for (hh, mm) in [(9, 55), (9, 56), (9, 59), (10, 0), (12, 0)] {
        h.scheduler.run_tick_at(None, at(hh, mm)).await.unwrap();
    }
    assert_eq!(ping_count(&h.transport, "c1"), 1);
    // The other tenant never saw a ping.
    assert_eq!(ping_count(&h.transport, "c2"), 0);

    // Bus-driven tick reaches the scheduler and changes nothing.
    let handled = h
        .bus
        .publish(BusEvent::TickRequested {
            tenant_id: "g1".into(),
        })
        .await;
    assert_eq!(handled, 2);
    assert_eq!(ping_count(&h.transport, "c1"), 1);
}

#[tokio::test]
async fn test_retrigger_removes_stale_ping() {
    let h = harness();
    h.tracker
        .configure_tenant(
            "g1",
            TenantConfigPatch {
                broadcast_channel: Some("c1".into()),
                ping_minutes: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.tracker
        .record_normal_trigger("g1", "Drake", at(0, 0))
        .await
        .unwrap();
    h.scheduler.run_tick_at(Some("g1"), at(9, 56)).await.unwrap();
    let old_wid = h.store.get_state("g1", "Drake").unwrap().window_id.unwrap();
    assert!(h.transport.messages("c1").iter().any(|m| m.contains("Spawn Approaching")));

    // Drake actually spawned and died again at 01:00: the old ping is stale.
    h.tracker
        .record_normal_trigger("g1", "Drake", at(1, 0))
        .await
        .unwrap();
    assert!(!h.transport.messages("c1").iter().any(|m| m.contains("Spawn Approaching")));
    assert!(h.store.get_delivery("g1", "Drake", &old_wid).unwrap().unwrap().deleted);

    // The new window gets its own ping.
    h.scheduler.run_tick_at(Some("g1"), at(10, 56)).await.unwrap();
    assert_eq!(ping_count(&h.transport, "c1"), 2);
}

#[tokio::test]
async fn test_clear_removes_ping() {
    let h = harness();
    h.tracker
        .configure_tenant(
            "g1",
            TenantConfigPatch {
                broadcast_channel: Some("c1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.tracker
        .record_normal_trigger("g1", "Golem", at(0, 0))
        .await
        .unwrap();
    h.scheduler.run_tick_at(Some("g1"), at(4, 45)).await.unwrap();
    assert_eq!(ping_count(&h.transport, "c1"), 1);

    assert!(h.tracker.clear_state("g1", "Golem").await.unwrap());
    assert!(!h.transport.messages("c1").iter().any(|m| m.contains("Spawn Approaching")));
    assert!(!h.tracker.clear_state("g1", "Golem").await.unwrap());
}
