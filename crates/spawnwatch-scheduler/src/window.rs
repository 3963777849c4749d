//! Window calculator. Pure: state + metadata in, window out.

use chrono::{DateTime, Duration, Utc};

use crate::model::{Bounds, EntityMetadata, EntityState, TriggerKind, Window};

/// Compute the active window for an entity in one tenant.
///
/// Reset bounds win when the last trigger was a reset and the entity has
/// them; otherwise normal bounds apply. No timestamp or no applicable bounds
/// means no window.
pub fn compute_window(state: &EntityState, metadata: &EntityMetadata) -> Option<Window> {
    let base = state.last_trigger?;

    let (bounds, kind) = match (state.kind, metadata.reset, metadata.normal) {
        (TriggerKind::Reset, Some(reset), _) => (reset, TriggerKind::Reset),
        (_, _, Some(normal)) => (normal, TriggerKind::Normal),
        _ => return None,
    };

    window_from(base, bounds, kind)
}

/// None when either end falls outside the representable date range.
fn window_from(base: DateTime<Utc>, bounds: Bounds, kind: TriggerKind) -> Option<Window> {
    Some(Window {
        start: base.checked_add_signed(hours(bounds.min_hours)?)?,
        end: base.checked_add_signed(hours(bounds.max_hours)?)?,
        triggered_at: base,
        kind,
    })
}

/// Fractional hours at millisecond precision.
fn hours(h: f64) -> Option<Duration> {
    let ms = (h * 3_600_000.0).round();
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(ms as i64)
}
