//! Message rendering: broadcast pings, the dashboard and DM alerts.
//!
//! Times use Discord timestamp tags (`<t:UNIX:f>`), which clients show in the
//! reader's zone, next to an explicit server-time (UTC) line. Pings are also
//! parsed back so the reconciler can recognise its own stale messages.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::model::{TriggerKind, UpcomingEntry, Window};
use crate::time::fmt_utc;

const PING_TITLE_PREFIX: &str = "**Spawn Approaching: ";
const RESET_LABEL: &str = "*(after server reset)*";

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*Spawn Approaching: (.+)\*\*$").expect("title regex"));
static WINDOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Window: <t:(-?\d+):f>(?: ~ <t:(-?\d+):f>)?$").expect("window regex")
});

/// Window bounds recovered from a rendered ping, in Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPing {
    pub entity: String,
    pub start: i64,
    pub end: i64,
}

impl ParsedPing {
    /// Whether this ping describes `window`, at whole-second precision.
    pub fn matches(&self, window: &Window) -> bool {
        self.start == window.start.timestamp() && self.end == window.end.timestamp()
    }
}

fn tag(dt: DateTime<Utc>, style: char) -> String {
    format!("<t:{}:{style}>", dt.timestamp())
}

fn window_line(w: &Window) -> String {
    if w.is_point() {
        format!("Window: {}", tag(w.start, 'f'))
    } else {
        format!("Window: {} ~ {}", tag(w.start, 'f'), tag(w.end, 'f'))
    }
}

fn server_line(w: &Window) -> String {
    if w.is_point() {
        format!("Server Time (UTC): {}", fmt_utc(w.start))
    } else {
        format!("Server Time (UTC): {} ~ {}", fmt_utc(w.start), fmt_utc(w.end))
    }
}

/// Title line of a ping for `entity`.
pub fn ping_title(entity: &str) -> String {
    format!("{PING_TITLE_PREFIX}{entity}**")
}

/// Broadcast ping sent once per window.
pub fn render_ping(entity: &str, window: &Window, ping_role: Option<&str>) -> String {
    let mut lines = Vec::with_capacity(5);
    if let Some(role) = ping_role {
        lines.push(format!("<@&{role}>"));
    }
    lines.push(ping_title(entity));
    if window.kind == TriggerKind::Reset {
        lines.push(RESET_LABEL.to_string());
    }
    lines.push(window_line(window));
    lines.push(server_line(window));
    lines.join("\n")
}

/// Recover `(entity, start, end)` from a rendered ping. None for anything else.
pub fn parse_ping(content: &str) -> Option<ParsedPing> {
    let mut entity = None;
    let mut bounds = None;
    for line in content.lines().map(str::trim) {
        if entity.is_none() {
            if let Some(c) = TITLE_RE.captures(line) {
                entity = Some(c[1].to_string());
                continue;
            }
        }
        if let Some(c) = WINDOW_RE.captures(line) {
            let start: i64 = c[1].parse().ok()?;
            let end = match c.get(2) {
                Some(m) => m.as_str().parse().ok()?,
                None => start,
            };
            bounds = Some((start, end));
            break;
        }
    }
    let (start, end) = bounds?;
    Some(ParsedPing {
        entity: entity?,
        start,
        end,
    })
}

/// The tenant's persistent dashboard.
pub fn render_dashboard(hours: i64, entries: &[UpcomingEntry]) -> String {
    let mut out = format!("**Upcoming Spawns - next {hours}h**");
    if entries.is_empty() {
        out.push_str(&format!(
            "\nNo upcoming windows. Nothing starts within the next {hours} hour(s)."
        ));
        return out;
    }
    for entry in entries {
        out.push_str("\n\n");
        out.push_str(&format!("**{}**", entry.entity));
        if entry.window.kind == TriggerKind::Reset {
            out.push(' ');
            out.push_str(RESET_LABEL);
        }
        out.push('\n');
        out.push_str(&window_line(&entry.window));
        out.push('\n');
        out.push_str(&server_line(&entry.window));
    }
    out
}

/// Direct-message alert for one subscriber.
pub fn render_dm(entity: &str, window: &Window) -> String {
    let mut out = format!("⏰ **{entity}** spawns {}", tag(window.start, 'R'));
    if window.kind == TriggerKind::Reset {
        out.push(' ');
        out.push_str(RESET_LABEL);
    }
    out.push('\n');
    out.push_str(&window_line(window));
    out.push('\n');
    out.push_str(&server_line(window));
    out
}
