//! Schedule entry model and its human-readable snapshot forms.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hearth_domain::{Callback, Kwargs};

/// What the entry's fire time is anchored to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A concrete instant (optionally repeating on a fixed interval).
    Absolute,
    /// The next sunrise.
    NextRising,
    /// The next sunset.
    NextSetting,
}

impl EntryKind {
    pub fn is_sun(self) -> bool {
        matches!(self, EntryKind::NextRising | EntryKind::NextSetting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Absolute => "absolute",
            EntryKind::NextRising => "next_rising",
            EntryKind::NextSetting => "next_setting",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled fire.
#[derive(Clone, Debug)]
pub struct ScheduleEntry {
    pub owner: String,
    /// App id captured at registration; survives owner reloads so stale
    /// fires remain attributable.
    pub id: Uuid,
    pub handle: Uuid,
    pub callback: Callback,
    pub kind: EntryKind,
    pub repeat: bool,
    /// Seconds between fires for repeating absolute entries.
    pub interval: u64,
    /// UTC instant the next timestamp is computed from.
    pub basetime: DateTime<Utc>,
    /// UTC instant of the next fire.
    pub timestamp: DateTime<Utc>,
    /// Signed seconds relative to the base; may be negative for sun kinds.
    pub offset: i64,
    /// A negative-offset sun repeat waits here until the next solar
    /// transition makes its fire time computable.
    pub inactive: bool,
    pub pin_app: bool,
    /// -1 means unpinned.
    pub pin_thread: i32,
    pub kwargs: Kwargs,
}

/// Human-readable row for one entry, as exposed by the schedule listing.
#[derive(Clone, Debug, Serialize)]
pub struct EntrySnapshot {
    pub handle: Uuid,
    pub owner: String,
    pub kind: EntryKind,
    /// Naive local `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub basetime: String,
    pub repeat: bool,
    /// `"sunrise:<±H:MM:SS>"`, `"sunset:<±H:MM:SS>"`, a formatted period,
    /// or `"None"` for one-shot entries.
    pub interval: String,
    pub offset: i64,
    pub kwargs: String,
    pub callback: String,
    pub pin_app: bool,
    /// `None` when unpinned.
    pub pin_thread: Option<i32>,
}

/// Render seconds as a signed `H:MM:SS` duration.
pub fn format_seconds(secs: i64) -> String {
    let sign = if secs < 0 { "-" } else { "" };
    let s = secs.abs();
    format!("{sign}{}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

/// The interval column of a schedule listing.
pub(crate) fn interval_display(entry: &ScheduleEntry) -> String {
    match entry.kind {
        EntryKind::NextRising => format!("sunrise:{}", format_seconds(entry.offset)),
        EntryKind::NextSetting => format!("sunset:{}", format_seconds(entry.offset)),
        EntryKind::Absolute if entry.repeat => format_seconds(entry.interval as i64),
        EntryKind::Absolute => "None".to_string(),
    }
}
