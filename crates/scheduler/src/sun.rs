//! Next-sunrise/next-sunset table for the configured location.
//!
//! `update` recomputes the next events and reports which of them moved;
//! the caller reprojects waiting sun entries afterwards. The table never
//! touches the schedule map, so no lock nesting occurs here.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use rand::Rng;

use hearth_domain::config::LocationConfig;
use hearth_domain::{Error, Kwargs, Result};
use hearth_solar::{NoEvent, Observer};

/// Days scanned past `now` before giving up. Generous enough for any polar
/// winter; only an observer at the exact pole exhausts it.
const SCAN_LIMIT_DAYS: i64 = 400;

/// The next solar events, strictly after the virtual now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SunState {
    pub next_rising: DateTime<Utc>,
    pub next_setting: DateTime<Utc>,
}

/// Which events moved during an [`SunTable::update`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SunChanges {
    pub rising: bool,
    pub setting: bool,
}

pub struct SunTable {
    observer: Observer,
    state: RwLock<Option<SunState>>,
}

impl SunTable {
    pub fn new(location: &LocationConfig) -> Result<Self> {
        let observer = Observer::new(location.latitude, location.longitude, location.elevation)
            .ok_or_else(|| {
                Error::config(format!(
                    "latitude must be within -90..=90 and longitude within -180..=180 \
                     (got {}, {})",
                    location.latitude, location.longitude
                ))
            })?;
        Ok(Self {
            observer,
            state: RwLock::new(None),
        })
    }

    /// Recompute the first sunrise and sunset strictly after `now` and
    /// store them. Returns which events changed relative to the previous
    /// snapshot; the first fill reports no changes.
    pub fn update(&self, now: DateTime<Utc>) -> Result<SunChanges> {
        let next_rising = next_event(&self.observer, now, hearth_solar::sunrise)
            .ok_or_else(|| Error::config("no sunrise within the scan window"))?;
        let next_setting = next_event(&self.observer, now, hearth_solar::sunset)
            .ok_or_else(|| Error::config("no sunset within the scan window"))?;

        let mut state = self.state.write();
        let previous = *state;
        *state = Some(SunState {
            next_rising,
            next_setting,
        });
        drop(state);

        Ok(match previous {
            None => SunChanges::default(),
            Some(prev) => SunChanges {
                rising: prev.next_rising != next_rising,
                setting: prev.next_setting != next_setting,
            },
        })
    }

    pub fn snapshot(&self) -> Option<SunState> {
        *self.state.read()
    }

    /// Snapshot, failing if `update` has never succeeded.
    pub fn required(&self) -> Result<SunState> {
        self.snapshot()
            .ok_or_else(|| Error::config("solar table not initialized"))
    }

    /// True between sunrise and sunset: the next rising is then further
    /// away than the next setting.
    pub fn sun_up(&self) -> Result<bool> {
        let state = self.required()?;
        Ok(state.next_rising > state.next_setting)
    }

    pub fn sun_down(&self) -> Result<bool> {
        let state = self.required()?;
        Ok(state.next_rising < state.next_setting)
    }
}

/// Walk day offsets starting at -1 until the event lands after `now`;
/// polar days without the event are skipped.
fn next_event(
    observer: &Observer,
    now: DateTime<Utc>,
    event: fn(&Observer, NaiveDate) -> std::result::Result<DateTime<Utc>, NoEvent>,
) -> Option<DateTime<Utc>> {
    let base = now.date_naive();
    for offset in -1..SCAN_LIMIT_DAYS {
        let day = base.checked_add_signed(Duration::days(offset))?;
        if let Ok(at) = event(observer, day) {
            if at > now {
                return Some(at);
            }
        }
    }
    None
}

/// Effective offset seconds for one (re)projection of an entry. An explicit
/// `offset` excludes the randomization bounds; otherwise a fresh uniform
/// draw is taken from `[random_start, random_end]` each time.
pub fn offset_for(kwargs: &Kwargs) -> Result<i64> {
    if let Some(offset) = kwargs.offset {
        if kwargs.random_start.is_some() || kwargs.random_end.is_some() {
            return Err(Error::config(
                "cannot combine offset with random_start or random_end",
            ));
        }
        return Ok(offset);
    }
    let lo = kwargs.random_start.unwrap_or(0);
    let hi = kwargs.random_end.unwrap_or(0);
    if lo > hi {
        return Err(Error::config(format!(
            "random_start ({lo}) must not exceed random_end ({hi})"
        )));
    }
    Ok(rand::thread_rng().gen_range(lo..=hi))
}
