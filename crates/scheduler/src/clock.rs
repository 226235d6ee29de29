//! The virtual wall clock: current time, zone conversions, and tick-grid
//! rounding.
//!
//! `now` is written only by the tick loop; API readers may observe a
//! slightly stale value, which is acceptable.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;

use hearth_domain::config::ClockConfig;
use hearth_domain::{Error, Result};

/// Parse an IANA zone name.
pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::config(format!("unknown time zone: {name}")))
}

/// Resolve a zone-naive local datetime against `tz`. Ambiguous local times
/// (fall-back overlap) take the earliest mapping; local times inside a
/// spring-forward gap fall back to reading the value as UTC.
pub(crate) fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// POSIX timestamp with fractional seconds.
pub fn to_ts(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) * 1e-6
}

/// Rematerialize a fractional POSIX timestamp as a UTC instant.
pub fn from_ts(ts: f64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros((ts * 1e6).round() as i64).unwrap_or_default()
}

/// Snap `x` to the nearest multiple of `base`; `base == 0` is the identity.
/// The result is cleaned to 10 decimal places where the magnitude allows.
pub fn round_secs(x: f64, base: f64) -> f64 {
    if base == 0.0 {
        return x;
    }
    let snapped = base * (x / base).round();
    if snapped.abs() < 1e6 {
        (snapped * 1e10).round() / 1e10
    } else {
        snapped
    }
}

/// [`round_secs`] applied to a datetime's POSIX timestamp.
pub fn round_dt(dt: DateTime<Utc>, base: f64) -> DateTime<Utc> {
    if base == 0.0 {
        dt
    } else {
        from_ts(round_secs(to_ts(dt), base))
    }
}

/// Holds the virtual `now` plus the pacing parameters that define it.
pub struct Clock {
    tz: Tz,
    now: RwLock<DateTime<Utc>>,
    tick: f64,
    interval: f64,
    starttime: Option<String>,
}

impl Clock {
    pub fn new(tz: Tz, config: &ClockConfig) -> Self {
        Self {
            tz,
            now: RwLock::new(Utc::now()),
            tick: config.tick,
            interval: config.interval,
            starttime: config.starttime.clone(),
        }
    }

    /// Reset `now` to the configured start instant (or the real UTC now)
    /// and report whether the clock is in time-travel mode. A configured
    /// start time forces time travel, and so does `tick != interval`,
    /// which accelerates from the present without a custom start.
    pub fn set_start_time(&self) -> Result<bool> {
        let mut time_travel = false;
        if let Some(start) = &self.starttime {
            time_travel = true;
            let naive = NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M:%S")
                .map_err(|e| Error::config(format!("invalid starttime {start:?}: {e}")))?;
            *self.now.write() = resolve_local(&self.tz, naive).with_timezone(&Utc);
        } else {
            *self.now.write() = Utc::now();
        }
        if self.tick != self.interval {
            time_travel = true;
        }
        Ok(time_travel)
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn tick(&self) -> f64 {
        self.tick
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    /// Written only by the tick loop.
    pub(crate) fn set_now(&self, utc: DateTime<Utc>) {
        *self.now.write() = utc;
    }

    pub fn now_ts(&self) -> f64 {
        to_ts(self.now())
    }

    pub fn now_naive(&self) -> NaiveDateTime {
        self.make_naive(self.now())
    }

    /// Strip the zone after converting to the configured zone.
    pub fn make_naive<Z: TimeZone>(&self, dt: DateTime<Z>) -> NaiveDateTime {
        dt.with_timezone(&self.tz).naive_local()
    }

    /// Attach the configured zone to a naive local datetime.
    pub fn convert_naive(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        resolve_local(&self.tz, naive)
    }

    pub fn to_local(&self, dt: DateTime<Utc>) -> DateTime<Tz> {
        dt.with_timezone(&self.tz)
    }

    /// Whether `now` in the configured zone currently observes DST.
    pub fn is_dst(&self) -> bool {
        use chrono_tz::OffsetComponents;
        let offset = self.tz.offset_from_utc_datetime(&self.now().naive_utc());
        !offset.dst_offset().is_zero()
    }
}
