//! Sunrise/sunset ephemeris.
//!
//! Implements the NOAA sunrise equation for a fixed observer. Event times
//! come back as UTC instants truncated to whole seconds. Days on which the
//! sun never crosses the horizon (polar day/night) yield a typed error so
//! callers can skip to the next calendar day.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Julian date of the J2000 epoch (2000-01-01 12:00 UTC).
const J2000: f64 = 2_451_545.0;
/// Julian date of the Unix epoch (1970-01-01 00:00 UTC).
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
/// Mean obliquity of the ecliptic, degrees.
const OBLIQUITY: f64 = 23.4397;
/// Altitude of the solar disc centre at rise/set, degrees (refraction +
/// semi-diameter).
const HORIZON: f64 = -0.833;

/// The sun does not cross the horizon on the requested day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NoEvent {
    /// Polar night: the sun stays below the horizon all day.
    #[error("sun never rises on this day")]
    NeverRises,
    /// Polar day: the sun stays above the horizon all day.
    #[error("sun never sets on this day")]
    NeverSets,
}

/// A fixed observation point. Construction validates coordinate ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    latitude: f64,
    longitude: f64,
    elevation: f64,
}

impl Observer {
    /// Returns `None` unless `-90 <= latitude <= 90` and
    /// `-180 <= longitude <= 180`.
    pub fn new(latitude: f64, longitude: f64, elevation: f64) -> Option<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
            elevation,
        })
    }
}

/// UTC sunrise for `date` at the observer.
pub fn sunrise(observer: &Observer, date: NaiveDate) -> Result<DateTime<Utc>, NoEvent> {
    events(observer, date).map(|(rise, _)| rise)
}

/// UTC sunset for `date` at the observer.
pub fn sunset(observer: &Observer, date: NaiveDate) -> Result<DateTime<Utc>, NoEvent> {
    events(observer, date).map(|(_, set)| set)
}

/// Both horizon crossings for one calendar day.
fn events(observer: &Observer, date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), NoEvent> {
    // Days since J2000, with the mean correction for terrestrial time.
    let n = julian_day_number(date) - J2000 + 0.0008;

    // Mean solar time at the observer's meridian (east-positive longitude).
    let mean_solar = n - observer.longitude / 360.0;

    // Solar mean anomaly and equation of the center, degrees.
    let anomaly = (357.5291 + 0.985_600_28 * mean_solar).rem_euclid(360.0);
    let center = 1.9148 * sind(anomaly) + 0.0200 * sind(2.0 * anomaly) + 0.0003 * sind(3.0 * anomaly);

    // Ecliptic longitude and local solar transit.
    let ecliptic = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let transit = J2000 + mean_solar + 0.0053 * sind(anomaly) - 0.0069 * sind(2.0 * ecliptic);

    // Declination of the sun.
    let sin_decl = sind(ecliptic) * sind(OBLIQUITY);
    let decl = libm::asin(sin_decl).to_degrees();

    // Horizon altitude corrected for observer elevation (dip of the
    // horizon, metres above sea level).
    let altitude = HORIZON - 2.076 * observer.elevation.max(0.0).sqrt() / 60.0;

    let cos_hour_angle =
        (sind(altitude) - sind(observer.latitude) * sind(decl)) / (cosd(observer.latitude) * cosd(decl));
    if cos_hour_angle > 1.0 {
        return Err(NoEvent::NeverRises);
    }
    if cos_hour_angle < -1.0 {
        return Err(NoEvent::NeverSets);
    }

    let hour_angle = libm::acos(cos_hour_angle).to_degrees();
    let rise = jd_to_utc(transit - hour_angle / 360.0);
    let set = jd_to_utc(transit + hour_angle / 360.0);
    Ok((rise, set))
}

/// Julian day number (noon-based) for a calendar date.
fn julian_day_number(date: NaiveDate) -> f64 {
    // num_days_from_ce(2000-01-01) = 730_120, JDN = 2_451_545.
    date.num_days_from_ce() as f64 + 1_721_425.0
}

/// Julian date to UTC, truncated to whole seconds.
fn jd_to_utc(jd: f64) -> DateTime<Utc> {
    let unix = (jd - UNIX_EPOCH_JD) * 86_400.0;
    DateTime::<Utc>::from_timestamp(unix.round() as i64, 0).unwrap_or_default()
}

fn sind(deg: f64) -> f64 {
    deg.to_radians().sin()
}

fn cosd(deg: f64) -> f64 {
    deg.to_radians().cos()
}
