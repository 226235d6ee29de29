//! Runtime configuration, loaded from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Config {
    /// Read and deserialize a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Location (solar model inputs + civil time zone)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    /// Observer elevation in metres above sea level.
    #[serde(default)]
    pub elevation: f64,
    /// IANA zone name for civil-time computations and parsing.
    #[serde(default = "d_utc")]
    pub time_zone: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
            time_zone: d_utc(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clock (pacing + time travel)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Pacing grain in real seconds. 0 means infinite acceleration.
    #[serde(default = "d_1")]
    pub tick: f64,
    /// Virtual seconds advanced per tick.
    #[serde(default = "d_1")]
    pub interval: f64,
    /// Zone-local `YYYY-MM-DD HH:MM:SS`. Setting this enables time travel.
    #[serde(default)]
    pub starttime: Option<String>,
    /// Zone-local `YYYY-MM-DD HH:MM:SS`. The loop stops when reached.
    #[serde(default)]
    pub endtime: Option<String>,
    /// Real-time mode resynchronization threshold in seconds.
    #[serde(default = "d_1")]
    pub max_clock_skew: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick: 1.0,
            interval: 1.0,
            starttime: None,
            endtime: None,
            max_clock_skew: 1.0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin loop (external; only the cadence lives here)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Seconds between admin-state refreshes.
    #[serde(default = "d_1")]
    pub delay: f64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { delay: 1.0 }
    }
}

fn d_1() -> f64 {
    1.0
}

fn d_utc() -> String {
    "UTC".to_string()
}
