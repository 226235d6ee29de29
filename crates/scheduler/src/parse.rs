//! Time-string parser.
//!
//! Resolves the grammars the runtime accepts in user configuration to a
//! concrete instant in the configured zone:
//!
//! - `YYYY-MM-DD HH:MM:SS` — absolute local datetime
//! - `HH:MM:SS`            — today at that clock time
//! - `sunrise` / `sunset`  — the next solar event
//! - `sunrise ± HH:MM:SS` / `sunset ± HH:MM:SS`
//!
//! Anything else is rejected.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use regex::Regex;

use hearth_domain::{Error, Result};

use crate::clock::resolve_local;
use crate::sun::SunState;

/// Solar anchor named by a time string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sun {
    Sunrise,
    Sunset,
}

impl fmt::Display for Sun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sun::Sunrise => write!(f, "sunrise"),
            Sun::Sunset => write!(f, "sunset"),
        }
    }
}

/// A resolved time string.
#[derive(Clone, Debug)]
pub struct ParsedTime {
    pub datetime: DateTime<Tz>,
    pub sun: Option<Sun>,
    /// Signed seconds relative to the solar anchor, when there is one.
    pub offset: i64,
}

/// Grammar matcher. The expressions are compiled once at construction and
/// reused for every parse.
pub struct TimeParser {
    tz: Tz,
    re_datetime: Regex,
    re_clock: Regex,
    re_sun: Regex,
}

impl TimeParser {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            re_datetime: Regex::new(r"^(\d+)-(\d+)-(\d+)\s+(\d+):(\d+):(\d+)$")
                .expect("static datetime pattern"),
            re_clock: Regex::new(r"^(\d+):(\d+):(\d+)$").expect("static clock pattern"),
            re_sun: Regex::new(r"^(sunrise|sunset)\s*([+-])\s*(\d+):(\d+):(\d+)$")
                .expect("static sun pattern"),
        }
    }

    /// Resolve `input` against the current virtual `now` and solar state.
    pub fn parse(
        &self,
        input: &str,
        owner: Option<&str>,
        now: DateTime<Tz>,
        sun: Option<&SunState>,
    ) -> Result<ParsedTime> {
        if let Some(caps) = self.re_datetime.captures(input) {
            let date = NaiveDate::from_ymd_opt(
                field(&caps, 1, owner, input)?,
                field(&caps, 2, owner, input)?,
                field(&caps, 3, owner, input)?,
            )
            .ok_or_else(|| Error::parse(owner, input))?;
            let time = NaiveTime::from_hms_opt(
                field(&caps, 4, owner, input)?,
                field(&caps, 5, owner, input)?,
                field(&caps, 6, owner, input)?,
            )
            .ok_or_else(|| Error::parse(owner, input))?;
            return Ok(ParsedTime {
                datetime: resolve_local(&self.tz, date.and_time(time)),
                sun: None,
                offset: 0,
            });
        }

        if let Some(caps) = self.re_clock.captures(input) {
            let time = NaiveTime::from_hms_opt(
                field(&caps, 1, owner, input)?,
                field(&caps, 2, owner, input)?,
                field(&caps, 3, owner, input)?,
            )
            .ok_or_else(|| Error::parse(owner, input))?;
            return Ok(ParsedTime {
                datetime: resolve_local(&self.tz, now.date_naive().and_time(time)),
                sun: None,
                offset: 0,
            });
        }

        if input == "sunrise" || input == "sunset" {
            let anchor = if input == "sunrise" { Sun::Sunrise } else { Sun::Sunset };
            return Ok(ParsedTime {
                datetime: self.sun_event(anchor, sun)?,
                sun: Some(anchor),
                offset: 0,
            });
        }

        if let Some(caps) = self.re_sun.captures(input) {
            let anchor = if &caps[1] == "sunrise" { Sun::Sunrise } else { Sun::Sunset };
            let magnitude: i64 = i64::from(field::<u32>(&caps, 3, owner, input)?) * 3600
                + i64::from(field::<u32>(&caps, 4, owner, input)?) * 60
                + i64::from(field::<u32>(&caps, 5, owner, input)?);
            let offset = if &caps[2] == "+" { magnitude } else { -magnitude };
            return Ok(ParsedTime {
                datetime: self.sun_event(anchor, sun)? + Duration::seconds(offset),
                sun: Some(anchor),
                offset,
            });
        }

        Err(Error::parse(owner, input))
    }

    fn sun_event(&self, anchor: Sun, sun: Option<&SunState>) -> Result<DateTime<Tz>> {
        let state = sun.ok_or_else(|| Error::config("solar table not initialized"))?;
        let utc = match anchor {
            Sun::Sunrise => state.next_rising,
            Sun::Sunset => state.next_setting,
        };
        Ok(utc.with_timezone(&self.tz))
    }
}

fn field<T: std::str::FromStr>(
    caps: &regex::Captures<'_>,
    index: usize,
    owner: Option<&str>,
    input: &str,
) -> Result<T> {
    caps[index]
        .parse::<T>()
        .map_err(|_| Error::parse(owner, input))
}
