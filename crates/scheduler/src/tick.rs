//! The pacing loop that drives the virtual clock.
//!
//! Each tick sleeps to the next grid instant (no sleep at all under
//! infinite acceleration), advances virtual time by `interval`, and runs
//! the per-tick phases: end-time check, clock-skew detection, solar
//! refresh + reprojection, DST-change reload, and the dispatch walk.

use std::sync::atomic::Ordering;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use hearth_domain::Result;

use crate::clock::{from_ts, round_secs, to_ts};
use crate::entry::EntryKind;
use crate::scheduler::Scheduler;

fn real_now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

impl Scheduler {
    /// Drive ticks until [`Scheduler::stop`] is observed. Pacing keeps the
    /// tick grid aligned to the real clock; a skew reset from
    /// [`Scheduler::tick_once`] re-baselines the grid.
    pub async fn run(&self) {
        // Reset the virtual clock so construction work does not register
        // as initial skew.
        if let Err(e) = self.clock.set_start_time() {
            tracing::warn!(error = %e, "cannot reset start time, not starting");
            return;
        }
        let tick = self.clock.tick();
        let interval = self.clock.interval();
        let mut t = round_secs(self.clock.now_ts(), tick);
        let mut base = round_secs(real_now_ts(), tick);
        let mut count: u64 = 0;

        while !self.stopping() {
            count += 1;
            let delay = (base + count as f64 * tick - real_now_ts()).max(0.0);
            if delay > 0.0 {
                tokio::time::sleep(StdDuration::from_secs_f64(delay)).await;
            } else {
                // Infinite acceleration still yields to the runtime.
                tokio::task::yield_now().await;
            }
            t = round_secs(t + interval, tick);
            if let Some(next) = self.tick_once(from_ts(t)) {
                let next_ts = to_ts(next);
                if next_ts != t {
                    t = next_ts;
                    base = next_ts;
                    count = 0;
                }
            }
        }
        tracing::debug!("scheduler loop exited");
    }

    /// One tick at virtual time `utc`. Returns the instant the pacing loop
    /// should continue from: `utc` itself normally, the real now after a
    /// clock-skew reset, or nothing when the tick body failed — failures
    /// are logged and swallowed so the loop carries on.
    pub fn tick_once(&self, utc: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.tick_body(utc) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::warn!(error = %e, "unexpected error during scheduler tick");
                None
            }
        }
    }

    fn tick_body(&self, utc: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let started = std::time::Instant::now();
        self.clock.set_now(utc);

        if let Some(end) = self.endtime {
            if utc >= end {
                tracing::info!("end time reached, exiting");
                let stop_fn = self.stop_fn.lock();
                match stop_fn.as_ref() {
                    Some(f) => f(),
                    None => self.stop(),
                }
                return Ok(utc);
            }
        }

        if self.is_realtime() {
            let real_now = Utc::now();
            let delta = (utc - real_now).num_milliseconds().abs() as f64 / 1_000.0;
            if delta > self.max_clock_skew {
                tracing::warn!(delta, "scheduler clock skew detected, resetting");
                return Ok(real_now);
            }
        }

        // Refresh the solar table; a change reactivates waiting entries.
        let changes = self.sun.update(utc)?;
        if changes.rising {
            self.process_sun(EntryKind::NextRising);
        }
        if changes.setting {
            self.process_sun(EntryKind::NextSetting);
        }

        // Crossing a DST boundary shifts every civil clock time, so all
        // modules reload to recompute their callbacks.
        let now_dst = self.clock.is_dst();
        let was_dst = self.was_dst.swap(now_dst, Ordering::SeqCst);
        if now_dst != was_dst {
            tracing::info!(
                from = was_dst,
                to = now_dst,
                "DST change detected, reloading all modules"
            );
            self.apps.check_app_updates("__ALL__");
        }

        self.dispatch_due(utc);

        let elapsed = started.elapsed().as_secs_f64();
        tracing::debug!(elapsed, "scheduler tick complete");
        if self.is_realtime() && self.clock.tick() > 0.0 && elapsed > self.clock.tick() * 0.9 {
            tracing::warn!(elapsed, "excessive time spent in scheduler loop");
        }
        Ok(utc)
    }
}
