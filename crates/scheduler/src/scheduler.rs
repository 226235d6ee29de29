//! The scheduler façade: construction, the app-facing API, and accessors.
//!
//! All collaborators are injected at construction; the scheduler never
//! reaches back into the wider runtime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use uuid::Uuid;

use hearth_domain::{AppRegistry, Callback, Config, Error, Kwargs, Result, WorkerPool};

use crate::admin::{AdminSink, CallbackAttributes};
use crate::clock::{parse_tz, resolve_local, round_dt, Clock};
use crate::entry::{format_seconds, interval_display, EntryKind, EntrySnapshot, ScheduleEntry};
use crate::parse::{ParsedTime, TimeParser};
use crate::store::{sorted_handles, ScheduleStore};
use crate::sun::{offset_for, SunTable};

pub struct Scheduler {
    pub(crate) clock: Clock,
    pub(crate) sun: SunTable,
    parser: TimeParser,
    pub(crate) store: ScheduleStore,
    pub(crate) worker: Arc<dyn WorkerPool>,
    pub(crate) apps: Arc<dyn AppRegistry>,
    pub(crate) admin: AdminSink,
    pub(crate) endtime: Option<DateTime<Utc>>,
    pub(crate) max_clock_skew: f64,
    realtime: AtomicBool,
    stopping: AtomicBool,
    pub(crate) was_dst: AtomicBool,
    pub(crate) stop_fn: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    booted: NaiveDateTime,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        worker: Arc<dyn WorkerPool>,
        apps: Arc<dyn AppRegistry>,
        admin: AdminSink,
    ) -> Result<Self> {
        let tz = parse_tz(&config.location.time_zone)?;
        let clock = Clock::new(tz, &config.clock);
        let time_travel = clock.set_start_time()?;

        let endtime = match &config.clock.endtime {
            Some(end) => {
                let naive = NaiveDateTime::parse_from_str(end, "%Y-%m-%d %H:%M:%S")
                    .map_err(|e| Error::config(format!("invalid endtime {end:?}: {e}")))?;
                Some(resolve_local(&tz, naive).with_timezone(&Utc))
            }
            None => None,
        };

        if time_travel {
            tracing::info!("starting time travel");
            tracing::info!(now = %clock.now_naive(), "setting clocks");
            if clock.tick() == 0.0 {
                tracing::info!("time displacement factor infinite");
            } else {
                tracing::info!(
                    factor = clock.interval() / clock.tick(),
                    "time displacement factor"
                );
            }
        } else {
            tracing::info!(tick = clock.tick(), "scheduler tick set");
        }

        let booted = clock.now_naive();
        let was_dst = clock.is_dst();

        let sun = SunTable::new(&config.location)?;
        sun.update(clock.now())?;

        Ok(Self {
            parser: TimeParser::new(tz),
            sun,
            store: ScheduleStore::new(),
            worker,
            apps,
            admin,
            endtime,
            max_clock_skew: config.clock.max_clock_skew,
            realtime: AtomicBool::new(!time_travel),
            stopping: AtomicBool::new(false),
            was_dst: AtomicBool::new(was_dst),
            stop_fn: Mutex::new(None),
            booted,
            clock,
        })
    }

    /// Invoked instead of [`Scheduler::stop`] when the configured end time
    /// is reached.
    pub fn set_stop_function(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.stop_fn.lock() = Some(Box::new(f));
    }

    /// Cooperative stop; observed at the top of the pacing loop and
    /// between ticks.
    pub fn stop(&self) {
        tracing::debug!("stop() called for scheduler");
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime.load(Ordering::SeqCst)
    }

    /// Naive local instant the scheduler came up at.
    pub fn booted(&self) -> NaiveDateTime {
        self.booted
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now_ts(&self) -> f64 {
        self.clock.now_ts()
    }

    pub fn now_naive(&self) -> NaiveDateTime {
        self.clock.now_naive()
    }

    // ── Solar accessors ─────────────────────────────────────────────

    pub fn sunrise(&self) -> Result<DateTime<Tz>> {
        Ok(self.sun.required()?.next_rising.with_timezone(&self.clock.tz()))
    }

    pub fn sunrise_naive(&self) -> Result<NaiveDateTime> {
        Ok(self.sunrise()?.naive_local())
    }

    pub fn sunset(&self) -> Result<DateTime<Tz>> {
        Ok(self.sun.required()?.next_setting.with_timezone(&self.clock.tz()))
    }

    pub fn sunset_naive(&self) -> Result<NaiveDateTime> {
        Ok(self.sunset()?.naive_local())
    }

    pub fn sun_up(&self) -> Result<bool> {
        self.sun.sun_up()
    }

    pub fn sun_down(&self) -> Result<bool> {
        self.sun.sun_down()
    }

    // ── Time-string parsing ─────────────────────────────────────────

    /// Full parse result including the solar anchor and signed offset.
    pub fn parse_full(&self, input: &str, owner: Option<&str>) -> Result<ParsedTime> {
        self.parser.parse(
            input,
            owner,
            self.clock.to_local(self.clock.now()),
            self.sun.snapshot().as_ref(),
        )
    }

    pub fn parse_datetime(&self, input: &str, owner: Option<&str>) -> Result<DateTime<Tz>> {
        Ok(self.parse_full(input, owner)?.datetime)
    }

    pub fn parse_datetime_naive(&self, input: &str, owner: Option<&str>) -> Result<NaiveDateTime> {
        Ok(self.parse_full(input, owner)?.datetime.naive_local())
    }

    pub fn parse_time(&self, input: &str, owner: Option<&str>) -> Result<NaiveTime> {
        Ok(self.parse_full(input, owner)?.datetime.time())
    }

    /// Whether the virtual now lies inside `[start, end]`, both parsed as
    /// time strings and projected onto today. A window whose end precedes
    /// its start spans midnight.
    pub fn now_is_between(&self, start: &str, end: &str, owner: Option<&str>) -> Result<bool> {
        let start_t = self.parse_full(start, owner)?.datetime.time();
        let end_t = self.parse_full(end, owner)?.datetime.time();
        let tz = self.clock.tz();
        let mut now = self.clock.to_local(self.clock.now());
        let start_dt = resolve_local(&tz, now.date_naive().and_time(start_t));
        let mut end_dt = resolve_local(&tz, now.date_naive().and_time(end_t));
        if end_dt < start_dt {
            if now < start_dt && now < end_dt {
                now = resolve_local(&tz, now.naive_local() + Duration::days(1));
            }
            end_dt = resolve_local(&tz, end_dt.naive_local() + Duration::days(1));
        }
        Ok(start_dt <= now && now <= end_dt)
    }

    // ── Schedule API ────────────────────────────────────────────────

    /// Register a timed callback. `when` is rounded onto the tick grid and
    /// becomes the entry's basetime; the effective offset (explicit or
    /// randomized) shifts the first fire.
    pub fn insert_schedule<Z: TimeZone>(
        &self,
        owner: &str,
        when: DateTime<Z>,
        callback: Callback,
        repeat: bool,
        kind: EntryKind,
        kwargs: Kwargs,
    ) -> Result<Uuid> {
        let info = self
            .apps
            .lookup(owner)
            .ok_or_else(|| Error::config(format!("no app registered as {owner}")))?;

        let mut pin_app = kwargs.pin.unwrap_or(info.pin_app);
        let pin_thread = match kwargs.pin_thread {
            Some(thread) => {
                pin_app = true;
                thread
            }
            None => info.pin_thread,
        };

        let basetime = round_dt(when.with_timezone(&Utc), self.clock.tick());
        let offset = offset_for(&kwargs)?;
        let timestamp = basetime + Duration::seconds(offset);
        let interval = kwargs.interval.unwrap_or(0);
        let handle = Uuid::new_v4();

        let attributes = CallbackAttributes {
            app: owner.to_owned(),
            execution_time: self.format_dt(timestamp),
            repeat: format_seconds(interval as i64),
            function: callback.name().to_owned(),
            pinned: pin_app,
            pinned_thread: pin_thread,
            fired: 0,
            executed: 0,
            kwargs: kwargs.summary(),
        };

        self.store.insert(ScheduleEntry {
            owner: owner.to_owned(),
            id: info.id,
            handle,
            callback,
            kind,
            repeat,
            interval,
            basetime,
            timestamp,
            offset,
            inactive: false,
            pin_app,
            pin_thread,
            kwargs,
        });
        self.admin.register(handle, attributes);
        tracing::debug!(owner, %handle, %kind, "registered schedule entry");
        Ok(handle)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn cancel_timer(&self, owner: &str, handle: Uuid) -> bool {
        tracing::debug!(owner, %handle, "canceling timer");
        match self.store.remove(owner, handle) {
            Some(_) => {
                self.admin.remove(handle);
                true
            }
            None => false,
        }
    }

    /// Remove every entry belonging to an owner.
    pub fn terminate_app(&self, owner: &str) {
        for handle in self.store.remove_owner(owner) {
            self.admin.remove(handle);
        }
    }

    /// Next fire time (naive local), repeat interval, and sanitized kwargs
    /// for one entry.
    pub fn info_timer(&self, handle: Uuid, owner: &str) -> Result<(NaiveDateTime, u64, Kwargs)> {
        let entry = self
            .store
            .get(owner, handle)
            .ok_or(Error::UnknownHandle(handle))?;
        Ok((
            self.clock.make_naive(entry.timestamp),
            entry.interval,
            entry.kwargs.sanitized(),
        ))
    }

    /// Annotated snapshot of the whole table: owners in name order, each
    /// owner's entries in fire order.
    pub fn get_scheduler_entries(&self) -> BTreeMap<String, Vec<EntrySnapshot>> {
        let buckets = self.store.lock();
        let mut out = BTreeMap::new();
        for (owner, bucket) in buckets.iter() {
            let rows = sorted_handles(bucket)
                .into_iter()
                .filter_map(|(_, handle)| bucket.get(&handle))
                .map(|e| EntrySnapshot {
                    handle: e.handle,
                    owner: e.owner.clone(),
                    kind: e.kind,
                    timestamp: self.format_dt(e.timestamp),
                    basetime: self.format_dt(e.basetime),
                    repeat: e.repeat,
                    interval: interval_display(e),
                    offset: e.offset,
                    kwargs: e.kwargs.sanitized().summary(),
                    callback: e.callback.name().to_owned(),
                    pin_app: e.pin_app,
                    pin_thread: (e.pin_thread != -1).then_some(e.pin_thread),
                })
                .collect();
            out.insert(owner.clone(), rows);
        }
        out
    }

    // ── Diagnostics ─────────────────────────────────────────────────

    pub fn dump_sun(&self) {
        tracing::info!(target: "diag", sun = ?self.sun.snapshot(), "sun table");
    }

    pub fn dump_schedule(&self) {
        let entries = self.get_scheduler_entries();
        if entries.is_empty() {
            tracing::info!(target: "diag", "scheduler table is empty");
            return;
        }
        for (owner, rows) in entries {
            for row in rows {
                tracing::info!(
                    target: "diag",
                    owner = %owner,
                    next = %row.timestamp,
                    callback = %row.callback,
                    interval = %row.interval,
                    "scheduled entry"
                );
            }
        }
    }

    /// Naive local rendering used by snapshots and admin attributes.
    pub(crate) fn format_dt(&self, dt: DateTime<Utc>) -> String {
        self.clock
            .make_naive(dt)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminEvent;
    use crate::testing::*;
    use serde_json::json;

    #[test]
    fn insert_then_cancel_leaves_nothing() {
        let (sched, _worker, _registry, mut admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let when = sched.now() + Duration::seconds(30);
        let handle = sched
            .insert_schedule("app", when, Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        assert_eq!(sched.store.len(), 1);

        assert!(sched.cancel_timer("app", handle));
        assert!(sched.store.is_empty());
        assert!(!sched.cancel_timer("app", handle), "second cancel is a no-op");

        assert!(matches!(admin_rx.try_recv().unwrap(), AdminEvent::Register { .. }));
        assert!(matches!(admin_rx.try_recv().unwrap(), AdminEvent::Remove { .. }));
    }

    #[test]
    fn insert_rounds_onto_the_tick_grid() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let when = sched.now() + Duration::seconds(10) + Duration::milliseconds(400);
        let handle = sched
            .insert_schedule("app", when, Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        let entry = sched.store.get("app", handle).unwrap();
        assert_eq!(entry.timestamp.timestamp_subsec_micros(), 0);
        assert_eq!(entry.timestamp, sched.now() + Duration::seconds(10));
        assert_eq!(entry.basetime, entry.timestamp);
    }

    #[test]
    fn explicit_pin_thread_implies_pinning() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let kwargs: Kwargs = serde_json::from_value(json!({"pin_thread": 3})).unwrap();
        let handle = sched
            .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), false, EntryKind::Absolute, kwargs)
            .unwrap();
        let entry = sched.store.get("app", handle).unwrap();
        assert!(entry.pin_app);
        assert_eq!(entry.pin_thread, 3);
    }

    #[test]
    fn pins_default_to_the_registry() {
        let (sched, _worker, registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        registry.apps.lock().get_mut("app").unwrap().pin_app = true;
        let handle = sched
            .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        let entry = sched.store.get("app", handle).unwrap();
        assert!(entry.pin_app);
        assert_eq!(entry.pin_thread, -1);
    }

    #[test]
    fn insert_for_unknown_app_fails() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let err = sched
            .insert_schedule("ghost", sched.now(), Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn insert_rejects_conflicting_offset_options() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let kwargs: Kwargs =
            serde_json::from_value(json!({"offset": 60, "random_end": 120})).unwrap();
        assert!(sched
            .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), true, EntryKind::NextRising, kwargs)
            .is_err());
        assert!(sched.store.is_empty());
    }

    #[test]
    fn handles_are_unique_across_a_run() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let handle = sched
                .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
                .unwrap();
            assert!(seen.insert(handle));
        }
    }

    #[test]
    fn info_timer_reports_sanitized_state() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let kwargs: Kwargs = serde_json::from_value(json!({
            "interval": 300,
            "constrain_days": "mon",
            "scene": "dawn",
        }))
        .unwrap();
        let when = sched.now() + Duration::seconds(5);
        let handle = sched
            .insert_schedule("app", when, Callback::new("cb", |_| {}), true, EntryKind::Absolute, kwargs)
            .unwrap();

        let (next, interval, clean) = sched.info_timer(handle, "app").unwrap();
        assert_eq!(next, sched.clock.make_naive(when));
        assert_eq!(interval, 300);
        assert!(clean.interval.is_none());
        assert!(!clean.rest.contains_key("constrain_days"));
        assert_eq!(clean.rest.get("scene"), Some(&json!("dawn")));
    }

    #[test]
    fn info_timer_unknown_handle() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        assert!(matches!(
            sched.info_timer(Uuid::new_v4(), "app"),
            Err(Error::UnknownHandle(_))
        ));
    }

    #[test]
    fn entries_snapshot_is_ordered_and_annotated() {
        let (sched, _worker, registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        registry.apps.lock().insert(
            "beta".into(),
            hearth_domain::AppInfo {
                id: Uuid::new_v4(),
                pin_app: false,
                pin_thread: -1,
            },
        );

        let now = sched.now();
        let cb = || Callback::new("cb", |_| {});
        let late = sched
            .insert_schedule("app", now + Duration::seconds(60), cb(), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        let early = sched
            .insert_schedule("app", now + Duration::seconds(5), cb(), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        let kwargs: Kwargs = serde_json::from_value(json!({"offset": -600})).unwrap();
        sched
            .insert_schedule("beta", now + Duration::seconds(30), cb(), true, EntryKind::NextSetting, kwargs)
            .unwrap();

        let snapshot = sched.get_scheduler_entries();
        let owners: Vec<&String> = snapshot.keys().collect();
        assert_eq!(owners, ["app", "beta"]);

        let app_rows = &snapshot["app"];
        assert_eq!(app_rows[0].handle, early);
        assert_eq!(app_rows[1].handle, late);
        assert_eq!(app_rows[0].interval, "None");
        assert!(app_rows[0].pin_thread.is_none());

        let beta_rows = &snapshot["beta"];
        assert_eq!(beta_rows[0].interval, "sunset:-0:10:00");
        assert_eq!(beta_rows[0].offset, -600);
    }

    #[test]
    fn terminate_app_clears_the_owner() {
        let (sched, _worker, _registry, mut admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        for _ in 0..3 {
            sched
                .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
                .unwrap();
        }
        sched.terminate_app("app");
        assert!(sched.store.is_empty());

        let mut removes = 0;
        while let Ok(event) = admin_rx.try_recv() {
            if matches!(event, AdminEvent::Remove { .. }) {
                removes += 1;
            }
        }
        assert_eq!(removes, 3);
    }

    #[test]
    fn endtime_parses_from_its_own_key() {
        let mut config = travel_config("2020-01-01 00:00:00", "UTC");
        config.clock.endtime = Some("2020-01-01 00:00:03".into());
        let (sched, _worker, _registry, _admin_rx) = build(config);
        assert_eq!(
            sched.endtime.unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 3).unwrap()
        );
    }

    #[test]
    fn now_is_between_plain_window() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-06-01 12:00:00", "UTC"));
        assert!(sched.now_is_between("09:00:00", "17:00:00", None).unwrap());
        assert!(!sched.now_is_between("13:00:00", "17:00:00", None).unwrap());
    }

    #[test]
    fn now_is_between_spans_midnight() {
        let late = build(travel_config("2020-06-01 23:30:00", "UTC")).0;
        assert!(late.now_is_between("22:00:00", "06:00:00", None).unwrap());

        let early = build(travel_config("2020-06-02 05:00:00", "UTC")).0;
        assert!(early.now_is_between("22:00:00", "06:00:00", None).unwrap());

        let midday = build(travel_config("2020-06-01 12:00:00", "UTC")).0;
        assert!(!midday.now_is_between("22:00:00", "06:00:00", None).unwrap());
    }

    #[test]
    fn sun_accessors_expose_the_table() {
        let (sched, _worker, _registry, _admin_rx) = build(travel_config("2020-06-21 12:00:00", "Europe/London"));
        let rise = sched.sunrise().unwrap();
        let set = sched.sunset().unwrap();
        assert!(rise.with_timezone(&Utc) > sched.now());
        assert!(set.with_timezone(&Utc) > sched.now());
        // Midday in June: sun is up.
        assert!(sched.sun_up().unwrap());
        assert_eq!(sched.sunrise_naive().unwrap(), rise.naive_local());
    }

    #[test]
    fn bad_time_zone_is_a_config_error() {
        let mut config = travel_config("2020-01-01 00:00:00", "UTC");
        config.location.time_zone = "Atlantis/Nowhere".into();
        let worker = std::sync::Arc::new(RecordingWorker::default());
        let registry = StaticRegistry::with_app("app");
        let (sink, _rx) = crate::admin::AdminSink::new();
        assert!(Scheduler::new(&config, worker, registry, sink).is_err());
    }
}
