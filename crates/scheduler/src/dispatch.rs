//! Firing due entries and rewriting repeats.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use hearth_domain::{DispatchEnvelope, DispatchPayload, Error, Result};

use crate::entry::EntryKind;
use crate::scheduler::Scheduler;
use crate::store::{sorted_handles, Buckets};
use crate::sun::{offset_for, SunState};

impl Scheduler {
    /// Reactivate waiting sun entries of `kind` after the table advanced:
    /// each gets a fresh offset against the new event time.
    pub(crate) fn process_sun(&self, kind: EntryKind) {
        let Some(state) = self.sun.snapshot() else {
            return;
        };
        let event = match kind {
            EntryKind::NextRising => state.next_rising,
            EntryKind::NextSetting => state.next_setting,
            EntryKind::Absolute => return,
        };
        tracing::debug!(
            %kind,
            next_rising = %state.next_rising,
            next_setting = %state.next_setting,
            "processing solar transition"
        );
        let mut buckets = self.store.lock();
        for bucket in buckets.values_mut() {
            for entry in bucket.values_mut() {
                if entry.kind == kind && entry.inactive {
                    match offset_for(&entry.kwargs) {
                        Ok(offset) => {
                            entry.inactive = false;
                            entry.offset = offset;
                            entry.timestamp = event + Duration::seconds(offset);
                        }
                        Err(e) => {
                            tracing::warn!(
                                owner = %entry.owner,
                                handle = %entry.handle,
                                error = %e,
                                "cannot reproject sun entry"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Walk each owner bucket in ascending fire order, dispatching every
    /// entry due at `utc`, then sweep the buckets that emptied. `sun` was
    /// refreshed earlier in the same tick, so sun repeats reproject onto
    /// the event after the one that just fired.
    pub(crate) fn dispatch_due(&self, utc: DateTime<Utc>) {
        let sun = self.sun.snapshot();
        let mut buckets = self.store.lock();
        let owners: Vec<String> = buckets.keys().cloned().collect();
        for owner in owners {
            let due: Vec<Uuid> = match buckets.get(&owner) {
                Some(bucket) => sorted_handles(bucket)
                    .into_iter()
                    .take_while(|(timestamp, _)| *timestamp <= utc)
                    .map(|(_, handle)| handle)
                    .collect(),
                None => continue,
            };
            for handle in due {
                self.exec_schedule(&mut buckets, &owner, handle, sun.as_ref());
            }
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
    }

    /// Fire one due entry. Any failure is logged with its full context and
    /// the offending entry destroyed; scheduling continues.
    fn exec_schedule(&self, buckets: &mut Buckets, owner: &str, handle: Uuid, sun: Option<&SunState>) {
        if let Err(e) = self.try_exec(buckets, owner, handle, sun) {
            tracing::warn!(
                owner,
                %handle,
                error = %e,
                "unexpected error dispatching schedule entry, removing it"
            );
            if let Some(bucket) = buckets.get_mut(owner) {
                bucket.remove(&handle);
            }
            self.admin.remove(handle);
        }
    }

    fn try_exec(
        &self,
        buckets: &mut Buckets,
        owner: &str,
        handle: Uuid,
        sun: Option<&SunState>,
    ) -> Result<()> {
        let dispatch_err = |reason: String| Error::Dispatch {
            owner: owner.to_owned(),
            handle,
            reason,
        };

        let Some(entry) = buckets.get(owner).and_then(|b| b.get(&handle)) else {
            return Ok(());
        };
        if entry.inactive {
            return Ok(());
        }

        // The schedule lock is already held; the registry's own lock nests
        // inside it, never the inverse.
        let info = self
            .apps
            .lookup(owner)
            .ok_or_else(|| dispatch_err("app not registered".into()))?;

        let payload = match entry.kwargs.wrapped_state() {
            Some(ws) => DispatchPayload::State {
                entity: ws.entity,
                attribute: ws.attribute,
                new_state: ws.new_state,
                old_state: ws.old_state,
            },
            None => DispatchPayload::Scheduler,
        };
        let repeat = entry.repeat;
        let envelope = DispatchEnvelope {
            id: entry.id,
            handle,
            owner: owner.to_owned(),
            objectid: info.id,
            payload,
            function: entry.callback.clone(),
            pin_app: entry.pin_app,
            pin_thread: entry.pin_thread,
            kwargs: entry.kwargs.clone(),
        };

        self.worker
            .dispatch(envelope)
            .map_err(|e| dispatch_err(e.to_string()))?;

        if !repeat {
            if let Some(bucket) = buckets.get_mut(owner) {
                bucket.remove(&handle);
            }
            self.admin.remove(handle);
            return Ok(());
        }

        let Some(entry) = buckets.get_mut(owner).and_then(|b| b.get_mut(&handle)) else {
            return Ok(());
        };
        match entry.kind {
            EntryKind::NextRising | EntryKind::NextSetting => {
                if entry.offset < 0 {
                    // The pre-event fire time of the next solar day is not
                    // knowable until the table advances past that event.
                    entry.inactive = true;
                } else {
                    let state =
                        sun.ok_or_else(|| dispatch_err("solar table not initialized".into()))?;
                    let event = match entry.kind {
                        EntryKind::NextRising => state.next_rising,
                        _ => state.next_setting,
                    };
                    let offset =
                        offset_for(&entry.kwargs).map_err(|e| dispatch_err(e.to_string()))?;
                    entry.offset = offset;
                    entry.timestamp = event + Duration::seconds(offset);
                }
            }
            EntryKind::Absolute => {
                entry.basetime += Duration::seconds(entry.interval as i64);
                let offset = offset_for(&entry.kwargs).map_err(|e| dispatch_err(e.to_string()))?;
                entry.offset = offset;
                entry.timestamp = entry.basetime + Duration::seconds(offset);
            }
        }
        let execution_time = self.format_dt(entry.timestamp);
        self.admin.executed(handle, execution_time);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminEvent;
    use crate::testing::*;
    use hearth_domain::{AppRegistry, Callback, Kwargs};
    use serde_json::json;
    use std::sync::Arc;

    fn kwargs(value: serde_json::Value) -> Kwargs {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn scheduler_envelope_carries_identity_and_pins() {
        let (sched, worker, registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let handle = sched
            .insert_schedule(
                "app",
                sched.now(),
                Callback::new("wake_up", |_| {}),
                false,
                EntryKind::Absolute,
                kwargs(json!({"pin_thread": 2, "scene": "dawn"})),
            )
            .unwrap();

        sched.dispatch_due(sched.now());

        let envelopes = worker.envelopes.lock();
        assert_eq!(envelopes.len(), 1);
        let env = &envelopes[0];
        assert_eq!(env.handle, handle);
        assert_eq!(env.owner, "app");
        assert_eq!(env.id, registry.lookup("app").unwrap().id);
        assert_eq!(env.objectid, env.id);
        assert!(matches!(env.payload, DispatchPayload::Scheduler));
        assert_eq!(env.function.name(), "wake_up");
        assert!(env.pin_app);
        assert_eq!(env.pin_thread, 2);
        assert_eq!(env.kwargs.rest.get("scene"), Some(&json!("dawn")));
    }

    #[test]
    fn wrapped_state_kwargs_produce_a_state_envelope() {
        let (sched, worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        sched
            .insert_schedule(
                "app",
                sched.now(),
                Callback::new("on_state", |_| {}),
                false,
                EntryKind::Absolute,
                kwargs(json!({
                    "__entity": "light.kitchen",
                    "__attribute": "state",
                    "__new_state": "on",
                    "__old_state": "off",
                })),
            )
            .unwrap();

        sched.dispatch_due(sched.now());

        let envelopes = worker.envelopes.lock();
        match &envelopes[0].payload {
            DispatchPayload::State {
                entity, new_state, ..
            } => {
                assert_eq!(entity, "light.kitchen");
                assert_eq!(new_state, &json!("on"));
            }
            other => panic!("expected state payload, got {other:?}"),
        }
    }

    #[test]
    fn one_shot_entries_are_destroyed_after_firing() {
        let (sched, worker, _registry, mut admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        sched
            .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();

        sched.dispatch_due(sched.now());
        assert_eq!(worker.envelopes.lock().len(), 1);
        assert!(sched.store.is_empty(), "bucket must be swept after the fire");

        assert!(matches!(admin_rx.try_recv().unwrap(), AdminEvent::Register { .. }));
        assert!(matches!(admin_rx.try_recv().unwrap(), AdminEvent::Remove { .. }));
    }

    #[test]
    fn absolute_repeat_advances_basetime_by_exactly_one_interval() {
        let (sched, _worker, _registry, mut admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let now = sched.now();
        let handle = sched
            .insert_schedule(
                "app",
                now,
                Callback::new("cb", |_| {}),
                true,
                EntryKind::Absolute,
                kwargs(json!({"interval": 300})),
            )
            .unwrap();

        sched.dispatch_due(now);

        let entry = sched.store.get("app", handle).unwrap();
        assert_eq!(entry.basetime, now + Duration::seconds(300));
        assert_eq!(entry.timestamp, entry.basetime + Duration::seconds(entry.offset));
        assert_eq!(entry.offset, 0);

        // The rewrite also refreshes the admin execution time.
        let mut saw_executed = false;
        while let Ok(event) = admin_rx.try_recv() {
            if let AdminEvent::Executed { execution_time, .. } = event {
                assert_eq!(execution_time, "2020-01-01 00:05:00");
                saw_executed = true;
            }
        }
        assert!(saw_executed);
    }

    #[test]
    fn positive_sun_repeat_reprojects_from_the_snapshot() {
        let (sched, worker, _registry, _admin_rx) =
            build(travel_config("2020-01-01 00:00:00", "Europe/London"));
        let rise = sched.sun.required().unwrap().next_rising;
        let handle = sched
            .insert_schedule(
                "app",
                rise,
                Callback::new("cb", |_| {}),
                true,
                EntryKind::NextRising,
                kwargs(json!({"offset": 60})),
            )
            .unwrap();

        sched.dispatch_due(rise + Duration::seconds(60));

        assert_eq!(worker.envelopes.lock().len(), 1);
        let entry = sched.store.get("app", handle).unwrap();
        assert!(!entry.inactive);
        assert_eq!(entry.timestamp, rise + Duration::seconds(60));
        assert_eq!(entry.offset, 60);
    }

    #[test]
    fn negative_sun_repeat_goes_inactive_and_stops_firing() {
        let (sched, worker, _registry, _admin_rx) =
            build(travel_config("2020-01-01 00:00:00", "Europe/London"));
        let setting = sched.sun.required().unwrap().next_setting;
        let handle = sched
            .insert_schedule(
                "app",
                setting,
                Callback::new("cb", |_| {}),
                true,
                EntryKind::NextSetting,
                kwargs(json!({"offset": -600})),
            )
            .unwrap();

        let fire_at = setting - Duration::seconds(600);
        sched.dispatch_due(fire_at);
        assert_eq!(worker.envelopes.lock().len(), 1);
        let entry = sched.store.get("app", handle).unwrap();
        assert!(entry.inactive);

        // Inactive entries are skipped even though their timestamp is due.
        sched.dispatch_due(fire_at + Duration::seconds(60));
        assert_eq!(worker.envelopes.lock().len(), 1);
    }

    #[test]
    fn process_sun_reactivates_matching_kind_only() {
        let (sched, _worker, _registry, _admin_rx) =
            build(travel_config("2020-01-01 00:00:00", "Europe/London"));
        let state = sched.sun.required().unwrap();
        let make = |kind, when| {
            sched
                .insert_schedule(
                    "app",
                    when,
                    Callback::new("cb", |_| {}),
                    true,
                    kind,
                    kwargs(json!({"offset": -600})),
                )
                .unwrap()
        };
        let set_handle = make(EntryKind::NextSetting, state.next_setting);
        let rise_handle = make(EntryKind::NextRising, state.next_rising);

        // Drive both into the waiting state.
        sched.dispatch_due(state.next_setting);

        assert!(sched.store.get("app", set_handle).unwrap().inactive);
        assert!(sched.store.get("app", rise_handle).unwrap().inactive);

        sched.process_sun(EntryKind::NextSetting);
        let set_entry = sched.store.get("app", set_handle).unwrap();
        let rise_entry = sched.store.get("app", rise_handle).unwrap();
        assert!(!set_entry.inactive, "setting entry reactivates");
        assert!(rise_entry.inactive, "rising entry keeps waiting");
        assert_eq!(
            set_entry.timestamp,
            state.next_setting + Duration::seconds(set_entry.offset)
        );
    }

    #[test]
    fn failed_dispatch_destroys_the_entry_and_continues() {
        init_test_logging();
        let config = travel_config("2020-01-01 00:00:00", "UTC");
        let registry = StaticRegistry::with_app("app");
        let (sink, mut admin_rx) = crate::AdminSink::new();
        let sched = crate::Scheduler::new(&config, Arc::new(FailingWorker), registry, sink).unwrap();

        sched
            .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), true, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        sched.dispatch_due(sched.now());

        assert!(sched.store.is_empty(), "failed entry must be deleted");
        assert!(matches!(admin_rx.try_recv().unwrap(), AdminEvent::Register { .. }));
        assert!(matches!(admin_rx.try_recv().unwrap(), AdminEvent::Remove { .. }));
    }

    #[test]
    fn vanished_owner_is_a_dispatch_error_not_a_panic() {
        let (sched, worker, registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        sched
            .insert_schedule("app", sched.now(), Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        registry.apps.lock().clear();

        sched.dispatch_due(sched.now());
        assert!(worker.envelopes.lock().is_empty());
        assert!(sched.store.is_empty());
    }

    #[test]
    fn due_entries_fire_in_timestamp_order_per_owner() {
        let (sched, worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let now = sched.now();
        let cb = |name: &str| Callback::new(name.to_owned(), |_| {});
        sched
            .insert_schedule("app", now + Duration::seconds(30), cb("second"), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        sched
            .insert_schedule("app", now + Duration::seconds(10), cb("first"), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        sched
            .insert_schedule("app", now + Duration::seconds(90), cb("not_yet"), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();

        sched.dispatch_due(now + Duration::seconds(60));

        let envelopes = worker.envelopes.lock();
        let names: Vec<&str> = envelopes.iter().map(|e| e.function.name()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(sched.store.len(), 1, "the future entry stays");
    }

    #[test]
    fn cancel_before_the_tick_prevents_the_fire() {
        let (sched, worker, _registry, _admin_rx) = build(travel_config("2020-01-01 00:00:00", "UTC"));
        let now = sched.now();
        let handle = sched
            .insert_schedule("app", now + Duration::seconds(5), Callback::new("cb", |_| {}), false, EntryKind::Absolute, Kwargs::default())
            .unwrap();
        assert!(sched.cancel_timer("app", handle));

        sched.dispatch_due(now + Duration::seconds(10));
        assert!(worker.envelopes.lock().is_empty());
    }

    #[test]
    fn timestamps_agree_with_the_solar_invariant() {
        // Active sun entries satisfy timestamp == event + offset; inactive
        // ones carry no meaningful fire time.
        let (sched, _worker, _registry, _admin_rx) =
            build(travel_config("2020-01-01 00:00:00", "Europe/London"));
        let state = sched.sun.required().unwrap();
        sched
            .insert_schedule(
                "app",
                state.next_rising,
                Callback::new("cb", |_| {}),
                true,
                EntryKind::NextRising,
                kwargs(json!({"offset": 120})),
            )
            .unwrap();

        let buckets = sched.store.lock();
        for bucket in buckets.values() {
            for entry in bucket.values() {
                if entry.kind.is_sun() && !entry.inactive {
                    let event = match entry.kind {
                        EntryKind::NextRising => state.next_rising,
                        _ => state.next_setting,
                    };
                    assert_eq!(entry.timestamp, event + Duration::seconds(entry.offset));
                }
            }
        }
    }
}
