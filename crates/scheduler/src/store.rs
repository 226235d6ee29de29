//! The schedule map: owner → handle → entry.
//!
//! A plain locked map with narrow operations. Compound flows (insert with
//! pin resolution, the dispatch walk) are each structured as one critical
//! section by the caller; nothing here re-acquires the lock. Where the
//! schedule lock and the app registry are both needed, the schedule lock
//! is taken first — never the inverse.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::entry::ScheduleEntry;

pub(crate) type Buckets = HashMap<String, HashMap<Uuid, ScheduleEntry>>;

#[derive(Default)]
pub struct ScheduleStore {
    inner: Mutex<Buckets>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw guarded access for compound operations (the dispatch walk).
    pub(crate) fn lock(&self) -> MutexGuard<'_, Buckets> {
        self.inner.lock()
    }

    pub fn insert(&self, entry: ScheduleEntry) {
        self.inner
            .lock()
            .entry(entry.owner.clone())
            .or_default()
            .insert(entry.handle, entry);
    }

    /// Remove one entry; the owner bucket is dropped when it empties.
    pub fn remove(&self, owner: &str, handle: Uuid) -> Option<ScheduleEntry> {
        let mut buckets = self.inner.lock();
        let bucket = buckets.get_mut(owner)?;
        let removed = bucket.remove(&handle);
        if bucket.is_empty() {
            buckets.remove(owner);
        }
        removed
    }

    /// Remove every entry for an owner, returning the handles removed.
    pub fn remove_owner(&self, owner: &str) -> Vec<Uuid> {
        match self.inner.lock().remove(owner) {
            Some(bucket) => bucket.into_keys().collect(),
            None => Vec::new(),
        }
    }

    pub fn get(&self, owner: &str, handle: Uuid) -> Option<ScheduleEntry> {
        self.inner.lock().get(owner)?.get(&handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Handles of one bucket in ascending timestamp order. Ties keep the sort's
/// stable order; any stable order is acceptable.
pub(crate) fn sorted_handles(bucket: &HashMap<Uuid, ScheduleEntry>) -> Vec<(DateTime<Utc>, Uuid)> {
    let mut pairs: Vec<(DateTime<Utc>, Uuid)> =
        bucket.values().map(|e| (e.timestamp, e.handle)).collect();
    pairs.sort_by_key(|(timestamp, _)| *timestamp);
    pairs
}
