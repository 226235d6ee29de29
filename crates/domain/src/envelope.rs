//! Worker dispatch envelope and the per-entry argument bag.

use std::fmt;
use std::sync::Arc;

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Callback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named app callback. The function itself lives behind an `Arc` and is
/// only ever invoked by the worker layer; everywhere else (logs, admin
/// entities, snapshots) the display name stands in for it.
#[derive(Clone)]
pub struct Callback {
    name: Arc<str>,
    func: Arc<dyn Fn(&Kwargs) + Send + Sync>,
}

impl Callback {
    pub fn new(name: impl Into<Arc<str>>, func: impl Fn(&Kwargs) + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the callback. Called from worker threads, never the tick loop.
    pub fn invoke(&self, kwargs: &Kwargs) {
        (self.func)(kwargs)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("name", &self.name).finish()
    }
}

impl Serialize for Callback {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kwargs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-entry arguments. The keys the scheduler interprets are typed fields;
/// everything else rides along in `rest` and is handed to the worker
/// untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Kwargs {
    /// Signed seconds added to the base (sun event or basetime).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_end: Option<i64>,
    /// Period in seconds for repeating absolute entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Explicit pin override; defaults to the owning app's pinning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<bool>,
    /// Explicit thread pin; implies `pin = true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_thread: Option<i32>,
    /// Wrapped state-callback fields.
    #[serde(rename = "__entity", default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(rename = "__attribute", default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(rename = "__new_state", default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<Value>,
    #[serde(rename = "__old_state", default, skip_serializing_if = "Option::is_none")]
    pub old_state: Option<Value>,
    /// Free-form user payload, passed through to the worker.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Kwargs {
    /// The wrapped state-callback view, when the `__entity` field is set.
    pub fn wrapped_state(&self) -> Option<WrappedState> {
        let entity = self.entity.clone()?;
        Some(WrappedState {
            entity,
            attribute: self.attribute.clone().unwrap_or_default(),
            new_state: self.new_state.clone().unwrap_or(Value::Null),
            old_state: self.old_state.clone().unwrap_or(Value::Null),
        })
    }

    /// Copy with the fields that are noise in human-facing output removed:
    /// the repeat interval plus any `constrain_*` / `_pin*` rest keys.
    pub fn sanitized(&self) -> Kwargs {
        let mut out = self.clone();
        out.interval = None;
        out.rest
            .retain(|k, _| !k.starts_with("constrain_") && !k.starts_with("_pin"));
        out
    }

    /// Compact `k=v` rendering for admin entities and snapshots.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(v) = self.offset {
            parts.push(format!("offset={v}"));
        }
        if let Some(v) = self.random_start {
            parts.push(format!("random_start={v}"));
        }
        if let Some(v) = self.random_end {
            parts.push(format!("random_end={v}"));
        }
        if let Some(v) = self.pin {
            parts.push(format!("pin={v}"));
        }
        if let Some(v) = self.pin_thread {
            parts.push(format!("pin_thread={v}"));
        }
        if let Some(e) = &self.entity {
            parts.push(format!("entity={e}"));
        }
        for (k, v) in &self.rest {
            match v {
                Value::String(s) => parts.push(format!("{k}={s}")),
                other => parts.push(format!("{k}={other}")),
            }
        }
        parts.join(",")
    }
}

/// Fields of a schedule entry that wraps a deferred state callback.
#[derive(Clone, Debug, Serialize)]
pub struct WrappedState {
    pub entity: String,
    pub attribute: String,
    pub new_state: Value,
    pub old_state: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One callback invocation, handed to the worker layer. The scheduler never
/// waits on the outcome.
#[derive(Clone, Debug, Serialize)]
pub struct DispatchEnvelope {
    /// App id captured when the entry was registered (survives reloads).
    pub id: Uuid,
    pub handle: Uuid,
    pub owner: String,
    /// App id at dispatch time, read from the registry under its lock.
    pub objectid: Uuid,
    #[serde(flatten)]
    pub payload: DispatchPayload,
    pub function: Callback,
    pub pin_app: bool,
    pub pin_thread: i32,
    pub kwargs: Kwargs,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchPayload {
    Scheduler,
    State {
        entity: String,
        attribute: String,
        new_state: Value,
        old_state: Value,
    },
}
