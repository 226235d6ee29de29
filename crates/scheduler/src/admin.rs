//! Admin projection: every live entry is mirrored as an external entity
//! for observability.
//!
//! The scheduler pushes events onto an unbounded channel and never waits;
//! a separate task drains the channel into the state store. Delivery is
//! best-effort and carries no correctness weight.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use hearth_domain::StateStore;

/// Namespace the projected entities live in.
pub const NAMESPACE: &str = "admin";

/// Entity id for one entry's projection.
pub fn entity_id(handle: Uuid) -> String {
    format!("scheduler_callback.{}", handle.simple())
}

/// Attributes of a projected entry.
#[derive(Clone, Debug, Serialize)]
pub struct CallbackAttributes {
    pub app: String,
    /// Naive local `YYYY-MM-DD HH:MM:SS` of the next fire.
    pub execution_time: String,
    /// Formatted repeat period.
    pub repeat: String,
    pub function: String,
    pub pinned: bool,
    pub pinned_thread: i32,
    /// Counters maintained by the worker layer, seeded at zero.
    pub fired: u64,
    pub executed: u64,
    pub kwargs: String,
}

#[derive(Clone, Debug)]
pub enum AdminEvent {
    Register {
        handle: Uuid,
        attributes: CallbackAttributes,
    },
    Executed {
        handle: Uuid,
        execution_time: String,
    },
    Remove {
        handle: Uuid,
    },
}

/// Fire-and-forget sender half held by the scheduler.
#[derive(Clone)]
pub struct AdminSink {
    tx: mpsc::UnboundedSender<AdminEvent>,
}

impl AdminSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AdminEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn register(&self, handle: Uuid, attributes: CallbackAttributes) {
        let _ = self.tx.send(AdminEvent::Register { handle, attributes });
    }

    pub fn executed(&self, handle: Uuid, execution_time: String) {
        let _ = self.tx.send(AdminEvent::Executed {
            handle,
            execution_time,
        });
    }

    pub fn remove(&self, handle: Uuid) {
        let _ = self.tx.send(AdminEvent::Remove { handle });
    }
}

/// Drain admin events into the state store until every sink is dropped.
pub fn spawn_projection(
    mut rx: mpsc::UnboundedReceiver<AdminEvent>,
    store: Arc<dyn StateStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AdminEvent::Register { handle, attributes } => {
                    let attributes =
                        serde_json::to_value(&attributes).unwrap_or(Value::Null);
                    store
                        .add_entity(NAMESPACE, &entity_id(handle), "active", attributes)
                        .await;
                }
                AdminEvent::Executed {
                    handle,
                    execution_time,
                } => {
                    store
                        .set_state(
                            NAMESPACE,
                            &entity_id(handle),
                            serde_json::json!({ "execution_time": execution_time }),
                        )
                        .await;
                }
                AdminEvent::Remove { handle } => {
                    store.remove_entity(NAMESPACE, &entity_id(handle)).await;
                }
            }
        }
        tracing::debug!("admin projection drained");
    })
}
