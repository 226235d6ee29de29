//! Collaborator interfaces the scheduler is constructed against.
//!
//! The scheduler never reaches back through a runtime god-object; each
//! collaborator is injected as a trait object at construction time.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::DispatchEnvelope;
use crate::error::Result;

/// The worker layer. `dispatch` enqueues a callback invocation and returns;
/// it must not block on the callback itself.
pub trait WorkerPool: Send + Sync {
    fn dispatch(&self, envelope: DispatchEnvelope) -> Result<()>;
}

/// One registered app, as seen by the scheduler.
#[derive(Clone, Debug)]
pub struct AppInfo {
    pub id: Uuid,
    pub pin_app: bool,
    /// -1 means unpinned.
    pub pin_thread: i32,
}

/// The app registry. Lookups are snapshots taken under the registry's own
/// lock; `check_app_updates` kicks off a reload and returns immediately.
pub trait AppRegistry: Send + Sync {
    fn lookup(&self, owner: &str) -> Option<AppInfo>;
    fn check_app_updates(&self, scope: &str);
}

/// The entity store behind the admin projection. All calls are reached via
/// a fire-and-forget channel; delivery is best-effort.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn add_entity(&self, namespace: &str, entity_id: &str, state: &str, attributes: Value);
    async fn set_state(&self, namespace: &str, entity_id: &str, attributes: Value);
    async fn remove_entity(&self, namespace: &str, entity_id: &str);
}
