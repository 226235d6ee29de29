//! Shared types for the hearth runtime: configuration, the common error
//! type, the worker dispatch envelope, and the collaborator traits the
//! scheduler is constructed against.

pub mod config;
pub mod envelope;
pub mod error;
pub mod runtime;

pub use config::Config;
pub use envelope::{Callback, DispatchEnvelope, DispatchPayload, Kwargs, WrappedState};
pub use error::{Error, Result};
pub use runtime::{AppInfo, AppRegistry, StateStore, WorkerPool};
