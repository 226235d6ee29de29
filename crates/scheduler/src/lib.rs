//! Time-driven callback scheduler for the hearth app runtime.
//!
//! Apps register timed callbacks — absolute datetimes, fixed-period
//! repeats, and solar events — and the scheduler fires them onto the
//! worker-dispatch layer while maintaining a coherent virtual wall clock.
//! The clock runs in real time or in accelerated "time travel" mode for
//! deterministic testing.
//!
//! Entry point: build a [`Scheduler`] from a [`hearth_domain::Config`] and
//! the runtime collaborators, then drive it with [`Scheduler::run`].

pub mod admin;
pub mod clock;
mod dispatch;
pub mod entry;
pub mod parse;
pub mod scheduler;
pub mod store;
pub mod sun;
mod tick;

pub use admin::{AdminEvent, AdminSink, CallbackAttributes};
pub use entry::{EntryKind, EntrySnapshot, ScheduleEntry};
pub use parse::{ParsedTime, Sun};
pub use scheduler::Scheduler;
pub use sun::SunState;
