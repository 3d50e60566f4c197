//! Alert evaluation engine
//!
//! An [`Alert`] is compiled once from configuration. An [`AlertMonitor`]
//! polls its source on schedule and runs every sample through the per-target
//! [`AlertState`], emitting [`NotificationEvent`]s on level changes.

pub mod alert;
pub mod history;
pub mod level;
pub mod scheduler;
pub mod state;

pub use alert::{Alert, AlertError};
pub use history::{capacity_for, History};
pub use level::Level;
pub use scheduler::{normalize_cron, AlertMonitor, Schedule, ScheduleError};
pub use state::{AlertState, EventValue, NotificationEvent, NotificationKind, LOADING, WAITING};
