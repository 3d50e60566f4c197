//! Beacon: threshold alerting for Graphite metrics and HTTP endpoints
//!
//! Each alert polls a source on its own schedule, evaluates a list of rules
//! against the returned values and notifies handlers when a target changes
//! level.
//!
//! # Rules
//!
//! - **Static thresholds**: `critical: > 90`, `warning: < 1MB`
//! - **Historical thresholds**: `warning: > historical * 1.5`
//! - **Chained conditions**: `critical: >= 5 AND < 10 OR == 20`
//! - **Units**: `10minute`, `2h`, `1.5KB`, `45%`
//!
//! # Example
//!
//! ```no_run
//! use beacon::config::{AlertConfig, Options};
//! use beacon::reactor::Reactor;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut options = Options::default();
//! options.graphite_url = "http://graphite.local".to_string();
//! options.alerts.push(
//!     AlertConfig::new("cpu", "servers.*.cpu.user", ["critical: > 90", "warning: > 75"])
//!         .with_interval("1minute"),
//! );
//!
//! let reactor = Reactor::new(options)?;
//! reactor.start()?;
//! tokio::signal::ctrl_c().await?;
//! reactor.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod config;
pub mod handlers;
pub mod reactor;
pub mod rules;
pub mod sources;
pub mod units;

pub use alerts::{Alert, AlertError, Level, NotificationEvent};
pub use config::{AlertConfig, ConfigError, Options};
pub use reactor::{Reactor, ReactorError};
pub use rules::{Rule, RuleSyntaxError};
pub use units::{Interval, InvalidDuration};
