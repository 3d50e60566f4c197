//! Global options and per-alert configuration records

pub mod loader;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::alerts::Level;
use crate::sources::record::Method;
use crate::units::{Format, Interval, InvalidDuration};

pub use loader::{load, ConfigError};

/// A duration-valued option: either duration text (`10minute`, or a cron
/// expression where schedules are accepted) or a bare number of seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntervalSpec {
    Seconds(f64),
    Text(String),
}

impl IntervalSpec {
    pub fn text(s: impl Into<String>) -> Self {
        IntervalSpec::Text(s.into())
    }

    /// Five or six whitespace-separated fields
    pub fn is_cron(&self) -> bool {
        match self {
            IntervalSpec::Text(s) => matches!(s.split_whitespace().count(), 5 | 6),
            IntervalSpec::Seconds(_) => false,
        }
    }

    pub fn to_interval(&self) -> Result<Interval, InvalidDuration> {
        match self {
            IntervalSpec::Seconds(secs) => Interval::from_secs_f64(*secs),
            IntervalSpec::Text(s) => Interval::parse(s),
        }
    }
}

impl std::fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalSpec::Seconds(secs) => write!(f, "{secs}"),
            IntervalSpec::Text(s) => f.write_str(s),
        }
    }
}

/// Options for the `http` notification handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpHandlerOptions {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// Global options. Every alert inherits these unless it overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub graphite_url: String,
    /// Base for links in notifications; falls back to `graphite_url`
    pub public_graphite_url: Option<String>,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,

    pub interval: IntervalSpec,
    pub time_window: Option<IntervalSpec>,
    pub until: IntervalSpec,
    pub history_size: IntervalSpec,
    /// How often dedup state is cleared so unresolved faults re-alert
    pub repeat_interval: IntervalSpec,

    pub method: Method,
    pub format: Format,
    pub no_data: Level,
    pub loading_error: Level,
    pub send_initial: bool,
    /// Seconds
    pub request_timeout: f64,
    /// Seconds
    pub connect_timeout: f64,
    pub default_nan_value: f64,
    pub ignore_nan: bool,

    /// Poll every alert every 5 seconds regardless of its interval
    pub debug: bool,
    pub logging: String,
    pub prefix: String,
    pub pidfile: Option<PathBuf>,

    pub critical_handlers: Vec<String>,
    pub warning_handlers: Vec<String>,
    pub normal_handlers: Vec<String>,
    pub no_data_handlers: Vec<String>,
    pub http: Option<HttpHandlerOptions>,

    pub alerts: Vec<AlertConfig>,
    pub include: Vec<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            graphite_url: "http://localhost".to_string(),
            public_graphite_url: None,
            auth_username: None,
            auth_password: None,
            interval: IntervalSpec::text("10minute"),
            time_window: None,
            until: IntervalSpec::text("0second"),
            history_size: IntervalSpec::text("1day"),
            repeat_interval: IntervalSpec::text("2hour"),
            method: Method::Average,
            format: Format::Short,
            no_data: Level::Critical,
            loading_error: Level::Critical,
            send_initial: false,
            request_timeout: 20.0,
            connect_timeout: 20.0,
            default_nan_value: 0.0,
            ignore_nan: false,
            debug: false,
            logging: "info".to_string(),
            prefix: "[BEACON]".to_string(),
            pidfile: None,
            critical_handlers: vec!["log".to_string()],
            warning_handlers: vec!["log".to_string()],
            normal_handlers: vec!["log".to_string()],
            no_data_handlers: vec!["log".to_string()],
            http: None,
            alerts: Vec::new(),
            include: Vec::new(),
        }
    }
}

impl Options {
    /// Handler names configured for a level
    pub fn handlers_for(&self, level: Level) -> &[String] {
        match level {
            Level::Critical => &self.critical_handlers,
            Level::Warning => &self.warning_handlers,
            Level::Normal => &self.normal_handlers,
            Level::NoData => &self.no_data_handlers,
        }
    }

    /// Link base for notifications
    pub fn public_url(&self) -> &str {
        self.public_graphite_url
            .as_deref()
            .unwrap_or(&self.graphite_url)
    }
}

fn default_source() -> String {
    "graphite".to_string()
}

/// One alert as written in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub rules: Vec<String>,

    pub interval: Option<IntervalSpec>,
    pub time_window: Option<IntervalSpec>,
    pub until: Option<IntervalSpec>,
    pub history_size: Option<IntervalSpec>,

    pub no_data: Option<Level>,
    pub loading_error: Option<Level>,
    pub send_initial: Option<bool>,

    /// Aggregation for graphite alerts, HTTP verb for url alerts
    pub method: Option<String>,
    pub format: Option<Format>,
    pub request_timeout: Option<f64>,
    pub connect_timeout: Option<f64>,
    pub default_nan_value: Option<f64>,
    pub ignore_nan: Option<bool>,
    pub validate_cert: Option<bool>,
}

impl AlertConfig {
    /// Minimal record, mostly for tests and programmatic setups
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        rules: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            source: default_source(),
            rules: rules.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(IntervalSpec::Text(interval.into()));
        self
    }

    pub fn with_history_size(mut self, history_size: impl Into<String>) -> Self {
        self.history_size = Some(IntervalSpec::Text(history_size.into()));
        self
    }

    pub fn with_time_window(mut self, time_window: impl Into<String>) -> Self {
        self.time_window = Some(IntervalSpec::Text(time_window.into()));
        self
    }
}
