//! Compiled alert definition

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use super::history::capacity_for;
use super::scheduler::{Schedule, ScheduleError};
use super::Level;
use crate::config::{AlertConfig, IntervalSpec, Options};
use crate::rules::{sort_by_severity, Rule, RuleSyntaxError};
use crate::sources::{render_url, Timeouts, TransportError};
use crate::units::{Format, Interval, InvalidDuration};

/// Alert construction errors. Each one rejects a single alert.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Alert's name should be defined and not empty")]
    MissingName,

    #[error("{0}: alert's query should be defined and not empty")]
    MissingQuery(String),

    #[error("{0}: alert's rules are empty")]
    NoRules(String),

    #[error("{name}: {source}")]
    Rule {
        name: String,
        source: RuleSyntaxError,
    },

    #[error("{name}: {source}")]
    Duration {
        name: String,
        source: InvalidDuration,
    },

    #[error("{name}: {source}")]
    Schedule {
        name: String,
        source: ScheduleError,
    },

    #[error("{name}: unknown source {tag:?}")]
    UnknownSource { name: String, tag: String },

    #[error("{name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("{name}: {source}")]
    Transport {
        name: String,
        source: TransportError,
    },
}

/// An alert compiled from its configuration record and the global options.
/// Immutable once built; the monitor owns the mutable state.
#[derive(Debug, Clone)]
pub struct Alert {
    pub name: String,
    pub source: String,
    pub query: String,
    pub schedule: Schedule,
    /// Poll period; for cron schedules the gap between two firings
    pub interval: Interval,
    pub time_window: Interval,
    pub until: Interval,
    /// Sorted most severe first
    pub rules: Vec<Rule>,
    pub history_size: usize,
    pub no_data: Level,
    pub loading_error: Level,
    pub send_initial: bool,
    pub format: Format,
    pub timeouts: Timeouts,
    /// Base for graph links in notifications
    pub public_url: String,
}

impl Alert {
    pub fn from_config(config: &AlertConfig, options: &Options) -> Result<Self, AlertError> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(AlertError::MissingName);
        }
        if config.query.trim().is_empty() {
            return Err(AlertError::MissingQuery(name));
        }
        if config.rules.is_empty() {
            return Err(AlertError::NoRules(name));
        }

        let mut rules = config
            .rules
            .iter()
            .map(|raw| Rule::parse(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| AlertError::Rule {
                name: name.clone(),
                source,
            })?;
        sort_by_severity(&mut rules);

        let duration = |spec: &IntervalSpec| {
            spec.to_interval().map_err(|source| AlertError::Duration {
                name: name.clone(),
                source,
            })
        };

        let schedule = Schedule::parse(config.interval.as_ref().unwrap_or(&options.interval))
            .map_err(|source| AlertError::Schedule {
                name: name.clone(),
                source,
            })?;
        let interval = schedule.period();

        let time_window = match config.time_window.as_ref().or(options.time_window.as_ref()) {
            Some(spec) => duration(spec)?,
            None => interval,
        };
        let until = duration(config.until.as_ref().unwrap_or(&options.until))?;
        let window = duration(config.history_size.as_ref().unwrap_or(&options.history_size))?;

        let seconds = |secs: f64, field: &str| {
            Duration::try_from_secs_f64(secs).map_err(|_| AlertError::Invalid {
                name: name.clone(),
                reason: format!("{field} must be a non-negative number of seconds"),
            })
        };
        let timeouts = Timeouts {
            connect: seconds(
                config.connect_timeout.unwrap_or(options.connect_timeout),
                "connect_timeout",
            )?,
            request: seconds(
                config.request_timeout.unwrap_or(options.request_timeout),
                "request_timeout",
            )?,
        };

        Ok(Self {
            history_size: capacity_for(window.as_millis(), interval.as_millis()),
            source: config.source.clone(),
            query: config.query.clone(),
            schedule,
            interval,
            time_window,
            until,
            rules,
            no_data: config.no_data.unwrap_or(options.no_data),
            loading_error: config.loading_error.unwrap_or(options.loading_error),
            send_initial: config.send_initial.unwrap_or(options.send_initial),
            format: config.format.unwrap_or(options.format),
            timeouts,
            public_url: options.public_url().to_string(),
            name,
        })
    }

    /// Identity used to detect duplicates on (re)configuration
    pub fn key(&self) -> (String, String) {
        (self.name.clone(), self.source.clone())
    }

    /// Browsable graph for a target; only graphite alerts have one
    pub fn graph_url(&self, target: &str) -> Option<String> {
        if self.source != "graphite" {
            return None;
        }
        render_url(&self.public_url, target, self.time_window, self.until, false)
    }
}

impl PartialEq for Alert {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.source == other.source
    }
}

impl Eq for Alert {}

impl Hash for Alert {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.source.hash(state);
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.schedule)
    }
}
