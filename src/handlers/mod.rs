//! Notification handlers
//!
//! Handlers receive every [`NotificationEvent`] for the levels they are
//! configured under. They are created by name through a [`HandlerRegistry`]
//! and cached until the next reload.

pub mod http;
pub mod log;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::alerts::{NotificationEvent, NotificationKind};
use crate::config::Options;

pub use self::http::HttpHandler;
pub use self::log::LogHandler;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler init error: {0}")]
    Init(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Delivery timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &NotificationEvent) -> Result<(), HandlerError>;
}

/// Builds a handler from the global options
pub type HandlerFactory =
    Arc<dyn Fn(&Options) -> Result<Arc<dyn Handler>, HandlerError> + Send + Sync>;

/// Handler constructors by name plus the instances built so far
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
    loaded: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `log` and `http`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "log",
            Arc::new(|options: &Options| -> Result<Arc<dyn Handler>, HandlerError> {
                Ok(Arc::new(LogHandler::new(options)))
            }),
        );
        registry.register(
            "http",
            Arc::new(|options: &Options| -> Result<Arc<dyn Handler>, HandlerError> {
                Ok(Arc::new(HttpHandler::new(options)?))
            }),
        );
        registry
    }

    /// Add or replace the factory for `name`
    pub fn register(&mut self, name: impl Into<String>, factory: HandlerFactory) {
        let name = name.into();
        tracing::debug!(handler = %name, "Register handler");
        self.factories.insert(name, factory);
    }

    /// Drop every built instance so the next [`get`](Self::get) rebuilds
    /// with fresh options
    pub fn clear(&mut self) {
        self.loaded.clear();
    }

    /// Whether a factory is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Cached instance for `name`, built on first use
    pub fn get(&mut self, name: &str, options: &Options) -> Result<Arc<dyn Handler>, HandlerError> {
        if let Some(handler) = self.loaded.get(name) {
            return Ok(Arc::clone(handler));
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| HandlerError::Init(format!("unknown handler {name:?}")))?;
        let handler = factory(options)?;
        tracing::debug!(handler = %name, "Handler initialized");
        self.loaded.insert(name.to_string(), Arc::clone(&handler));
        Ok(handler)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("names", &names)
            .field("loaded", &self.loaded.len())
            .finish()
    }
}

/// One-line description of an event, shared by the handlers
pub fn short_message(prefix: &str, event: &NotificationEvent) -> String {
    let level = event.level.as_str().to_uppercase();
    let name = &event.alert.name;
    let value = event.value_text();

    match event.kind {
        NotificationKind::Common => format!("{prefix} {level} <{name}> {value}"),
        NotificationKind::Source if event.alert.source == "url" => {
            format!("{prefix} {level} <{name}> {} returned {value}", event.target)
        }
        NotificationKind::Source => {
            let mut message = format!("{prefix} {level} <{name}> {}: {value}", event.target);
            if let Some(rule) = &event.rule {
                message.push_str(&format!(" (rule: {rule})"));
            }
            message
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, AlertState, EventValue, Level, LOADING};
    use crate::config::AlertConfig;
    use crate::sources::Sample;

    fn event(config: AlertConfig, value: f64, target: &str) -> NotificationEvent {
        let alert = Arc::new(Alert::from_config(&config, &Options::default()).unwrap());
        let mut state = AlertState::new(alert.history_size);
        state
            .check(&alert, &[Sample::new(Some(value), target)])
            .pop()
            .unwrap()
    }

    #[test]
    fn test_registry_caches_instances() {
        let mut registry = HandlerRegistry::with_defaults();
        let options = Options::default();

        let first = registry.get("log", &options).unwrap();
        let second = registry.get("log", &options).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "log");

        registry.clear();
        let third = registry.get("log", &options).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_registry_init_errors() {
        let mut registry = HandlerRegistry::with_defaults();
        let options = Options::default();

        assert!(matches!(registry.get("pager", &options), Err(HandlerError::Init(_))));
        // http needs a url
        assert!(matches!(registry.get("http", &options), Err(HandlerError::Init(_))));
        assert!(registry.contains("http"));
    }

    #[test]
    fn test_short_message() {
        let config = AlertConfig::new("cpu", "*.cpu", ["critical: > 90"]);
        let message = short_message("[BEACON]", &event(config, 95.5, "host.cpu"));
        assert_eq!(
            message,
            "[BEACON] CRITICAL <cpu> host.cpu: 95.5 (rule: critical: > 90)"
        );

        let config = AlertConfig::new("site", "http://site/", ["critical: != 200"]).with_source("url");
        let message = short_message("[BEACON]", &event(config, 502.0, "http://site/"));
        assert_eq!(message, "[BEACON] CRITICAL <site> http://site/ returned 502");
    }

    #[test]
    fn test_short_message_common() {
        let config = AlertConfig::new("cpu", "*.cpu", ["critical: > 90"]);
        let alert = Arc::new(Alert::from_config(&config, &Options::default()).unwrap());
        let mut state = AlertState::new(alert.history_size);
        let event = state
            .transition(
                &alert,
                Level::Critical,
                EventValue::Message("Loading error: No data".into()),
                LOADING,
                NotificationKind::Common,
                None,
            )
            .unwrap();
        assert_eq!(
            short_message(">>", &event),
            ">> CRITICAL <cpu> Loading error: No data"
        );
    }
}
