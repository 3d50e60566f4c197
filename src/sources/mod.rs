//! Metric sources
//!
//! A source loads the current samples for one alert. `graphite` queries the
//! render API, `url` probes an HTTP endpoint. Sources are built through a
//! [`SourceRegistry`] keyed by the alert's `source` tag.

pub mod fetch;
pub mod graphite;
pub mod record;
pub mod url;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::alerts::{Alert, AlertError};
use crate::config::{AlertConfig, Options};

pub use fetch::{BasicAuth, FetchRequest, FetchResponse, Fetcher, HttpFetcher, Timeouts, TransportError};
pub use graphite::{render_url, GraphiteSource};
pub use record::{DecodeError, GraphiteRecord, Method, NanPolicy};
pub use url::UrlSource;

/// One reduced value for one target; `None` when the series had no data
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: Option<f64>,
    pub target: String,
}

impl Sample {
    pub fn new(value: Option<f64>, target: impl Into<String>) -> Self {
        Self {
            value,
            target: target.into(),
        }
    }
}

/// Failure of one load cycle
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[async_trait]
pub trait Source: Send + Sync {
    async fn load(&self) -> Result<Vec<Sample>, SourceError>;
}

/// Builds a source for a compiled alert
pub type SourceFactory =
    Arc<dyn Fn(&Alert, &AlertConfig, &Options) -> Result<Arc<dyn Source>, AlertError> + Send + Sync>;

/// Source constructors by tag
#[derive(Clone, Default)]
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `graphite` and `url`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("graphite", Arc::new(GraphiteSource::build));
        registry.register("url", Arc::new(UrlSource::build));
        registry
    }

    /// Add or replace the factory for `tag`
    pub fn register(&mut self, tag: impl Into<String>, factory: SourceFactory) {
        self.factories.insert(tag.into(), factory);
    }

    /// Remove every factory
    pub fn clear(&mut self) {
        self.factories.clear();
    }

    /// Whether a factory is registered under `tag`
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Build the source for `alert` from its tag
    pub fn build(
        &self,
        alert: &Alert,
        config: &AlertConfig,
        options: &Options,
    ) -> Result<Arc<dyn Source>, AlertError> {
        let factory = self
            .factories
            .get(&alert.source)
            .ok_or_else(|| AlertError::UnknownSource {
                name: alert.name.clone(),
                tag: alert.source.clone(),
            })?;
        factory(alert, config, options)
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.factories.keys().collect();
        tags.sort();
        f.debug_struct("SourceRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Sample>);

    #[async_trait]
    impl Source for Fixed {
        async fn load(&self) -> Result<Vec<Sample>, SourceError> {
            Ok(self.0.clone())
        }
    }

    fn alert(source: &str) -> (Alert, AlertConfig, Options) {
        let options = Options::default();
        let config = AlertConfig::new("test", "http://localhost/health", ["critical: != 200"])
            .with_source(source);
        let alert = Alert::from_config(&config, &options).unwrap();
        (alert, config, options)
    }

    #[tokio::test]
    async fn test_registry_build_and_register() {
        let mut registry = SourceRegistry::with_defaults();
        assert!(registry.contains("graphite"));
        assert!(registry.contains("url"));

        let (alert, config, options) = alert("fixed");
        let err = registry.build(&alert, &config, &options).err().unwrap();
        assert!(matches!(err, AlertError::UnknownSource { .. }));

        registry.register(
            "fixed",
            Arc::new(
                |_: &Alert, _: &AlertConfig, _: &Options| -> Result<Arc<dyn Source>, AlertError> {
                    Ok(Arc::new(Fixed(vec![Sample::new(Some(1.0), "a")])))
                },
            ),
        );
        let source = registry.build(&alert, &config, &options).unwrap();
        assert_eq!(source.load().await.unwrap(), vec![Sample::new(Some(1.0), "a")]);
    }

    #[test]
    fn test_registry_clear() {
        let mut registry = SourceRegistry::with_defaults();
        registry.clear();
        assert!(!registry.contains("graphite"));

        let (alert, config, options) = alert("url");
        assert!(registry.build(&alert, &config, &options).is_err());
    }
}
