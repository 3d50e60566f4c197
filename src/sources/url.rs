//! HTTP endpoint probe; the sample value is the response status code

use std::sync::Arc;

use async_trait::async_trait;

use super::fetch::{FetchRequest, Fetcher, HttpFetcher};
use super::{Sample, Source, SourceError};
use crate::alerts::{Alert, AlertError};
use crate::config::{AlertConfig, Options};

pub struct UrlSource {
    fetcher: Arc<dyn Fetcher>,
    request: FetchRequest,
}

impl UrlSource {
    pub fn new(alert: &Alert, config: &AlertConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, AlertError> {
        let method = match &config.method {
            Some(raw) => reqwest::Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(|_| {
                AlertError::Invalid {
                    name: alert.name.clone(),
                    reason: format!("invalid HTTP method {raw:?}"),
                }
            })?,
            None => reqwest::Method::GET,
        };

        Ok(Self {
            fetcher,
            request: FetchRequest::get(alert.query.clone())
                .with_method(method)
                .with_timeouts(alert.timeouts),
        })
    }

    /// Factory registered under `url`
    pub fn build(
        alert: &Alert,
        config: &AlertConfig,
        _options: &Options,
    ) -> Result<Arc<dyn Source>, AlertError> {
        let fetcher = HttpFetcher::new(alert.timeouts.connect, config.validate_cert.unwrap_or(true))
            .map_err(|source| AlertError::Transport {
                name: alert.name.clone(),
                source,
            })?;
        Ok(Arc::new(Self::new(alert, config, Arc::new(fetcher))?))
    }
}

#[async_trait]
impl Source for UrlSource {
    async fn load(&self) -> Result<Vec<Sample>, SourceError> {
        let response = self.fetcher.fetch(&self.request).await?;
        Ok(vec![Sample::new(
            Some(f64::from(response.status)),
            self.request.url.clone(),
        )])
    }
}
