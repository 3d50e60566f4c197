//! Graphite render API source

use std::sync::Arc;

use async_trait::async_trait;

use super::fetch::{BasicAuth, FetchRequest, Fetcher, HttpFetcher, TransportError};
use super::record::{GraphiteRecord, Method, NanPolicy};
use super::{Sample, Source, SourceError};
use crate::alerts::{Alert, AlertError};
use crate::config::{AlertConfig, Options};
use crate::units::Interval;

/// Build a render API URL. `raw` asks for the wire format; without it the
/// URL is a browsable graph link. `None` if `base` is not a valid URL.
pub fn render_url(
    base: &str,
    query: &str,
    time_window: Interval,
    until: Interval,
    raw: bool,
) -> Option<String> {
    let mut url = reqwest::Url::parse(&format!("{}/render/", base.trim_end_matches('/'))).ok()?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("target", query);
        pairs.append_pair("from", &format!("-{}", (time_window + until).to_wire_format()));
        pairs.append_pair("until", &format!("-{}", until.to_wire_format()));
        if raw {
            pairs.append_pair("format", "raw");
        }
    }
    Some(url.into())
}

pub struct GraphiteSource {
    fetcher: Arc<dyn Fetcher>,
    request: FetchRequest,
    method: Method,
    policy: NanPolicy,
}

impl GraphiteSource {
    pub fn new(
        alert: &Alert,
        config: &AlertConfig,
        options: &Options,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, AlertError> {
        let method = match &config.method {
            Some(raw) => raw.parse::<Method>().map_err(|reason| AlertError::Invalid {
                name: alert.name.clone(),
                reason,
            })?,
            None => options.method,
        };

        let url = render_url(
            &options.graphite_url,
            &alert.query,
            alert.time_window,
            alert.until,
            true,
        )
        .ok_or_else(|| AlertError::Invalid {
            name: alert.name.clone(),
            reason: format!("invalid graphite_url {:?}", options.graphite_url),
        })?;

        let auth = options.auth_username.as_ref().map(|username| BasicAuth {
            username: username.clone(),
            password: options.auth_password.clone(),
        });

        let policy = NanPolicy {
            default_nan_value: config.default_nan_value.unwrap_or(options.default_nan_value),
            ignore_nan: config.ignore_nan.unwrap_or(options.ignore_nan),
        };

        Ok(Self {
            fetcher,
            request: FetchRequest::get(url)
                .with_timeouts(alert.timeouts)
                .with_auth(auth),
            method,
            policy,
        })
    }

    /// Factory registered under `graphite`
    pub fn build(
        alert: &Alert,
        config: &AlertConfig,
        options: &Options,
    ) -> Result<Arc<dyn Source>, AlertError> {
        let fetcher = HttpFetcher::new(alert.timeouts.connect, config.validate_cert.unwrap_or(true))
            .map_err(|source| AlertError::Transport {
                name: alert.name.clone(),
                source,
            })?;
        Ok(Arc::new(Self::new(alert, config, options, Arc::new(fetcher))?))
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

#[async_trait]
impl Source for GraphiteSource {
    async fn load(&self) -> Result<Vec<Sample>, SourceError> {
        let response = self.fetcher.fetch(&self.request).await?;
        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                url: self.request.url.clone(),
            }
            .into());
        }

        let records = GraphiteRecord::parse_all(&response.body, self.policy)?;
        Ok(records
            .into_iter()
            .map(|record| {
                let value = record.reduce(self.method);
                Sample::new(value, record.target)
            })
            .collect())
    }
}
