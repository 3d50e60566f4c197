//! Forwards notifications to an HTTP endpoint

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{short_message, Handler, HandlerError};
use crate::alerts::{EventValue, NotificationEvent, NotificationKind};
use crate::config::Options;
use crate::units::plain_number;

/// Sends `alert`, `desc`, `level`, `target`, `rule`, `value` and `graph_url`
/// plus the configured `params`. GET puts them in the query string, other
/// methods send a form body.
pub struct HttpHandler {
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    params: BTreeMap<String, String>,
    prefix: String,
}

impl HttpHandler {
    pub fn new(options: &Options) -> Result<Self, HandlerError> {
        let http = options
            .http
            .as_ref()
            .filter(|http| !http.url.trim().is_empty())
            .ok_or_else(|| HandlerError::Init("http: URL is not defined".to_string()))?;

        let method = reqwest::Method::from_bytes(http.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| HandlerError::Init(format!("http: invalid method {:?}", http.method)))?;

        let timeout = Duration::try_from_secs_f64(options.request_timeout)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| {
                HandlerError::Init(format!("http: invalid request_timeout {}", options.request_timeout))
            })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandlerError::Init(format!("http: failed to build client: {e}")))?;

        Ok(Self {
            client,
            url: http.url.clone(),
            method,
            params: http.params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            prefix: options.prefix.clone(),
        })
    }

    /// Fields sent for one event; configured params win on conflicts
    pub fn payload(&self, event: &NotificationEvent) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("alert".to_string(), event.alert.name.clone());
        data.insert("desc".to_string(), short_message(&self.prefix, event));
        data.insert("level".to_string(), event.level.to_string());
        data.insert("target".to_string(), event.target.clone());

        if let Some(rule) = &event.rule {
            data.insert("rule".to_string(), rule.raw().to_string());
        }

        if event.kind == NotificationKind::Source && event.alert.source == "graphite" {
            if let Some(url) = event.graph_url() {
                data.insert("graph_url".to_string(), url);
            }
            if let EventValue::Number(value) = event.value {
                data.insert("value".to_string(), plain_number(value));
            }
        }

        data.extend(self.params.clone());
        data
    }
}

#[async_trait]
impl Handler for HttpHandler {
    fn name(&self) -> &str {
        "http"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<(), HandlerError> {
        tracing::debug!(handler = "http", level = %event.level, "Notify");

        let data = self.payload(event);
        let request = self.client.request(self.method.clone(), &self.url);
        let request = if self.method == reqwest::Method::GET {
            request.query(&data)
        } else {
            request.form(&data)
        };

        let response = request
            .send()
            .await
            .map_err(|e| HandlerError::Http(format!("Failed to send notification: {e}")))?;

        if !response.status().is_success() {
            return Err(HandlerError::Status(response.status().as_u16()));
        }

        tracing::debug!(alert = %event.alert.name, url = %self.url, "HTTP notification sent");
        Ok(())
    }
}
