//! HTTP transport used by the sources

use std::time::Duration;

use async_trait::async_trait;

/// Connect and total-request timeouts for one fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(20),
            request: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: reqwest::Method,
    pub timeouts: Timeouts,
    pub auth: Option<BasicAuth>,
}

impl FetchRequest {
    /// GET request with default timeouts and no auth
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::GET,
            timeouts: Timeouts::default(),
            auth: None,
        }
    }

    /// Use another HTTP verb
    pub fn with_method(mut self, method: reqwest::Method) -> Self {
        self.method = method;
        self
    }

    /// Set connect and request timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Send basic auth when present
    pub fn with_auth(mut self, auth: Option<BasicAuth>) -> Self {
        self.auth = auth;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network failure, timeout or unexpected status
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// Performs one request. Implemented over reqwest in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// reqwest-backed [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// The connect timeout and certificate validation are fixed per client;
    /// the total timeout is applied per request.
    pub fn new(connect_timeout: Duration, validate_cert: bool) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(!validate_cert)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeouts.request);

        if let Some(auth) = &request.auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_ref());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(url = %request.url, status, bytes = body.len(), "Fetched");

        Ok(FetchResponse { status, body })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let auth = BasicAuth {
            username: "user".into(),
            password: Some("secret".into()),
        };
        let timeouts = Timeouts {
            connect: Duration::from_secs(1),
            request: Duration::from_secs(5),
        };
        let request = FetchRequest::get("http://localhost/ping")
            .with_method(reqwest::Method::HEAD)
            .with_timeouts(timeouts)
            .with_auth(Some(auth.clone()));

        assert_eq!(request.method, reqwest::Method::HEAD);
        assert_eq!(request.timeouts, timeouts);
        assert_eq!(request.auth, Some(auth));
    }

    #[test]
    fn test_response_status() {
        let ok = FetchResponse {
            status: 204,
            body: String::new(),
        };
        assert!(ok.is_success());
        let moved = FetchResponse {
            status: 301,
            body: String::new(),
        };
        assert!(!moved.is_success());
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new(Duration::from_secs(2), false).is_ok());
    }
}
