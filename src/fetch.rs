//! Network access for intercepted requests
//!
//! The [`Fetcher`] trait is the seam between the cache manager and the network,
//! so strategies can be exercised against recording fakes. [`HttpFetcher`] is
//! the reqwest-backed implementation used by the binary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use thiserror::Error;

use crate::http::{Request, Response};

/// Errors that can occur when sending a request to the network
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The network could not be reached
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    /// A request header could not be encoded
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),
}

/// Sends requests to the network
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs one network round trip
    ///
    /// Any HTTP status counts as success here; only transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Fetcher backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Create a new HttpFetcher with default settings
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a new HttpFetcher with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Create a new HttpFetcher whose requests time out after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .body(request.body.clone());

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeader(name.as_str().to_string()))?;
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
