//! HTTP transport abstraction used by extractors.

use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

/// Contract for the transport extractors fetch pages, APIs and manifests with.
#[async_trait]
pub trait ExtractorHttpClient: Send + Sync {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, HttpClientError>;
}

/// Minimal response representation returned by the transport abstraction.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Fails with `HttpClientError::Status` on a non-2xx status.
    pub fn error_for_status(self) -> Result<Self, HttpClientError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HttpClientError::Status {
                status: self.status,
                url: self.url,
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("HTTP Error {status} for {url}")]
    Status { status: u16, url: Url },
}
