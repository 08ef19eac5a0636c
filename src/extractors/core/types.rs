use http::HeaderMap;
use thiserror::Error;
use url::Url;

use super::client::{ExtractorHttpClient, HttpClientError};
use super::hls::{HlsOptions, extract_m3u8_formats};

/// Failures surfaced by extractors. Nothing is retried.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Http(#[from] HttpClientError),
    #[error("failed to parse JSON from {url}: {source}")]
    Json {
        url: Url,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid HLS manifest {url}: {reason}")]
    Manifest { url: Url, reason: String },
}

pub type ExtractorResult<T> = Result<T, ExtractorError>;

/// One playable rendition of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFormat {
    pub format_id: String,
    pub url: Url,
    pub manifest_url: Url,
    pub protocol: &'static str,
    pub ext: &'static str,
    /// Total bitrate in kbit/s.
    pub tbr: Option<f64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub fps: Option<f64>,
    pub codecs: Option<String>,
    pub is_live: bool,
    pub http_headers: HeaderMap,
}

/// Resolved live stream descriptor.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub hls_url: Url,
    pub is_live: bool,
    /// Headers the CDN expects on manifest and segment requests.
    pub http_headers: HeaderMap,
}

impl StreamInfo {
    /// Downloads and parses the HLS manifest. Nothing is fetched until this
    /// is called.
    pub async fn formats(&self, client: &dyn ExtractorHttpClient) -> ExtractorResult<Vec<StreamFormat>> {
        let response = client
            .get(&self.hls_url, &self.http_headers)
            .await?
            .error_for_status()?;

        extract_m3u8_formats(
            &response.body,
            &response.url,
            &HlsOptions {
                ext: "mp4",
                format_id_prefix: "hls",
                live: self.is_live,
                http_headers: &self.http_headers,
            },
        )
    }
}
