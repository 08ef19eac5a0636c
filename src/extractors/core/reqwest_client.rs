//! Reqwest-based implementation of the `ExtractorHttpClient` trait.

use async_trait::async_trait;
use http::{
    HeaderMap as HttpHeaderMap, HeaderName as HttpHeaderName, HeaderValue as HttpHeaderValue,
};
use reqwest::{Client, header::HeaderMap};
use url::Url;

use super::client::{ExtractorHttpClient, HttpClientError, HttpResponse};
use crate::config::HttpConfig;

/// Reqwest-backed HTTP client with a persistent cookie store.
pub struct ReqwestExtractorHttpClient {
    client: Client,
}

impl ReqwestExtractorHttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .cookie_store(true)
            .build()
            .map_err(|err| HttpClientError::Transport(err.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtractorHttpClient for ReqwestExtractorHttpClient {
    async fn get(
        &self,
        url: &Url,
        headers: &HttpHeaderMap,
    ) -> Result<HttpResponse, HttpClientError> {
        log::debug!("GET {url}");
        let response = self
            .client
            .get(url.as_str())
            .headers(convert_headers(headers)?)
            .send()
            .await
            .map_err(|err| HttpClientError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = convert_back_headers(response.headers())?;
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| HttpClientError::Transport(err.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

fn convert_headers(headers: &HttpHeaderMap) -> Result<HeaderMap, HttpClientError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|err| HttpClientError::Transport(err.to_string()))?;
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| HttpClientError::Transport(err.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn convert_back_headers(map: &HeaderMap) -> Result<HttpHeaderMap, HttpClientError> {
    let mut headers = HttpHeaderMap::new();
    for (name, value) in map.iter() {
        let http_name = HttpHeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|err| HttpClientError::Transport(err.to_string()))?;
        let http_value = HttpHeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| HttpClientError::Transport(err.to_string()))?;
        headers.append(http_name, http_value);
    }
    Ok(headers)
}
