//! Live channels of Faulio-powered broadcaster sites (aloula.sba.sa,
//! maraya.sba.net.ae).
//!
//! The channel page embeds the API base in a `TRANSLATIONS_API_URL`
//! assignment; the API's channel list maps page slugs to HLS manifests.

use std::sync::Arc;

use http::HeaderMap;
use http::header::{HeaderValue, ORIGIN, REFERER};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

use super::core::{ExtractorError, ExtractorHttpClient, ExtractorResult, StreamInfo};

static VALID_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(?P<domain>aloula\.sba\.sa|maraya\.sba\.net\.ae)/(?:en/)?live/(?P<slug>[a-zA-Z0-9\-]+)",
    )
    .unwrap()
});

static API_BASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"TRANSLATIONS_API_URL\s*:\s*"(https?://[^"]+)""#).unwrap());

/// Resolves live channel pages into HLS stream descriptors.
pub struct FaulioLiveExtractor {
    client: Arc<dyn ExtractorHttpClient>,
}

impl FaulioLiveExtractor {
    pub const KEY: &'static str = "FaulioLive";

    pub fn new(client: Arc<dyn ExtractorHttpClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &dyn ExtractorHttpClient {
        self.client.as_ref()
    }

    pub fn suitable(url: &str) -> bool {
        VALID_URL_RE.is_match(url)
    }

    pub async fn extract(&self, url: &str) -> ExtractorResult<StreamInfo> {
        let caps = VALID_URL_RE
            .captures(url)
            .ok_or_else(|| ExtractorError::UnsupportedUrl(url.to_string()))?;
        let domain = &caps["domain"];
        let slug = &caps["slug"];

        let page_url = Url::parse(url).map_err(|_| ExtractorError::UnsupportedUrl(url.to_string()))?;
        log::info!("{slug}: Downloading webpage");
        let webpage = self
            .client
            .get(&page_url, &HeaderMap::new())
            .await?
            .error_for_status()?
            .text();

        let api_base = API_BASE_RE
            .captures(&webpage)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                ExtractorError::NotFound("Could not find TRANSLATIONS_API_URL in the page".into())
            })?;

        let channels_url = Url::parse(&format!("{api_base}/channels")).map_err(|_| {
            ExtractorError::NotFound(format!("Invalid TRANSLATIONS_API_URL {api_base:?}"))
        })?;
        log::info!("{slug}: Downloading channel list");
        let response = self
            .client
            .get(&channels_url, &HeaderMap::new())
            .await?
            .error_for_status()?;
        let channels: Value =
            serde_json::from_slice(&response.body).map_err(|source| ExtractorError::Json {
                url: channels_url.clone(),
                source,
            })?;

        let channel = channels
            .as_array()
            .into_iter()
            .flatten()
            .find(|channel| channel.get("url").and_then(scalar_to_string).as_deref() == Some(slug))
            .ok_or_else(|| ExtractorError::NotFound(format!("Channel \"{slug}\" not found in API")))?;

        let hls_not_found = || ExtractorError::NotFound(format!("HLS stream not found for channel \"{slug}\""));
        let hls_url = channel
            .pointer("/streams/hls")
            .and_then(Value::as_str)
            .filter(|hls| !hls.is_empty())
            .ok_or_else(hls_not_found)?;
        let hls_url = Url::parse(hls_url).map_err(|_| hls_not_found())?;

        let id = channel
            .get("id")
            .and_then(scalar_to_string)
            .unwrap_or_else(|| slug.to_string());

        Ok(StreamInfo {
            id,
            title: channel.get("title").and_then(Value::as_str).map(str::to_string),
            description: channel
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            hls_url,
            is_live: true,
            http_headers: site_headers(domain)?,
        })
    }
}

/// Referer and Origin the CDN checks on manifest requests.
fn site_headers(domain: &str) -> ExtractorResult<HeaderMap> {
    let invalid = |_| ExtractorError::UnsupportedUrl(domain.to_string());
    let mut headers = HeaderMap::new();
    headers.insert(REFERER, HeaderValue::from_str(&format!("https://{domain}/")).map_err(invalid)?);
    headers.insert(ORIGIN, HeaderValue::from_str(&format!("https://{domain}")).map_err(invalid)?);
    Ok(headers)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::extractors::core::{HttpClientError, HttpResponse};

    const PAGE: &str = r#"<html><script>window.__CONFIG__ = { TRANSLATIONS_API_URL : "https://api.example/v1", OTHER: 1 };</script></html>"#;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720
720/index.m3u8
";

    #[derive(Default)]
    struct StubClient {
        responses: HashMap<String, (u16, String)>,
        requests: Mutex<Vec<(Url, HeaderMap)>>,
    }

    impl StubClient {
        fn with(mut self, url: &str, status: u16, body: &str) -> Self {
            self.responses.insert(url.to_string(), (status, body.to_string()));
            self
        }

        fn requests(&self) -> Vec<(Url, HeaderMap)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExtractorHttpClient for StubClient {
        async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, HttpClientError> {
            self.requests.lock().unwrap().push((url.clone(), headers.clone()));
            let (status, body) = self
                .responses
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| HttpClientError::Transport(format!("unexpected request {url}")))?;
            Ok(HttpResponse {
                status,
                url: url.clone(),
                headers: HeaderMap::new(),
                body: body.into_bytes(),
            })
        }
    }

    fn site(channels: &str) -> StubClient {
        StubClient::default()
            .with("https://aloula.sba.sa/live/saudiatv", 200, PAGE)
            .with("https://api.example/v1/channels", 200, channels)
    }

    #[test]
    fn matches_supported_urls() {
        assert!(FaulioLiveExtractor::suitable("https://aloula.sba.sa/live/saudiatv"));
        assert!(FaulioLiveExtractor::suitable("https://aloula.sba.sa/en/live/sbc-channel"));
        assert!(FaulioLiveExtractor::suitable("http://maraya.sba.net.ae/live/14"));
        assert!(!FaulioLiveExtractor::suitable("https://aloula.sba.sa/episode/123"));
        assert!(!FaulioLiveExtractor::suitable("https://example.com/live/saudiatv"));
    }

    #[tokio::test]
    async fn resolves_channel_by_slug() {
        let client = Arc::new(site(
            r#"[{"id":1,"url":"sbc-channel","title":"S","streams":{"hls":"https://x/s.m3u8"}},
                {"id":2,"url":"saudiatv","title":"T","streams":{"hls":"https://x/m.m3u8"}}]"#,
        ));
        let extractor = FaulioLiveExtractor::new(client.clone());

        let info = extractor.extract("https://aloula.sba.sa/live/saudiatv").await.unwrap();

        assert_eq!(info.id, "2");
        assert_eq!(info.title.as_deref(), Some("T"));
        assert_eq!(info.description, None);
        assert_eq!(info.hls_url.as_str(), "https://x/m.m3u8");
        assert!(info.is_live);
        assert_eq!(info.http_headers.len(), 2);
        assert_eq!(info.http_headers[REFERER], "https://aloula.sba.sa/");
        assert_eq!(info.http_headers[ORIGIN], "https://aloula.sba.sa");

        // Page and channel list only; the manifest is fetched lazily.
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn numeric_slugs_match_numeric_urls() {
        let client = Arc::new(
            StubClient::default()
                .with("https://maraya.sba.net.ae/live/14", 200, PAGE)
                .with(
                    "https://api.example/v1/channels",
                    200,
                    r#"[{"id":14,"url":14,"title":"Sharjah Sports 2","description":"d","streams":{"hls":"https://x/14.m3u8"}}]"#,
                ),
        );
        let info = FaulioLiveExtractor::new(client)
            .extract("https://maraya.sba.net.ae/live/14")
            .await
            .unwrap();
        assert_eq!(info.id, "14");
        assert_eq!(info.description.as_deref(), Some("d"));
        assert_eq!(info.http_headers[ORIGIN], "https://maraya.sba.net.ae");
    }

    #[tokio::test]
    async fn unknown_slug_is_not_found() {
        let client = Arc::new(site(
            r#"[{"id":1,"url":"sbc-channel","title":"S","streams":{"hls":"https://x/s.m3u8"}}]"#,
        ));
        let err = FaulioLiveExtractor::new(client)
            .extract("https://aloula.sba.sa/live/saudiatv")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::NotFound(_)));
        assert_eq!(err.to_string(), "Channel \"saudiatv\" not found in API");
    }

    #[tokio::test]
    async fn missing_api_marker_is_not_found() {
        let client = Arc::new(
            StubClient::default().with("https://aloula.sba.sa/live/saudiatv", 200, "<html></html>"),
        );
        let err = FaulioLiveExtractor::new(client)
            .extract("https://aloula.sba.sa/live/saudiatv")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Could not find TRANSLATIONS_API_URL in the page");
    }

    #[tokio::test]
    async fn channel_without_hls_is_not_found() {
        let client = Arc::new(site(r#"[{"id":2,"url":"saudiatv","title":"T","streams":{}}]"#));
        let err = FaulioLiveExtractor::new(client)
            .extract("https://aloula.sba.sa/live/saudiatv")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HLS stream not found for channel \"saudiatv\"");
    }

    #[tokio::test]
    async fn http_errors_are_surfaced() {
        let client = Arc::new(
            StubClient::default().with("https://aloula.sba.sa/live/saudiatv", 403, "denied"),
        );
        let err = FaulioLiveExtractor::new(client)
            .extract("https://aloula.sba.sa/live/saudiatv")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractorError::Http(HttpClientError::Status { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn unsupported_url_is_rejected() {
        let client = Arc::new(StubClient::default());
        let err = FaulioLiveExtractor::new(client)
            .extract("https://example.com/live/x")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::UnsupportedUrl(_)));
    }

    #[tokio::test]
    async fn formats_are_fetched_with_site_headers() {
        let client = Arc::new(
            site(r#"[{"id":2,"url":"saudiatv","title":"T","streams":{"hls":"https://x/m.m3u8"}}]"#)
                .with("https://x/m.m3u8", 200, MASTER),
        );
        let extractor = FaulioLiveExtractor::new(client.clone());
        let info = extractor.extract("https://aloula.sba.sa/live/saudiatv").await.unwrap();

        let formats = info.formats(extractor.client()).await.unwrap();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].format_id, "hls-1500");
        assert_eq!(formats[0].url.as_str(), "https://x/720/index.m3u8");
        assert!(formats[0].is_live);
        assert_eq!(formats[0].http_headers[REFERER], "https://aloula.sba.sa/");

        let (manifest_url, headers) = client.requests().pop().unwrap();
        assert_eq!(manifest_url.as_str(), "https://x/m.m3u8");
        assert_eq!(headers[ORIGIN], "https://aloula.sba.sa");
    }
}
