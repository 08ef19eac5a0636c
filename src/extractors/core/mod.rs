//! Core utilities shared by site extractors.

pub mod client;
pub mod hls;
pub mod reqwest_client;
pub mod types;

pub use client::{ExtractorHttpClient, HttpClientError, HttpResponse};
pub use hls::{HlsOptions, extract_m3u8_formats};
pub use reqwest_client::ReqwestExtractorHttpClient;
pub use types::{ExtractorError, ExtractorResult, StreamFormat, StreamInfo};
