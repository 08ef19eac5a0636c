//! Site extractors resolving page URLs into stream descriptors.

pub mod core;
pub mod faulio;

pub use self::core::{
    ExtractorError, ExtractorHttpClient, ExtractorResult, HttpClientError, HttpResponse,
    ReqwestExtractorHttpClient, StreamFormat, StreamInfo,
};
pub use faulio::FaulioLiveExtractor;
