//! # mediabridge-rs
//!
//! Live-stream resolution for Faulio-powered broadcaster sites and a
//! sandboxed bridge for running page JavaScript in Deno, optionally inside a
//! jsdom-emulated document with cookies shared with the caller.
//!
//! ## Features
//!
//! - Channel slug to HLS stream descriptor resolution with lazy format parsing
//! - Plain script execution in Deno or the embedded Boa engine
//! - DOM emulation through jsdom or PhantomJS, replaying inline page scripts
//! - Cookie exchange between a host cookie jar and jsdom's tough-cookie store
//! - Preference-ordered interpreter dispatch with fallback
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mediabridge_rs::{
//!     BridgeConfig, CookieJar, DispatcherConfig, ExecutionRequest, FaulioLiveExtractor,
//!     HandlerSelection, HttpConfig, InterpreterDispatcher, ReqwestExtractorHttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(ReqwestExtractorHttpClient::new(&HttpConfig::default())?);
//!     let extractor = FaulioLiveExtractor::new(client);
//!     let stream = extractor.extract("https://aloula.sba.sa/live/saudiatv").await?;
//!     for format in stream.formats(extractor.client()).await? {
//!         println!("{} {}", format.format_id, format.url);
//!     }
//!
//!     let jsi = InterpreterDispatcher::new(
//!         &DispatcherConfig::default(),
//!         BridgeConfig::new().with_url("https://example.com/"),
//!         &HandlerSelection::new(),
//!     )?;
//!     let mut jar = CookieJar::new();
//!     let request = ExecutionRequest::new("console.log(document.title)")
//!         .with_html("<title>Hello</title>");
//!     println!("{}", jsi.execute(&request, Some(&mut jar))?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod external_deps;
pub mod extractors;

pub use crate::config::{
    BridgeConfig,
    ConfigError,
    DispatcherConfig,
    HttpConfig,
    ScreenMetrics,
    WindowBindings,
};

pub use crate::cookies::{
    Cookie,
    CookieJar,
    PhantomCookie,
    ToughCookie,
    ToughCookieStore,
    apply_cookies,
    apply_phantom_cookies,
    serialize_cookies,
    serialize_phantom_cookies,
};

pub use crate::external_deps::interpreters::{
    BoaJavascriptInterpreter,
    DenoInterpreter,
    DenoJsdomInterpreter,
    ExecutionRequest,
    HandlerSelection,
    InterpreterDispatcher,
    InterpreterError,
    InterpreterResult,
    JavascriptInterpreter,
    NavigatorIdentity,
    PhantomJsInterpreter,
    PreferenceFn,
    extract_script_tags,
};

pub use crate::extractors::{
    ExtractorError,
    ExtractorHttpClient,
    ExtractorResult,
    FaulioLiveExtractor,
    HttpClientError,
    HttpResponse,
    ReqwestExtractorHttpClient,
    StreamFormat,
    StreamInfo,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
