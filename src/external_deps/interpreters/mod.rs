//! JavaScript interpreter infrastructure.
//!
//! Provides a shared trait and error type used by the script bridge, along
//! with concrete runtime implementations and a dispatcher that picks between
//! them.

mod boa;
mod deno;
mod dispatcher;
mod jsdom;
mod phantomjs;
mod process;
mod scripts;

pub use boa::BoaJavascriptInterpreter;
pub use deno::DenoInterpreter;
pub use dispatcher::{HandlerSelection, InterpreterDispatcher, PreferenceFn};
pub use jsdom::DenoJsdomInterpreter;
pub use phantomjs::PhantomJsInterpreter;
pub use scripts::{NavigatorIdentity, extract_script_tags};

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::cookies::CookieJar;

/// A single script to run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub script: String,
    /// Document to load into the emulated DOM.
    pub html: Option<String>,
    pub video_id: Option<String>,
    pub note: Option<String>,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// DOM emulation is needed when a document or a cookie jar is involved.
    pub fn needs_dom(&self, has_cookie_jar: bool) -> bool {
        self.html.is_some() || has_cookie_jar
    }

    pub(crate) fn log_note(&self, default_note: &str) {
        let note = self.note.as_deref().unwrap_or(default_note);
        match self.video_id.as_deref() {
            Some(id) => log::info!("{id}: {note}"),
            None => log::info!("{note}"),
        }
    }
}

/// Abstraction over JavaScript runtimes the bridge can dispatch to.
pub trait JavascriptInterpreter: Send + Sync {
    /// Stable identifier used in preference lists.
    fn key(&self) -> &'static str;

    fn name(&self) -> &'static str {
        self.key()
    }

    /// Built-in ranking, capped at 10 by the dispatcher.
    fn base_preference(&self) -> i64 {
        0
    }

    fn is_available(&self) -> bool;

    /// Whether this runtime can serve `request` (with or without a jar).
    fn supports(&self, request: &ExecutionRequest, has_cookie_jar: bool) -> bool;

    fn report_version(&self) {}

    /// Run the script and return captured console output. Cookie mutations
    /// are merged back into `cookie_jar` when the runtime supports them.
    fn execute(
        &self,
        request: &ExecutionRequest,
        cookie_jar: Option<&mut CookieJar>,
    ) -> InterpreterResult<String>;
}

/// Failures produced by JavaScript runtimes.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("unable to run {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed with exit code {}:\n{stderr}", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ProcessFailure { code: Option<i32>, stderr: String },
    #[error("process timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to parse JSON output from runtime: {output}")]
    ParseFailure {
        output: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("script file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("javascript execution failed: {0}")]
    Execution(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    NoHandler(String),
    #[error("{0}")]
    Exhausted(String),
}

impl InterpreterError {
    /// Missing binary, non-zero exit and timeout all count as process failures.
    pub fn is_process_failure(&self) -> bool {
        matches!(
            self,
            InterpreterError::Spawn { .. }
                | InterpreterError::ProcessFailure { .. }
                | InterpreterError::Timeout(_)
        )
    }
}

/// Convenience alias for runtime results.
pub type InterpreterResult<T> = Result<T, InterpreterError>;


/// Parses the configured scope, dropping anything that is not an http(s) URL.
pub(crate) fn sanitize_scope(url: Option<&str>) -> Option<Url> {
    let raw = url.map(str::trim).filter(|u| !u.is_empty())?;
    match Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Some(parsed),
        _ => {
            log::warn!("Invalid URL: \"{raw}\", using no url scope instead");
            None
        }
    }
}
