//! Deno with a jsdom-emulated browser document.
//!
//! The caller's HTML is loaded into a jsdom window whose bindings are copied
//! onto the Deno global, inline page scripts are replayed, and the caller's
//! script runs with console capture. Cookies travel in and out through the
//! tough-cookie jar jsdom uses.

use std::sync::Once;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::Deserialize;

use super::deno::DenoInterpreter;
use super::process::version_at_least;
use super::scripts::{DomScriptParts, build_dom_script, extract_script_tags};
use super::{ExecutionRequest, InterpreterError, InterpreterResult, JavascriptInterpreter};
use crate::config::BridgeConfig;
use crate::cookies::{CookieJar, ToughCookie, apply_cookies, serialize_cookies};

/// Deno releases from this version on panic while importing jsdom unless
/// environment access is granted.
const ALLOW_ENV_SINCE: &[u64] = &[2, 3, 0];

/// node-gyp-build, pulled in by jsdom, aborts on Linux unless it can probe this file.
const ALPINE_RELEASE_PROBE: &str = "--allow-read=/etc/alpine-release";

#[derive(Debug, Deserialize)]
struct DomOutput {
    stdout: String,
    #[serde(default)]
    cookies: Vec<ToughCookie>,
}

/// Deno backend with jsdom DOM emulation and cookie support.
#[derive(Debug)]
pub struct DenoJsdomInterpreter {
    deno: DenoInterpreter,
    jsdom_version: OnceCell<String>,
    allow_env_warning: Once,
}

impl DenoJsdomInterpreter {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            deno: DenoInterpreter::new(config),
            jsdom_version: OnceCell::new(),
            allow_env_warning: Once::new(),
        }
    }

    pub fn runtime(&self) -> &DenoInterpreter {
        &self.deno
    }

    /// Resolves the jsdom import and caches the version it points at.
    ///
    /// Only a found version is cached; an `info` run that names no version is
    /// repeated on the next call.
    pub fn jsdom_version(&self) -> InterpreterResult<Option<&str>> {
        if let Some(version) = self.jsdom_version.get() {
            return Ok(Some(version));
        }
        let jsdom_url = &self.deno.config().jsdom_url;
        let info = self
            .deno
            .run_raw(&["info".to_string(), jsdom_url.clone()])?;
        if let Some(version) = scrape_jsdom_version(&info, jsdom_url) {
            let _ = self.jsdom_version.set(version);
        }
        Ok(self.jsdom_version.get().map(String::as_str))
    }

    /// Flags depending on the host OS and the runtime version.
    pub(crate) fn additional_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if cfg!(target_os = "linux") {
            flags.push(ALPINE_RELEASE_PROBE.to_string());
        }
        if self
            .deno
            .version()
            .is_some_and(|version| version_at_least(version, ALLOW_ENV_SINCE))
        {
            self.allow_env_warning.call_once(|| {
                log::warn!(
                    "`--allow-env` flag is enabled for deno >= 2.3.0 to avoid import panic, \
                     use `deno upgrade` to downgrade to a lower version to avoid this"
                );
            });
            flags.push("--allow-env".to_string());
        }
        flags
    }
}

fn scrape_jsdom_version(info: &str, jsdom_url: &str) -> Option<String> {
    static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\d+(?:\.\d+)*)").unwrap());
    let line = info.lines().find(|line| line.contains(jsdom_url))?;
    VERSION_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// The wrapper prints one JSON object last; anything printed before it
/// (e.g. `console.debug` from page scripts) is tolerated.
fn parse_dom_output(stdout: &str) -> InterpreterResult<DomOutput> {
    match serde_json::from_str(stdout) {
        Ok(output) => Ok(output),
        Err(source) => stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| InterpreterError::ParseFailure {
                output: stdout.to_string(),
                source,
            }),
    }
}

impl JavascriptInterpreter for DenoJsdomInterpreter {
    fn key(&self) -> &'static str {
        "deno-jsdom"
    }

    fn name(&self) -> &'static str {
        "DenoJSDom"
    }

    fn base_preference(&self) -> i64 {
        4
    }

    fn is_available(&self) -> bool {
        self.deno.is_available()
    }

    fn supports(&self, _request: &ExecutionRequest, _has_cookie_jar: bool) -> bool {
        true
    }

    fn report_version(&self) {
        self.deno.report_version();
        match self.jsdom_version() {
            Ok(version) => log::debug!("[{}] JSDOM lib version {}", self.name(), version.unwrap_or("unknown")),
            Err(err) => log::debug!("[{}] unable to resolve JSDOM: {err}", self.name()),
        }
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        cookie_jar: Option<&mut CookieJar>,
    ) -> InterpreterResult<String> {
        request.log_note("Executing JS in Deno with jsdom");
        self.jsdom_version()?;

        let scope = self.deno.scope();
        let cookie_jar = match (cookie_jar, scope) {
            (Some(_), None) => {
                log::warn!("No valid url scope provided, cookiejar is not applied");
                None
            }
            (jar, _) => jar,
        };

        let (html, inline_scripts) = extract_script_tags(request.html.as_deref().unwrap_or(""));
        let cookies = scope
            .map(|scope| serialize_cookies(cookie_jar.as_deref(), scope))
            .unwrap_or_default();

        let config = self.deno.config();
        let scope_str = scope.map(|url| url.to_string());
        let source = build_dom_script(
            &DomScriptParts {
                init_script: config.effective_init_script(),
                jsdom_url: &config.jsdom_url,
                html: &html,
                url: scope_str.as_deref(),
                cookies: &cookies,
                identity: self.deno.identity(),
                screen: &config.screen,
                bindings: &config.window_bindings,
                inline_scripts: &inline_scripts,
            },
            &request.script,
        )
        .map_err(|err| InterpreterError::Execution(format!("failed to encode script payload: {err}")))?;

        let stdout = self.deno.run_source(&source, &self.additional_flags())?;
        let output = parse_dom_output(&stdout)?;

        apply_cookies(cookie_jar, &output.cookies);
        Ok(output.stdout)
    }
}
