use std::path::Path;

use once_cell::sync::OnceCell;
use url::Url;

use super::process::{probe_version, run_command, write_script};
use super::scripts::{NavigatorIdentity, build_plain_script};
use super::{
    ExecutionRequest, InterpreterError, InterpreterResult, JavascriptInterpreter, sanitize_scope,
};
use crate::config::BridgeConfig;
use crate::cookies::CookieJar;

/// Runs scripts with the Deno binary, without any DOM.
#[derive(Debug)]
pub struct DenoInterpreter {
    config: BridgeConfig,
    scope: Option<Url>,
    identity: NavigatorIdentity,
    version: OnceCell<Option<String>>,
}

impl DenoInterpreter {
    pub fn new(config: BridgeConfig) -> Self {
        let scope = sanitize_scope(config.url.as_deref());
        let identity = NavigatorIdentity::from_user_agent(&config.user_agent);
        Self {
            config,
            scope,
            identity,
            version: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn scope(&self) -> Option<&Url> {
        self.scope.as_ref()
    }

    pub fn identity(&self) -> &NavigatorIdentity {
        &self.identity
    }

    /// Runtime version, probed once per instance.
    pub fn version(&self) -> Option<&str> {
        self.version
            .get_or_init(|| probe_version(&self.config.executable))
            .as_deref()
    }

    /// `run <flags> <extra> [--location <url>] <script>`
    pub(crate) fn run_args(&self, extra_flags: &[String], script: &Path) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        args.extend(self.config.effective_flags());
        args.extend(extra_flags.iter().cloned());
        if let Some(scope) = &self.scope {
            args.push("--location".to_string());
            args.push(scope.to_string());
        }
        args.push(script.display().to_string());
        args
    }

    /// Writes `source` to a scoped file and runs it.
    pub(crate) fn run_source(&self, source: &str, extra_flags: &[String]) -> InterpreterResult<String> {
        let script = write_script(source)?;
        let args = self.run_args(extra_flags, &script);
        run_command(&self.config.executable, &args, self.config.timeout)
    }

    pub(crate) fn run_raw(&self, args: &[String]) -> InterpreterResult<String> {
        run_command(&self.config.executable, args, self.config.timeout)
    }
}

impl JavascriptInterpreter for DenoInterpreter {
    fn key(&self) -> &'static str {
        "deno"
    }

    fn name(&self) -> &'static str {
        "Deno"
    }

    fn base_preference(&self) -> i64 {
        5
    }

    fn is_available(&self) -> bool {
        self.version().is_some()
    }

    fn supports(&self, request: &ExecutionRequest, has_cookie_jar: bool) -> bool {
        !request.needs_dom(has_cookie_jar)
    }

    fn report_version(&self) {
        log::debug!(
            "[{}] {} version {}",
            self.name(),
            self.config.executable.display(),
            self.version().unwrap_or("unknown")
        );
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        _cookie_jar: Option<&mut CookieJar>,
    ) -> InterpreterResult<String> {
        request.log_note("Executing JS in Deno");
        let source = build_plain_script(
            self.config.effective_init_script(),
            &self.identity,
            &request.script,
        )
        .map_err(|err| InterpreterError::Execution(format!("failed to encode script payload: {err}")))?;
        self.run_source(&source, &[])
    }
}
