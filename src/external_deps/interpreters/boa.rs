use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use boa_engine::{Context, JsValue, Source};
use serde::Serialize;
use url::Url;

use super::scripts::NavigatorIdentity;
use super::{
    ExecutionRequest, InterpreterError, InterpreterResult, JavascriptInterpreter, sanitize_scope,
};
use crate::config::BridgeConfig;
use crate::cookies::CookieJar;

/// Console capture plus the browser-ish globals plain scripts tend to touch.
const PRELUDE_JS: &str = r#"
var __mb_stdout = [];
var __mb_stderr = [];
function __mb_format(args) {
    return Array.prototype.map.call(args, function (arg) {
        if (typeof arg === "string") return arg;
        if (arg !== null && typeof arg === "object") {
            try { return JSON.stringify(arg); } catch (e) { return String(arg); }
        }
        return String(arg);
    }).join(" ");
}
globalThis.console = {
    log: function () { __mb_stdout.push(__mb_format(arguments)); },
    info: function () { __mb_stdout.push(__mb_format(arguments)); },
    debug: function () { __mb_stdout.push(__mb_format(arguments)); },
    warn: function () { __mb_stderr.push(__mb_format(arguments)); },
    error: function () { __mb_stderr.push(__mb_format(arguments)); },
};
globalThis.navigator = __mb_payload.navigator;
if (__mb_payload.location !== null) {
    globalThis.location = __mb_payload.location;
}
globalThis.window = globalThis;
"#;

#[derive(Debug, Serialize)]
struct Location {
    href: String,
    origin: String,
    protocol: String,
    host: String,
    hostname: String,
    port: String,
    pathname: String,
    search: String,
    hash: String,
}

impl Location {
    fn from_url(url: &Url) -> Self {
        let hostname = url.host_str().unwrap_or_default().to_string();
        let port = url.port().map(|p| p.to_string()).unwrap_or_default();
        let host = if port.is_empty() {
            hostname.clone()
        } else {
            format!("{hostname}:{port}")
        };
        Self {
            href: url.to_string(),
            origin: url.origin().ascii_serialization(),
            protocol: format!("{}:", url.scheme()),
            host,
            hostname,
            port,
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
            hash: url.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    navigator: &'a NavigatorIdentity,
    location: Option<Location>,
}

/// Loop iterations a single evaluation may run before the engine aborts it.
pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 50_000_000;

const EVAL_STACK_SIZE: usize = 8 * 1024 * 1024;

/// In-process interpreter backed by the Boa engine.
///
/// Always available, but it has no DOM and no cookie support, so it only
/// serves plain requests. Evaluation runs on its own thread and the caller
/// waits at most the configured timeout; the engine's loop-iteration limit
/// stops a runaway script on that thread afterwards.
#[derive(Debug)]
pub struct BoaJavascriptInterpreter {
    identity: NavigatorIdentity,
    scope: Option<Url>,
    timeout: Duration,
    loop_iteration_limit: u64,
}

impl Default for BoaJavascriptInterpreter {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}

impl BoaJavascriptInterpreter {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            identity: NavigatorIdentity::from_user_agent(&config.user_agent),
            scope: sanitize_scope(config.url.as_deref()),
            timeout: config.timeout,
            loop_iteration_limit: DEFAULT_LOOP_ITERATION_LIMIT,
        }
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }

    fn build_prelude(&self) -> InterpreterResult<String> {
        let payload = Payload {
            navigator: &self.identity,
            location: self.scope.as_ref().map(Location::from_url),
        };
        let payload = serde_json::to_string(&payload).map_err(|err| {
            InterpreterError::Execution(format!("failed to encode script payload: {err}"))
        })?;
        Ok(format!("var __mb_payload = {payload};\n{PRELUDE_JS}"))
    }

    fn read_string(context: &mut Context, source: &str) -> InterpreterResult<String> {
        let value: JsValue = context
            .eval(Source::from_bytes(source))
            .map_err(|err| InterpreterError::Execution(err.to_string()))?;
        value
            .to_string(context)
            .map_err(|err| InterpreterError::Execution(err.to_string()))?
            .to_std_string()
            .map_err(|_| InterpreterError::Execution("unable to convert interpreter output".into()))
    }

    /// Runs prelude and script in a fresh context, returning (stdout, stderr).
    fn evaluate(prelude: &str, script: &str, loop_limit: u64) -> InterpreterResult<(String, String)> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(loop_limit);

        context
            .eval(Source::from_bytes(prelude))
            .map_err(|err| InterpreterError::Execution(err.to_string()))?;
        context
            .eval(Source::from_bytes(script))
            .map_err(|err| InterpreterError::Execution(err.to_string()))?;

        let stderr = Self::read_string(&mut context, r#"__mb_stderr.join("\n")"#)?;
        let stdout = Self::read_string(&mut context, r#"__mb_stdout.join("\n")"#)?;
        Ok((stdout, stderr))
    }
}

impl JavascriptInterpreter for BoaJavascriptInterpreter {
    fn key(&self) -> &'static str {
        "boa"
    }

    fn name(&self) -> &'static str {
        "Boa"
    }

    fn base_preference(&self) -> i64 {
        1
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports(&self, request: &ExecutionRequest, has_cookie_jar: bool) -> bool {
        !request.needs_dom(has_cookie_jar)
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        cookie_jar: Option<&mut CookieJar>,
    ) -> InterpreterResult<String> {
        if !self.supports(request, cookie_jar.is_some()) {
            return Err(InterpreterError::Unsupported(
                "Boa cannot emulate a DOM or handle cookies".into(),
            ));
        }
        request.log_note("Executing JS in Boa");

        let prelude = self.build_prelude()?;
        let script = request.script.clone();
        let loop_limit = self.loop_iteration_limit;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("boa-eval".into())
            .stack_size(EVAL_STACK_SIZE)
            .spawn(move || {
                let _ = tx.send(Self::evaluate(&prelude, &script, loop_limit));
            })?;

        let (stdout, stderr) = match rx.recv_timeout(self.timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                log::debug!("Boa evaluation abandoned after {:?}", self.timeout);
                return Err(InterpreterError::Timeout(self.timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(InterpreterError::Execution("Boa evaluation thread panicked".into()));
            }
        };

        if !stderr.trim().is_empty() {
            log::warn!("JS console error msg:\n{}", stderr.trim());
        }

        Ok(stdout.trim().to_string())
    }
}
