//! Routing of execution requests to the best available interpreter.
//!
//! Backends are ranked by the sum of the configured preference order, the
//! caller's preferred order, the backend's own base preference and any
//! registered preference functions.
//! The first available backend that supports the request runs it; errors fall
//! through to the next backend unless strict mode is on.

use std::cmp::Reverse;
use std::collections::HashMap;

use super::{
    BoaJavascriptInterpreter, DenoInterpreter, DenoJsdomInterpreter, ExecutionRequest,
    InterpreterError, InterpreterResult, JavascriptInterpreter, PhantomJsInterpreter,
};
use crate::config::{BridgeConfig, DispatcherConfig};
use crate::cookies::CookieJar;

const CONFIG_ORDER_WEIGHT: i64 = 10_000;
const CALLER_ORDER_WEIGHT: i64 = 100;
const MAX_BASE_PREFERENCE: i64 = 10;

/// Which backends a caller allows and prefers.
#[derive(Debug, Clone, Default)]
pub struct HandlerSelection {
    /// When non-empty, only these keys are used.
    pub only_include: Vec<String>,
    pub exclude: Vec<String>,
    /// Tried before the others, first entry first.
    pub preferred_order: Vec<String>,
}

impl HandlerSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only_include<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_include = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn preferred_order<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_order = keys.into_iter().map(Into::into).collect();
        self
    }

    fn allows(&self, key: &str) -> bool {
        (self.only_include.is_empty() || self.only_include.iter().any(|k| k == key))
            && !self.exclude.iter().any(|k| k == key)
    }
}

/// Earlier entries score higher: the first of `n` keys gets `n * weight`.
fn order_scores(order: &[String], weight: i64) -> HashMap<String, i64> {
    order
        .iter()
        .rev()
        .enumerate()
        .map(|(i, key)| (key.clone(), (i as i64 + 1) * weight))
        .collect()
}

/// Extra score for a backend on a given request, added to the built-in ones.
pub type PreferenceFn =
    Box<dyn Fn(&dyn JavascriptInterpreter, &ExecutionRequest) -> i64 + Send + Sync>;

/// Forwards execution requests to whichever interpreter fits best.
pub struct InterpreterDispatcher {
    handlers: Vec<Box<dyn JavascriptInterpreter>>,
    config_scores: HashMap<String, i64>,
    caller_scores: HashMap<String, i64>,
    preference_fns: Vec<PreferenceFn>,
    strict: bool,
}

impl std::fmt::Debug for InterpreterDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterDispatcher")
            .field("handlers", &self.handler_keys())
            .field("preference_fns", &self.preference_fns.len())
            .field("strict", &self.strict)
            .finish()
    }
}

impl InterpreterDispatcher {
    /// Builds the Deno, Deno+jsdom, PhantomJS and Boa backends for one URL scope.
    pub fn new(
        config: &DispatcherConfig,
        bridge: BridgeConfig,
        selection: &HandlerSelection,
    ) -> InterpreterResult<Self> {
        let handlers: Vec<Box<dyn JavascriptInterpreter>> = vec![
            Box::new(DenoInterpreter::new(bridge.clone())),
            Box::new(DenoJsdomInterpreter::new(bridge.clone())),
            Box::new(PhantomJsInterpreter::new(&bridge)),
            Box::new(BoaJavascriptInterpreter::new(&bridge)),
        ];
        Self::with_interpreters(config, handlers, selection)
    }

    pub fn with_interpreters(
        config: &DispatcherConfig,
        interpreters: Vec<Box<dyn JavascriptInterpreter>>,
        selection: &HandlerSelection,
    ) -> InterpreterResult<Self> {
        let known: Vec<&'static str> = interpreters.iter().map(|h| h.key()).collect();
        log::debug!("[JSIDirector] Loaded JSI runtimes: {known:?}");

        let preference: Vec<String> = config
            .preference
            .iter()
            .filter(|key| {
                let valid = known.iter().any(|k| *k == key.as_str());
                if !valid {
                    log::warn!("[JSIDirector] jsi_preference: `{key}` is not a valid JSI");
                }
                valid
            })
            .cloned()
            .collect();

        let handlers: Vec<_> = interpreters
            .into_iter()
            .filter(|handler| selection.allows(handler.key()))
            .collect();

        if handlers.is_empty() {
            return Err(InterpreterError::NoHandler("No JSI is allowed to use".into()));
        }

        let dispatcher = Self {
            handlers,
            config_scores: order_scores(&preference, CONFIG_ORDER_WEIGHT),
            caller_scores: order_scores(&selection.preferred_order, CALLER_ORDER_WEIGHT),
            preference_fns: Vec::new(),
            strict: config.strict,
        };
        log::debug!(
            "[JSIDirector] Select JSI: {:?}, included: {:?}, excluded: {:?}",
            dispatcher.handler_keys(),
            selection.only_include,
            selection.exclude
        );
        Ok(dispatcher)
    }

    /// Registers a scoring function consulted for every backend on every
    /// request. Scores of all registered functions are summed.
    pub fn with_preference_fn<F>(mut self, preference: F) -> Self
    where
        F: Fn(&dyn JavascriptInterpreter, &ExecutionRequest) -> i64 + Send + Sync + 'static,
    {
        self.preference_fns.push(Box::new(preference));
        self
    }

    pub fn handler_keys(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.key()).collect()
    }

    fn score(&self, handler: &dyn JavascriptInterpreter, request: &ExecutionRequest) -> i64 {
        let key = handler.key();
        self.config_scores.get(key).copied().unwrap_or(0)
            + self.caller_scores.get(key).copied().unwrap_or(0)
            + handler.base_preference().min(MAX_BASE_PREFERENCE)
            + self
                .preference_fns
                .iter()
                .map(|preference| preference(handler, request))
                .sum::<i64>()
    }

    fn ranked(&self, request: &ExecutionRequest, has_cookie_jar: bool) -> Vec<&dyn JavascriptInterpreter> {
        let mut handlers: Vec<&dyn JavascriptInterpreter> = self
            .handlers
            .iter()
            .map(|h| h.as_ref())
            .filter(|h| h.supports(request, has_cookie_jar))
            .collect();
        handlers.sort_by_key(|h| Reverse(self.score(*h, request)));
        handlers
    }

    /// Keys of the backends that would be tried for `request`, in order.
    pub fn ranked_keys(&self, request: &ExecutionRequest, has_cookie_jar: bool) -> Vec<&'static str> {
        self.ranked(request, has_cookie_jar)
            .into_iter()
            .map(|h| h.key())
            .collect()
    }

    /// Runs `request` and returns the captured console output.
    pub fn execute(
        &self,
        request: &ExecutionRequest,
        mut cookie_jar: Option<&mut CookieJar>,
    ) -> InterpreterResult<String> {
        let has_cookie_jar = cookie_jar.is_some();
        let handlers = self.ranked(request, has_cookie_jar);
        if handlers.is_empty() {
            return Err(InterpreterError::NoHandler(format!(
                "No JSI supports this request (html: {}, cookiejar: {has_cookie_jar}), included handlers: {:?}",
                request.html.is_some(),
                self.handler_keys()
            )));
        }
        log::debug!(
            "[JSIDirector] JSI preferences for request: {}",
            handlers
                .iter()
                .map(|h| format!("{}={}", h.key(), self.score(*h, request)))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut unavailable = Vec::new();
        let mut failures = 0usize;

        for handler in handlers {
            if !handler.is_available() {
                if self.strict {
                    return Err(InterpreterError::NoHandler(format!(
                        "{} is not available for testing, add \"{}\" in `exclude` if it should not be used",
                        handler.name(),
                        handler.key()
                    )));
                }
                log::debug!("[JSIDirector] {} is not available", handler.key());
                unavailable.push(handler.name());
                continue;
            }

            log::debug!("[JSIDirector] Dispatching `execute` task to {}", handler.name());
            handler.report_version();
            match handler.execute(request, cookie_jar.as_deref_mut()) {
                Ok(output) => return Ok(output),
                Err(err) if self.strict => {
                    return Err(InterpreterError::Exhausted(format!(
                        "{} got error while evaluating js, add \"{}\" in `exclude` if it should not be used: {err}",
                        handler.name(),
                        handler.key()
                    )));
                }
                Err(err) => {
                    log::debug!(
                        "[JSIDirector] {} encountered error, fallback to next handler: {err}",
                        handler.name()
                    );
                    failures += 1;
                }
            }
        }

        if failures == 0 {
            return Err(InterpreterError::NoHandler(format!(
                "No available JSI installed, please install one of: {}",
                unavailable.join(", ")
            )));
        }
        let mut message = format!("Failed to perform execute, total {failures} errors");
        if !unavailable.is_empty() {
            message.push_str(&format!(
                ". You may try installing one of unavailable JSI: {}",
                unavailable.join(", ")
            ));
        }
        Err(InterpreterError::Exhausted(message))
    }
}
