//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Builder pattern
//! - JSON loading
//! - Granular options for the script bridge, the dispatcher and HTTP

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User agent used when the caller does not supply one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// esm.sh v135 is pinned, later builds of jsdom break under Deno.
pub const DEFAULT_JSDOM_URL: &str = "https://esm.sh/v135/jsdom";

pub const DEFAULT_DENO_FLAGS: &[&str] = &["--cached-only", "--no-prompt", "--no-check"];

pub const DEFAULT_INIT_SCRIPT: &str =
    "localStorage.clear(); delete globalThis.Deno; global = window = globalThis;\n";

/// Window properties copied from the emulated DOM onto the sandbox global.
pub const DEFAULT_WINDOW_BINDINGS: &[&str] = &[
    "document",
    "history",
    "screen",
    "innerWidth",
    "innerHeight",
    "outerWidth",
    "outerHeight",
    "devicePixelRatio",
    "scrollX",
    "scrollY",
    "pageXOffset",
    "pageYOffset",
    "getComputedStyle",
    "matchMedia",
    "requestAnimationFrame",
    "cancelAnimationFrame",
    "localStorage",
    "sessionStorage",
    "Node",
    "NodeList",
    "Element",
    "HTMLElement",
    "HTMLDocument",
    "HTMLCollection",
    "HTMLScriptElement",
    "HTMLIFrameElement",
    "HTMLCanvasElement",
    "HTMLFormElement",
    "HTMLInputElement",
    "Document",
    "DocumentFragment",
    "Text",
    "Comment",
    "Attr",
    "CSSStyleDeclaration",
    "DOMParser",
    "XMLSerializer",
    "MutationObserver",
    "XMLHttpRequest",
    "Image",
    "Option",
    "Audio",
    "MouseEvent",
    "KeyboardEvent",
    "UIEvent",
    "FocusEvent",
];

/// Properties that always keep the runtime's native implementation.
pub const NATIVE_WINDOW_PROPERTIES: &[&str] = &["atob", "btoa", "crypto", "location"];

/// Storage objects only make sense once the runtime has a `--location`.
pub const SCOPED_WINDOW_PROPERTIES: &[&str] = &["sessionStorage", "localStorage"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Which emulated-window properties are exposed to executed scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "keys", rename_all = "snake_case")]
pub enum WindowBindings {
    /// Only the listed properties are copied.
    AllowList(Vec<String>),
    /// Every enumerable property except the listed ones is copied.
    DenyList(Vec<String>),
}

impl Default for WindowBindings {
    fn default() -> Self {
        WindowBindings::AllowList(DEFAULT_WINDOW_BINDINGS.iter().map(|s| s.to_string()).collect())
    }
}

impl WindowBindings {
    /// Property names never copied for the given scope state.
    pub fn retained_natives(has_scope: bool) -> Vec<String> {
        let mut keys: Vec<String> = NATIVE_WINDOW_PROPERTIES.iter().map(|s| s.to_string()).collect();
        if !has_scope {
            keys.extend(SCOPED_WINDOW_PROPERTIES.iter().map(|s| s.to_string()));
        }
        keys
    }
}

/// Fixed layout values so layout-dependent scripts behave deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScreenMetrics {
    pub avail_width: u32,
    pub avail_height: u32,
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
    pub body_client_width: u32,
    pub body_client_height: u32,
}

impl Default for ScreenMetrics {
    fn default() -> Self {
        Self {
            avail_width: 1920,
            avail_height: 1040,
            width: 1920,
            height: 1080,
            color_depth: 24,
            pixel_depth: 24,
            body_client_width: 1903,
            body_client_height: 2000,
        }
    }
}

/// Configuration of the Deno-backed script bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub executable: PathBuf,
    /// Binary used by the PhantomJS backend.
    pub phantomjs_executable: PathBuf,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub user_agent: String,
    /// Page URL the scripts run under (`--location`, cookie matching).
    pub url: Option<String>,
    pub flags: Vec<String>,
    /// When set, `flags` replaces the default flags instead of extending them.
    pub replace_flags: bool,
    pub init_script: Option<String>,
    pub jsdom_url: String,
    pub window_bindings: WindowBindings,
    pub screen: ScreenMetrics,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("deno"),
            phantomjs_executable: PathBuf::from("phantomjs"),
            timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            url: None,
            flags: Vec::new(),
            replace_flags: false,
            init_script: None,
            jsdom_url: DEFAULT_JSDOM_URL.to_string(),
            window_bindings: WindowBindings::default(),
            screen: ScreenMetrics::default(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_phantomjs_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.phantomjs_executable = executable.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I, replace: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self.replace_flags = replace;
        self
    }

    pub fn with_init_script(mut self, script: impl Into<String>) -> Self {
        self.init_script = Some(script.into());
        self
    }

    pub fn with_jsdom_url(mut self, url: impl Into<String>) -> Self {
        self.jsdom_url = url.into();
        self
    }

    pub fn with_window_bindings(mut self, bindings: WindowBindings) -> Self {
        self.window_bindings = bindings;
        self
    }

    pub fn with_screen(mut self, screen: ScreenMetrics) -> Self {
        self.screen = screen;
        self
    }

    /// Baseline flags followed by the configured extras.
    pub fn effective_flags(&self) -> Vec<String> {
        if self.replace_flags {
            return self.flags.clone();
        }
        DEFAULT_DENO_FLAGS
            .iter()
            .map(|s| s.to_string())
            .chain(self.flags.iter().cloned())
            .collect()
    }

    pub fn effective_init_script(&self) -> &str {
        self.init_script.as_deref().unwrap_or(DEFAULT_INIT_SCRIPT)
    }
}

/// Configuration of the interpreter dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Interpreter keys tried first, highest priority first.
    pub preference: Vec<String>,
    /// Fail instead of falling back when an interpreter is missing or errors.
    pub strict: bool,
}

impl DispatcherConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn with_preference<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preference = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// HTTP settings for the extractor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_are_extended_or_replaced() {
        let extended = BridgeConfig::new().with_flags(["--v8-flags=--jitless"], false);
        assert_eq!(
            extended.effective_flags(),
            ["--cached-only", "--no-prompt", "--no-check", "--v8-flags=--jitless"]
        );

        let replaced = BridgeConfig::new().with_flags(["--quiet"], true);
        assert_eq!(replaced.effective_flags(), ["--quiet"]);
    }

    #[test]
    fn loads_partial_json() {
        let config = BridgeConfig::from_json_str(
            r#"{
                "executable": "/opt/deno/bin/deno",
                "timeout": 2.5,
                "url": "https://example.com/",
                "window_bindings": {"mode": "deny_list", "keys": ["alert"]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.executable, PathBuf::from("/opt/deno/bin/deno"));
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.url.as_deref(), Some("https://example.com/"));
        assert_eq!(config.window_bindings, WindowBindings::DenyList(vec!["alert".into()]));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.screen, ScreenMetrics::default());
    }

    #[test]
    fn rejects_negative_timeout() {
        assert!(BridgeConfig::from_json_str(r#"{"timeout": -1}"#).is_err());
    }

    #[test]
    fn storage_is_retained_only_without_scope() {
        let scoped = WindowBindings::retained_natives(true);
        assert!(!scoped.contains(&"localStorage".to_string()));
        let unscoped = WindowBindings::retained_natives(false);
        assert!(unscoped.contains(&"localStorage".to_string()));
        assert!(unscoped.contains(&"location".to_string()));
    }
}
