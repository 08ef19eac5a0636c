//! Generation of the wrapper scripts handed to Deno.
//!
//! Caller data never gets spliced into JavaScript source. Everything the
//! wrapper needs (document, cookies, navigator identity, layout constants,
//! inline page scripts) is serialized once into a JSON payload bound to a
//! single global, and the fixed wrapper code reads from it.

use once_cell::sync::Lazy;
use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::config::{ScreenMetrics, WindowBindings};
use crate::cookies::ToughCookieStore;

pub(crate) const PAYLOAD_GLOBAL: &str = "__mediabridge_payload";

/// Navigator fields presented to executed scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorIdentity {
    pub user_agent: String,
    pub app_version: String,
    pub platform: String,
    pub vendor: String,
    pub language: String,
    pub languages: Vec<String>,
    pub webdriver: bool,
}

impl NavigatorIdentity {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let platform = if user_agent.contains("Windows") {
            "Win32"
        } else if user_agent.contains("iPhone") {
            "iPhone"
        } else if user_agent.contains("iPad") {
            "iPad"
        } else if user_agent.contains("Macintosh") || user_agent.contains("Mac OS X") {
            "MacIntel"
        } else if user_agent.contains("Android") {
            "Linux armv8l"
        } else if user_agent.contains("Linux") || user_agent.contains("X11") {
            "Linux x86_64"
        } else {
            ""
        };

        let vendor = if user_agent.contains("Firefox/") {
            ""
        } else if user_agent.contains("Chrome/") || user_agent.contains("CriOS/") {
            "Google Inc."
        } else if user_agent.contains("Safari/") {
            "Apple Computer, Inc."
        } else {
            ""
        };

        Self {
            user_agent: user_agent.to_string(),
            app_version: user_agent
                .strip_prefix("Mozilla/")
                .unwrap_or(user_agent)
                .to_string(),
            platform: platform.to_string(),
            vendor: vendor.to_string(),
            language: "en-US".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            webdriver: false,
        }
    }
}

/// Redefines navigator fields from `payload.navigator`. Expects the payload
/// global to be in scope.
const NAVIGATOR_OVERRIDE_JS: &str = r#"(() => {
    const target = globalThis.navigator;
    if (!target) return;
    for (const [key, value] of Object.entries(__mediabridge_payload.navigator)) {
        try {
            Object.defineProperty(target, key, { get: () => value, configurable: true, enumerable: true });
        } catch (e) {}
    }
})();"#;

#[derive(Debug, Serialize)]
struct PlainPayload<'a> {
    navigator: &'a NavigatorIdentity,
}

/// Init script, identity override and caller code as one source unit.
pub(crate) fn build_plain_script(
    init_script: &str,
    identity: &NavigatorIdentity,
    code: &str,
) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(&PlainPayload { navigator: identity })?;
    Ok(format!(
        "{init_script};\nconst {PAYLOAD_GLOBAL} = {payload};\n{NAVIGATOR_OVERRIDE_JS}\n{code}\n"
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BindingPolicy<'a> {
    allow: bool,
    keys: &'a [String],
    retained: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DomPayload<'a> {
    html: &'a str,
    url: Option<&'a str>,
    cookies: &'a ToughCookieStore,
    navigator: &'a NavigatorIdentity,
    screen: &'a ScreenMetrics,
    bindings: BindingPolicy<'a>,
    inline_scripts: &'a [String],
}

/// Everything the DOM wrapper needs besides the caller code.
pub(crate) struct DomScriptParts<'a> {
    pub init_script: &'a str,
    pub jsdom_url: &'a str,
    pub html: &'a str,
    pub url: Option<&'a str>,
    pub cookies: &'a ToughCookieStore,
    pub identity: &'a NavigatorIdentity,
    pub screen: &'a ScreenMetrics,
    pub bindings: &'a WindowBindings,
    pub inline_scripts: &'a [String],
}

const DOM_SETUP_JS: &str = r#"(() => {
    const payload = __mediabridge_payload;
    const jar = jsdom.CookieJar.deserializeSync(payload.cookies);
    const options = { cookieJar: jar, pretendToBeVisual: true };
    if (payload.url) options.url = payload.url;
    const dom = new jsdom.JSDOM(payload.html, options);
    const retained = new Set(payload.bindings.retained);
    const keys = payload.bindings.allow
        ? payload.bindings.keys
        : Object.keys(dom.window).filter((key) => !payload.bindings.keys.includes(key));
    for (const key of keys) {
        if (retained.has(key) || !(key in dom.window)) continue;
        const value = dom.window[key];
        try {
            globalThis[key] = value;
        } catch (e) {
            try {
                Object.defineProperty(globalThis, key, { value, configurable: true, writable: true });
            } catch (e) { console.error(e); }
        }
    }
    if (!('document' in globalThis)) globalThis.document = dom.window.document;
    NAVIGATOR_OVERRIDE
    const screen = payload.screen;
    try {
        globalThis.screen = {
            availWidth: screen.availWidth,
            availHeight: screen.availHeight,
            width: screen.width,
            height: screen.height,
            colorDepth: screen.colorDepth,
            isExtended: true,
            onchange: null,
            orientation: { angle: 0, type: 'landscape-primary', onchange: null },
            pixelDepth: screen.pixelDepth,
        };
    } catch (e) {}
    const body = dom.window.document.body;
    if (body) {
        Object.defineProperty(body, 'clientWidth', { value: screen.bodyClientWidth });
        Object.defineProperty(body, 'clientHeight', { value: screen.bodyClientHeight });
    }
    if (payload.url) {
        try { dom.window.document.domain = new URL(payload.url).hostname; } catch (e) {}
    }
    delete globalThis.jsdom;
    const origLog = console.log;
    console.log = () => {};
    console.info = () => {};
    return () => {
        const stdout = [];
        console.log = (...msg) => stdout.push(msg.map((m) => '' + m).join(' '));
        return () => {
            origLog(JSON.stringify({ stdout: stdout.join('\n'), cookies: jar.serializeSync().cookies }));
        };
    };
})()"#;

const INLINE_SCRIPTS_JS: &str = r#"for (const source of __mediabridge_payload.inlineScripts) {
    try { (0, eval)(source); } catch (e) {}
}"#;

/// DOM emulation wrapper: set up jsdom, replay inline page scripts, then run
/// the caller's code with console capture and emit one JSON object.
pub(crate) fn build_dom_script(parts: &DomScriptParts<'_>, code: &str) -> Result<String, serde_json::Error> {
    let (allow, keys) = match parts.bindings {
        WindowBindings::AllowList(keys) => (true, keys.as_slice()),
        WindowBindings::DenyList(keys) => (false, keys.as_slice()),
    };

    let payload = serde_json::to_string(&DomPayload {
        html: parts.html,
        url: parts.url,
        cookies: parts.cookies,
        navigator: parts.identity,
        screen: parts.screen,
        bindings: BindingPolicy {
            allow,
            keys,
            retained: WindowBindings::retained_natives(parts.url.is_some()),
        },
        inline_scripts: parts.inline_scripts,
    })?;
    let import_specifier = serde_json::to_string(parts.jsdom_url)?;
    let callback = callback_name();
    let setup = DOM_SETUP_JS.replace("NAVIGATOR_OVERRIDE", NAVIGATOR_OVERRIDE_JS);
    let init_script = parts.init_script;

    Ok(format!(
        "{init_script};\n\
         import jsdom from {import_specifier};\n\
         const {PAYLOAD_GLOBAL} = {payload};\n\
         let {callback} = {setup};\n\
         {INLINE_SCRIPTS_JS}\n\
         {callback} = {callback}();\n\
         try {{\n\
         {code}\n\
         }} finally {{\n\
         {callback}();\n\
         }}\n"
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PhantomPayload<'a> {
    url: &'a str,
    user_agent: &'a str,
    resource_timeout_ms: u64,
    html_file: &'a str,
    cookie_file: &'a str,
    inline_scripts: &'a [String],
    code: &'a str,
}

/// Inputs of the PhantomJS page script.
pub(crate) struct PhantomScriptParts<'a> {
    pub url: Option<&'a str>,
    pub user_agent: &'a str,
    pub resource_timeout: std::time::Duration,
    pub html_file: &'a str,
    pub cookie_file: &'a str,
    pub inline_scripts: &'a [String],
}

/// PhantomJS runs an ES5 engine, so this stays free of arrow functions and
/// block-scoped declarations.
const PHANTOM_PAGE_JS: &str = r#"phantom.onError = function (msg, trace) {
    var stack = ['PHANTOM ERROR: ' + msg];
    if (trace && trace.length) {
        stack.push('TRACE:');
        trace.forEach(function (t) {
            stack.push(' -> ' + (t.file || t.sourceURL) + ': ' + t.line
                + (t.function ? ' (in function ' + t.function + ')' : ''));
        });
    }
    console.error(stack.join('\n'));
    phantom.exit(1);
};
(function () {
    var payload = __mediabridge_payload;
    var page = require('webpage').create();
    var fs = require('fs');
    var read = { mode: 'r', charset: 'utf-8' };
    var write = { mode: 'w', charset: 'utf-8' };
    page.settings.resourceTimeout = payload.resourceTimeoutMs;
    page.settings.userAgent = payload.userAgent;
    page.onLoadStarted = function () {
        page.evaluate(function () {
            delete window._phantom;
            delete window.callPhantom;
        });
    };
    var saveAndExit = function () {
        fs.write(payload.htmlFile, page.content, write);
        fs.write(payload.cookieFile, JSON.stringify(phantom.cookies), write);
        phantom.exit();
    };
    var loaded = false;
    page.onLoadFinished = function () {
        if (!loaded) {
            loaded = true;
            page.setContent(fs.read(payload.htmlFile, read), payload.url);
            return;
        }
        JSON.parse(fs.read(payload.cookieFile, read)).forEach(function (cookie) {
            phantom.addCookie(cookie);
        });
        payload.inlineScripts.forEach(function (source) {
            page.evaluate(function (source) {
                try { (0, eval)(source); } catch (e) {}
            }, source);
        });
        var result = page.evaluate(function (code) {
            var stdout = [];
            console.log = function () {
                stdout.push(Array.prototype.join.call(arguments, ' '));
            };
            try {
                (0, eval)(code);
            } catch (e) {
                return { stdout: stdout.join('\n'), error: String(e) };
            }
            return { stdout: stdout.join('\n'), error: null };
        }, payload.code);
        if (result.error !== null) {
            console.error(result.error);
            phantom.exit(1);
            return;
        }
        console.log(result.stdout);
        saveAndExit();
    };
    page.open('');
})();
"#;

/// Page script for PhantomJS: load the document from `html_file`, restore
/// cookies from `cookie_file`, replay inline scripts, run the caller's code
/// in the page and write the document and cookies back before exiting.
pub(crate) fn build_phantom_script(
    parts: &PhantomScriptParts<'_>,
    code: &str,
) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(&PhantomPayload {
        url: parts.url.unwrap_or_default(),
        user_agent: parts.user_agent,
        resource_timeout_ms: u64::try_from(parts.resource_timeout.as_millis()).unwrap_or(u64::MAX),
        html_file: parts.html_file,
        cookie_file: parts.cookie_file,
        inline_scripts: parts.inline_scripts,
        code,
    })?;
    Ok(format!("var {PAYLOAD_GLOBAL} = {payload};\n{PHANTOM_PAGE_JS}"))
}

fn callback_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("__callback_{suffix}")
}

/// Splits inline scripts out of `html`.
///
/// Every `<script>` element is removed from the returned document. Bodies of
/// inline JavaScript scripts (no `src`, no non-JS `type`) are returned in
/// document order.
pub fn extract_script_tags(html: &str) -> (String, Vec<String>) {
    static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
        RegexBuilder::new(r"<script(?P<attrs>[^>]*)>(?P<body>.*?)</script\s*>")
            .dot_matches_new_line(true)
            .case_insensitive(true)
            .build()
            .unwrap()
    });
    static SRC_RE: Lazy<Regex> = Lazy::new(|| {
        RegexBuilder::new(r#"(?:^|\s)src\s*="#)
            .case_insensitive(true)
            .build()
            .unwrap()
    });
    static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
        RegexBuilder::new(r#"(?:^|\s)type\s*=\s*['"]?(?P<type>[^'"\s>]+)"#)
            .case_insensitive(true)
            .build()
            .unwrap()
    });

    let mut inline_scripts = Vec::new();
    for caps in SCRIPT_RE.captures_iter(html) {
        let attrs = caps.name("attrs").map_or("", |m| m.as_str());
        let body = caps.name("body").map_or("", |m| m.as_str());

        if SRC_RE.is_match(attrs) || body.trim().is_empty() {
            continue;
        }
        if let Some(kind) = TYPE_RE.captures(attrs).and_then(|c| c.name("type"))
            && !is_javascript_type(kind.as_str())
        {
            continue;
        }
        inline_scripts.push(body.to_string());
    }

    (SCRIPT_RE.replace_all(html, "").into_owned(), inline_scripts)
}

fn is_javascript_type(kind: &str) -> bool {
    let kind = kind.to_ascii_lowercase();
    matches!(
        kind.as_str(),
        "text/javascript" | "application/javascript" | "text/ecmascript" | "application/ecmascript"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INIT_SCRIPT;

    #[test]
    fn extracts_inline_scripts_in_order_and_strips_all_tags() {
        let html = r#"<html><head><title>t</title><body>
            <div id="test-div"></div>
            <script src="https://example.com/script.js"></script>
            <script type="text/javascript">first();</script>
            <SCRIPT>
                second();
            </SCRIPT>
            <script type="application/ld+json">{"a": 1}</script>
        </body></html>"#;

        let (stripped, scripts) = extract_script_tags(html);
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0], "first();");
        assert_eq!(scripts[1].trim(), "second();");
        assert!(!stripped.to_ascii_lowercase().contains("<script"));
        assert!(stripped.contains(r#"<div id="test-div"></div>"#));
    }

    #[test]
    fn navigator_identity_follows_user_agent() {
        let windows = NavigatorIdentity::from_user_agent(crate::config::DEFAULT_USER_AGENT);
        assert_eq!(windows.platform, "Win32");
        assert_eq!(windows.vendor, "Google Inc.");
        assert!(windows.app_version.starts_with("5.0 (Windows"));
        assert!(!windows.webdriver);

        let custom = NavigatorIdentity::from_user_agent("test/ua");
        assert_eq!(custom.user_agent, "test/ua");
        assert_eq!(custom.platform, "");
    }

    #[test]
    fn plain_script_places_caller_code_last() {
        let identity = NavigatorIdentity::from_user_agent("test/ua");
        let script =
            build_plain_script(DEFAULT_INIT_SCRIPT, &identity, "console.log(navigator.userAgent);")
                .unwrap();

        let init = script.find("delete globalThis.Deno").unwrap();
        let payload = script.find(PAYLOAD_GLOBAL).unwrap();
        let caller = script.find("console.log(navigator.userAgent);").unwrap();
        assert!(init < payload && payload < caller);
        assert!(script.contains(r#""userAgent":"test/ua""#));
    }

    fn dom_script(html: &str, url: Option<&str>, code: &str) -> String {
        let (html, inline) = extract_script_tags(html);
        let identity = NavigatorIdentity::from_user_agent("test/ua");
        let cookies = ToughCookieStore::default();
        let screen = ScreenMetrics::default();
        let bindings = WindowBindings::default();
        build_dom_script(
            &DomScriptParts {
                init_script: DEFAULT_INIT_SCRIPT,
                jsdom_url: crate::config::DEFAULT_JSDOM_URL,
                html: &html,
                url,
                cookies: &cookies,
                identity: &identity,
                screen: &screen,
                bindings: &bindings,
                inline_scripts: &inline,
            },
            code,
        )
        .unwrap()
    }

    fn payload_of(script: &str) -> serde_json::Value {
        let start = script.find(&format!("const {PAYLOAD_GLOBAL} = ")).unwrap()
            + PAYLOAD_GLOBAL.len()
            + 9;
        let end = start + script[start..].find(";\n").unwrap();
        serde_json::from_str(&script[start..end]).unwrap()
    }

    #[test]
    fn inline_scripts_run_in_order_before_caller_code() {
        let script = dom_script(
            "<body><script>window.a = 1;</script><script>a = b;</script></body>",
            None,
            "console.log(window.a);",
        );

        let payload = payload_of(&script);
        assert_eq!(
            payload["inlineScripts"],
            serde_json::json!(["window.a = 1;", "a = b;"])
        );

        let replay = script.find("for (const source of").unwrap();
        let guard = script.find("try { (0, eval)(source); } catch (e) {}").unwrap();
        let caller = script.find("console.log(window.a);").unwrap();
        assert!(replay < guard && guard < caller);
        assert!(!payload["html"].as_str().unwrap().contains("<script"));
    }

    #[test]
    fn phantom_script_carries_caller_code_as_data() {
        let inline = vec!["window.a = 1;".to_string()];
        let script = build_phantom_script(
            &PhantomScriptParts {
                url: Some("https://example.com/"),
                user_agent: "test/ua",
                resource_timeout: std::time::Duration::from_secs(10),
                html_file: "/tmp/page.html",
                cookie_file: "/tmp/cookies.json",
                inline_scripts: &inline,
            },
            r#"console.log("}); phantom.exit(); ({")"#,
        )
        .unwrap();

        assert!(script.starts_with(&format!("var {PAYLOAD_GLOBAL} = ")));
        let start = PAYLOAD_GLOBAL.len() + 7;
        let end = start + script[start..].find(";\n").unwrap();
        let payload: serde_json::Value = serde_json::from_str(&script[start..end]).unwrap();
        assert_eq!(payload["code"], r#"console.log("}); phantom.exit(); ({")"#);
        assert_eq!(payload["resourceTimeoutMs"], 10_000);
        assert_eq!(payload["inlineScripts"][0], "window.a = 1;");
        assert_eq!(payload["url"], "https://example.com/");
        assert!(!script[end..].contains("phantom.exit(); ({"));
        assert!(!script.contains("=>"));
    }

    /// Minimal stand-ins for the jsdom module and the console, enough for the
    /// setup closure to run outside Deno.
    const JSDOM_STUB_JS: &str = r#"
globalThis.__emitted = [];
globalThis.console = {
    log: (...msg) => __emitted.push(msg.join(' ')),
    info: () => {},
    error: () => {},
};
globalThis.jsdom = {
    CookieJar: {
        deserializeSync: (store) => ({ serializeSync: () => store }),
    },
    JSDOM: function (html, options) {
        this.window = { document: { body: null } };
    },
};
"#;

    #[test]
    fn replay_loop_runs_inline_scripts_in_order_past_failures() {
        let script = dom_script(
            r#"<body>
                <script>globalThis.trace = ["first"];</script>
                <script>throw new Error("page script failure");</script>
                <script>trace.push("second");</script>
            </body>"#,
            None,
            r#"trace.push("caller"); console.log(trace.join(","));"#,
        );
        let start = script.find(&format!("const {PAYLOAD_GLOBAL} = ")).unwrap();

        let mut context = boa_engine::Context::default();
        context
            .eval(boa_engine::Source::from_bytes(JSDOM_STUB_JS))
            .unwrap();
        context
            .eval(boa_engine::Source::from_bytes(&script[start..]))
            .unwrap();
        let emitted = context
            .eval(boa_engine::Source::from_bytes(r#"__emitted.join("\n")"#))
            .unwrap()
            .to_string(&mut context)
            .unwrap()
            .to_std_string()
            .unwrap();

        let output: serde_json::Value = serde_json::from_str(&emitted).unwrap();
        assert_eq!(output["stdout"], "first,second,caller");
    }

    #[test]
    fn caller_data_is_only_in_the_payload() {
        let hostile = r#"<p>"; throw new Error("escaped"); "</p>"#;
        let script = dom_script(hostile, Some("https://example.com/"), "1;");
        let payload = payload_of(&script);

        assert_eq!(payload["html"], hostile);
        assert_eq!(payload["url"], "https://example.com/");
        assert_eq!(payload["bindings"]["allow"], true);
        assert!(
            !payload["bindings"]["retained"]
                .as_array()
                .unwrap()
                .contains(&serde_json::json!("localStorage"))
        );
        assert!(script.contains(r#"import jsdom from "https://esm.sh/v135/jsdom";"#));
    }

    #[test]
    fn storage_is_retained_without_scope() {
        let script = dom_script("<p></p>", None, "1;");
        let payload = payload_of(&script);
        assert_eq!(payload["url"], serde_json::Value::Null);
        assert!(
            payload["bindings"]["retained"]
                .as_array()
                .unwrap()
                .contains(&serde_json::json!("sessionStorage"))
        );
    }

    #[test]
    fn callback_names_are_unique_identifiers() {
        let a = callback_name();
        let b = callback_name();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
