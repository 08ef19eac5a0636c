use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::OnceCell;
use url::Url;

use super::process::{probe_version, run_command, write_script, write_temp_file};
use super::scripts::{PhantomScriptParts, build_phantom_script, extract_script_tags};
use super::{
    ExecutionRequest, InterpreterError, InterpreterResult, JavascriptInterpreter, sanitize_scope,
};
use crate::config::BridgeConfig;
use crate::cookies::{CookieJar, PhantomCookie, apply_phantom_cookies, serialize_phantom_cookies};

/// Runs scripts inside a PhantomJS page, with a real DOM and cookie store.
///
/// The document and cookies travel through scoped temp files that the page
/// script reads at load time and rewrites before exiting.
#[derive(Debug)]
pub struct PhantomJsInterpreter {
    executable: PathBuf,
    timeout: Duration,
    user_agent: String,
    scope: Option<Url>,
    version: OnceCell<Option<String>>,
}

impl PhantomJsInterpreter {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            executable: config.phantomjs_executable.clone(),
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
            scope: sanitize_scope(config.url.as_deref()),
            version: OnceCell::new(),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version
            .get_or_init(|| probe_version(&self.executable))
            .as_deref()
    }

    fn encode_error(err: serde_json::Error) -> InterpreterError {
        InterpreterError::Execution(format!("failed to encode script payload: {err}"))
    }
}

impl JavascriptInterpreter for PhantomJsInterpreter {
    fn key(&self) -> &'static str {
        "phantomjs"
    }

    fn name(&self) -> &'static str {
        "PhantomJS"
    }

    fn base_preference(&self) -> i64 {
        3
    }

    fn is_available(&self) -> bool {
        self.version().is_some()
    }

    fn supports(&self, _request: &ExecutionRequest, _has_cookie_jar: bool) -> bool {
        true
    }

    fn report_version(&self) {
        log::debug!(
            "[{}] {} version {}",
            self.name(),
            self.executable.display(),
            self.version().unwrap_or("unknown")
        );
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        cookie_jar: Option<&mut CookieJar>,
    ) -> InterpreterResult<String> {
        request.log_note("Executing JS in PhantomJS");

        let mut cookie_jar = match (cookie_jar, &self.scope) {
            (Some(_), None) => {
                log::warn!("No valid url scope provided, cookiejar is not applied");
                None
            }
            (jar, _) => jar,
        };

        let (html, inline_scripts) = extract_script_tags(request.html.as_deref().unwrap_or_default());
        let cookies = match &self.scope {
            Some(scope) => serialize_phantom_cookies(cookie_jar.as_deref(), scope),
            None => Vec::new(),
        };

        let html_file = write_temp_file(&html, ".html")?;
        let cookie_file = write_temp_file(
            &serde_json::to_string(&cookies).map_err(Self::encode_error)?,
            ".json",
        )?;

        let html_path = html_file.display().to_string();
        let cookie_path = cookie_file.display().to_string();
        let source = build_phantom_script(
            &PhantomScriptParts {
                url: self.scope.as_ref().map(Url::as_str),
                user_agent: &self.user_agent,
                resource_timeout: self.timeout,
                html_file: &html_path,
                cookie_file: &cookie_path,
                inline_scripts: &inline_scripts,
            },
            &request.script,
        )
        .map_err(Self::encode_error)?;

        let script = write_script(&source)?;
        let args = vec!["--ssl-protocol=any".to_string(), script.display().to_string()];
        let stdout = run_command(&self.executable, &args, self.timeout)?;

        if cookie_jar.is_some() {
            let reported = fs::read_to_string(&cookie_file)?;
            let reported: Vec<PhantomCookie> =
                serde_json::from_str(&reported).map_err(|source| InterpreterError::ParseFailure {
                    output: reported.clone(),
                    source,
                })?;
            apply_phantom_cookies(cookie_jar.as_deref_mut(), &reported);
        }

        Ok(stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::cookies::Cookie;

    /// A `phantomjs` stand-in: `--version` prints 2.1.1, anything else runs
    /// `body` with the page script path in `$2`.
    fn fake_phantomjs(body: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phantomjs");
        let script = format!(
            "#!/bin/sh\n\
             case \"$1\" in\n\
             --version) echo 2.1.1 ;;\n\
             *) {body} ;;\n\
             esac\n"
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    }

    fn interpreter(executable: &Path, url: Option<&str>) -> PhantomJsInterpreter {
        let mut config = BridgeConfig::new().with_phantomjs_executable(executable);
        if let Some(url) = url {
            config = config.with_url(url);
        }
        PhantomJsInterpreter::new(&config)
    }

    #[test]
    fn availability_follows_the_version_probe() {
        let (_dir, path) = fake_phantomjs("true");
        let jsi = interpreter(&path, None);
        assert!(jsi.is_available());
        assert_eq!(jsi.version(), Some("2.1.1"));
        assert!(jsi.supports(&ExecutionRequest::new("1").with_html("<p></p>"), true));

        let missing = interpreter(Path::new("/nonexistent/phantomjs"), None);
        assert!(!missing.is_available());
    }

    #[test]
    fn command_line_and_temp_files() {
        let (_dir, path) = fake_phantomjs(r#"echo "$*""#);
        let jsi = interpreter(&path, None);
        let out = jsi
            .execute(&ExecutionRequest::new("1").with_html("<p></p>"), None)
            .unwrap();

        assert!(out.starts_with("--ssl-protocol=any "));
        let script = out.rsplit(' ').next().unwrap();
        assert!(script.ends_with(".js"));
        assert!(!std::path::Path::new(script).exists());
    }

    #[test]
    fn reported_cookies_are_merged_into_the_jar() {
        let (_dir, path) = fake_phantomjs(
            r#"f=$(grep -o '"cookieFile":"[^"]*"' "$2" | cut -d'"' -f4); echo '[{"name":"sid","value":"new","domain":".example.com","path":"/","secure":true,"expiry":1893456000}]' > "$f"; echo done"#,
        );
        let jsi = interpreter(&path, Some("https://example.com/123/456"));

        let mut jar = CookieJar::new();
        jar.set_cookie(Cookie::new("sid", "old", ".example.com", "/"));
        let out = jsi
            .execute(&ExecutionRequest::new("console.log(document.cookie)"), Some(&mut jar))
            .unwrap();

        assert_eq!(out, "done");
        let cookie = jar.get(".example.com", "/", "sid").unwrap();
        assert_eq!(cookie.value, "new");
        assert!(cookie.secure);
        assert_eq!(cookie.expires, Some(1_893_456_000));
    }

    #[test]
    fn jar_without_scope_is_left_untouched() {
        let (_dir, path) = fake_phantomjs(
            r#"f=$(grep -o '"cookieFile":"[^"]*"' "$2" | cut -d'"' -f4); echo '[{"name":"a","value":"1","domain":".example.com"}]' > "$f""#,
        );
        let jsi = interpreter(&path, None);
        let mut jar = CookieJar::new();
        jsi.execute(&ExecutionRequest::new("1"), Some(&mut jar)).unwrap();
        assert!(jar.is_empty());
    }

    #[test]
    fn page_errors_are_process_failures() {
        let (_dir, path) = fake_phantomjs("echo 'ReferenceError: nope' >&2; exit 1");
        let jsi = interpreter(&path, None);
        let err = jsi.execute(&ExecutionRequest::new("nope()"), None).unwrap_err();
        assert!(err.is_process_failure());
        assert!(err.to_string().contains("ReferenceError: nope"));
    }
}
