//! Host-side cookie storage.
//!
//! Cookies follow the Netscape field set: a leading dot on the domain marks a
//! cookie that is valid for subdomains, anything else is host-only. The jar
//! is keyed by `(domain, path, name)` so setting an existing cookie replaces
//! it in place.

pub mod phantom;
pub mod tough;

pub use phantom::{PhantomCookie, apply_phantom_cookies, serialize_phantom_cookies};
pub use tough::{ToughCookie, ToughCookieStore, apply_cookies, serialize_cookies};

use std::collections::BTreeMap;

use chrono::Utc;
use url::Url;

/// A single cookie as stored by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    /// Expiry as a unix timestamp in seconds; `None` for session cookies.
    pub expires: Option<i64>,
}

impl Cookie {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: path.into(),
            secure: false,
            expires: None,
        }
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_expires(mut self, expires: Option<i64>) -> Self {
        self.expires = expires;
        self
    }

    pub fn domain_initial_dot(&self) -> bool {
        self.domain.starts_with('.')
    }

    pub fn is_host_only(&self) -> bool {
        !self.domain_initial_dot()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Whether this cookie would be sent with a request to `url`.
    pub fn matches_url(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        let domain_ok = if self.is_host_only() {
            host == self.domain.to_ascii_lowercase()
        } else {
            let bare = self.domain.trim_start_matches('.').to_ascii_lowercase();
            host == bare || host.ends_with(&format!(".{bare}"))
        };

        domain_ok && path_matches(&self.path, url.path()) && (!self.secure || url.scheme() == "https")
    }
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path.is_empty() || cookie_path == "/" {
        return true;
    }
    if !request_path.starts_with(cookie_path) {
        return false;
    }
    cookie_path.ends_with('/')
        || request_path.len() == cookie_path.len()
        || request_path[cookie_path.len()..].starts_with('/')
}

/// In-memory cookie jar supplied by callers of the script bridge.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: BTreeMap<(String, String, String), Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        let key = (cookie.domain.clone(), cookie.path.clone(), cookie.name.clone());
        self.cookies.insert(key, cookie);
    }

    pub fn get(&self, domain: &str, path: &str, name: &str) -> Option<&Cookie> {
        self.cookies
            .get(&(domain.to_string(), path.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.values()
    }

    /// Cookies that a browser would attach to a request for `url`.
    pub fn cookies_for_url(&self, url: &Url) -> Vec<&Cookie> {
        let now = Utc::now().timestamp();
        self.cookies
            .values()
            .filter(|cookie| !cookie.is_expired(now) && cookie.matches_url(url))
            .collect()
    }
}

impl Extend<Cookie> for CookieJar {
    fn extend<T: IntoIterator<Item = Cookie>>(&mut self, iter: T) {
        for cookie in iter {
            self.set_cookie(cookie);
        }
    }
}
