//! Translation between the host jar and the cookie store used by jsdom.
//!
//! jsdom keeps its cookies in a tough-cookie `CookieJar`, which round-trips
//! through `Cookie.toJSON`/`Cookie.fromJSON`. Only the Netscape-compatible
//! fields are exchanged; tough-cookie bookkeeping (`creation`,
//! `lastAccessed`, ...) is ignored on the way back.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{Cookie, CookieJar};

/// Serialized tough-cookie record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToughCookie {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Milliseconds since epoch when produced by us; an ISO-8601 string or
    /// `"Infinity"` when produced by tough-cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Shape accepted by `CookieJar.deserializeSync` and produced by
/// `CookieJar.serializeSync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToughCookieStore {
    #[serde(default)]
    pub cookies: Vec<ToughCookie>,
}

/// Host → jsdom. Cookies with an empty value are dropped; the leading dot of
/// the domain is stripped because tough-cookie fails to match dotted domains.
pub fn serialize_cookies(jar: Option<&CookieJar>, scope: &Url) -> ToughCookieStore {
    let Some(jar) = jar else {
        return ToughCookieStore::default();
    };

    let cookies = jar
        .cookies_for_url(scope)
        .into_iter()
        .filter(|cookie| !cookie.value.is_empty())
        .map(|cookie| to_tough(cookie, scope))
        .collect();

    ToughCookieStore { cookies }
}

fn to_tough(cookie: &Cookie, scope: &Url) -> ToughCookie {
    let bare = cookie.domain.trim_start_matches('.');
    let domain = if bare.is_empty() {
        scope.host_str().unwrap_or_default().to_string()
    } else {
        bare.to_string()
    };

    ToughCookie {
        key: Some(cookie.name.clone()),
        value: Some(cookie.value.clone()),
        domain: Some(domain),
        expires: cookie
            .expires
            .and_then(|secs| secs.checked_mul(1000))
            .map(Value::from),
        host_only: Some(!cookie.domain_initial_dot()),
        secure: Some(cookie.secure),
        path: Some(cookie.path.clone()),
    }
}

/// jsdom → host. Records without a key, value or domain are skipped.
pub fn apply_cookies(jar: Option<&mut CookieJar>, cookies: &[ToughCookie]) {
    let Some(jar) = jar else {
        return;
    };
    jar.extend(cookies.iter().filter_map(from_tough));
}

fn from_tough(record: &ToughCookie) -> Option<Cookie> {
    let name = record.key.as_deref().filter(|s| !s.is_empty())?;
    let value = record.value.as_deref().filter(|s| !s.is_empty())?;
    let domain = record.domain.as_deref().filter(|s| !s.is_empty())?;

    let bare = domain.trim_start_matches('.');
    let domain = if record.host_only.unwrap_or(false) {
        bare.to_string()
    } else {
        format!(".{bare}")
    };
    let path = record
        .path
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or("/");

    Some(
        Cookie::new(name, value, domain, path)
            .with_secure(record.secure.unwrap_or(false))
            .with_expires(record.expires.as_ref().and_then(parse_expires)),
    )
}

fn parse_expires(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().map(|millis| millis / 1000),
        Value::String(text) => parse_timestamp(text),
        _ => None,
    }
}

/// Parses the date formats tough-cookie emits (ISO-8601) plus the RFC 2822
/// form used by `Set-Cookie`. `"Infinity"` and anything else yields `None`.
fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
        return Some(parsed.timestamp());
    }
    NaiveDateTime::parse_from_str(text, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}
