//! Translation between the host jar and the PhantomJS cookie store.
//!
//! `phantom.addCookie` takes `expires` in milliseconds; `phantom.cookies`
//! reports a date string under `expires` and seconds under `expiry`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{Cookie, CookieJar};

/// Cookie record as accepted by `phantom.addCookie`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhantomCookie {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub secure: bool,
}

/// Host → PhantomJS. A cookie without a domain is bound to the scope host.
pub fn serialize_phantom_cookies(jar: Option<&CookieJar>, scope: &Url) -> Vec<PhantomCookie> {
    let Some(jar) = jar else {
        return Vec::new();
    };
    jar.cookies_for_url(scope)
        .into_iter()
        .map(|cookie| PhantomCookie {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: if cookie.domain.is_empty() {
                scope.host_str().unwrap_or_default().to_string()
            } else {
                cookie.domain.clone()
            },
            path: Some(cookie.path.clone()),
            expires: cookie
                .expires
                .and_then(|secs| secs.checked_mul(1000))
                .map(Value::from),
            expiry: None,
            secure: cookie.secure,
        })
        .collect()
}

/// PhantomJS → host. Records without a name or domain are skipped.
pub fn apply_phantom_cookies(jar: Option<&mut CookieJar>, cookies: &[PhantomCookie]) {
    let Some(jar) = jar else {
        return;
    };
    jar.extend(cookies.iter().filter_map(|record| {
        if record.name.is_empty() || record.domain.is_empty() {
            return None;
        }
        let path = record
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("/");
        Some(
            Cookie::new(&record.name, &record.value, &record.domain, path)
                .with_secure(record.secure)
                .with_expires(record.expiry),
        )
    }));
}
