//! Cookie Handling
//!
//! The cookie store seen by the fetch pipeline, and an in-memory jar with
//! domain/path matching.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use url::Url;

/// Options for `CookieStore::set_cookie`
#[derive(Debug, Clone, Copy, Default)]
pub struct SetCookieOptions {
    /// Silently drop unparsable `Set-Cookie` values
    pub ignore_parse_errors: bool,
}

/// Cookie parse error
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid Set-Cookie value: {0}")]
pub struct CookieError(pub String);

/// Cookie storage keyed by URL
///
/// Implementations serialize concurrent writes themselves.
pub trait CookieStore: Send + Sync {
    /// Cookies to send to `url`, as `name=value` strings
    fn get_cookies(&self, url: &Url) -> Vec<String>;

    /// Store one raw `Set-Cookie` value received from `url`
    fn set_cookie(
        &self,
        raw: &str,
        url: &Url,
        options: SetCookieOptions,
    ) -> Result<(), CookieError>;
}

/// Cookie attributes
#[derive(Debug, Clone)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Domain (for matching)
    pub domain: String,
    /// Path (for matching)
    pub path: String,
    /// Expiry time in unix seconds (None = session cookie)
    pub expires: Option<u64>,
    /// Secure flag (HTTPS only)
    pub secure: bool,
    /// HttpOnly flag (no JS access)
    pub http_only: bool,
}

impl Cookie {
    /// Create a simple session cookie
    pub fn new(name: &str, value: &str, domain: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    /// Check if cookie has expired
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| expires <= now_secs())
    }

    /// Check if cookie matches the given domain
    pub fn matches_domain(&self, domain: &str) -> bool {
        if self.domain.eq_ignore_ascii_case(domain) {
            return true;
        }

        // .example.com matches foo.example.com
        if self.domain.starts_with('.') {
            domain.ends_with(&self.domain) || format!(".{}", domain) == self.domain
        } else {
            false
        }
    }

    /// Check if cookie matches the given path
    pub fn matches_path(&self, path: &str) -> bool {
        self.path == "/" || path.starts_with(&self.path)
    }

    /// Check if cookie should be sent for request
    pub fn matches(&self, domain: &str, path: &str, is_secure: bool) -> bool {
        if self.is_expired() || (self.secure && !is_secure) {
            return false;
        }
        self.matches_domain(domain) && self.matches_path(path)
    }

    /// Serialize to Cookie header format (name=value)
    pub fn serialize(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Parse a Set-Cookie header
pub fn parse_set_cookie(header: &str, request_domain: &str) -> Option<Cookie> {
    let mut parts = header.split(';');

    // First part is name=value
    let name_value = parts.next()?.trim();
    let eq_pos = name_value.find('=')?;
    let name = name_value[..eq_pos].trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = Cookie::new(name, name_value[eq_pos + 1..].trim(), request_domain, "/");

    for part in parts {
        let part = part.trim();
        let (key, value) = match part.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
            None => (part.to_ascii_lowercase(), ""),
        };

        match key.as_str() {
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "domain" if !value.is_empty() => {
                let domain = value.to_ascii_lowercase();
                cookie.domain =
                    if domain.starts_with('.') { domain } else { format!(".{}", domain) };
            }
            "path" if value.starts_with('/') => cookie.path = value.to_string(),
            "max-age" => {
                if let Ok(seconds) = value.parse::<i64>() {
                    let expires = if seconds <= 0 { 0 } else { now_secs() + seconds as u64 };
                    cookie.expires = Some(expires);
                }
            }
            _ => {}
        }
    }

    Some(cookie)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// In-memory cookie jar
#[derive(Debug, Default)]
pub struct CookieJar {
    /// Cookies indexed by domain
    cookies: Mutex<HashMap<String, Vec<Cookie>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cookie to the jar
    pub fn add(&self, cookie: Cookie) {
        let mut jar = self.cookies.lock().unwrap_or_else(|e| e.into_inner());
        let cookies = jar.entry(cookie.domain.clone()).or_default();

        // Remove existing cookie with same name/path
        cookies.retain(|c| !(c.name == cookie.name && c.path == cookie.path));

        // Expired cookies only delete
        if !cookie.is_expired() {
            cookies.push(cookie);
        }
    }

    /// Get total cookie count
    pub fn len(&self) -> usize {
        let jar = self.cookies.lock().unwrap_or_else(|e| e.into_inner());
        jar.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all cookies
    pub fn clear(&self) {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl CookieStore for CookieJar {
    fn get_cookies(&self, url: &Url) -> Vec<String> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        let is_secure = url.scheme() == "https";
        let jar = self.cookies.lock().unwrap_or_else(|e| e.into_inner());

        jar.values()
            .flatten()
            .filter(|c| c.matches(host, url.path(), is_secure))
            .map(Cookie::serialize)
            .collect()
    }

    fn set_cookie(
        &self,
        raw: &str,
        url: &Url,
        options: SetCookieOptions,
    ) -> Result<(), CookieError> {
        let host = url.host_str().unwrap_or_default();
        match parse_set_cookie(raw, host) {
            Some(cookie) => {
                self.add(cookie);
                Ok(())
            }
            None if options.ignore_parse_errors => Ok(()),
            None => Err(CookieError(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cookie_parse() {
        let cookie =
            parse_set_cookie("session=abc123; Path=/; HttpOnly; Secure", "example.com").unwrap();

        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.value, "abc123");
        assert!(cookie.http_only);
        assert!(cookie.secure);
    }

    #[test]
    fn test_cookie_parse_rejects_garbage() {
        assert!(parse_set_cookie("no-equals-sign", "example.com").is_none());
        assert!(parse_set_cookie("=value", "example.com").is_none());
    }

    #[test]
    fn test_cookie_domain_match() {
        let cookie = Cookie::new("test", "value", ".example.com", "/");

        assert!(cookie.matches_domain("example.com"));
        assert!(cookie.matches_domain("foo.example.com"));
        assert!(!cookie.matches_domain("other.com"));
    }

    #[test]
    fn test_jar_round_trip_by_url() {
        let jar = CookieJar::new();
        let opts = SetCookieOptions::default();

        jar.set_cookie("session=abc123; Path=/", &url("http://example.com/login"), opts).unwrap();
        jar.set_cookie("user=john; Path=/api", &url("http://example.com/login"), opts).unwrap();

        let cookies = jar.get_cookies(&url("http://example.com/api/test"));
        assert_eq!(cookies.len(), 2);
        assert!(cookies.contains(&"session=abc123".to_string()));
        assert!(cookies.contains(&"user=john".to_string()));

        assert_eq!(jar.get_cookies(&url("http://example.com/")), vec!["session=abc123"]);
        assert!(jar.get_cookies(&url("http://other.com/")).is_empty());
    }

    #[test]
    fn test_jar_overwrites_by_name_and_path() {
        let jar = CookieJar::new();
        let u = url("http://example.com/");
        jar.set_cookie("a=1", &u, SetCookieOptions::default()).unwrap();
        jar.set_cookie("a=2", &u, SetCookieOptions::default()).unwrap();

        assert_eq!(jar.len(), 1);
        assert_eq!(jar.get_cookies(&u), vec!["a=2"]);
    }

    #[test]
    fn test_jar_max_age_zero_deletes() {
        let jar = CookieJar::new();
        let u = url("http://example.com/");
        jar.set_cookie("a=1", &u, SetCookieOptions::default()).unwrap();
        jar.set_cookie("a=; Max-Age=0", &u, SetCookieOptions::default()).unwrap();

        assert!(jar.is_empty());
    }

    #[test]
    fn test_cookie_secure() {
        let jar = CookieJar::new();
        let options = SetCookieOptions::default();
        jar.set_cookie("secure_cookie=value; Secure", &url("https://example.com/"), options)
            .unwrap();

        assert!(jar.get_cookies(&url("http://example.com/")).is_empty());
        assert_eq!(jar.get_cookies(&url("https://example.com/")).len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        let jar = CookieJar::new();
        let u = url("http://example.com/");

        assert!(jar.set_cookie("garbage", &u, SetCookieOptions::default()).is_err());
        let lenient = SetCookieOptions { ignore_parse_errors: true };
        assert!(jar.set_cookie("garbage", &u, lenient).is_ok());
        assert!(jar.is_empty());
    }
}
