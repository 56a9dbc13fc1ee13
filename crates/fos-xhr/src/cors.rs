//! CORS (Cross-Origin Resource Sharing)
//!
//! Origin comparison, simple/preflight classification and the header checks
//! applied to preflight and actual responses.

use std::collections::BTreeSet;

use url::Url;

use crate::headers::HeaderList;
use crate::request::FetchRequest;

/// Origin representation for CORS
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Origin {
    /// Create new origin
    pub fn new(scheme: &str, host: &str, port: Option<u16>) -> Self {
        Self {
            scheme: scheme.to_lowercase(),
            host: host.to_lowercase(),
            port,
        }
    }

    /// Origin of a URL
    pub fn from_url(url: &Url) -> Self {
        Self::new(url.scheme(), url.host_str().unwrap_or(""), url.port())
    }

    /// Parse a serialized origin such as `https://example.com:8080`
    ///
    /// `null` and anything unparsable yield an opaque origin.
    pub fn parse(serialized: &str) -> Self {
        match Url::parse(serialized.trim()) {
            Ok(url) => Self::from_url(&url),
            Err(_) => Self::new("null", "", None),
        }
    }

    /// Get effective port (default for scheme)
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| match self.scheme.as_str() {
            "http" | "ws" => 80,
            "https" | "wss" => 443,
            _ => 0,
        })
    }

    /// Check if opaque origin
    pub fn is_opaque(&self) -> bool {
        !matches!(self.scheme.as_str(), "http" | "https" | "ws" | "wss") || self.host.is_empty()
    }

    /// Check if same origin. Opaque origins match nothing.
    pub fn is_same_origin(&self, other: &Origin) -> bool {
        !self.is_opaque()
            && !other.is_opaque()
            && self.scheme == other.scheme
            && self.host == other.host
            && self.effective_port() == other.effective_port()
    }

    /// Serialize to string
    pub fn serialize(&self) -> String {
        if self.is_opaque() {
            return "null".to_string();
        }

        let port_str = match (self.scheme.as_str(), self.port) {
            ("http", Some(80)) | ("https", Some(443)) => String::new(),
            (_, Some(p)) => format!(":{}", p),
            (_, None) => String::new(),
        };

        format!("{}://{}{}", self.scheme, self.host, port_str)
    }
}

/// Simple (CORS-safelisted) methods that don't require preflight
pub const SIMPLE_METHODS: &[&str] = &["GET", "HEAD", "POST"];

/// Simple (CORS-safelisted) headers that don't require preflight
pub const SIMPLE_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "content-language",
    "content-type",
];

/// CORS-safelisted response headers
const SAFE_RESPONSE_HEADERS: &[&str] = &[
    "cache-control",
    "content-language",
    "content-length",
    "content-type",
    "expires",
    "last-modified",
    "pragma",
];

/// Forbidden headers that cannot be set by callers
const FORBIDDEN_HEADERS: &[&str] = &[
    "accept-charset",
    "accept-encoding",
    "access-control-request-headers",
    "access-control-request-method",
    "connection",
    "content-length",
    "cookie",
    "cookie2",
    "date",
    "dnt",
    "expect",
    "host",
    "keep-alive",
    "origin",
    "referer",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "via",
];

pub fn is_simple_method(method: &str) -> bool {
    SIMPLE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

pub fn is_simple_header(name: &str) -> bool {
    SIMPLE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Check if header is forbidden
pub fn is_forbidden_header(name: &str) -> bool {
    let name_lower = name.to_ascii_lowercase();
    FORBIDDEN_HEADERS.contains(&name_lower.as_str())
        || name_lower.starts_with("sec-")
        || name_lower.starts_with("proxy-")
}

/// CORS classification of a request, computed once before any I/O
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsFlags {
    pub is_cross_origin: bool,
    pub requires_preflight: bool,
    /// Lower-cased request header names outside the simple set
    pub non_simple_headers: BTreeSet<String>,
}

/// Classify a request for CORS handling
pub fn classify(request: &FetchRequest) -> CorsFlags {
    let target = Origin::from_url(&request.url);
    let is_cross_origin = !Origin::parse(&request.origin).is_same_origin(&target);

    let non_simple_headers: BTreeSet<String> = request
        .headers
        .iter()
        .map(|(name, _)| name.to_ascii_lowercase())
        .filter(|name| !is_simple_header(name))
        .collect();

    let requires_preflight = is_cross_origin
        && (!is_simple_method(&request.method)
            || !non_simple_headers.is_empty()
            || request.upload_listener);

    CorsFlags {
        is_cross_origin,
        requires_preflight,
        non_simple_headers,
    }
}

/// Split a comma separated header list
fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Check `Access-Control-Allow-Origin` and, with credentials,
/// `Access-Control-Allow-Credentials`
pub fn check_allow_origin(
    headers: &HeaderList,
    origin: &str,
    with_credentials: bool,
) -> Result<(), CorsError> {
    let Some(allow_origin) = headers.get("access-control-allow-origin").map(str::trim) else {
        return Err(CorsError::MissingAllowOrigin);
    };

    if allow_origin != "*" && allow_origin != origin {
        return Err(CorsError::OriginMismatch {
            expected: origin.to_string(),
            got: allow_origin.to_string(),
        });
    }

    if with_credentials {
        let allow_credentials = headers.get("access-control-allow-credentials").map(str::trim);
        if allow_credentials != Some("true") {
            return Err(CorsError::CredentialsNotAllowed);
        }
    }

    Ok(())
}

/// Check that every non-simple request header is listed in
/// `Access-Control-Allow-Headers`
pub fn check_allow_headers(
    headers: &HeaderList,
    non_simple_headers: &BTreeSet<String>,
) -> Result<(), CorsError> {
    let allowed: BTreeSet<String> = headers
        .get_all("access-control-allow-headers")
        .flat_map(split_list)
        .map(str::to_ascii_lowercase)
        .collect();

    for name in non_simple_headers {
        if !is_simple_header(name) && !allowed.contains(name) {
            return Err(CorsError::HeaderNotAllowed(name.clone()));
        }
    }

    Ok(())
}

/// Filter cross-origin response headers to the safelisted ones plus
/// `Access-Control-Expose-Headers`
pub fn filter_response_headers(headers: &HeaderList) -> HeaderList {
    let exposed: BTreeSet<String> = headers
        .get_all("access-control-expose-headers")
        .flat_map(split_list)
        .map(str::to_ascii_lowercase)
        .collect();

    headers
        .iter()
        .filter(|(name, _)| {
            let name_lower = name.to_ascii_lowercase();
            SAFE_RESPONSE_HEADERS.contains(&name_lower.as_str()) || exposed.contains(&name_lower)
        })
        .collect()
}

/// CORS errors. Never shown to callers, only logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorsError {
    #[error("Missing Access-Control-Allow-Origin header")]
    MissingAllowOrigin,

    #[error("Origin mismatch: expected {expected}, got {got}")]
    OriginMismatch { expected: String, got: String },

    #[error("Credentials not allowed by server")]
    CredentialsNotAllowed,

    #[error("Header not allowed: {0}")]
    HeaderNotAllowed(String),
}
