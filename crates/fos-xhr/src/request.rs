//! Fetch Requests
//!
//! The request descriptor handed to the dispatcher, plus request bodies.

use url::Url;

use crate::FetchError;
use crate::headers::HeaderList;

/// User/password pair for Basic authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    /// Credentials embedded in a URL's userinfo
    pub fn from_url(url: &Url) -> Option<Self> {
        if url.username().is_empty() && url.password().is_none() {
            return None;
        }
        let decode =
            |s: &str| percent_encoding::percent_decode_str(s).decode_utf8_lossy().into_owned();
        Some(Self {
            user: decode(url.username()),
            password: decode(url.password().unwrap_or("")),
        })
    }
}

/// Request body
#[derive(Debug, Clone)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    Text(String),
    Form(FormData),
}

impl RequestBody {
    /// Encode to wire bytes and the content type implied by the body kind
    pub fn encode(&self) -> (Option<String>, Vec<u8>) {
        match self {
            RequestBody::Bytes(bytes) => (None, bytes.clone()),
            RequestBody::Text(text) => (
                Some("text/plain;charset=UTF-8".to_string()),
                text.as_bytes().to_vec(),
            ),
            RequestBody::Form(form) => {
                let (content_type, body) = form.to_multipart_body();
                (Some(content_type), body)
            }
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<FormData> for RequestBody {
    fn from(form: FormData) -> Self {
        RequestBody::Form(form)
    }
}

/// Request descriptor
///
/// Immutable once dispatched. Redirect hops work on per-hop copies of the
/// URL and headers.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: String,
    pub headers: HeaderList,
    pub body: Option<RequestBody>,
    /// Serialized origin of the requesting document
    pub origin: String,
    pub with_credentials: bool,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub proxy: Option<String>,
    pub strict_tls: Option<bool>,
    pub auth: Option<Credentials>,
    /// An upload progress listener is attached
    pub upload_listener: bool,
}

impl FetchRequest {
    /// Create a request whose origin is the target's own origin
    pub fn new(method: &str, url: Url) -> Self {
        let origin = url.origin().ascii_serialization();
        Self {
            url,
            method: method.to_ascii_uppercase(),
            headers: HeaderList::new(),
            body: None,
            origin,
            with_credentials: false,
            user_agent: None,
            referrer: None,
            proxy: None,
            strict_tls: None,
            auth: None,
            upload_listener: false,
        }
    }

    /// Parse the URL and create a request
    pub fn parse(method: &str, url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::new(method, url))
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.trim_end_matches('/').to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    pub fn with_auth(mut self, user: &str, password: &str) -> Self {
        self.auth = Some(Credentials::new(user, password));
        self
    }

    pub fn with_referrer(mut self, referrer: &str) -> Self {
        self.referrer = Some(referrer.to_string());
        self
    }

    pub fn with_user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    pub fn with_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_string());
        self
    }

    pub fn with_strict_tls(mut self, strict: bool) -> Self {
        self.strict_tls = Some(strict);
        self
    }

    pub fn with_upload_listener(mut self, attached: bool) -> Self {
        self.upload_listener = attached;
        self
    }

    /// Credentials for the 401 retry: explicit ones first, then URL userinfo
    pub fn credentials(&self) -> Option<Credentials> {
        self.auth.clone().or_else(|| Credentials::from_url(&self.url))
    }

    /// Whether the method carries a body on the wire
    pub fn allows_body(&self) -> bool {
        !matches!(self.method.as_str(), "GET" | "HEAD")
    }
}

/// FormData for XHR
#[derive(Debug, Clone, Default)]
pub struct FormData {
    entries: Vec<(String, FormDataValue)>,
}

/// FormData value
#[derive(Debug, Clone)]
pub enum FormDataValue {
    Text(String),
    File { name: String, content: Vec<u8>, content_type: String },
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), FormDataValue::Text(value.to_string())));
    }

    pub fn append_file(
        &mut self,
        name: &str,
        filename: &str,
        content: Vec<u8>,
        content_type: &str,
    ) {
        self.entries.push((name.to_string(), FormDataValue::File {
            name: filename.to_string(),
            content,
            content_type: content_type.to_string(),
        }));
    }

    pub fn get(&self, name: &str) -> Option<&FormDataValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Encode as `multipart/form-data`, returning the content type and body
    pub fn to_multipart_body(&self) -> (String, Vec<u8>) {
        let boundary = format!("----fOSFormBoundary{:016x}", rand_boundary());
        let mut body = Vec::new();

        for (name, value) in &self.entries {
            push_line(&mut body, &format!("--{boundary}"));
            match value {
                FormDataValue::Text(text) => {
                    let disposition =
                        format!("Content-Disposition: form-data; name=\"{}\"", quote(name));
                    push_line(&mut body, &disposition);
                    push_line(&mut body, "");
                    body.extend_from_slice(text.as_bytes());
                }
                FormDataValue::File { name: filename, content, content_type } => {
                    push_line(
                        &mut body,
                        &format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"",
                            quote(name),
                            quote(filename)
                        ),
                    );
                    push_line(&mut body, &format!("Content-Type: {content_type}"));
                    push_line(&mut body, "");
                    body.extend_from_slice(content);
                }
            }
            push_line(&mut body, "");
        }
        push_line(&mut body, &format!("--{boundary}--"));

        (format!("multipart/form-data; boundary={boundary}"), body)
    }
}

fn push_line(body: &mut Vec<u8>, line: &str) {
    body.extend_from_slice(line.as_bytes());
    body.extend_from_slice(b"\r\n");
}

/// Escape a form field or file name for a quoted-string
fn quote(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"").replace(['\r', '\n'], " ")
}

fn rand_boundary() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}
