//! XMLHttpRequest
//!
//! Stateful request object on top of the fetch pipeline. Tracks the ready
//! state from the pipeline's events and exposes the final response.

use url::Url;

use crate::FetchError;
use crate::abort::AbortHandle;
use crate::agent::Transport;
use crate::cors;
use crate::dispatch::Fetcher;
use crate::event::FetchEvent;
use crate::headers::HeaderList;
use crate::request::{Credentials, FetchRequest, RequestBody};
use crate::response::Outcome;

/// XMLHttpRequest ready states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ReadyState {
    /// Created, open() not called yet
    #[default]
    Unsent = 0,
    /// open() has been called
    Opened = 1,
    /// Final status and headers received
    HeadersReceived = 2,
    /// Body received
    Loading = 3,
    /// Operation complete, successfully or not
    Done = 4,
}

/// XMLHttpRequest object
#[derive(Debug, Default)]
pub struct XmlHttpRequest {
    ready_state: ReadyState,
    status: u16,
    status_text: String,
    response: Vec<u8>,
    response_headers: HeaderList,
    response_url: Option<Url>,

    /// Send cookies and auth on cross-origin requests
    pub with_credentials: bool,
    /// Serialized origin of the requesting document. Defaults to the
    /// target's own origin.
    pub origin: Option<String>,
    /// An upload progress listener is attached
    pub upload_listener: bool,

    // Internal state
    method: String,
    url: Option<Url>,
    auth: Option<Credentials>,
    request_headers: HeaderList,
    send_flag: bool,
    abort: AbortHandle,
}

impl XmlHttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the request. Every open gets a fresh abort handle.
    pub fn open(&mut self, method: &str, url: &str) -> Result<(), XhrError> {
        let url = Url::parse(url).map_err(|e| XhrError::InvalidUrl(format!("{url}: {e}")))?;

        self.abort.abort();
        self.abort = AbortHandle::new();
        self.method = method.to_ascii_uppercase();
        self.url = Some(url);
        self.auth = None;
        self.request_headers.clear();
        self.send_flag = false;
        self.reset_response();
        self.ready_state = ReadyState::Opened;
        Ok(())
    }

    /// Open with Basic credentials for a 401 challenge
    pub fn open_with_auth(
        &mut self,
        method: &str,
        url: &str,
        user: &str,
        password: &str,
    ) -> Result<(), XhrError> {
        self.open(method, url)?;
        self.auth = Some(Credentials::new(user, password));
        Ok(())
    }

    /// Set request header
    pub fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), XhrError> {
        if self.ready_state != ReadyState::Opened || self.send_flag {
            return Err(XhrError::InvalidState);
        }
        if cors::is_forbidden_header(name) {
            return Err(XhrError::ForbiddenHeader(name.to_string()));
        }

        // Combine with existing header if present
        let combined = match self.request_headers.get(name) {
            Some(existing) => format!("{existing}, {value}"),
            None => value.to_string(),
        };
        self.request_headers.set(name, &combined);
        Ok(())
    }

    /// Send the request and wait for it to finish
    pub async fn send<T: Transport>(
        &mut self,
        fetcher: &Fetcher<T>,
        body: Option<RequestBody>,
    ) -> Result<(), XhrError> {
        if self.ready_state != ReadyState::Opened || self.send_flag {
            return Err(XhrError::InvalidState);
        }
        let Some(url) = self.url.clone() else {
            return Err(XhrError::InvalidState);
        };
        self.send_flag = true;

        let mut request = FetchRequest::new(&self.method, url)
            .with_credentials(self.with_credentials)
            .with_upload_listener(self.upload_listener);
        if let Some(origin) = &self.origin {
            request = request.with_origin(origin);
        }
        request.headers = self.request_headers.clone();
        request.body = body;
        request.auth = self.auth.clone();

        let cross_origin = cors::classify(&request).is_cross_origin;
        let mut handle = fetcher.dispatch_with(request, self.abort.clone());

        while let Some(event) = handle.next_event().await {
            match event {
                FetchEvent::Response {
                    status,
                    status_text,
                    url,
                    headers,
                } => {
                    self.status = status;
                    self.status_text = status_text;
                    self.response_url = Some(url);
                    self.response_headers = if cross_origin {
                        cors::filter_response_headers(&headers)
                    } else {
                        headers
                    };
                    self.ready_state = ReadyState::HeadersReceived;
                }
                FetchEvent::Data(bytes) => {
                    self.response = bytes;
                    self.ready_state = ReadyState::Loading;
                }
                FetchEvent::End => self.ready_state = ReadyState::Done,
                _ => {}
            }
        }

        let result = handle.finish().await;
        self.send_flag = false;
        match result.outcome {
            Outcome::Body(_) => Ok(()),
            Outcome::Error(e) => {
                self.reset_response();
                self.ready_state = ReadyState::Done;
                Err(XhrError::Network(e))
            }
            Outcome::Aborted => {
                self.reset_response();
                self.ready_state = ReadyState::Done;
                Err(XhrError::Aborted)
            }
        }
    }

    /// Abort the request
    pub fn abort(&mut self) {
        self.abort.abort();
        // A fired token must not reach the next send
        self.abort = AbortHandle::new();
        if matches!(self.ready_state, ReadyState::HeadersReceived | ReadyState::Loading) {
            self.reset_response();
            self.ready_state = ReadyState::Done;
        }
        self.send_flag = false;
    }

    /// Handle for aborting an in-flight `send` from another task
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// URL of the final hop
    pub fn response_url(&self) -> Option<&Url> {
        self.response_url.as_ref()
    }

    pub fn response_bytes(&self) -> &[u8] {
        &self.response
    }

    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response).into_owned()
    }

    /// Get response as JSON
    pub fn response_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, XhrError> {
        serde_json::from_slice(&self.response).map_err(|e| XhrError::ParseError(e.to_string()))
    }

    /// Get response header. Values of repeated headers are joined.
    pub fn get_response_header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self.response_headers.get_all(name).collect();
        if values.is_empty() { None } else { Some(values.join(", ")) }
    }

    /// Get all response headers as string
    pub fn get_all_response_headers(&self) -> String {
        let mut result = String::new();
        for (name, value) in self.response_headers.iter() {
            result.push_str(&name.to_ascii_lowercase());
            result.push_str(": ");
            result.push_str(value);
            result.push_str("\r\n");
        }
        result
    }

    fn reset_response(&mut self) {
        self.status = 0;
        self.status_text.clear();
        self.response.clear();
        self.response_headers.clear();
        self.response_url = None;
    }
}

/// XHR errors
#[derive(Debug, thiserror::Error)]
pub enum XhrError {
    #[error("Invalid state")]
    InvalidState,

    #[error("Forbidden header: {0}")]
    ForbiddenHeader(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Network(FetchError),

    #[error("Request aborted")]
    Aborted,

    #[error("Parse error: {0}")]
    ParseError(String),
}
