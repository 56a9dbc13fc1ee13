//! fOS XHR
//!
//! Network fetch core behind `XMLHttpRequest`: protocol dispatch
//! (file/data/http), CORS classification and preflight, redirect and
//! authentication handling, cookie propagation and cooperative abort.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

pub mod abort;
pub mod agent;
pub mod config;
pub mod cookies;
pub mod cors;
pub mod dispatch;
pub mod event;
pub mod headers;
pub mod loader;
pub mod preflight;
mod redirect;
pub mod request;
pub mod response;
pub mod xhr;

pub use abort::{AbortHandle, AbortSignal};
pub use agent::{
    AgentKey, AgentPool, ReqwestAgent, Transport, TransportError, TransportRequest,
    TransportResponse,
};
pub use config::{FetchConfig, FetchConfigBuilder};
pub use cookies::{Cookie, CookieJar, CookieStore, SetCookieOptions};
pub use cors::{CorsFlags, Origin};
pub use dispatch::{FetchHandle, Fetcher};
pub use event::{EventStream, FetchEvent};
pub use headers::HeaderList;
pub use loader::{LoadError, ResourceLoader};
pub use request::{Credentials, FetchRequest, FormData, FormDataValue, RequestBody};
pub use response::{FetchResult, Outcome};
pub use xhr::{ReadyState, XhrError, XmlHttpRequest};

/// Fetch error
///
/// CORS failures carry no detail: callers only learn that the network
/// request failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Unsupported scheme: {0}")]
    InvalidScheme(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid data URL: {0}")]
    Decode(String),

    #[error("Failed to read {}: {source}", .path.display())]
    File {
        path: PathBuf,
        source: Arc<io::Error>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Network error")]
    CorsViolation,

    #[error("Too many redirects ({hops})")]
    RedirectLoop { hops: u32 },

    #[error("Network error")]
    PreflightRejected,
}

impl FetchError {
    /// Whether the caller sees this as a plain network error
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::CorsViolation | FetchError::PreflightRejected
        )
    }
}

/// Why a pipeline stage stopped early
#[derive(Debug)]
pub(crate) enum Halt {
    Aborted,
    Failed(FetchError),
}

impl From<abort::Aborted> for Halt {
    fn from(_: abort::Aborted) -> Self {
        Halt::Aborted
    }
}

impl From<FetchError> for Halt {
    fn from(e: FetchError) -> Self {
        Halt::Failed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_errors_are_opaque() {
        assert_eq!(FetchError::CorsViolation.to_string(), "Network error");
        assert_eq!(FetchError::PreflightRejected.to_string(), "Network error");
        assert!(FetchError::CorsViolation.is_network_error());
        assert!(!FetchError::RedirectLoop { hops: 21 }.is_network_error());
    }

    #[test]
    fn test_file_error_display() {
        let err = FetchError::File {
            path: PathBuf::from("/tmp/missing.txt"),
            source: Arc::new(io::Error::new(io::ErrorKind::NotFound, "not found")),
        };
        assert_eq!(err.to_string(), "Failed to read /tmp/missing.txt: not found");
        assert!(std::error::Error::source(&err).is_some());
    }
}
