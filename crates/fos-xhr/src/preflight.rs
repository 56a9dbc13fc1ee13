//! CORS Preflight
//!
//! OPTIONS probe sent before a non-simple cross-origin request.

use crate::abort::AbortSignal;
use crate::agent::{AgentKey, Transport, TransportRequest};
use crate::cors::{self, CorsFlags};
use crate::headers::HeaderList;
use crate::request::FetchRequest;
use crate::{FetchError, Halt};

/// Headers of the preflight request
pub fn preflight_headers(request: &FetchRequest, flags: &CorsFlags) -> HeaderList {
    let mut headers = HeaderList::new();
    headers.set("Origin", &request.origin);
    if let Some(referrer) = &request.referrer {
        headers.set("Referer", referrer);
    }
    headers.set("Access-Control-Request-Method", &request.method);
    if !flags.non_simple_headers.is_empty() {
        let names: Vec<&str> = flags.non_simple_headers.iter().map(String::as_str).collect();
        headers.set("Access-Control-Request-Headers", &names.join(","));
    }
    headers
}

/// Validate the preflight response head
pub fn validate(
    status: u16,
    headers: &HeaderList,
    request: &FetchRequest,
    flags: &CorsFlags,
) -> Result<(), FetchError> {
    if !(200..300).contains(&status) {
        tracing::debug!(status, url = %request.url, "preflight rejected");
        return Err(FetchError::PreflightRejected);
    }

    cors::check_allow_origin(headers, &request.origin, request.with_credentials)
        .and_then(|_| cors::check_allow_headers(headers, &flags.non_simple_headers))
        .map_err(|e| {
            tracing::debug!(url = %request.url, error = %e, "preflight CORS check failed");
            FetchError::CorsViolation
        })
}

/// Send the preflight and validate it. The real request must not be sent
/// unless this returns `Ok`.
pub(crate) async fn run<T: Transport>(
    transport: &T,
    request: &FetchRequest,
    flags: &CorsFlags,
    agent: AgentKey,
    signal: &AbortSignal,
) -> Result<(), Halt> {
    let probe = TransportRequest {
        method: "OPTIONS".to_string(),
        url: request.url.clone(),
        headers: preflight_headers(request, flags),
        body: None,
        agent,
    };

    tracing::debug!(url = %request.url, method = %request.method, "sending CORS preflight");
    let response = signal
        .guard(transport.send(probe))
        .await?
        .map_err(|e| FetchError::Network(e.to_string()))?;

    validate(response.status, &response.headers, request, flags)?;
    Ok(())
}
