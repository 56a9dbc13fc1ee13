//! Response Assembly
//!
//! Turns the terminal response into a `FetchResult`, emits the
//! `Response`/`Data`/`End` notifications and is the only place where
//! gathered cookies reach the cookie store.

use url::Url;

use crate::FetchError;
use crate::cookies::{CookieStore, SetCookieOptions};
use crate::cors;
use crate::event::{EventSink, FetchEvent};
use crate::headers::HeaderList;

/// How an operation ended
#[derive(Debug, Clone)]
pub enum Outcome {
    Body(Vec<u8>),
    Error(FetchError),
    Aborted,
}

/// Terminal value of an operation
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub status_text: String,
    /// URL of the final hop
    pub url: Option<Url>,
    /// Headers of the final hop
    pub headers: HeaderList,
    pub outcome: Outcome,
}

impl FetchResult {
    /// Canonical network-error shape: status 0, no headers, no body
    pub fn network_error(error: FetchError) -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            url: None,
            headers: HeaderList::new(),
            outcome: Outcome::Error(error),
        }
    }

    pub fn aborted() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            url: None,
            headers: HeaderList::new(),
            outcome: Outcome::Aborted,
        }
    }

    /// Completion value: the body, or `None` on error or abort
    pub fn body(&self) -> Option<&[u8]> {
        match &self.outcome {
            Outcome::Body(body) => Some(body),
            _ => None,
        }
    }

    pub fn into_body(self) -> Option<Vec<u8>> {
        match self.outcome {
            Outcome::Body(body) => Some(body),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, Outcome::Aborted)
    }

    pub fn is_success(&self) -> bool {
        self.body().is_some() && (200..300).contains(&self.status)
    }
}

/// `Set-Cookie` values gathered across hops, committed once at the end
#[derive(Debug, Default)]
pub(crate) struct PendingCookies {
    values: Vec<String>,
}

impl PendingCookies {
    pub(crate) fn gather(&mut self, headers: &HeaderList) {
        self.values.extend(headers.get_all("set-cookie").map(str::to_string));
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    /// Hand every gathered value to the store, in arrival order
    pub(crate) fn commit(self, store: &dyn CookieStore, url: &Url) {
        if self.values.is_empty() {
            return;
        }
        tracing::debug!(count = self.len(), %url, "committing cookies");
        let options = SetCookieOptions { ignore_parse_errors: true };
        for raw in &self.values {
            if let Err(e) = store.set_cookie(raw, url, options) {
                tracing::debug!(error = %e, "cookie rejected by store");
            }
        }
    }
}

/// Final hop of an HTTP operation, body already read
#[derive(Debug)]
pub(crate) struct FinalResponse {
    pub status: u16,
    pub status_text: String,
    pub url: Url,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

/// CORS context of the operation, present for cross-origin requests
#[derive(Debug)]
pub(crate) struct CorsContext<'a> {
    pub origin: &'a str,
    pub with_credentials: bool,
}

/// Assemble the result of an HTTP operation
pub(crate) fn assemble(
    response: FinalResponse,
    cookies: PendingCookies,
    store: &dyn CookieStore,
    cors: Option<CorsContext<'_>>,
    sink: &mut EventSink,
) -> Result<FetchResult, FetchError> {
    cookies.commit(store, &response.url);

    if let Some(ctx) = cors {
        cors::check_allow_origin(&response.headers, ctx.origin, ctx.with_credentials).map_err(|e| {
            tracing::debug!(url = %response.url, error = %e, "CORS check failed");
            FetchError::CorsViolation
        })?;
    }

    Ok(deliver(response, sink))
}

/// Emit `Response`, `Data`, `End` and build the successful result
pub(crate) fn deliver(response: FinalResponse, sink: &mut EventSink) -> FetchResult {
    sink.emit(FetchEvent::Response {
        status: response.status,
        status_text: response.status_text.clone(),
        url: response.url.clone(),
        headers: response.headers.clone(),
    });
    sink.emit(FetchEvent::Data(response.body.clone()));
    sink.emit(FetchEvent::End);

    FetchResult {
        status: response.status,
        status_text: response.status_text,
        url: Some(response.url),
        headers: response.headers,
        outcome: Outcome::Body(response.body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieJar;

    fn final_response(headers: &[(&str, &str)]) -> FinalResponse {
        FinalResponse {
            status: 200,
            status_text: "OK".into(),
            url: Url::parse("https://api.other.com/data").unwrap(),
            headers: headers.iter().copied().collect(),
            body: b"payload".to_vec(),
        }
    }

    #[test]
    fn test_network_error_shape() {
        let result = FetchResult::network_error(FetchError::CorsViolation);
        assert_eq!(result.status, 0);
        assert!(result.headers.is_empty());
        assert!(result.body().is_none());
        assert!(result.error().is_some());
        assert!(!result.is_aborted());
    }

    #[test]
    fn test_assemble_emits_in_order() {
        let (mut sink, mut rx) = EventSink::channel();
        let jar = CookieJar::new();
        let result =
            assemble(final_response(&[]), PendingCookies::default(), &jar, None, &mut sink)
                .unwrap();

        assert!(result.is_success());
        assert_eq!(result.body(), Some(&b"payload"[..]));
        assert!(matches!(rx.try_recv(), Ok(FetchEvent::Response { status: 200, .. })));
        assert!(matches!(rx.try_recv(), Ok(FetchEvent::Data(ref d)) if d == b"payload"));
        assert!(matches!(rx.try_recv(), Ok(FetchEvent::End)));
    }

    #[test]
    fn test_assemble_commits_cookies_against_final_url() {
        let (mut sink, _rx) = EventSink::channel();
        let jar = CookieJar::new();
        let mut cookies = PendingCookies::default();
        cookies.gather(&vec![("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")].into_iter().collect());
        cookies.gather(&vec![("set-cookie", "a=3")].into_iter().collect());
        assert_eq!(cookies.len(), 3);

        assemble(final_response(&[]), cookies, &jar, None, &mut sink).unwrap();

        let mut stored = jar.get_cookies(&Url::parse("https://api.other.com/").unwrap());
        stored.sort();
        assert_eq!(stored, vec!["a=3", "b=2"]);
    }

    #[test]
    fn test_assemble_cors_failure_emits_nothing() {
        let (mut sink, mut rx) = EventSink::channel();
        let jar = CookieJar::new();
        let ctx = CorsContext { origin: "https://example.com", with_credentials: false };
        let err =
            assemble(final_response(&[]), PendingCookies::default(), &jar, Some(ctx), &mut sink)
                .unwrap_err();

        assert!(matches!(err, FetchError::CorsViolation));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_assemble_cors_wildcard() {
        let (mut sink, _rx) = EventSink::channel();
        let jar = CookieJar::new();
        let ctx = CorsContext { origin: "https://example.com", with_credentials: false };
        let result = assemble(
            final_response(&[("Access-Control-Allow-Origin", "*")]),
            PendingCookies::default(),
            &jar,
            Some(ctx),
            &mut sink,
        );
        assert!(result.is_ok());
    }
}
