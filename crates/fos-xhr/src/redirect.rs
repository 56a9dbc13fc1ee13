//! Redirect and Authentication Loop
//!
//! Drives the real request hop by hop: follows 3xx responses up to the
//! configured limit, retries once with Basic credentials on a 401
//! challenge and gathers `Set-Cookie` values for the final commit.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use url::Url;

use crate::abort::AbortSignal;
use crate::agent::{AgentKey, Transport, TransportRequest};
use crate::config::FetchConfig;
use crate::cookies::CookieStore;
use crate::cors::{CorsFlags, Origin};
use crate::event::{EventSink, FetchEvent};
use crate::headers::HeaderList;
use crate::request::{Credentials, FetchRequest};
use crate::response::{self, CorsContext, FetchResult, FinalResponse, PendingCookies};
use crate::{FetchError, Halt};

/// One hop: immutable snapshot of target and headers
#[derive(Debug, Clone)]
pub(crate) struct Hop {
    pub url: Url,
    pub headers: HeaderList,
}

impl Hop {
    /// Copy of this hop with one header replaced
    fn with_header(&self, name: &str, value: &str) -> Hop {
        let mut next = self.clone();
        next.headers.set(name, value);
        next
    }
}

/// Shared collaborators of one operation
pub(crate) struct Pipeline<'a, T> {
    pub transport: &'a T,
    pub cookies: &'a dyn CookieStore,
    pub config: &'a FetchConfig,
}

impl<T: Transport> Pipeline<'_, T> {
    pub(crate) fn agent_key(&self, request: &FetchRequest, url: &Url) -> AgentKey {
        let proxy = request.proxy.as_deref().or(self.config.proxy.as_deref());
        let strict_tls = request.strict_tls.unwrap_or(self.config.strict_tls);
        AgentKey::for_url(url, proxy, strict_tls)
    }

    /// Cookie header for `url`, if the store has any
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies.get_cookies(url);
        if cookies.is_empty() { None } else { Some(cookies.join("; ")) }
    }

    /// Headers and URL of the first hop
    fn first_hop(&self, request: &FetchRequest, flags: &CorsFlags, send_cookies: bool) -> Hop {
        let mut url = request.url.clone();
        // Credentials travel in Authorization, never in the URL
        let _ = url.set_username("");
        let _ = url.set_password(None);

        let mut headers = request.headers.clone();
        let user_agent = request.user_agent.as_deref().unwrap_or(&self.config.user_agent);
        headers.set_default("User-Agent", user_agent);
        headers.set_default("Accept-Language", &self.config.accept_language);
        headers.set_default("Accept-Encoding", &self.config.accept_encoding);
        headers.set_default("Accept", "*/*");
        if flags.is_cross_origin {
            headers.set_default("Origin", &request.origin);
        }
        if let Some(referrer) = &request.referrer {
            headers.set_default("Referer", referrer);
        }
        if send_cookies {
            if let Some(cookie) = self.cookie_header(&url) {
                headers.set("Cookie", &cookie);
            }
        }

        Hop { url, headers }
    }

    /// Headers and URL of the hop following a redirect to `to`
    fn redirect_hop(
        &self,
        from: &Hop,
        to: Url,
        request: &FetchRequest,
        send_cookies: bool,
    ) -> Hop {
        let mut headers = from.headers.clone();
        headers.set("Referer", from.url.as_str());

        let from_origin = Origin::from_url(&from.url);
        let to_origin = Origin::from_url(&to);
        if !from_origin.is_same_origin(&to_origin) {
            headers.remove("Authorization");
            // Leaving a foreign origin taints an Origin the request already carries
            let foreign = !from_origin.is_same_origin(&Origin::parse(&request.origin));
            if foreign && headers.contains("origin") {
                headers.set("Origin", "null");
            }
        }

        headers.remove("Cookie");
        if send_cookies {
            if let Some(cookie) = self.cookie_header(&to) {
                headers.set("Cookie", &cookie);
            }
        }

        Hop { url: to, headers }
    }

    /// Run the request to completion
    pub(crate) async fn run(
        &self,
        request: &FetchRequest,
        flags: &CorsFlags,
        signal: &AbortSignal,
        sink: &mut EventSink,
    ) -> Result<FetchResult, Halt> {
        // Cross-origin requests only carry cookies when credentials are requested
        let send_cookies = !flags.is_cross_origin || request.with_credentials;
        let credentials = request.credentials();
        let target_origin = Origin::from_url(&request.url);
        let body = encode_body(request);

        let mut hop = self.first_hop(request, flags, send_cookies);
        if let Some(content_type) = &body.content_type {
            hop.headers.set_default("Content-Type", content_type);
        }
        let mut agent = self.agent_key(request, &hop.url);
        let mut cookies = PendingCookies::default();
        let mut redirects = 0u32;
        let mut auth_retried = false;

        sink.emit(FetchEvent::Request {
            method: request.method.clone(),
            url: hop.url.clone(),
            headers: hop.headers.clone(),
        });

        loop {
            let wire = TransportRequest {
                method: request.method.clone(),
                url: hop.url.clone(),
                headers: hop.headers.clone(),
                body: body.bytes.clone(),
                agent: agent.clone(),
            };

            tracing::debug!(method = %wire.method, url = %wire.url, hop = redirects, "sending");
            let response = signal.guard(self.transport.send(wire)).await?.map_err(|e| {
                tracing::warn!(url = %hop.url, error = %e, "transport failure");
                FetchError::Network(e.to_string())
            })?;

            if send_cookies {
                cookies.gather(&response.headers);
            }

            if response.status == 401
                && response.headers.contains("www-authenticate")
                && !auth_retried
                && !hop.headers.contains("authorization")
                && Origin::from_url(&hop.url).is_same_origin(&target_origin)
            {
                if let Some(creds) = &credentials {
                    tracing::debug!(url = %hop.url, "retrying with Basic credentials");
                    auth_retried = true;
                    hop = hop.with_header("Authorization", &basic_auth(creds));
                    continue;
                }
            }

            if (300..400).contains(&response.status) {
                if let Some(location) = response.headers.get("location") {
                    redirects += 1;
                    if redirects > self.config.max_redirects {
                        return Err(FetchError::RedirectLoop { hops: redirects }.into());
                    }

                    let to = hop
                        .url
                        .join(location.trim())
                        .map_err(|e| FetchError::InvalidUrl(format!("{location}: {e}")))?;

                    sink.emit(FetchEvent::Redirect {
                        status: response.status,
                        from: hop.url.clone(),
                        to: to.clone(),
                    });
                    tracing::debug!(
                        status = response.status,
                        from = %hop.url,
                        to = %to,
                        "following redirect"
                    );

                    hop = self.redirect_hop(&hop, to, request, send_cookies);
                    agent = self.agent_key(request, &hop.url);
                    continue;
                }
            }

            let body = signal.guard(response.body).await?.map_err(|e| {
                tracing::warn!(url = %hop.url, error = %e, "body read failed");
                FetchError::Network(e.to_string())
            })?;

            let cors = flags.is_cross_origin.then(|| CorsContext {
                origin: &request.origin,
                with_credentials: request.with_credentials,
            });

            let result = response::assemble(
                FinalResponse {
                    status: response.status,
                    status_text: response.status_text,
                    url: hop.url,
                    headers: response.headers,
                    body,
                },
                cookies,
                self.cookies,
                cors,
                sink,
            )?;
            return Ok(result);
        }
    }
}

/// Encoded request body and its implied content type
struct EncodedBody {
    bytes: Option<Vec<u8>>,
    content_type: Option<String>,
}

fn encode_body(request: &FetchRequest) -> EncodedBody {
    match &request.body {
        Some(body) if request.allows_body() => {
            let (content_type, bytes) = body.encode();
            EncodedBody { bytes: Some(bytes), content_type }
        }
        _ => EncodedBody { bytes: None, content_type: None },
    }
}

/// `Basic` authorization value
pub(crate) fn basic_auth(creds: &Credentials) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:{}", creds.user, creds.password)))
}
