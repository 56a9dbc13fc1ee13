//! Transport Agent
//!
//! Outbound HTTP transport. The pipeline talks to a `Transport`; the
//! production one is `ReqwestAgent`, which keeps one client per
//! scheme/proxy/TLS pairing so connections are reused across requests and
//! across redirect hops that keep the scheme.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use url::Url;

use crate::headers::HeaderList;

/// Pending response body
pub type BodyReader = BoxFuture<'static, Result<Vec<u8>, TransportError>>;

/// Transport-level failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Body read failed: {0}")]
    Body(String),

    #[error("Invalid proxy: {0}")]
    Proxy(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let message = e.to_string();
        if e.is_connect() {
            TransportError::Connect(message)
        } else if e.is_timeout() {
            TransportError::Timeout(message)
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(message)
        } else {
            TransportError::Request(message)
        }
    }
}

/// Agent selection key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentKey {
    pub scheme: String,
    pub proxy: Option<String>,
    pub strict_tls: bool,
}

impl AgentKey {
    pub fn for_url(url: &Url, proxy: Option<&str>, strict_tls: bool) -> Self {
        Self {
            scheme: url.scheme().to_string(),
            proxy: proxy.map(str::to_string),
            strict_tls,
        }
    }
}

/// One request on the wire. Redirects are never followed by the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub url: Url,
    pub headers: HeaderList,
    pub body: Option<Vec<u8>>,
    pub agent: AgentKey,
}

/// Response head plus a pending body
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderList,
    pub body: BodyReader,
}

impl TransportResponse {
    /// Response with an already-buffered body
    pub fn buffered(status: u16, headers: HeaderList, body: Vec<u8>) -> Self {
        Self {
            status,
            status_text: status_text(status).to_string(),
            headers,
            body: Box::pin(async move { Ok(body) }),
        }
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Canonical reason phrase for a status code
pub fn status_text(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Outbound HTTP capability
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub clients_created: u64,
    pub clients_reused: u64,
}

/// Clients keyed by `AgentKey`
#[derive(Debug, Default)]
pub struct AgentPool {
    clients: Mutex<HashMap<AgentKey, reqwest::Client>>,
    stats: Mutex<PoolStats>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the client for a key, building it on first use
    pub fn client(&self, key: &AgentKey) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(client) = clients.get(key) {
            stats.clients_reused += 1;
            return Ok(client.clone());
        }

        let client = build_client(key)?;
        tracing::debug!(
            scheme = %key.scheme,
            proxy = ?key.proxy,
            strict_tls = key.strict_tls,
            "new transport agent"
        );
        clients.insert(key.clone(), client.clone());
        stats.clients_created += 1;
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn build_client(key: &AgentKey) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(!key.strict_tls);

    builder = match &key.proxy {
        Some(proxy) => {
            let proxy = match key.scheme.as_str() {
                "https" => reqwest::Proxy::https(proxy),
                _ => reqwest::Proxy::http(proxy),
            }
            .map_err(|e| TransportError::Proxy(e.to_string()))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder.build().map_err(|e| TransportError::Request(e.to_string()))
}

/// Production transport backed by reqwest
#[derive(Debug, Default)]
pub struct ReqwestAgent {
    pool: AgentPool,
}

impl ReqwestAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }
}

impl Transport for ReqwestAgent {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        let client = self.pool.client(&request.agent);

        async move {
            let client = client?;
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|e| TransportError::Request(e.to_string()))?;

            let mut builder = client.request(method, request.url.clone());
            for (name, value) in request.headers.iter() {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;

            let status = response.status();
            let mut headers = HeaderList::new();
            for (name, value) in response.headers() {
                headers.append(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
            }

            Ok(TransportResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                headers,
                body: Box::pin(async move {
                    response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(TransportError::from)
                }),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str, proxy: Option<&str>) -> AgentKey {
        AgentKey::for_url(&Url::parse(url).unwrap(), proxy, true)
    }

    #[test]
    fn test_agent_key_by_scheme() {
        assert_eq!(key("http://a.com/x", None), key("http://b.com/y", None));
        assert_ne!(key("http://a.com/", None), key("https://a.com/", None));
        assert_ne!(key("http://a.com/", None), key("http://a.com/", Some("http://proxy:8080")));
    }

    #[test]
    fn test_pool_reuses_clients() {
        let pool = AgentPool::new();
        pool.client(&key("http://a.com/", None)).unwrap();
        pool.client(&key("http://b.com/", None)).unwrap();
        pool.client(&key("https://a.com/", None)).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats(), PoolStats { clients_created: 2, clients_reused: 1 });
    }

    #[test]
    fn test_pool_proxy_agents() {
        let pool = AgentPool::new();
        pool.client(&key("http://a.com/", Some("http://127.0.0.1:3128"))).unwrap();
        pool.client(&key("https://a.com/", Some("http://127.0.0.1:3128"))).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(599), "");
    }

    #[tokio::test]
    async fn test_buffered_response_body() {
        let response = TransportResponse::buffered(201, HeaderList::new(), b"done".to_vec());
        assert_eq!(response.status_text, "Created");
        assert_eq!(response.body.await.unwrap(), b"done");
    }
}
