//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fos_xhr::cookies::{CookieError, CookieJar, CookieStore, SetCookieOptions};
use fos_xhr::{
    FetchConfig, FetchEvent, Fetcher, HeaderList, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use url::Url;

/// Scripted reply for one request
#[derive(Debug, Clone)]
pub enum Reply {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Fail(String),
    /// Never produces a response head
    Hang,
    /// Response head arrives, body never does
    HangBody { status: u16 },
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self::status(200).body(body)
    }

    pub fn status(status: u16) -> Self {
        Reply::Respond {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status).header("Location", location)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Reply::Respond { headers, .. } = &mut self {
            headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn body(mut self, content: &str) -> Self {
        if let Reply::Respond { body, .. } = &mut self {
            *body = content.as_bytes().to_vec();
        }
        self
    }
}

/// Transport answering from a script and recording every request
///
/// Replies are queued per method and URL. The last queued reply for a
/// route keeps answering; unscripted routes get a 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(String, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: &str, url: &str, reply: Reply) -> &Self {
        let key = (method.to_string(), normalize(url));
        self.routes.lock().unwrap().entry(key).or_default().push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.method == method).count()
    }

    /// Wait until at least `n` requests hit the transport
    pub async fn wait_for_requests(&self, n: usize) {
        for _ in 0..1000 {
            if self.requests.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("transport never saw {n} requests");
    }

    fn next_reply(&self, method: &str, url: &Url) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&(method.to_string(), normalize(url.as_str()))) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Reply::status(404)),
            None => Reply::status(404),
        }
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string())
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        let reply = self.next_reply(&request.method, &request.url);
        self.requests.lock().unwrap().push(request);

        async move {
            match reply {
                Reply::Respond { status, headers, body } => {
                    let headers: HeaderList = headers.into_iter().collect();
                    Ok(TransportResponse::buffered(status, headers, body))
                }
                Reply::Fail(message) => Err(TransportError::Connect(message)),
                Reply::Hang => std::future::pending().await,
                Reply::HangBody { status } => Ok(TransportResponse {
                    status,
                    status_text: fos_xhr::agent::status_text(status).to_string(),
                    headers: HeaderList::new(),
                    body: Box::pin(std::future::pending::<Result<Vec<u8>, TransportError>>()),
                }),
            }
        }
    }
}

/// Cookie jar that records every commit
#[derive(Default)]
pub struct RecordingJar {
    pub jar: CookieJar,
    pub committed: Mutex<Vec<(String, String)>>,
}

impl RecordingJar {
    pub fn committed(&self) -> Vec<(String, String)> {
        self.committed.lock().unwrap().clone()
    }
}

impl CookieStore for RecordingJar {
    fn get_cookies(&self, url: &Url) -> Vec<String> {
        self.jar.get_cookies(url)
    }

    fn set_cookie(
        &self,
        raw: &str,
        url: &Url,
        options: SetCookieOptions,
    ) -> Result<(), CookieError> {
        self.committed.lock().unwrap().push((raw.to_string(), url.to_string()));
        self.jar.set_cookie(raw, url, options)
    }
}

/// Fetcher over a mock transport and a recording jar
pub fn fetcher(
    config: FetchConfig,
) -> (Fetcher<MockTransport>, Arc<MockTransport>, Arc<RecordingJar>) {
    let transport = Arc::new(MockTransport::new());
    let jar = Arc::new(RecordingJar::default());
    let fetcher = Fetcher::with_transport(Arc::clone(&transport), jar.clone(), config);
    (fetcher, transport, jar)
}

/// Drain every event of a handle
pub async fn collect(handle: &mut fos_xhr::FetchHandle) -> Vec<FetchEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

pub fn names(events: &[FetchEvent]) -> Vec<&'static str> {
    events.iter().map(FetchEvent::name).collect()
}
