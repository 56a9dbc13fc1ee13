//! Protocol Dispatch
//!
//! Entry point of the pipeline. Routes a request by URL scheme to a local
//! file read, an inline data-URL decode or the network path (CORS
//! classification, optional preflight, redirect/auth loop).

use std::path::PathBuf;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use url::Url;

use crate::abort::{AbortHandle, AbortSignal};
use crate::agent::{ReqwestAgent, Transport};
use crate::config::FetchConfig;
use crate::cookies::{CookieJar, CookieStore};
use crate::cors;
use crate::event::{EventSink, EventStream, FetchEvent};
use crate::headers::HeaderList;
use crate::preflight;
use crate::redirect::Pipeline;
use crate::request::FetchRequest;
use crate::response::{self, FetchResult, FinalResponse};
use crate::{FetchError, Halt};

/// Long-lived fetch context: one transport, one cookie store, one config
pub struct Fetcher<T: Transport = ReqwestAgent> {
    transport: Arc<T>,
    cookies: Arc<dyn CookieStore>,
    config: Arc<FetchConfig>,
}

impl Fetcher<ReqwestAgent> {
    /// Fetcher with the reqwest transport and an in-memory cookie jar
    pub fn new(config: FetchConfig) -> Self {
        Self::with_transport(Arc::new(ReqwestAgent::new()), Arc::new(CookieJar::new()), config)
    }
}

impl<T: Transport> Clone for Fetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            cookies: Arc::clone(&self.cookies),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn with_transport(
        transport: Arc<T>,
        cookies: Arc<dyn CookieStore>,
        config: FetchConfig,
    ) -> Self {
        Self {
            transport,
            cookies,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn cookies(&self) -> &Arc<dyn CookieStore> {
        &self.cookies
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Start an operation with a fresh abort handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, request: FetchRequest) -> FetchHandle {
        self.dispatch_with(request, AbortHandle::new())
    }

    /// Start an operation cancelled through `abort`
    pub fn dispatch_with(&self, request: FetchRequest, abort: AbortHandle) -> FetchHandle {
        let (mut sink, events) = EventSink::channel();
        let signal = abort.signal();

        tracing::info!("XHR {} {}", request.method, request.url);

        let scheme = request.url.scheme().to_string();
        if !matches!(scheme.as_str(), "file" | "data" | "http" | "https") {
            let error = FetchError::InvalidScheme(scheme);
            let result = FetchResult::network_error(error.clone());
            sink.emit(FetchEvent::Error(error));
            return FetchHandle {
                abort,
                events,
                completion: Completion::Ready(result),
            };
        }

        let fetcher = self.clone();
        let task = tokio::spawn(async move { fetcher.drive(request, signal, sink).await });

        FetchHandle {
            abort,
            events,
            completion: Completion::Pending(task),
        }
    }

    async fn drive(
        self,
        request: FetchRequest,
        signal: AbortSignal,
        mut sink: EventSink,
    ) -> FetchResult {
        let outcome = match request.url.scheme() {
            "file" => fetch_file(&request.url, &signal, &mut sink).await,
            "data" => fetch_data(&request.url, &signal, &mut sink).await,
            _ => self.fetch_http(&request, &signal, &mut sink).await,
        };

        match outcome {
            Ok(result) => {
                debug_assert!(sink.is_finished());
                result
            }
            // A failure racing an abort still reports as abort
            Err(Halt::Aborted) | Err(Halt::Failed(_)) if signal.is_aborted() => {
                tracing::debug!(url = %request.url, "aborted");
                sink.emit(FetchEvent::Abort);
                FetchResult::aborted()
            }
            Err(Halt::Aborted) => {
                sink.emit(FetchEvent::Abort);
                FetchResult::aborted()
            }
            Err(Halt::Failed(error)) => {
                tracing::debug!(url = %request.url, %error, "fetch failed");
                let result = FetchResult::network_error(error.clone());
                sink.emit(FetchEvent::Error(error));
                result
            }
        }
    }

    async fn fetch_http(
        &self,
        request: &FetchRequest,
        signal: &AbortSignal,
        sink: &mut EventSink,
    ) -> Result<FetchResult, Halt> {
        let flags = cors::classify(request);
        let pipeline = Pipeline {
            transport: self.transport.as_ref(),
            cookies: self.cookies.as_ref(),
            config: self.config.as_ref(),
        };

        if flags.requires_preflight {
            let agent = pipeline.agent_key(request, &request.url);
            preflight::run(self.transport.as_ref(), request, &flags, agent, signal).await?;
        }

        pipeline.run(request, &flags, signal, sink).await
    }
}

/// Caller side of an in-flight operation
pub struct FetchHandle {
    abort: AbortHandle,
    events: EventStream,
    completion: Completion,
}

enum Completion {
    Pending(JoinHandle<FetchResult>),
    Ready(FetchResult),
}

impl FetchHandle {
    /// Abort the operation. No-op once it reached a terminal state.
    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Next notification, `None` once the stream is drained and closed
    pub async fn next_event(&mut self) -> Option<FetchEvent> {
        self.events.recv().await
    }

    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    /// Wait for the terminal result
    pub async fn finish(self) -> FetchResult {
        match self.completion {
            Completion::Ready(result) => result,
            Completion::Pending(task) => match task.await {
                Ok(result) => result,
                Err(e) => {
                    let error = FetchError::Network(format!("fetch task failed: {e}"));
                    FetchResult::network_error(error)
                }
            },
        }
    }

    /// Wait for the completion value: the body, or `None` on error or abort
    pub async fn body(self) -> Option<Vec<u8>> {
        self.finish().await.into_body()
    }
}

/// Local filesystem path for a `file:` URL
///
/// Percent-escapes are decoded and a leading `/C:/` drive segment becomes
/// `C:/`.
pub fn file_path(url: &Url) -> PathBuf {
    let decoded = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
    let bytes = decoded.as_bytes();
    let has_drive =
        bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':';
    if has_drive {
        PathBuf::from(&decoded[1..])
    } else {
        PathBuf::from(decoded)
    }
}

async fn fetch_file(
    url: &Url,
    signal: &AbortSignal,
    sink: &mut EventSink,
) -> Result<FetchResult, Halt> {
    let path = file_path(url);

    // Dropping the read on abort closes the file
    let read = async {
        let mut file = tokio::fs::File::open(&path).await?;
        let mut body = Vec::new();
        file.read_to_end(&mut body).await?;
        Ok::<_, std::io::Error>(body)
    };

    let body = signal.guard(read).await?.map_err(|e| FetchError::File {
        path: path.clone(),
        source: Arc::new(e),
    })?;

    Ok(response::deliver(
        FinalResponse {
            status: 200,
            status_text: "OK".to_string(),
            url: url.clone(),
            headers: HeaderList::new(),
            body,
        },
        sink,
    ))
}

/// Decode a `data:` URL into its media type and body
pub fn decode_data_url(input: &str) -> Result<(String, Vec<u8>), FetchError> {
    let url = data_url::DataUrl::process(input).map_err(|e| FetchError::Decode(format!("{e:?}")))?;
    let (body, _fragment) = url
        .decode_to_vec()
        .map_err(|e| FetchError::Decode(format!("{e:?}")))?;
    Ok((url.mime_type().to_string(), body))
}

async fn fetch_data(
    url: &Url,
    signal: &AbortSignal,
    sink: &mut EventSink,
) -> Result<FetchResult, Halt> {
    let (content_type, body) = decode_data_url(url.as_str())?;

    // Deliver on a later tick, never inside the dispatching call
    signal.guard(tokio::task::yield_now()).await?;

    let mut headers = HeaderList::new();
    headers.set("Content-Type", &content_type);

    Ok(response::deliver(
        FinalResponse {
            status: 200,
            status_text: "OK".to_string(),
            url: url.clone(),
            headers,
            body,
        },
        sink,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path_decoding() {
        let url = Url::parse("file:///tmp/my%20file.txt").unwrap();
        assert_eq!(file_path(&url), PathBuf::from("/tmp/my file.txt"));
    }

    #[test]
    fn test_file_path_drive_letter() {
        let url = Url::parse("file:///C:/Users/me/a.txt").unwrap();
        assert_eq!(file_path(&url), PathBuf::from("C:/Users/me/a.txt"));
    }

    #[test]
    fn test_decode_data_url() {
        let (mime, body) = decode_data_url("data:text/plain,hello").unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(body, b"hello");

        let (mime, body) = decode_data_url("data:application/octet-stream;base64,AAEC").unwrap();
        assert_eq!(mime, "application/octet-stream");
        assert_eq!(body, vec![0, 1, 2]);
    }

    #[test]
    fn test_decode_data_url_errors() {
        assert!(matches!(decode_data_url("data:text/plain"), Err(FetchError::Decode(_))));
        assert!(matches!(decode_data_url("data:;base64,%%%"), Err(FetchError::Decode(_))));
    }
}
