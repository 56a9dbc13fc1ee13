//! Fetch Events
//!
//! Ordered notifications for one in-flight operation:
//! `Request → Redirect* → Response → Data → End`, or a single `Error` /
//! `Abort` in place of the remainder.

use tokio::sync::mpsc;
use url::Url;

use crate::FetchError;
use crate::headers::HeaderList;

/// Notification emitted by an in-flight operation
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// The real request is about to go on the wire
    Request { method: String, url: Url, headers: HeaderList },
    /// A redirect hop is being followed
    Redirect { status: u16, from: Url, to: Url },
    /// Final status and headers
    Response { status: u16, status_text: String, url: Url, headers: HeaderList },
    /// The complete body
    Data(Vec<u8>),
    End,
    Error(FetchError),
    Abort,
}

impl FetchEvent {
    /// `End`, `Error` and `Abort` close the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchEvent::End | FetchEvent::Error(_) | FetchEvent::Abort)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FetchEvent::Request { .. } => "request",
            FetchEvent::Redirect { .. } => "redirect",
            FetchEvent::Response { .. } => "response",
            FetchEvent::Data(_) => "data",
            FetchEvent::End => "end",
            FetchEvent::Error(_) => "error",
            FetchEvent::Abort => "abort",
        }
    }
}

/// Receiving end handed to the caller
pub type EventStream = mpsc::UnboundedReceiver<FetchEvent>;

/// Sending end owned by the pipeline; drops everything after a terminal event
#[derive(Debug)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<FetchEvent>,
    finished: bool,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, finished: false }, rx)
    }

    /// Emit an event. Returns `false` if the stream was already closed.
    pub(crate) fn emit(&mut self, event: FetchEvent) -> bool {
        if self.finished {
            tracing::trace!(event = event.name(), "event after terminal state dropped");
            return false;
        }
        self.finished = event.is_terminal();
        // A dropped receiver only means nobody is listening
        let _ = self.tx.send(event);
        true
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }
}
