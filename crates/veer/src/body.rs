//! Response body plumbing.
//!
//! Every response leaving the dispatcher carries a [`DispatchBody`]. Two
//! wrappers hook into the stream without buffering it:
//!
//! - [`ObservedBody`] reports how the body ended (completed, failed or
//!   dropped early by the client)
//! - [`TeeBody`] copies data frames to a bounded capture channel

use crate::fs::FileReader;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::warn;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type DispatchBody = BoxBody<Bytes, BoxError>;

pub fn full(data: impl Into<Bytes>) -> DispatchBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

pub fn empty() -> DispatchBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Stream a reader chunk by chunk.
pub fn from_reader(reader: FileReader) -> DispatchBody {
    let stream = ReaderStream::new(reader)
        .map_ok(Frame::data)
        .map_err(BoxError::from);
    StreamBody::new(stream).boxed()
}

pub fn from_incoming(body: Incoming) -> DispatchBody {
    body.map_err(BoxError::from).boxed()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyOutcome {
    Completed,
    Failed(String),
    /// Dropped before the end of the stream, usually a client disconnect.
    Aborted,
}

type FinishHook = Box<dyn FnOnce(BodyOutcome) + Send + Sync>;

/// Calls its hook exactly once, when the wrapped body ends or is dropped.
pub struct ObservedBody {
    inner: DispatchBody,
    on_finish: Option<FinishHook>,
}

impl ObservedBody {
    pub fn new<F>(inner: DispatchBody, on_finish: F) -> Self
    where
        F: FnOnce(BodyOutcome) + Send + Sync + 'static,
    {
        Self {
            inner,
            on_finish: Some(Box::new(on_finish)),
        }
    }

    fn finish(&mut self, outcome: BodyOutcome) {
        if let Some(hook) = self.on_finish.take() {
            hook(outcome);
        }
    }
}

impl Body for ObservedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.finish(BodyOutcome::Completed),
            Poll::Ready(Some(Err(e))) => this.finish(BodyOutcome::Failed(e.to_string())),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        // Connections may stop polling once the body reports its end
        let outcome = if self.inner.is_end_stream() {
            BodyOutcome::Completed
        } else {
            BodyOutcome::Aborted
        };
        self.finish(outcome);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeeMessage {
    Chunk(Bytes),
    /// The upstream body ended normally. A channel closed without `Done`
    /// means the copy is incomplete.
    Done,
}

/// Copies data frames into a bounded channel. The client is never made to
/// wait for the copy: a full or closed channel drops the sender, which
/// abandons the capture and leaves the client stream untouched.
pub struct TeeBody {
    inner: DispatchBody,
    sink: Option<mpsc::Sender<TeeMessage>>,
}

impl TeeBody {
    pub fn new(inner: DispatchBody, sink: mpsc::Sender<TeeMessage>) -> Self {
        Self {
            inner,
            sink: Some(sink),
        }
    }

    fn forward(&mut self, message: TeeMessage) {
        let Some(sink) = &self.sink else {
            return;
        };
        match sink.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(TeeMessage::Done)) => {
                // The copy is complete; only the end marker waits for room
                let sink = sink.clone();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        let _ = sink.send(TeeMessage::Done).await;
                    });
                }
                self.sink = None;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Capture sink fell behind, abandoning capture");
                self.sink = None;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Capture sink closed, continuing without capture");
                self.sink = None;
            }
        }
    }
}

impl Body for TeeBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.forward(TeeMessage::Chunk(data.clone()));
                }
            }
            Poll::Ready(None) => {
                this.forward(TeeMessage::Done);
                this.sink = None;
            }
            Poll::Ready(Some(Err(_))) => this.sink = None,
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TeeBody {
    fn drop(&mut self) {
        if self.sink.is_some() && self.inner.is_end_stream() {
            self.forward(TeeMessage::Done);
        }
    }
}
