//! Capture of proxied response bodies.
//!
//! A url mapping with a capture target duplicates the upstream body of
//! successful responses into a [`CaptureSink`]. The copy runs on its own
//! task; a failing sink, or one more than [`TEE_CAPACITY`] frames behind,
//! is abandoned without touching the client stream.

use crate::body::{DispatchBody, TeeBody, TeeMessage};
use crate::normalize::{normalize, to_file_path};
use crate::template::{interpolate, RequestData};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, StatusCode};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[async_trait]
pub trait CaptureSink: Send {
    async fn write(&mut self, chunk: &Bytes) -> io::Result<()>;

    /// The upstream body ended normally.
    async fn finish(&mut self) -> io::Result<()>;

    /// The upstream body ended early; the copy is incomplete.
    async fn abort(&mut self) {}
}

/// What a sink factory knows about the response being captured.
pub struct CaptureRequest<'a> {
    pub upstream_url: &'a str,
    pub status: StatusCode,
    pub headers: &'a HeaderMap,
    pub captures: &'a [String],
    pub request: &'a RequestData,
}

#[async_trait]
pub trait CaptureSinkFactory: Send + Sync + fmt::Debug {
    async fn open(&self, request: &CaptureRequest<'_>) -> io::Result<Box<dyn CaptureSink>>;
}

/// Writes captures to files: the path template is interpolated per
/// response and resolved inside the base directory.
#[derive(Debug, Clone)]
pub struct DiskCapture {
    template: String,
    base: PathBuf,
}

impl DiskCapture {
    pub fn new(template: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            base: base.into(),
        }
    }

    pub fn resolve(&self, captures: &[String], request: &RequestData) -> io::Result<PathBuf> {
        let interpolated = interpolate(&self.template, captures, request);
        let relative = normalize(&interpolated)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let relative = to_file_path(&relative);
        if relative.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "capture path resolves to the base directory",
            ));
        }
        Ok(self.base.join(relative))
    }
}

#[async_trait]
impl CaptureSinkFactory for DiskCapture {
    async fn open(&self, request: &CaptureRequest<'_>) -> io::Result<Box<dyn CaptureSink>> {
        let path = self.resolve(request.captures, request.request)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        debug!(path = %path.display(), "Capturing upstream response");
        Ok(Box::new(FileSink {
            file: Some(file),
            path,
        }))
    }
}

struct FileSink {
    file: Option<tokio::fs::File>,
    path: PathBuf,
}

#[async_trait]
impl CaptureSink for FileSink {
    async fn write(&mut self, chunk: &Bytes) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(chunk).await,
            None => Err(io::Error::other("capture already closed")),
        }
    }

    async fn finish(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn abort(&mut self) {
        self.file = None;
        remove_partial(&self.path).await;
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), "Could not remove partial capture: {}", e);
    }
}

/// Frames a capture may lag behind the client before it is abandoned.
pub const TEE_CAPACITY: usize = 64;

/// Wrap `body` so every data frame is also written to `sink`.
pub fn tee(body: DispatchBody, mut sink: Box<dyn CaptureSink>) -> DispatchBody {
    let (sender, mut receiver) = mpsc::channel(TEE_CAPACITY);
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Some(TeeMessage::Chunk(chunk)) => {
                    if let Err(e) = sink.write(&chunk).await {
                        warn!("Capture write failed, abandoning capture: {}", e);
                        sink.abort().await;
                        return;
                    }
                }
                Some(TeeMessage::Done) => {
                    if let Err(e) = sink.finish().await {
                        warn!("Capture could not be completed: {}", e);
                    }
                    return;
                }
                None => {
                    debug!("Upstream body ended early, discarding capture");
                    sink.abort().await;
                    return;
                }
            }
        }
    });
    TeeBody::new(body, sender).boxed()
}
