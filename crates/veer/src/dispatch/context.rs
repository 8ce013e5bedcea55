use crate::body::{self, BoxError, DispatchBody};
use crate::request_id::RequestId;
use crate::template::RequestData;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, Request};
use std::time::Instant;

/// Per-request dispatch state.
///
/// `url` is the current, normalized target and changes on every
/// continuation; `original_url` never changes.
pub struct RequestContext {
    pub id: RequestId,
    pub method: Method,
    pub original_url: String,
    pub url: String,
    pub headers: HeaderMap,
    pub start: DateTime<Utc>,
    pub started: Instant,
    pub redirect_count: u32,
    body: RequestBody,
}

enum RequestBody {
    Streaming(DispatchBody),
    Buffered(Bytes),
    Taken,
}

impl RequestContext {
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap, body: DispatchBody) -> Self {
        let url = url.into();
        Self {
            id: RequestId::next(),
            method,
            original_url: url.clone(),
            url,
            headers,
            start: Utc::now(),
            started: Instant::now(),
            redirect_count: 0,
            body: RequestBody::Streaming(body),
        }
    }

    /// Build a context from a request; the target is the request's path and
    /// query (absolute-form targets keep only that part).
    pub fn from_request(request: Request<DispatchBody>) -> Self {
        let (parts, body) = request.into_parts();
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        Self::new(parts.method, url, parts.headers, body)
    }

    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(path, _)| path)
    }

    pub fn query(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, query)| query)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Values for `${request.*}` placeholders.
    pub fn template_data(&self) -> RequestData {
        RequestData::new(self.method.as_str(), &self.url, &self.headers)
    }

    /// Take the request body for streaming. A body that was already consumed
    /// comes back empty; a buffered body is replayed.
    pub fn take_body(&mut self) -> DispatchBody {
        match std::mem::replace(&mut self.body, RequestBody::Taken) {
            RequestBody::Streaming(body) => body,
            RequestBody::Buffered(bytes) => {
                self.body = RequestBody::Buffered(bytes.clone());
                body::full(bytes)
            }
            RequestBody::Taken => body::empty(),
        }
    }

    /// Read the whole body into memory. It stays available for later
    /// `take_body`/`body_bytes` calls.
    pub async fn body_bytes(&mut self) -> Result<Bytes, BoxError> {
        let bytes = match std::mem::replace(&mut self.body, RequestBody::Taken) {
            RequestBody::Streaming(body) => body.collect().await?.to_bytes(),
            RequestBody::Buffered(bytes) => bytes,
            RequestBody::Taken => Bytes::new(),
        };
        self.body = RequestBody::Buffered(bytes.clone());
        Ok(bytes)
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("original_url", &self.original_url)
            .field("url", &self.url)
            .field("redirect_count", &self.redirect_count)
            .finish_non_exhaustive()
    }
}
