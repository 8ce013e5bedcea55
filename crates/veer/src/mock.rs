//! In-process harness: requests run through the same dispatch loop as the
//! server, without any transport.
//!
//! ```no_run
//! # async fn demo() -> Result<(), veer::BoxError> {
//! use veer::config::{RawConfig, RawMapping};
//! use veer::handlers::{from_fn, CustomOutcome};
//! use veer::mock::MockServer;
//!
//! let config = RawConfig::new(vec![RawMapping::regex("^/hello$")
//!     .custom_handler(from_fn(|_, _| Ok(CustomOutcome::text("Hello World !"))))]);
//! let mock = MockServer::from_raw(config)?;
//! let response = mock.request("GET", "/hello").send().await?;
//! assert_eq!(response.text(), "Hello World !");
//! # Ok(())
//! # }
//! ```

use crate::body::{self, BoxError};
use crate::config::{Configuration, RawConfig};
use crate::dispatch::{Dispatcher, RequestContext};
use crate::errors::{lookup, ErrorCode, Result};
use crate::fs::FileSystem;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, StatusCode};
use std::sync::Arc;

#[derive(Debug)]
pub struct MockServer {
    dispatcher: Dispatcher,
}

impl MockServer {
    pub fn new(config: Configuration) -> Self {
        Self {
            dispatcher: Dispatcher::new(config),
        }
    }

    /// Validate `raw` against the builtin handler registry.
    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        Ok(Self::new(raw.build()?))
    }

    pub fn with_file_system(self, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dispatcher: self.dispatcher.with_file_system(fs),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn request(&self, method: &str, url: &str) -> MockRequest<'_> {
        MockRequest {
            server: self,
            method: method.to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(&self, url: &str) -> MockRequest<'_> {
        self.request("GET", url)
    }
}

#[must_use = "a mock request does nothing until sent"]
pub struct MockRequest<'a> {
    server: &'a MockServer,
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl MockRequest<'_> {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Dispatch the request and collect the whole response.
    pub async fn send(self) -> std::result::Result<MockResponse, BoxError> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())?;
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
        let ctx = RequestContext::new(method, self.url, headers, body::full(self.body));

        let response = self.server.dispatcher.dispatch_context(ctx).await;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(MockResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl MockResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    /// Table entry of a failure body (`{"code": .., "message": ..}`).
    pub fn error_code(&self) -> Option<&'static ErrorCode> {
        let code = self.json().ok()?.get("code")?.as_u64()?;
        lookup(u16::try_from(code).ok()?)
    }
}
