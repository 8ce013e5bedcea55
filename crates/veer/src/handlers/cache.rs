//! Key-value cache extension, registered as the `cache` custom handler.
//!
//! The key is the first capture of the mapping's pattern (the path when the
//! pattern has none). Entries live in the mapping's private [`KvStore`].
//! Concurrent writers to one key race; the last write wins.

use super::custom::{CustomCall, CustomHandler, CustomOutcome};
use crate::body::BoxError;
use crate::response::ResponseBuilder;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Default)]
pub struct KvStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredValue> {
        self.entries.read().get(key).cloned()
    }

    /// Returns `true` when the key already existed.
    pub fn insert(&self, key: impl Into<String>, value: StoredValue) -> bool {
        self.entries.write().insert(key.into(), value).is_some()
    }

    pub fn remove(&self, key: &str) -> Option<StoredValue> {
        self.entries.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheHandler;

#[async_trait]
impl CustomHandler for CacheHandler {
    async fn handle(&self, call: CustomCall<'_>) -> Result<CustomOutcome, BoxError> {
        let key = call
            .captures
            .first()
            .cloned()
            .unwrap_or_else(|| call.request.path().to_string());
        let method = call.request.method.clone();
        debug!(%method, key = %key, "Cache request");

        let response = match method {
            Method::GET | Method::HEAD => match call.store.get(&key) {
                Some(value) => {
                    let mut builder = ResponseBuilder::new(StatusCode::OK)
                        .header(CONTENT_LENGTH.as_str(), &value.body.len().to_string());
                    if let Some(content_type) = &value.content_type {
                        builder = builder.header(CONTENT_TYPE.as_str(), content_type);
                    }
                    if method == Method::GET {
                        builder = builder.body(value.body);
                    }
                    builder.build()
                }
                None => ResponseBuilder::new(StatusCode::NO_CONTENT).build(),
            },
            Method::POST | Method::PUT => {
                let body = call.request.body_bytes().await?;
                let value = StoredValue {
                    content_type: call.request.header(CONTENT_TYPE.as_str()).map(String::from),
                    body,
                };
                let existed = call.store.insert(key, value);
                let status = if existed {
                    StatusCode::OK
                } else {
                    StatusCode::CREATED
                };
                ResponseBuilder::new(status).build()
            }
            Method::DELETE => {
                call.store.remove(&key);
                ResponseBuilder::new(StatusCode::NO_CONTENT).build()
            }
            _ => ResponseBuilder::new(StatusCode::METHOD_NOT_ALLOWED)
                .header(ALLOW.as_str(), "GET, HEAD, POST, PUT, DELETE")
                .build(),
        };
        Ok(CustomOutcome::Respond(response))
    }

    fn name(&self) -> &str {
        "cache"
    }
}
