//! User-supplied handlers.
//!
//! A custom handler either answers the request or names a new target,
//! which restarts matching from the first mapping. Errors and panics are
//! caught at the mapping boundary and surface as handler failures carrying
//! the original payload.

use super::cache::KvStore;
use super::{panic_message, Outcome};
use crate::body::BoxError;
use crate::dispatch::RequestContext;
use crate::errors::Error;
use crate::response::{DispatchResponse, ResponseBuilder};
use async_trait::async_trait;
use futures::FutureExt;
use hyper::header::CONTENT_TYPE;
use hyper::StatusCode;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub struct CustomCall<'a> {
    pub request: &'a mut RequestContext,
    /// Captures of the matching pattern; `captures[0]` is `$1`
    pub captures: &'a [String],
    /// The mapping's `options`, interpolated for this request
    pub options: &'a Value,
    /// Mapping-scoped store, shared by every request hitting the mapping
    pub store: &'a KvStore,
}

pub enum CustomOutcome {
    Respond(DispatchResponse),
    Redirect(String),
}

impl CustomOutcome {
    pub fn text(body: impl Into<String>) -> Self {
        CustomOutcome::Respond(
            ResponseBuilder::new(StatusCode::OK)
                .header(CONTENT_TYPE.as_str(), "text/plain; charset=utf-8")
                .body(body.into())
                .build(),
        )
    }

    pub fn json(status: StatusCode, value: &Value) -> Self {
        CustomOutcome::Respond(
            ResponseBuilder::new(status)
                .header(CONTENT_TYPE.as_str(), "application/json")
                .body(value.to_string())
                .build(),
        )
    }

    pub fn status(status: StatusCode) -> Self {
        CustomOutcome::Respond(ResponseBuilder::new(status).build())
    }

    pub fn redirect(target: impl Into<String>) -> Self {
        CustomOutcome::Redirect(target.into())
    }
}

#[async_trait]
pub trait CustomHandler: Send + Sync {
    async fn handle(&self, call: CustomCall<'_>) -> Result<CustomOutcome, BoxError>;

    fn name(&self) -> &str {
        "custom"
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> CustomHandler for FnHandler<F>
where
    F: Fn(&RequestContext, &[String]) -> Result<CustomOutcome, BoxError> + Send + Sync,
{
    async fn handle(&self, call: CustomCall<'_>) -> Result<CustomOutcome, BoxError> {
        (self.0)(call.request, call.captures)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Wrap a synchronous closure as a custom handler.
pub fn from_fn<F>(f: F) -> Arc<dyn CustomHandler>
where
    F: Fn(&RequestContext, &[String]) -> Result<CustomOutcome, BoxError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

pub(crate) async fn run(handler: &dyn CustomHandler, call: CustomCall<'_>, index: usize) -> Outcome {
    match AssertUnwindSafe(handler.handle(call)).catch_unwind().await {
        Ok(Ok(CustomOutcome::Respond(response))) => Outcome::Completed(response),
        Ok(Ok(CustomOutcome::Redirect(target))) => Outcome::Redirect(target),
        Ok(Err(e)) => Outcome::Failed(Error::handler(index, e)),
        Err(panic) => Outcome::Failed(Error::handler(index, panic_message(&*panic).into())),
    }
}
