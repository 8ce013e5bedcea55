//! Generic middleware adapter (`use` mappings).
//!
//! A factory is invoked once per mapping, on first use, with the mapping's
//! interpolated options. The middleware it returns then sees every request
//! hitting the mapping: it either answers or passes the request on to the
//! next mapping. A factory failure is not cached; the next request retries.

use super::{panic_message, Outcome};
use crate::body::BoxError;
use crate::config::MappingState;
use crate::dispatch::RequestContext;
use crate::errors::Error;
use crate::response::DispatchResponse;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

pub enum MiddlewareOutcome {
    Respond(DispatchResponse),
    /// Continue with the next mapping.
    Next,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, request: &mut RequestContext) -> Result<MiddlewareOutcome, BoxError>;
}

#[async_trait]
pub trait MiddlewareFactory: Send + Sync {
    async fn create(&self, options: &Value) -> Result<Arc<dyn Middleware>, BoxError>;

    fn name(&self) -> &str {
        "middleware"
    }
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut RequestContext) -> Result<MiddlewareOutcome, BoxError> + Send + Sync,
{
    async fn call(&self, request: &mut RequestContext) -> Result<MiddlewareOutcome, BoxError> {
        (self.0)(request)
    }
}

struct FnFactory<F>(F);

#[async_trait]
impl<F> MiddlewareFactory for FnFactory<F>
where
    F: Fn(&Value) -> Result<Arc<dyn Middleware>, BoxError> + Send + Sync,
{
    async fn create(&self, options: &Value) -> Result<Arc<dyn Middleware>, BoxError> {
        (self.0)(options)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Factory from a closure that receives the options and returns the
/// per-request middleware closure.
pub fn middleware_fn<F, M>(factory: F) -> Arc<dyn MiddlewareFactory>
where
    F: Fn(&Value) -> M + Send + Sync + 'static,
    M: Fn(&mut RequestContext) -> Result<MiddlewareOutcome, BoxError> + Send + Sync + 'static,
{
    Arc::new(FnFactory(move |options: &Value| {
        Ok::<_, BoxError>(Arc::new(FnMiddleware(factory(options))) as Arc<dyn Middleware>)
    }))
}

pub(crate) async fn run(
    factory: &dyn MiddlewareFactory,
    options: &Value,
    state: &MappingState,
    request: &mut RequestContext,
    index: usize,
) -> Outcome {
    let created = AssertUnwindSafe(state.middleware.get_or_try_init(|| async {
        debug!(mapping = index, factory = factory.name(), "Creating middleware");
        factory.create(options).await
    }))
    .catch_unwind()
    .await;

    let middleware = match created {
        Ok(Ok(middleware)) => middleware.clone(),
        Ok(Err(e)) => return Outcome::Failed(Error::handler(index, e)),
        Err(panic) => {
            return Outcome::Failed(Error::handler(index, panic_message(&*panic).into()))
        }
    };

    match AssertUnwindSafe(middleware.call(request)).catch_unwind().await {
        Ok(Ok(MiddlewareOutcome::Respond(response))) => Outcome::Completed(response),
        Ok(Ok(MiddlewareOutcome::Next)) => Outcome::Next,
        Ok(Err(e)) => Outcome::Failed(Error::handler(index, e)),
        Err(panic) => Outcome::Failed(Error::handler(index, panic_message(&*panic).into())),
    }
}
