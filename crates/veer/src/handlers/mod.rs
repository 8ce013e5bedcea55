//! Handler kinds.
//!
//! Every handler turns one matched request into an [`Outcome`]; the
//! dispatcher owns what happens next.

pub mod cache;
pub mod capture;
pub mod custom;
pub mod file;
pub mod middleware;
pub mod status;
pub mod url;

use crate::errors::Error;
use crate::response::DispatchResponse;

pub use cache::{CacheHandler, KvStore, StoredValue};
pub use capture::{CaptureRequest, CaptureSink, CaptureSinkFactory, DiskCapture};
pub use custom::{from_fn, CustomCall, CustomHandler, CustomOutcome};
pub use middleware::{middleware_fn, Middleware, MiddlewareFactory, MiddlewareOutcome};

pub enum Outcome {
    /// The response is final.
    Completed(DispatchResponse),
    /// Rewrite the target and restart matching at the top.
    Redirect(String),
    /// Continue matching at the next mapping, target unchanged.
    Next,
    Failed(Error),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Completed(response) => f
                .debug_tuple("Completed")
                .field(&response.status())
                .finish(),
            Outcome::Redirect(target) => f.debug_tuple("Redirect").field(target).finish(),
            Outcome::Next => f.write_str("Next"),
            Outcome::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

/// Render a panic payload caught around user code.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}
