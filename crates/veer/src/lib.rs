//! Veer: a rule-driven request dispatcher.
//!
//! An ordered table of mappings decides, per request, whether to serve a
//! file, proxy to another origin, run user code, answer with a fixed status
//! or hand the request to a middleware. Mappings chain through redirects
//! and continuations until one of them answers.

// ===== Dispatch core =====
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod matcher;

// ===== Building blocks =====
pub mod body;
pub mod errors;
pub mod events;
pub mod fs;
pub mod http_date;
pub mod normalize;
pub mod request_id;
pub mod response;
pub mod template;

// ===== Edges =====
pub mod metrics;
pub mod mock;
pub mod proxy;

pub use body::{BoxError, DispatchBody};
pub use config::{Configuration, HandlerRegistry, RawConfig, RawMapping};
pub use dispatch::{Dispatcher, RequestContext};
pub use errors::{Error, Result};
pub use events::{Event, EventBus, EventListener};
pub use mock::MockServer;
pub use proxy::Server;
pub use request_id::RequestId;
pub use response::DispatchResponse;
