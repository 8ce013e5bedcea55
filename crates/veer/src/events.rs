//! Lifecycle events and the broadcast bus that carries them.
//!
//! One [`Event`] variant per lifecycle step. Subscribers each get their own
//! receiver; events of a single request are delivered in emission order.

use crate::errors::Error;
use crate::request_id::RequestId;
use chrono::{DateTime, Utc};
use hyper::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum Event {
    Incoming {
        id: RequestId,
        method: Method,
        url: String,
        start: DateTime<Utc>,
    },
    Redirecting {
        id: RequestId,
        method: Method,
        url: String,
        start: DateTime<Utc>,
        /// Handler kind that asked for the continuation
        kind: &'static str,
        redirect: String,
    },
    Redirected {
        id: RequestId,
        method: Method,
        url: String,
        start: DateTime<Utc>,
        status_code: u16,
        time_spent: Duration,
    },
    Error {
        id: Option<RequestId>,
        method: Option<Method>,
        url: Option<String>,
        reason: Error,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Incoming { .. } => "incoming",
            Event::Redirecting { .. } => "redirecting",
            Event::Redirected { .. } => "redirected",
            Event::Error { .. } => "error",
        }
    }

    pub fn id(&self) -> Option<RequestId> {
        match self {
            Event::Incoming { id, .. }
            | Event::Redirecting { id, .. }
            | Event::Redirected { id, .. } => Some(*id),
            Event::Error { id, .. } => *id,
        }
    }

    /// One-line human-readable form. The request identifier only ever
    /// appears as its opaque label.
    pub fn render(&self) -> String {
        let text = match self {
            Event::Incoming {
                id, method, url, ..
            } => format!("{id} {method} {url}"),
            Event::Redirecting {
                id,
                method,
                url,
                kind,
                redirect,
                ..
            } => format!("{id} {method} {url} -> {redirect} ({kind})"),
            Event::Redirected {
                id,
                method,
                url,
                status_code,
                time_spent,
                ..
            } => format!(
                "{id} {method} {url} {status_code} {}ms",
                time_spent.as_millis()
            ),
            Event::Error {
                id,
                method,
                url,
                reason,
            } => {
                let mut text = String::new();
                if let Some(id) = id {
                    text.push_str(&format!("{id} "));
                }
                if let Some(method) = method {
                    text.push_str(&format!("{method} "));
                }
                if let Some(url) = url {
                    text.push_str(&format!("{url} "));
                }
                text.push_str(&format!("[{}] {reason}", reason.code().id));
                text
            }
        };
        match self.id() {
            Some(id) => id.redact(&text),
            None => text,
        }
    }
}

/// Plugin hook notified of every lifecycle event.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);

    fn name(&self) -> &str {
        "listener"
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Rendering is left to listeners such as [`LogListener`].
    pub fn emit(&self, event: Event) {
        // No subscribers is not an error
        let _ = self.sender.send(Arc::new(event));
    }

    /// Run `listener` on its own subscriber task until the bus is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn attach(&self, listener: Arc<dyn EventListener>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => listener.on_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            listener = listener.name(),
                            skipped, "Event listener fell behind, events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Renders lifecycle events through `tracing`.
#[derive(Debug, Default)]
pub struct LogListener;

impl EventListener for LogListener {
    fn on_event(&self, event: &Event) {
        match event {
            Event::Error { reason, .. } => {
                warn!(code = reason.code().name, "{}", event.render());
            }
            Event::Redirected { .. } => info!("{}", event.render()),
            _ => debug!(event = event.name(), "{}", event.render()),
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
