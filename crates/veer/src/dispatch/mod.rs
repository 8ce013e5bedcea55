//! The dispatch loop.
//!
//! A request walks the mapping table top to bottom. The first mapping whose
//! method filter and pattern both accept the current url runs its handler:
//!
//! - a response ends the walk
//! - a redirect rewrites the url and restarts at the first mapping, counted
//!   against `max-redirects`
//! - `next` (middleware) and ignored not-found failures resume at the
//!   mapping right below; they emit `redirecting` but are not counted
//! - any other failure ends the walk with an error response
//!
//! Running off the end of the table is a 404.

mod context;

pub use context::RequestContext;

use crate::body::{BodyOutcome, DispatchBody, ObservedBody};
use crate::config::{Configuration, HandlerKind, Mapping};
use crate::errors::{Error, Result};
use crate::events::{Event, EventBus, EventListener};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::handlers::{self, CustomCall, Outcome};
use crate::matcher;
use crate::normalize::normalize_url;
use crate::proxy::client::UpstreamClients;
use crate::response::{error_response, DispatchResponse};
use crate::template::interpolate_value;
use http_body_util::BodyExt;
use hyper::{Request, Response, Uri};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct Dispatcher {
    config: RwLock<Arc<Configuration>>,
    events: EventBus,
    fs: Arc<dyn FileSystem>,
    clients: UpstreamClients,
    listener_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Listeners registered on the configuration are attached when a Tokio
    /// runtime is available.
    pub fn new(config: Configuration) -> Self {
        let events = EventBus::new(config.event_capacity());
        let dispatcher = Self {
            config: RwLock::new(Arc::new(config)),
            events,
            fs: Arc::new(LocalFileSystem),
            clients: UpstreamClients::new(),
            listener_tasks: Mutex::new(Vec::new()),
        };
        let listeners = dispatcher.configuration().listeners().to_vec();
        dispatcher.attach_listeners(&listeners);
        dispatcher
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Current configuration snapshot.
    pub fn configuration(&self) -> Arc<Configuration> {
        self.config.read().clone()
    }

    /// Swap the whole configuration. In-flight requests finish on the
    /// snapshot they started with; listeners of the old configuration are
    /// detached.
    pub fn replace_configuration(&self, config: Configuration) {
        let listeners = config.listeners().to_vec();
        *self.config.write() = Arc::new(config);
        for task in self.listener_tasks.lock().drain(..) {
            task.abort();
        }
        self.attach_listeners(&listeners);
        debug!(
            mappings = self.configuration().mappings().len(),
            "Configuration replaced"
        );
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.events.subscribe()
    }

    fn attach_listeners(&self, listeners: &[Arc<dyn EventListener>]) {
        if listeners.is_empty() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(
                listeners = listeners.len(),
                "No Tokio runtime, configuration listeners not attached"
            );
            return;
        }
        let mut tasks = self.listener_tasks.lock();
        for listener in listeners {
            debug!(listener = listener.name(), "Attaching event listener");
            tasks.push(self.events.attach(listener.clone()));
        }
    }

    pub async fn dispatch(&self, request: Request<DispatchBody>) -> DispatchResponse {
        self.dispatch_context(RequestContext::from_request(request))
            .await
    }

    /// Run the loop for an already built context.
    pub async fn dispatch_context(&self, mut ctx: RequestContext) -> DispatchResponse {
        let config = self.configuration();
        self.events.emit(Event::Incoming {
            id: ctx.id,
            method: ctx.method.clone(),
            url: ctx.original_url.clone(),
            start: ctx.start,
        });

        let response = match self.run(&config, &mut ctx).await {
            Ok(response) => response,
            Err(error) => {
                self.events.emit(Event::Error {
                    id: Some(ctx.id),
                    method: Some(ctx.method.clone()),
                    url: Some(ctx.url.clone()),
                    reason: error.clone(),
                });
                error_response(&error, ctx.id)
            }
        };
        self.observe(&ctx, response)
    }

    async fn run(&self, config: &Configuration, ctx: &mut RequestContext) -> Result<DispatchResponse> {
        ctx.url = normalize_url(&ctx.url)?;
        let mappings = config.mappings();
        let mut index = 0;

        while let Some(mapping) = mappings.get(index) {
            let result = matcher::test(
                mapping.pattern.as_ref(),
                &mapping.methods,
                &ctx.method,
                &ctx.url,
            );
            if !result.matched {
                index += 1;
                continue;
            }
            debug!(
                request = %ctx.id,
                mapping = index,
                kind = mapping.handler.name(),
                url = %ctx.url,
                "Mapping matched"
            );

            match self.execute(config, mapping, ctx, &result.captures).await {
                Outcome::Completed(response) => return Ok(response),
                Outcome::Redirect(target) => {
                    ctx.redirect_count += 1;
                    if ctx.redirect_count > config.max_redirects() {
                        return Err(Error::TooManyRedirects {
                            url: ctx.original_url.clone(),
                            max: config.max_redirects(),
                        });
                    }
                    let redirect = normalize_url(&continuation_target(&target))?;
                    self.events.emit(Event::Redirecting {
                        id: ctx.id,
                        method: ctx.method.clone(),
                        url: ctx.url.clone(),
                        start: ctx.start,
                        kind: mapping.handler.name(),
                        redirect: redirect.clone(),
                    });
                    ctx.url = redirect;
                    index = 0;
                }
                Outcome::Next => {
                    self.continue_below(ctx, mapping);
                    index += 1;
                }
                Outcome::Failed(error) if mapping.ignore_if_not_found && error.is_not_found() => {
                    debug!(request = %ctx.id, mapping = index, "Not found, trying next mapping");
                    self.continue_below(ctx, mapping);
                    index += 1;
                }
                Outcome::Failed(error) => return Err(error),
            }
        }

        Err(Error::NotFound {
            method: ctx.method.to_string(),
            url: ctx.url.clone(),
        })
    }

    /// Continuation at the next mapping: same url, not counted against
    /// `max-redirects`.
    fn continue_below(&self, ctx: &RequestContext, mapping: &Mapping) {
        self.events.emit(Event::Redirecting {
            id: ctx.id,
            method: ctx.method.clone(),
            url: ctx.url.clone(),
            start: ctx.start,
            kind: mapping.handler.name(),
            redirect: ctx.url.clone(),
        });
    }

    async fn execute(
        &self,
        config: &Configuration,
        mapping: &Mapping,
        ctx: &mut RequestContext,
        captures: &[String],
    ) -> Outcome {
        match &mapping.handler {
            HandlerKind::File(target) => {
                handlers::file::serve(ctx, captures, target, &mapping.cwd, self.fs.as_ref()).await
            }
            HandlerKind::Url(target) => {
                handlers::url::forward(ctx, captures, target, &self.clients).await
            }
            HandlerKind::Status(target) => handlers::status::respond(ctx, captures, target),
            HandlerKind::Custom(target) => {
                let Some(state) = config.state(mapping.index) else {
                    return Outcome::Failed(missing_state(mapping.index));
                };
                let options = resolve_options(&target.options, target.templated, captures, ctx);
                let call = CustomCall {
                    request: ctx,
                    captures,
                    options: &options,
                    store: &state.store,
                };
                handlers::custom::run(target.handler.as_ref(), call, mapping.index).await
            }
            HandlerKind::Use(target) => {
                let Some(state) = config.state(mapping.index) else {
                    return Outcome::Failed(missing_state(mapping.index));
                };
                let options = resolve_options(&target.options, target.templated, captures, ctx);
                handlers::middleware::run(
                    target.factory.as_ref(),
                    &options,
                    state,
                    ctx,
                    mapping.index,
                )
                .await
            }
        }
    }

    /// Emit `redirected` once the response body is done, preceded by
    /// `error` when it did not complete.
    fn observe(&self, ctx: &RequestContext, response: DispatchResponse) -> DispatchResponse {
        let (parts, body) = response.into_parts();
        let status_code = parts.status.as_u16();
        let events = self.events.clone();
        let id = ctx.id;
        let method = ctx.method.clone();
        let url = ctx.original_url.clone();
        let start = ctx.start;
        let started = ctx.started;

        let body = ObservedBody::new(body, move |outcome| {
            let reason = match outcome {
                BodyOutcome::Completed => None,
                BodyOutcome::Failed(reason) => Some(reason),
                BodyOutcome::Aborted => Some("client went away".to_string()),
            };
            if let Some(reason) = reason {
                events.emit(Event::Error {
                    id: Some(id),
                    method: Some(method.clone()),
                    url: Some(url.clone()),
                    reason: Error::StreamAborted {
                        url: url.clone(),
                        reason,
                    },
                });
            }
            events.emit(Event::Redirected {
                id,
                method,
                url,
                start,
                status_code,
                time_spent: started.elapsed(),
            });
        });
        Response::from_parts(parts, body.boxed())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.configuration())
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}

fn resolve_options<'a>(
    options: &'a Value,
    templated: bool,
    captures: &[String],
    ctx: &RequestContext,
) -> Cow<'a, Value> {
    if templated {
        Cow::Owned(interpolate_value(options, captures, &ctx.template_data()))
    } else {
        Cow::Borrowed(options)
    }
}

fn missing_state(index: usize) -> Error {
    Error::InvalidConfiguration {
        reason: format!("no state for mapping #{index}"),
    }
}

/// Absolute targets continue with their path and query only.
fn continuation_target(target: &str) -> String {
    match target.parse::<Uri>() {
        Ok(uri) if uri.scheme().is_some() => uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        _ => target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body;
    use crate::config::{RawConfig, RawMapping};
    use crate::handlers::{from_fn, middleware_fn, CustomOutcome, MiddlewareOutcome};
    use crate::body::BoxError;
    use hyper::{Method, StatusCode};

    fn dispatcher(mappings: Vec<RawMapping>) -> Dispatcher {
        Dispatcher::new(RawConfig::new(mappings).with_cwd("/nonexistent").build().unwrap())
    }

    fn get(url: &str) -> Request<DispatchBody> {
        Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(body::empty())
            .unwrap()
    }

    async fn text(response: DispatchResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_continuation_target() {
        assert_eq!(continuation_target("/a/b?c"), "/a/b?c");
        assert_eq!(continuation_target("http://host:1/x?y=1"), "/x?y=1");
        assert_eq!(continuation_target("https://host"), "/");
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let dispatcher = dispatcher(vec![
            RawMapping::regex("^/a$").status(404),
            RawMapping::regex("^/(.*)").custom_handler(from_fn(|_, _| Ok(CustomOutcome::text("second")))),
        ]);
        assert_eq!(dispatcher.dispatch(get("/a")).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(dispatcher.dispatch(get("/b")).await).await, "second");
    }

    #[tokio::test]
    async fn test_method_mismatch_is_a_miss() {
        let dispatcher = dispatcher(vec![
            RawMapping::any().method("POST").status(201),
            RawMapping::any().status(200),
        ]);
        assert_eq!(dispatcher.dispatch(get("/x")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_no_mapping_is_404() {
        let dispatcher = dispatcher(vec![RawMapping::regex("^/only$").status(200)]);
        let response = dispatcher.dispatch(get("/other")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(text(response).await.contains("2002"));
    }

    #[tokio::test]
    async fn test_redirect_restarts_at_top() {
        let dispatcher = dispatcher(vec![
            RawMapping::regex("^/final$").custom_handler(from_fn(|ctx, _| {
                Ok(CustomOutcome::text(format!("{} from {}", ctx.url, ctx.original_url)))
            })),
            RawMapping::regex("^/start$").custom_handler(from_fn(|_, _| Ok(CustomOutcome::redirect("/final")))),
        ]);
        let response = dispatcher.dispatch(get("/start")).await;
        assert_eq!(text(response).await, "/final from /start");
    }

    #[tokio::test]
    async fn test_cyclic_redirects_hit_the_guard() {
        let config = RawConfig::new(vec![
            RawMapping::regex("^/ping$").custom_handler(from_fn(|_, _| Ok(CustomOutcome::redirect("/pong")))),
            RawMapping::regex("^/pong$").custom_handler(from_fn(|_, _| Ok(CustomOutcome::redirect("/ping")))),
        ])
        .with_max_redirects(4)
        .with_cwd("/nonexistent");
        let dispatcher = Dispatcher::new(config.build().unwrap());
        let response = dispatcher.dispatch(get("/ping")).await;
        assert_eq!(response.status(), StatusCode::LOOP_DETECTED);
        assert!(text(response).await.contains("2006"));
    }

    #[tokio::test]
    async fn test_middleware_next_continues_below() {
        let factory = middleware_fn(|_| {
            |request: &mut RequestContext| -> std::result::Result<MiddlewareOutcome, BoxError> {
                request.headers.insert("x-trace", "on".parse().unwrap());
                Ok(MiddlewareOutcome::Next)
            }
        });
        let dispatcher = dispatcher(vec![
            RawMapping::any().use_middleware(factory),
            RawMapping::any().custom_handler(from_fn(|ctx, _| {
                Ok(CustomOutcome::text(ctx.header("x-trace").unwrap_or("off").to_string()))
            })),
        ]);
        assert_eq!(text(dispatcher.dispatch(get("/")).await).await, "on");
    }

    #[tokio::test]
    async fn test_continuations_below_emit_redirecting_without_counting() {
        let factory = middleware_fn(|_| {
            |_: &mut RequestContext| -> std::result::Result<MiddlewareOutcome, BoxError> {
                Ok(MiddlewareOutcome::Next)
            }
        });
        let config = RawConfig::new(vec![
            RawMapping::regex("^/(.*)").file("$1").ignore_if_not_found(),
            RawMapping::any().use_middleware(factory),
            RawMapping::any().custom_handler(from_fn(|_, _| Ok(CustomOutcome::text("ok")))),
        ])
        .with_max_redirects(0)
        .with_cwd("/nonexistent");
        let dispatcher = Dispatcher::new(config.build().unwrap());
        let mut events = dispatcher.subscribe();

        let response = dispatcher.dispatch(get("/missing")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "ok");

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let names: Vec<_> = seen.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["incoming", "redirecting", "redirecting", "redirected"]);
        let kinds: Vec<_> = seen
            .iter()
            .filter_map(|event| match event.as_ref() {
                Event::Redirecting { kind, redirect, .. } => Some((*kind, redirect.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![("file", "/missing"), ("use", "/missing")]);
    }

    #[tokio::test]
    async fn test_malformed_url_is_400() {
        let dispatcher = dispatcher(vec![RawMapping::any().status(200)]);
        let response = dispatcher.dispatch(get("/file%0.txt")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_url_is_normalized_before_matching() {
        let dispatcher = dispatcher(vec![RawMapping::regex("^/file.txt$").status(204)]);
        let response = dispatcher.dispatch(get("/test/%2E%2E/file.txt")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_replace_configuration() {
        let dispatcher = dispatcher(vec![RawMapping::any().status(200)]);
        let snapshot = dispatcher.configuration();
        dispatcher.replace_configuration(
            RawConfig::new(vec![RawMapping::any().status(418)])
                .with_cwd("/nonexistent")
                .build()
                .unwrap(),
        );
        assert_eq!(snapshot.mappings().len(), 1);
        assert_eq!(dispatcher.dispatch(get("/")).await.status(), StatusCode::IM_A_TEAPOT);
    }
}
