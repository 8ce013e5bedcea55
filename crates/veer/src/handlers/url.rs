//! Url handler: forwards the request to an upstream origin and streams the
//! answer back.

use super::capture::{self, CaptureRequest};
use super::Outcome;
use crate::body::{self, DispatchBody};
use crate::config::UrlTarget;
use crate::dispatch::RequestContext;
use crate::errors::Error;
use crate::proxy::client::{HttpClient, UpstreamClients};
use crate::proxy::headers::{downstream_response_headers, upstream_request_headers};
use crate::template::interpolate;
use hyper::{Request, Response, Uri};
use std::error::Error as StdError;
use tracing::{debug, warn};

pub async fn forward(
    ctx: &mut RequestContext,
    captures: &[String],
    target: &UrlTarget,
    clients: &UpstreamClients,
) -> Outcome {
    let data = ctx.template_data();
    let upstream_url = interpolate(&target.template, captures, &data);
    let uri = match parse_upstream(&upstream_url) {
        Ok(uri) => uri,
        Err(reason) => {
            return Outcome::Failed(Error::Upstream {
                url: upstream_url,
                reason,
            })
        }
    };
    debug!(upstream = %uri, "Forwarding request");

    let client = match clients.verified() {
        Ok(client) => client,
        Err(e) => return upstream_failure(&upstream_url, e.to_string()),
    };

    // Keep the body around only when a retry may need to replay it
    let result = if target.ignore_unverifiable_certificate {
        let payload = match ctx.body_bytes().await {
            Ok(payload) => payload,
            Err(e) => return upstream_failure(&upstream_url, format!("reading request body: {e}")),
        };
        match send(client, ctx, &uri, body::full(payload.clone())).await {
            Err(e) if e.is_connect() => {
                warn!(upstream = %uri, "Upstream connection failed ({}), retrying without certificate verification", e);
                match clients.unverified() {
                    Ok(client) => send(client, ctx, &uri, body::full(payload)).await,
                    Err(io) => return upstream_failure(&upstream_url, io.to_string()),
                }
            }
            other => other,
        }
    } else {
        let request_body = ctx.take_body();
        send(client, ctx, &uri, request_body).await
    };

    let upstream_response = match result {
        Ok(response) => response,
        Err(e) => return Outcome::Failed(classify(&upstream_url, &e)),
    };

    let (mut parts, incoming) = upstream_response.into_parts();
    parts.headers = downstream_response_headers(&parts.headers);
    let mut response_body = body::from_incoming(incoming);

    if let Some(factory) = &target.capture {
        if parts.status.is_success() {
            let request = CaptureRequest {
                upstream_url: &upstream_url,
                status: parts.status,
                headers: &parts.headers,
                captures,
                request: &data,
            };
            match factory.open(&request).await {
                Ok(sink) => response_body = capture::tee(response_body, sink),
                Err(e) => warn!(upstream = %uri, "Capture unavailable, serving without it: {}", e),
            }
        }
    }

    Outcome::Completed(Response::from_parts(parts, response_body))
}

async fn send(
    client: &HttpClient,
    ctx: &RequestContext,
    uri: &Uri,
    request_body: DispatchBody,
) -> Result<Response<hyper::body::Incoming>, hyper_util::client::legacy::Error> {
    let mut request = Request::new(request_body);
    *request.method_mut() = ctx.method.clone();
    *request.uri_mut() = uri.clone();
    *request.headers_mut() = upstream_request_headers(&ctx.headers);
    client.request(request).await
}

fn parse_upstream(url: &str) -> Result<Uri, String> {
    let uri: Uri = url
        .parse()
        .map_err(|e| format!("invalid upstream url: {e}"))?;
    match uri.scheme_str() {
        Some("http") | Some("https") if uri.host().is_some() => Ok(uri),
        _ => Err("upstream url must be absolute http(s)".to_string()),
    }
}

fn upstream_failure(url: &str, reason: String) -> Outcome {
    Outcome::Failed(Error::Upstream {
        url: url.to_string(),
        reason,
    })
}

fn classify(url: &str, error: &hyper_util::client::legacy::Error) -> Error {
    let reason = error_chain(error);
    if is_certificate_error(error) {
        Error::UpstreamCertificate {
            url: url.to_string(),
            reason,
        }
    } else {
        Error::Upstream {
            url: url.to_string(),
            reason,
        }
    }
}

fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Whether a TLS certificate check is anywhere in the failure chain.
pub fn is_certificate_error(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            if is_certificate_variant(tls) {
                return true;
            }
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if let Some(tls) = io.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
                if is_certificate_variant(tls) {
                    return true;
                }
            }
        }
        current = err.source();
    }
    false
}

fn is_certificate_variant(error: &rustls::Error) -> bool {
    matches!(
        error,
        rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented
    )
}
