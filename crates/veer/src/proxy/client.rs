//! Upstream HTTP clients.
//!
//! Two pooled clients share one configuration: the verifying one is used
//! for every url mapping, the non-verifying one only for retries of
//! mappings that opted into `ignore-unverifiable-certificate`. Both are
//! built on first use.

use super::tls::NoVerifier;
use crate::body::DispatchBody;
use hyper_rustls::builderstates::WantsSchemes;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use once_cell::sync::OnceCell;
use rustls::crypto::CryptoProvider;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, DispatchBody>;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 32;
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct UpstreamClients {
    verified: OnceCell<HttpClient>,
    unverified: OnceCell<HttpClient>,
}

impl UpstreamClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verified(&self) -> io::Result<&HttpClient> {
        self.verified.get_or_try_init(|| create_http_client(false))
    }

    pub fn unverified(&self) -> io::Result<&HttpClient> {
        self.unverified.get_or_try_init(|| create_http_client(true))
    }
}

impl std::fmt::Debug for UpstreamClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClients")
            .field("verified", &self.verified.get().is_some())
            .field("unverified", &self.unverified.get().is_some())
            .finish()
    }
}

fn create_http_client(skip_tls_verify: bool) -> io::Result<HttpClient> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(TCP_KEEPALIVE));
    http_connector.enforce_http(false);

    let provider = rustls::crypto::ring::default_provider();
    let https_connector = if skip_tls_verify {
        warn!("Creating upstream client with TLS certificate verification DISABLED");
        let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(provider.clone()))
            .with_safe_default_protocol_versions()
            .map_err(io::Error::other)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier::new(provider)))
            .with_no_client_auth();
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        let native = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(provider.clone());
        or_empty_roots(native, provider)?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    };

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build(https_connector);

    info!(
        "Upstream client ready (HTTP/1.1): verify_certificates={}, max_idle={}, idle_timeout={}s",
        !skip_tls_verify,
        POOL_MAX_IDLE_PER_HOST,
        POOL_IDLE_TIMEOUT.as_secs()
    );

    Ok(http_client)
}

/// Without a system trust store, plain http upstreams still work and every
/// https upstream fails certificate verification.
fn or_empty_roots(
    native: io::Result<HttpsConnectorBuilder<WantsSchemes>>,
    provider: CryptoProvider,
) -> io::Result<HttpsConnectorBuilder<WantsSchemes>> {
    match native {
        Ok(builder) => Ok(builder),
        Err(e) => {
            warn!("No native root certificates ({}), https upstreams will not verify", e);
            let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
                .with_safe_default_protocol_versions()
                .map_err(io::Error::other)?
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth();
            Ok(HttpsConnectorBuilder::new().with_tls_config(tls_config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_http_works_without_native_roots() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let service = service_fn(|_: Request<Incoming>| async {
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"plain"))))
            });
            let _ = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
        });

        let provider = rustls::crypto::ring::default_provider();
        let connector = or_empty_roots(Err(io::Error::other("no roots")), provider)
            .unwrap()
            .https_or_http()
            .enable_http1()
            .wrap_connector(HttpConnector::new());
        let client: HttpClient = Client::builder(TokioExecutor::new()).build(connector);

        let request = Request::get(format!("http://{addr}/"))
            .body(crate::body::empty())
            .unwrap();
        let response = client.request(request).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"plain");
    }
}
