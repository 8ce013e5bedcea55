use anyhow::Context;
use clap::{Parser, ValueEnum};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use veer::events::LogListener;
use veer::metrics::{collect_metrics, MetricsListener};
use veer::{Dispatcher, HandlerRegistry, RawConfig, Server};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "veer", version, about = "Rule-driven request dispatcher")]
struct Args {
    /// Mapping table (YAML or JSON)
    #[arg(short, long, env = "VEER_CONFIG")]
    config: PathBuf,

    /// Overrides `listen.host`
    #[arg(long, env = "VEER_HOST")]
    host: Option<String>,

    /// Overrides `listen.port`
    #[arg(short, long, env = "VEER_PORT")]
    port: Option<u16>,

    #[arg(long)]
    max_redirects: Option<u32>,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "VEER_METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);

    let mut raw = RawConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(host) = args.host {
        raw.listen.host = host;
    }
    if let Some(port) = args.port {
        raw.listen.port = port;
    }
    if let Some(max) = args.max_redirects {
        raw.max_redirects = max;
    }
    let addr: SocketAddr = format!("{}:{}", raw.listen.host, raw.listen.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", raw.listen.host, raw.listen.port))?;

    let config = raw
        .with_listener(Arc::new(LogListener))
        .with_listener(Arc::new(MetricsListener))
        .build_with(&HandlerRegistry::new())?;
    info!(
        "Loaded {} mappings from {}",
        config.mappings().len(),
        args.config.display()
    );

    if let Some(port) = args.metrics_port {
        let metrics_addr = SocketAddr::new(addr.ip(), port);
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(metrics_addr).await {
                error!("Metrics listener on {} failed: {}", metrics_addr, e);
            }
        });
    }

    let dispatcher = Arc::new(Dispatcher::new(config));
    let server = Server::bind(addr, dispatcher).await?;
    server
        .run_until(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "veer=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn serve_metrics(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics on http://{}/metrics", addr);
    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let service = service_fn(|_request: Request<Incoming>| async {
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", "text/plain; version=0.0.4")
                    .body(Full::new(Bytes::from(collect_metrics())));
                Ok::<_, Infallible>(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                error!("Error serving metrics connection: {}", e);
            }
        });
    }
}
