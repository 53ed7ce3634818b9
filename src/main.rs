//! Songline Coordinator
//!
//! Runs the cache and queue coordinators as a single process with health
//! and Prometheus metrics endpoints.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use songline::cache::{CacheCoordinator, InMemoryDistributedStore, InMemoryMetadataStore};
use songline::error::{Error, Result};
use songline::queue::{InMemoryJobStore, QueueConfig, QueueCoordinator};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Songline Coordinator - cache and priority job queues
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Default queue name
    #[arg(long, env = "DEFAULT_QUEUE", default_value = "default")]
    default_queue: String,

    /// Default queue concurrency
    #[arg(long, env = "QUEUE_CONCURRENCY", default_value = "4")]
    queue_concurrency: usize,

    /// Default queue admission rate limit per minute (0 = unlimited)
    #[arg(long, env = "QUEUE_RATE_LIMIT", default_value = "0")]
    queue_rate_limit: u32,

    /// Default retry attempts per job
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "3")]
    retry_attempts: u64,

    /// Base retry backoff in milliseconds
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "1000")]
    retry_backoff_ms: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Songline Coordinator");
    info!("  Default queue: {}", args.default_queue);
    info!("  Queue concurrency: {}", args.queue_concurrency);
    info!("  Retry attempts: {}", args.retry_attempts);

    // Cache coordinator with in-process backends
    let cache = Arc::new(CacheCoordinator::new(
        Arc::new(InMemoryDistributedStore::new()),
        Arc::new(InMemoryMetadataStore::new()),
    ));

    // Queue coordinator
    let queue = Arc::new(QueueCoordinator::new(Arc::new(InMemoryJobStore::new())));
    queue.register_queue(
        &args.default_queue,
        QueueConfig {
            concurrency: args.queue_concurrency,
            rate_limit_per_minute: args.queue_rate_limit,
            retry_attempts: args.retry_attempts as u32,
            retry_backoff_base_ms: args.retry_backoff_ms,
        },
    );
    queue.clone().start();
    info!("Queue loops started");

    // Health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Metrics server
    let metrics_addr = args.metrics_addr.clone();
    let cache_for_metrics = cache.clone();
    let queue_for_metrics = queue.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, cache_for_metrics, queue_for_metrics).await
        {
            error!("Metrics server error: {}", e);
        }
    });

    // Run until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("signal handler failed: {}", e)))?;

    info!("Shutting down, draining in-flight jobs");
    queue.shutdown().await;
    info!("Coordinator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("ok")))
                .unwrap(),
            "/readyz" => Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("ok")))
                .unwrap(),
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    cache: Arc<CacheCoordinator>,
    queue: Arc<QueueCoordinator>,
) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let cache_hits = prometheus::register_gauge_vec!(
        "songline_cache_hits_total",
        "Cache hits by tier",
        &["tier"]
    )
    .map_err(|e| Error::Internal(format!("metric registration failed: {}", e)))?;
    let sovereignty_blocks = prometheus::register_gauge!(
        "songline_cache_sovereignty_blocks_total",
        "Writes blocked by sovereignty validation"
    )
    .map_err(|e| Error::Internal(format!("metric registration failed: {}", e)))?;
    let jobs_admitted = prometheus::register_gauge!(
        "songline_queue_jobs_admitted_total",
        "Jobs admitted to queues"
    )
    .map_err(|e| Error::Internal(format!("metric registration failed: {}", e)))?;
    let jobs_completed = prometheus::register_gauge!(
        "songline_queue_jobs_completed_total",
        "Jobs completed successfully"
    )
    .map_err(|e| Error::Internal(format!("metric registration failed: {}", e)))?;
    let jobs_dead_lettered = prometheus::register_gauge!(
        "songline_queue_jobs_dead_lettered_total",
        "Jobs parked in the dead letter queue"
    )
    .map_err(|e| Error::Internal(format!("metric registration failed: {}", e)))?;

    // Mirror coordinator counters into the registry
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            let c = cache.metrics();
            cache_hits
                .with_label_values(&["tier1"])
                .set(c.tier1_hits as f64);
            cache_hits
                .with_label_values(&["tier2"])
                .set(c.tier2_hits as f64);
            cache_hits
                .with_label_values(&["distributed"])
                .set(c.distributed_hits as f64);
            sovereignty_blocks.set(c.sovereignty_blocks as f64);

            let q = queue.metrics();
            jobs_admitted.set(q.admitted as f64);
            jobs_completed.set(q.completed as f64);
            jobs_dead_lettered.set(q.dead_lettered as f64);
        }
    });

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                encoder.encode(&metric_families, &mut buffer).unwrap();

                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", encoder.format_type())
                    .body(Full::new(Bytes::from(buffer)))
                    .unwrap()
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
