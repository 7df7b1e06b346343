//! Request relay host process.
//!
//! Runs the HTTP intake, the processor workers, or both, against one shared
//! queue transport.
//!
//! Run with: cargo run -p request-relay-server
//! Submit: http://localhost:7071/api/submit?name=Ada
//! Metrics: http://localhost:9090/metrics

mod config;

use anyhow::Context;
use config::Config;
use request_relay_core::QueueTransport;
use request_relay_core::environment::{Clock, SystemClock, UuidGenerator};
use request_relay_postgres::PostgresQueue;
use request_relay_runtime::metrics::MetricsServer;
use request_relay_runtime::{AppendMarker, IntakeHandler, Processor};
use request_relay_testing::InMemoryQueue;
use request_relay_web::{AppState, router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::from_env();
    info!(
        role = %config.role,
        open_queue = %config.processor.queues.open,
        processed_queue = %config.processor.queues.processed,
        database = config.redacted_database_url().unwrap_or("in-memory"),
        "Starting request relay"
    );

    let transport = build_transport(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut listeners: Vec<JoinHandle<std::io::Result<()>>> = Vec::new();

    if config.server.metrics_enabled {
        if let Some(handle) = serve_metrics(&config, shutdown_rx.clone()).await? {
            listeners.push(handle);
        }
    }

    let workers = if config.role.runs_processor() {
        let processor = Arc::new(Processor::new(
            transport.clone(),
            clock.clone(),
            AppendMarker,
            config.processor.clone(),
        ));
        let workers = processor.spawn_workers(&shutdown_rx);
        info!(workers = workers.len(), "Processor workers started");
        workers
    } else {
        Vec::new()
    };

    if config.role.runs_intake() {
        let intake = IntakeHandler::new(
            transport.clone(),
            clock.clone(),
            Arc::new(UuidGenerator),
            config.processor.queues.open.clone(),
        )
        .with_enqueue_timeout(config.enqueue_timeout);
        let app = router(AppState::new(Arc::new(intake)));

        let addr = socket_addr(&config.server.host, config.server.port)?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind intake listener on {addr}"))?;
        info!(%addr, "HTTP intake listening");

        let shutdown = shutdown_rx.clone();
        listeners.push(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_requested(shutdown))
                .await
        }));
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let drain = async {
        for handle in listeners {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Listener failed"),
                Err(e) => warn!(error = %e, "Listener task error during shutdown"),
            }
        }
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Processor worker task error during shutdown");
            }
        }
    };

    if tokio::time::timeout(config.server.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.server.shutdown_timeout.as_secs(),
            "Shutdown timed out; leased messages will be redelivered after their lease expires"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "request_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Postgres when a database URL is configured, the in-memory queue otherwise.
async fn build_transport(config: &Config) -> anyhow::Result<Arc<dyn QueueTransport>> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("DATABASE_URL not set; using the in-memory queue, messages do not survive a restart");
        if !config.role.runs_processor() {
            warn!("No processor runs in this process; in-memory requests will never be processed");
        }
        return Ok(Arc::new(InMemoryQueue::new()));
    };

    let queue = PostgresQueue::connect(url, config.database.max_connections)
        .await
        .context("Failed to connect to the queue database")?;
    queue
        .migrate()
        .await
        .context("Failed to migrate the queue database")?;
    info!("PostgreSQL queue ready");

    Ok(Arc::new(queue))
}

/// Install the Prometheus recorder and serve `/metrics` until shutdown.
async fn serve_metrics(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Option<JoinHandle<std::io::Result<()>>>> {
    let addr = socket_addr(&config.server.metrics_host, config.server.metrics_port)?;
    let mut metrics = MetricsServer::new(addr);
    metrics.start()?;

    let Some(prometheus_handle) = metrics.handle().cloned() else {
        warn!("Metrics recorder owned elsewhere; not serving /metrics");
        return Ok(None);
    };

    let metrics_app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(|| async move { prometheus_handle.render() }),
    );

    let listener = tokio::net::TcpListener::bind(metrics.addr())
        .await
        .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
    info!(%addr, "Prometheus metrics available at /metrics");

    Ok(Some(tokio::spawn(async move {
        axum::serve(listener, metrics_app)
            .with_graceful_shutdown(shutdown_requested(shutdown))
            .await
    })))
}

fn socket_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))
}

/// Resolves once the shutdown watch turns `true` or its sender is dropped.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Waits for Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
