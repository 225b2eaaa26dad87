//! DSQL Pool demo
//!
//! Runs a handful of workers that share one pool and periodically query the
//! cluster, logging each result together with the pool status.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use dsql_pool::{
    config::{Environment, Settings},
    logging::init_tracing,
    pool::{create_pool, PoolManager},
    transport::PgTransport,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// DSQL Pool demo
///
/// Concurrent workers sharing a bounded pool of IAM-authenticated connections.
#[derive(Parser, Debug)]
#[command(name = "dsql-pool")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster identifier (overrides DSQL_CLUSTER_ID env var)
    #[arg(short, long)]
    cluster_id: Option<String>,

    /// AWS region (overrides AWS_REGION env var)
    #[arg(short, long)]
    region: Option<String>,

    /// Database role (overrides DSQL_USERNAME env var)
    #[arg(short, long)]
    user: Option<String>,

    /// Maximum pool size (overrides POOL_MAX_CONNECTIONS env var)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Connections opened at startup (overrides POOL_MIN_CONNECTIONS env var)
    #[arg(long)]
    min_connections: Option<usize>,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 5)]
    workers: usize,

    /// Seconds each worker sleeps between queries
    #[arg(long, default_value_t = 2)]
    interval_secs: u64,

    /// Queries per worker; runs until interrupted when omitted
    #[arg(long)]
    iterations: Option<u64>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Log file path for JSON logs (enables file logging with 10MB rotation)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load_with(|settings| {
        if let Some(cluster_id) = args.cluster_id.clone() {
            settings.dsql.cluster_id = cluster_id;
        }
        if let Some(region) = args.region.clone() {
            settings.aws_region = region;
        }
        if let Some(user) = args.user.clone() {
            settings.dsql.username = user;
        }
        if let Some(max) = args.max_connections {
            settings.pool.max_connections = max;
        }
        if let Some(min) = args.min_connections {
            settings.pool.min_connections = min;
        }
        if let Some(log_level) = args.log_level.clone() {
            settings.log_level = log_level;
        }
        if let Some(env) = args.env {
            settings.environment = env;
        }
        if let Some(path) = &args.log_file {
            settings.log_file = Some(path.display().to_string());
        }
    })?;

    init_tracing(
        &settings.log_level,
        settings.log_file.as_deref().map(std::path::Path::new),
    )?;

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        cluster_id = %settings.dsql.cluster_id,
        endpoint = %settings.endpoint(),
        workers = args.workers,
        "Starting application"
    );

    let pool = create_pool(&settings).await?;
    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(args.interval_secs);

    let mut workers = Vec::with_capacity(args.workers);
    for worker_id in 1..=args.workers {
        workers.push(tokio::spawn(run_worker(
            pool.clone(),
            worker_id,
            interval,
            args.iterations,
            cancel.clone(),
        )));
    }

    let all_done = futures::future::join_all(workers);
    tokio::pin!(all_done);

    tokio::select! {
        _ = shutdown_signal() => {
            cancel.cancel();
            all_done.as_mut().await;
        }
        _ = &mut all_done => {}
    }

    pool.shutdown().await;
    tracing::info!(status = %pool.status(), "Application shutdown complete");

    Ok(())
}

/// Query the cluster every `interval` until cancelled or `iterations` is reached
async fn run_worker(
    pool: PoolManager<PgTransport>,
    worker_id: usize,
    interval: Duration,
    iterations: Option<u64>,
    cancel: CancellationToken,
) {
    let mut completed = 0u64;

    while iterations.map_or(true, |n| completed < n) {
        let query = pool.with_connection(move |conn| {
            Box::pin(async move {
                let row: (DateTime<Utc>, String) =
                    sqlx::query_as("SELECT CURRENT_TIMESTAMP, 'worker_' || $1")
                        .bind(worker_id.to_string())
                        .fetch_one(conn)
                        .await?;
                Ok::<_, anyhow::Error>(row)
            })
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = query => match result {
                Ok((server_time, tag)) => tracing::info!(
                    worker = worker_id,
                    server_time = %server_time,
                    tag = %tag,
                    pool = %pool.status(),
                    "Query succeeded"
                ),
                Err(e) => tracing::error!(
                    worker = worker_id,
                    error = %e,
                    pool = %pool.status(),
                    "Query failed"
                ),
            },
        }
        completed += 1;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(worker = worker_id, completed, "Worker stopped");
}

/// Create a future that completes when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down workers");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down workers");
        }
    }
}
