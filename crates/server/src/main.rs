//! Server entry point.

use std::{process::ExitCode, time::Duration};

use outbox::PostgresOutboxStore;
use server::{Config, LogFormat, Storage};
use sqlx::postgres::PgPoolOptions;
use tokio::{signal, sync::watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long background tasks get to finish after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    let (log_level, log_format) = match &config {
        Ok(c) => (c.log_level.clone(), c.log_format),
        Err(_) => ("info".to_string(), LogFormat::Text),
    };
    init_tracing(&log_level, log_format);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    // 2. Install Prometheus metrics recorder
    let metrics_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to install Prometheus recorder");
            return ExitCode::FAILURE;
        }
    };

    // 3. Connect storage and run migrations
    let storage = match &config.database_url {
        Some(url) => {
            let pool = match PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
            {
                Ok(pool) => pool,
                Err(e) => {
                    tracing::error!(error = %e, "failed to connect to PostgreSQL");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = PostgresOutboxStore::new(pool.clone()).run_migrations().await {
                tracing::error!(error = %e, "failed to run migrations");
                return ExitCode::FAILURE;
            }
            Storage::Postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            Storage::InMemory
        }
    };

    // 4. Build application state and start background tasks
    let (state, background) = match server::build(&config, storage) {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(error = %e, "failed to build push provider");
            return ExitCode::FAILURE;
        }
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = background.spawn(shutdown_rx);

    // 5. Start server
    let app = server::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind address");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, storage = state.storage, "starting server");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "server error");
    }

    // 6. Drain the queue, stop background tasks and wait for them
    match state.queue.flush().await {
        Ok(flushed) => tracing::info!(flushed, "notification queue flushed"),
        Err(e) => tracing::warn!(error = %e, "notification queue flush failed"),
    }
    let _ = shutdown_tx.send(true);
    let joined = tokio::time::timeout(SHUTDOWN_GRACE, async {
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
    })
    .await;
    if joined.is_err() {
        tracing::warn!("background tasks did not stop in time");
    }

    tracing::info!("server shut down gracefully");
    if served.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
