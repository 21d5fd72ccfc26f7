//! Questline HTTP server.
//!
//! Exposes the task engine over REST, WebSocket batch ingestion, and SSE
//! progress subscriptions.

mod api;
mod config;
mod state;
mod wire;

use crate::config::Config;
use crate::state::AppState;
use questline_core::ingest::EventStreamProcessor;
use questline_core::ports::{AtomicSequence, SystemClock};
use questline_core::service::TaskService;
use questline_postgres::{
    PostgresProgressRepository, PostgresTaskRepository, PostgresUnitOfWorkManager,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "questline=info,questline_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Questline server");

    let config = Config::from_env();
    info!(bind_addr = %config.bind_addr, "Configuration loaded");

    let pool = questline_postgres::connect(&config.database_url).await?;
    questline_postgres::run_migrations(&pool).await?;

    let service = Arc::new(TaskService::new(
        Arc::new(PostgresTaskRepository::new(pool.clone())),
        Arc::new(PostgresProgressRepository::new(pool.clone())),
        Arc::new(PostgresUnitOfWorkManager::new(pool)),
        Arc::new(SystemClock),
        config.stream,
    )?);
    let processor = Arc::new(EventStreamProcessor::new(
        Arc::clone(&service),
        Arc::new(AtomicSequence::new()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = api::build_router(AppState {
        service,
        processor,
        shutdown: shutdown_rx,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM and flag open stream sessions to cancel.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
}
