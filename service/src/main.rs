//! Bilheteria HTTP server.

use bilheteria::{AppState, BoxOfficeSettings, Config, ExpirySweeper, build_router, metrics, payment_gateway};
use bilheteria_core::code::RandomCodeGenerator;
use bilheteria_core::environment::SystemClock;
use bilheteria_postgres::PostgresStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bilheteria=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Bilheteria");

    let config = Config::from_env();
    info!(
        bind = %config.bind_address(),
        payment_provider = ?config.payment.provider,
        max_tickets_per_order = config.sales.max_tickets_per_order,
        reservation_ttl_minutes = config.sales.reservation_ttl_minutes,
        "Configuration loaded"
    );
    if config.pix.key.is_empty() {
        warn!("PIX_KEY is empty; BR Codes will not be payable");
    }

    metrics::install_exporter(&config.metrics_address())?;

    info!("Connecting to database...");
    let store = PostgresStore::connect(&config.database.url, &config.pool_settings()).await?;
    store.migrate().await?;
    info!("Database ready");

    let gateway = payment_gateway::from_config(&config.payment)?;

    let state = AppState::new(
        Arc::new(store),
        gateway,
        Arc::new(SystemClock),
        Arc::new(RandomCodeGenerator),
        BoxOfficeSettings::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(
        state.ledger.clone(),
        Duration::from_secs(config.sales.expiry_sweep_interval),
    )
    .spawn(shutdown_rx);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout), sweeper)
        .await
        .is_err()
    {
        warn!("Expiry sweeper did not stop in time");
    }

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(error = %error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "Failed to install SIGTERM handler");
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
