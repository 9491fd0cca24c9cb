//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use ledger::{InMemoryPaymentLedger, PaymentLedger, PostgresPaymentLedger};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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

async fn open_ledger(config: &Config) -> Arc<dyn PaymentLedger> {
    let Some(url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory ledger");
        return Arc::new(InMemoryPaymentLedger::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to database");
    let ledger = PostgresPaymentLedger::new(pool);
    ledger
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to PostgreSQL ledger");
    Arc::new(ledger)
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = Config::from_env().expect("invalid configuration");

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Open the ledger and wire collaborators
    let ledger = open_ledger(&config).await;
    let state = api::create_state(&config, ledger).expect("failed to build HTTP client");

    // 5. Start the enrollment reconciler
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let reconciler = match config.reconcile_interval {
        Some(interval) => {
            tracing::info!(?interval, "starting enrollment reconciler");
            Some(tokio::spawn(state.reconciler.clone().run(interval, async move {
                let _ = stop_rx.changed().await;
            })))
        }
        None => None,
    };

    // 6. Start server
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = stop_tx.send(true);
    if let Some(handle) = reconciler {
        let _ = handle.await;
    }

    tracing::info!("server shut down gracefully");
}
