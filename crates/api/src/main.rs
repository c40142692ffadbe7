//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, PostgresStack, Stack, StartupError};
use domain::PostgresOrderRepository;
use ledger::PostgresLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (json, text) = match config.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

async fn serve<S: Stack>(
    config: &Config,
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> std::io::Result<()> {
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn run(
    config: Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = api::create_gateway(&config)?;

    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .map_err(StartupError::from)?;
            let ledger = PostgresLedger::new(pool.clone());
            ledger.run_migrations().await.map_err(StartupError::from)?;
            tracing::info!("connected to PostgreSQL, migrations applied");

            let orders = PostgresOrderRepository::new(pool);
            let state = api::create_state::<PostgresStack>(&config, ledger, orders, gateway)?;
            serve(&config, state, metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, running on in-memory stores");
            let state = api::create_memory_state(&config, gateway)?;
            serve(&config, state, metrics_handle).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = match metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
    {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to install Prometheus recorder");
            std::process::exit(1);
        }
    };

    // 3. Wire stores, gateway and routes, then serve until shutdown
    if let Err(e) = run(config, metrics_handle).await {
        tracing::error!(error = %e, "server exited with an error");
        std::process::exit(1);
    }

    tracing::info!("server shut down gracefully");
}
