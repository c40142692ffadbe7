//! HTTP API for the tutoring marketplace.
//!
//! Exposes the request/proposal/session lifecycle and the payment endpoints
//! (checkout, webhook, verify, status, reconcile), with structured logging
//! (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use common::Currency;
use domain::{InMemoryOrderRepository, OrderRepository, OrderService, PostgresOrderRepository};
use ledger::{InMemoryLedger, PostgresLedger, TransactionLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use settlement::{
    CoordinatorConfig, GatewayError, InMemoryGateway, PaymentCoordinator, PaystackClient,
    SharedGateway, SignatureVerifier,
};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::{Config, ConfigError};

/// Storage backends the application runs on.
pub trait Stack: Send + Sync + 'static {
    const NAME: &'static str;

    type Ledger: TransactionLedger + Clone + 'static;
    type Orders: OrderRepository + Clone + 'static;
}

/// Everything in process memory. Lost on restart.
pub struct MemoryStack;

impl Stack for MemoryStack {
    const NAME: &'static str = "memory";
    type Ledger = InMemoryLedger;
    type Orders = InMemoryOrderRepository;
}

pub struct PostgresStack;

impl Stack for PostgresStack {
    const NAME: &'static str = "postgres";
    type Ledger = PostgresLedger;
    type Orders = PostgresOrderRepository;
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: Stack> {
    pub orders: OrderService<S::Orders>,
    pub payments: PaymentCoordinator<S::Ledger, S::Orders, SharedGateway>,

    /// Currency assumed for quotes that do not name one.
    pub currency: Currency,
}

impl<S: Stack> AppState<S> {
    pub fn new(
        ledger: S::Ledger,
        orders: S::Orders,
        gateway: SharedGateway,
        verifier: SignatureVerifier,
        config: CoordinatorConfig,
    ) -> Self {
        let currency = config.checkout.currency.clone();
        Self {
            orders: OrderService::new(orders.clone()),
            payments: PaymentCoordinator::new(ledger, orders, gateway, verifier, config),
            currency,
        }
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway client: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Builds the payment gateway client.
///
/// Without a secret key the server runs against an in-memory gateway that
/// leaves every charge pending, and rejects every webhook.
pub fn create_gateway(config: &Config) -> Result<SharedGateway, StartupError> {
    if config.paystack_secret_key.is_empty() {
        tracing::warn!("PAYSTACK_SECRET_KEY is not set, using the in-memory gateway");
        return Ok(Arc::new(InMemoryGateway::new()));
    }
    Ok(Arc::new(PaystackClient::new(config.paystack())?))
}

/// Creates application state over the given stores.
pub fn create_state<S: Stack>(
    config: &Config,
    ledger: S::Ledger,
    orders: S::Orders,
    gateway: SharedGateway,
) -> Result<Arc<AppState<S>>, StartupError> {
    let verifier = SignatureVerifier::new(&config.paystack_secret_key);
    Ok(Arc::new(AppState::new(
        ledger,
        orders,
        gateway,
        verifier,
        config.coordinator()?,
    )))
}

/// Creates in-memory application state.
pub fn create_memory_state(
    config: &Config,
    gateway: SharedGateway,
) -> Result<Arc<AppState<MemoryStack>>, StartupError> {
    create_state::<MemoryStack>(
        config,
        InMemoryLedger::new(),
        InMemoryOrderRepository::new(),
        gateway,
    )
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Stack>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    use routes::{payments, proposals, requests, sessions};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/requests", post(requests::open::<S>))
        .route("/requests/{id}", get(requests::get::<S>))
        .route("/requests/{id}/invitations", post(requests::invite::<S>))
        .route("/requests/{id}/proposals", get(requests::proposals::<S>))
        .route("/requests/{id}/accept-match", post(requests::accept_match::<S>))
        .route("/requests/{id}/decline-match", post(requests::decline_match::<S>))
        .route("/requests/{id}/cancel", post(requests::cancel::<S>))
        .route("/proposals/{id}/quote", put(proposals::quote::<S>))
        .route("/proposals/{id}/accept", post(proposals::accept::<S>))
        .route("/sessions/{id}", get(sessions::get::<S>))
        .route("/sessions/{id}/schedule", post(sessions::schedule::<S>))
        .route("/sessions/{id}/complete", post(sessions::complete::<S>))
        .route("/payments/checkout", post(payments::checkout::<S>))
        .route("/payments/webhook", post(payments::webhook::<S>))
        .route("/payments/verify", get(payments::verify::<S>))
        .route("/payments/status", get(payments::status::<S>))
        .route("/payments/reconcile", post(payments::reconcile::<S>))
        .route("/admin/payments/stale", get(payments::stale::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
