//! HTTP API server for course checkout.
//!
//! Provides the payment endpoints under `/api/v1/payment`, with structured
//! logging (tracing) and Prometheus metrics.

pub mod clients;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{
    InMemoryCatalogClient, InMemoryIdentityClient, InMemoryNotificationClient,
    InMemoryPaymentGateway, OrderOrchestrator,
};
use ledger::{InMemoryPaymentLedger, PaymentLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::ExposeSecret;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use clients::{
    HttpCatalogClient, HttpIdentityClient, HttpNotificationClient, RazorpayConfig,
    RazorpayGateway, ServiceEndpoint,
};
use config::Config;
use routes::payments::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let payments = Router::new()
        .route("/capturePayment", post(routes::payments::capture))
        .route("/verifyPayment", post(routes::payments::verify))
        .route(
            "/sendPaymentSuccessEmail",
            post(routes::payments::send_success_email),
        )
        .route("/paymentHistory", get(routes::payments::history))
        .route("/reconcile", post(routes::payments::reconcile))
        .route("/replay", post(routes::payments::replay));

    Router::new()
        .route("/health", get(routes::health::check))
        .nest("/api/v1/payment", payments)
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

fn app_state(orchestrator: OrderOrchestrator) -> Arc<AppState> {
    Arc::new(AppState {
        reconciler: orchestrator.reconciler(),
        orchestrator,
    })
}

/// Creates application state backed by the real collaborator services.
pub fn create_state(
    config: &Config,
    ledger: Arc<dyn PaymentLedger>,
) -> Result<Arc<AppState>, reqwest::Error> {
    let http = reqwest::Client::builder()
        .timeout(config.call_timeout)
        .build()?;
    let endpoint = |url: &str| {
        ServiceEndpoint::new(http.clone(), url).with_token(config.service_token.clone())
    };

    let gateway = RazorpayGateway::new(
        RazorpayConfig::new(
            config.razorpay_key_id.clone(),
            config.razorpay_secret.clone(),
        )
        .with_base_url(config.razorpay_base_url.clone()),
        http.clone(),
    );

    let orchestrator = OrderOrchestrator::new(
        config.checkout(),
        ledger,
        Arc::new(HttpCatalogClient::new(endpoint(&config.course_service_url))),
        Arc::new(HttpIdentityClient::new(
            endpoint(&config.auth_service_url),
            endpoint(&config.user_service_url),
        )),
        Arc::new(HttpNotificationClient::new(endpoint(
            &config.notification_service_url,
        ))),
        Arc::new(gateway),
    );
    Ok(app_state(orchestrator))
}

/// Handles to the in-memory collaborators behind [`create_in_memory_state`].
#[derive(Clone)]
pub struct InMemoryBackends {
    pub ledger: InMemoryPaymentLedger,
    pub catalog: InMemoryCatalogClient,
    pub identity: InMemoryIdentityClient,
    pub notifier: InMemoryNotificationClient,
    pub gateway: InMemoryPaymentGateway,
}

/// Creates application state with in-memory ledger and collaborators.
pub fn create_in_memory_state(
    config: checkout::CheckoutConfig,
) -> (Arc<AppState>, InMemoryBackends) {
    let backends = InMemoryBackends {
        ledger: InMemoryPaymentLedger::new(),
        catalog: InMemoryCatalogClient::new(),
        identity: InMemoryIdentityClient::new(),
        notifier: InMemoryNotificationClient::new(),
        gateway: InMemoryPaymentGateway::new(config.signing_secret.expose_secret().clone()),
    };

    let orchestrator = OrderOrchestrator::new(
        config,
        Arc::new(backends.ledger.clone()),
        Arc::new(backends.catalog.clone()),
        Arc::new(backends.identity.clone()),
        Arc::new(backends.notifier.clone()),
        Arc::new(backends.gateway.clone()),
    );
    (app_state(orchestrator), backends)
}
