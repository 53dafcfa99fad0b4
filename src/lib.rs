use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod backend;
pub mod catalog;
pub mod compatibility;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;

use backend::health::HealthMonitor;
use backend::retry::RetryPolicy;
use backend::transport::BackendTransport;
use catalog::Catalog;
use dispatch::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub dispatcher: Arc<Dispatcher>,
    pub health: Arc<HealthMonitor>,
}

impl AppState {
    pub fn new(
        catalog: Arc<Catalog>,
        transport: Arc<dyn BackendTransport>,
        health: Arc<HealthMonitor>,
        retry: RetryPolicy,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&catalog),
            transport,
            Arc::clone(&health),
            retry,
        ));
        Self {
            catalog,
            dispatcher,
            health,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route("/mcp", post(http::handlers::mcp_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
