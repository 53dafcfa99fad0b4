use std::sync::Arc;

use editor_proxy_mcp::{
    backend::{
        health::HealthMonitor,
        retry::RetryPolicy,
        transport::{BackendEndpoint, BackendTransport, HttpTransport},
    },
    build_app,
    catalog::Catalog,
    compatibility::CompatibilityChecker,
    config::Config,
    logging, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let catalog = Arc::new(Catalog::load(config.definitions_path.as_deref())?);
    info!(tools = catalog.tool_count(), "catalogue loaded");

    let endpoint = BackendEndpoint {
        host: config.backend_host.clone(),
        port: config.backend_port,
        timeout: config.backend_timeout,
        probe_interval: config.probe_interval,
    };
    let transport: Arc<dyn BackendTransport> = Arc::new(HttpTransport::new(&endpoint));
    let checker = Arc::new(CompatibilityChecker::new(
        Arc::clone(&catalog),
        Arc::clone(&transport),
    ));
    let health = Arc::new(HealthMonitor::new(
        Arc::clone(&transport),
        checker,
        &endpoint,
    ));
    let retry = RetryPolicy::from_config(&config);

    let bind_socket = config.bind_socket()?;
    let state = AppState::new(catalog, transport, Arc::clone(&health), retry);
    let app = build_app(state);

    health.start().await;

    let listener = tokio::net::TcpListener::bind(bind_socket).await?;
    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        backend = %endpoint.base_url(),
        "proxy starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The probe task must be cancelled and awaited before the process exits.
    health.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
