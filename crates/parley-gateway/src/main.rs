//! Parley Gateway - entry point

use std::sync::Arc;

use clap::Parser;
use parley_gateway::{build_app, metrics, AppState, ServerConfig, GATEWAY_VERSION};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "parley_gateway=debug,parley_runtime=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();
    tracing::info!("Starting Parley Gateway v{}", GATEWAY_VERSION);
    tracing::info!(
        backend = %config.backend_url,
        mode = %config.mode,
        max_seq_len = config.max_seq_len,
        response_reserve = config.response_reserve,
        "configuration loaded"
    );

    metrics::init_metrics();

    // One backend handle for the whole process
    let responder = Arc::new(config.build_responder()?);
    let app = build_app(AppState::new(responder.clone()));

    tracing::info!("Listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    responder.shutdown().await?;
    tracing::info!("Gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
