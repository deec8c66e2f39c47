//! Parley Gateway - HTTP front-end
//!
//! This crate serves the chat endpoint:
//! - `POST /conversation` windows the transcript and appends a generated reply
//! - `GET /health` liveness probe
//! - `GET /metrics` Prometheus exposition

pub mod config;
pub mod error;
pub mod metrics;
pub mod router;
pub mod state;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use error::{ErrorBody, GatewayError};
pub use router::build_routes;
pub use state::AppState;

/// Gateway version
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Routes plus the tracing and CORS layers
pub fn build_app(state: AppState) -> Router {
    build_routes(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
    )
}
