//! HTTP routes for Parley Gateway

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use parley_context::Conversation;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::metrics;
use crate::state::AppState;

/// Build the main router for the gateway
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/conversation", post(conversation_handler))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_handler() -> String {
    metrics::export()
}

/// Generate the next assistant turn and echo the conversation back with it
async fn conversation_handler(
    State(state): State<AppState>,
    payload: Result<Json<Conversation>, JsonRejection>,
) -> Result<Json<Conversation>, GatewayError> {
    let request_id = Uuid::new_v4();
    let conversation = match payload {
        Ok(Json(conversation)) => conversation,
        Err(rejection) => {
            let err = GatewayError::InvalidRequest(rejection.body_text());
            metrics::record_failure(err.kind());
            warn!(%request_id, error = %err, "rejected conversation body");
            return Err(err);
        }
    };
    let span = info_span!("conversation", %request_id, turns = conversation.len());

    let timer = metrics::GENERATION_LATENCY.start_timer();
    let result = state
        .responder
        .respond_and_append(conversation)
        .instrument(span)
        .await;
    timer.observe_duration();

    match result {
        Ok((conversation, reply)) => {
            metrics::record_reply(&reply);
            Ok(Json(conversation))
        }
        Err(err) => {
            let err = GatewayError::from(err);
            metrics::record_failure(err.kind());
            warn!(%request_id, error = %err, "conversation request failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use parley_context::{ByteTokenizer, ChatTemplate, ContextWindower, Turn};
    use parley_runtime::{ChatResponder, MockBackend, ResponderConfig, StreamStep};
    use tower::ServiceExt;

    use super::*;
    use crate::error::ErrorBody;

    fn state(backend: Arc<MockBackend>) -> AppState {
        let windower = ContextWindower::new(ChatTemplate::llama(), Arc::new(ByteTokenizer));
        let config = ResponderConfig {
            response_reserve: 64,
            ..ResponderConfig::default()
        };
        AppState::new(Arc::new(ChatResponder::new(backend, windower, config)))
    }

    fn post_json(body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/conversation")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = build_routes(state(Arc::new(MockBackend::new(512))));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn conversation_appends_assistant_reply() {
        let backend = Arc::new(MockBackend::new(512));
        backend.enqueue_stream(Ok(vec![StreamStep::text(" 2+2"), StreamStep::end(" is 4.")]));
        let app = build_routes(state(backend));

        let response = app
            .oneshot(post_json(&serde_json::json!({
                "system": "You are helpful.",
                "conversation": [{"role": "user", "message": "What is 2+2?"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let conversation: Conversation = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(conversation.system(), "You are helpful.");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last(), Some(&Turn::assistant("2+2 is 4.")));
    }

    #[tokio::test]
    async fn empty_conversation_is_bad_request() {
        let app = build_routes(state(Arc::new(MockBackend::new(512))));

        let response = app
            .oneshot(post_json(&serde_json::json!({"system": "s", "conversation": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "empty_conversation");
    }

    #[tokio::test]
    async fn unknown_role_is_bad_request_with_error_body() {
        let app = build_routes(state(Arc::new(MockBackend::new(512))));

        let response = app
            .oneshot(post_json(&serde_json::json!({
                "conversation": [{"role": "narrator", "message": "x"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "invalid_request");
        assert!(body.message.contains("narrator"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = build_routes(state(Arc::new(MockBackend::new(512))));
        let request = Request::builder()
            .method("POST")
            .uri("/conversation")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"conversation\": ["))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "invalid_request");
    }

    #[tokio::test]
    async fn oversize_turn_is_payload_too_large() {
        let app = build_routes(state(Arc::new(MockBackend::new(128))));

        let response = app
            .oneshot(post_json(&serde_json::json!({
                "conversation": [{"role": "user", "message": "x".repeat(500)}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_registry() {
        crate::metrics::init_metrics();
        let app = build_routes(state(Arc::new(MockBackend::new(512))));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("parley_build_info"));
    }
}
