use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use parley_context::{ByteTokenizer, ChatTemplate, ContextWindower, Conversation, Role, Turn};
use parley_gateway::{build_app, AppState};
use parley_runtime::{ChatResponder, MockBackend, ResponderConfig, StreamStep};
use tower::ServiceExt;

fn app(backend: Arc<MockBackend>) -> axum::Router {
    let windower = ContextWindower::new(ChatTemplate::raw("User", "Chatbort"), Arc::new(ByteTokenizer));
    let config = ResponderConfig {
        response_reserve: 16,
        ..ResponderConfig::default()
    };
    build_app(AppState::new(Arc::new(ChatResponder::new(
        backend, windower, config,
    ))))
}

async fn post(app: axum::Router, conversation: &Conversation) -> (StatusCode, Conversation) {
    let request = Request::builder()
        .method("POST")
        .uri("/conversation")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(conversation).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or_default())
}

#[tokio::test]
async fn multi_turn_conversation_trims_history_and_recovers_from_full_context() {
    // 96-token context, 16 reserved: prompts must stay under 80 bytes.
    let backend = Arc::new(MockBackend::new(96));
    backend.enqueue_stream(Ok(vec![StreamStep::end(" Hello! How can I help?")]));
    backend.enqueue_stream(Ok(vec![
        StreamStep::text(" Two plus two"),
        StreamStep::context_full(" is"),
    ]));
    backend.enqueue_stream(Ok(vec![StreamStep::text(" four."), StreamStep::text("\nUser:")]));

    let mut conversation = Conversation::new(Some("Be brief.".to_string()));
    conversation.push(Turn::user("Hi"));

    let (status, conversation) = post(app(backend.clone()), &conversation).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.turns()[1].text(), "Hello! How can I help?");

    let mut conversation = conversation;
    conversation.push(Turn::user("What is two plus two, in words please?"));
    let (status, conversation) = post(app(backend.clone()), &conversation).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation.len(), 4);
    let reply = conversation.last().unwrap();
    assert_eq!(reply.role(), Role::Assistant);
    assert_eq!(reply.text(), "Two plus two is four.");

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 3);
    // Second request no longer fits whole, so the first exchange is dropped
    // and the preamble moves onto the newest question.
    assert_eq!(prompts[1].first_turn, 2);
    assert!(prompts[1].text.starts_with("Be brief.\nUser: What is two plus two"));
    assert!(prompts[1].len() < 80);
    // The rebuild after the full-context signal reuses the same window.
    assert_eq!(prompts[1], prompts[2]);
}

#[tokio::test]
async fn backend_failure_is_bad_gateway() {
    let backend = Arc::new(MockBackend::new(96));
    let mut conversation = Conversation::default();
    conversation.push(Turn::user("Hi"));

    let (status, _) = post(app(backend), &conversation).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
