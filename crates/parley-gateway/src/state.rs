//! Shared handler state

use std::sync::Arc;

use parley_runtime::ChatResponder;

#[derive(Clone)]
pub struct AppState {
    pub responder: Arc<ChatResponder>,
}

impl AppState {
    pub fn new(responder: Arc<ChatResponder>) -> Self {
        Self { responder }
    }
}
