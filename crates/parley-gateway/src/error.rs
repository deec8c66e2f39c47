//! Gateway errors and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_context::ContextError;
use parley_runtime::RuntimeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("invalid request body: {0}")]
    InvalidRequest(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// JSON body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Runtime(RuntimeError::Context(ContextError::EmptyConversation)) => {
                "empty_conversation"
            }
            Self::Runtime(RuntimeError::Context(ContextError::ContextOverflow { .. })) => {
                "context_overflow"
            }
            Self::Runtime(RuntimeError::Context(_)) => "context_error",
            Self::Runtime(RuntimeError::Backend(_)) => "backend_error",
            Self::Runtime(RuntimeError::BackendStalled { .. }) => "backend_stalled",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) => "config_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Runtime(RuntimeError::Context(ContextError::EmptyConversation))
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Runtime(RuntimeError::Context(ContextError::ContextOverflow { .. })) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::Runtime(RuntimeError::Backend(_) | RuntimeError::BackendStalled { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Runtime(RuntimeError::Context(_)) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use parley_runtime::BackendError;

    use super::*;

    #[test]
    fn context_errors_map_to_client_statuses() {
        let empty = GatewayError::from(RuntimeError::from(ContextError::EmptyConversation));
        let overflow = GatewayError::from(RuntimeError::from(ContextError::ContextOverflow {
            tokens: 90,
            budget: 50,
        }));

        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
        assert_eq!(empty.kind(), "empty_conversation");
        assert_eq!(overflow.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(overflow.kind(), "context_overflow");
    }

    #[test]
    fn backend_errors_map_to_bad_gateway() {
        let err = GatewayError::from(RuntimeError::from(BackendError::Transport(
            "connection refused".to_string(),
        )));

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
