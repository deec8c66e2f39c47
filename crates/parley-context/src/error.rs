//! Error types for context windowing

use thiserror::Error;

/// Context windowing error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("conversation has no turns")]
    EmptyConversation,

    #[error("context overflow: smallest window encodes to {tokens} tokens, budget is {budget}")]
    ContextOverflow { tokens: usize, budget: usize },

    #[error("invalid budget: reserving {reserved} tokens leaves no room in a {max_context}-token context")]
    InvalidBudget { max_context: usize, reserved: usize },

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("unknown chat mode: {0}")]
    UnknownChatMode(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

/// Result type for context operations
pub type ContextResult<T> = Result<T, ContextError>;
