//! Parley Context - conversation windowing for generation backends
//!
//! This crate provides:
//! - Conversation and turn types (the `/conversation` wire format)
//! - Chat prompt templates rendered from a structured turn context
//! - The tokenizer seam (byte-level by default, HuggingFace behind `token-counting`)
//! - Token budgets and the context windower that trims the oldest exchanges

pub mod context;
pub mod error;
pub mod template;
pub mod tokenizer;
pub mod window;
pub mod windower;

pub use context::{Conversation, Role, Turn};
pub use error::{ContextError, ContextResult};
pub use template::{ChatMode, ChatTemplate, Template, TurnContext};
pub use tokenizer::{ByteTokenizer, TokenId, Tokenizer};
#[cfg(feature = "token-counting")]
pub use tokenizer::HfTokenizer;
pub use window::{ContextWindow, PromptBudget, RenderedPrompt};
pub use windower::{build_prompt, ContextWindower};

/// Prelude for common imports
pub mod prelude {
    pub use crate::context::{Conversation, Role, Turn};
    pub use crate::error::{ContextError, ContextResult};
    pub use crate::template::{ChatMode, ChatTemplate};
    pub use crate::tokenizer::{ByteTokenizer, Tokenizer};
    pub use crate::window::{ContextWindow, PromptBudget, RenderedPrompt};
    pub use crate::windower::ContextWindower;
}
