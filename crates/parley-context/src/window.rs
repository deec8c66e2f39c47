//! Context window sizing and rendered prompts

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ContextResult};
use crate::tokenizer::TokenId;

/// Context window configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextWindow {
    /// Maximum sequence length of the backend (prompt plus reply)
    pub max_context: usize,
    /// Space kept free for the reply
    pub reserved_response: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            max_context: 4096,
            reserved_response: 250,
        }
    }
}

impl ContextWindow {
    pub fn new(max_context: usize, reserved_response: usize) -> Self {
        Self {
            max_context,
            reserved_response,
        }
    }

    pub fn available_tokens(&self) -> usize {
        self.max_context.saturating_sub(self.reserved_response)
    }

    pub fn budget(&self) -> ContextResult<PromptBudget> {
        PromptBudget::from_context(self.max_context, self.reserved_response)
    }
}

/// Upper bound (exclusive) on the encoded length of a prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PromptBudget {
    max_tokens: usize,
}

impl PromptBudget {
    pub fn new(max_tokens: usize) -> ContextResult<Self> {
        if max_tokens == 0 {
            return Err(ContextError::InvalidBudget {
                max_context: 0,
                reserved: 0,
            });
        }
        Ok(Self { max_tokens })
    }

    pub fn from_context(max_context: usize, reserved_response: usize) -> ContextResult<Self> {
        let max_tokens = max_context.saturating_sub(reserved_response);
        if max_tokens == 0 {
            return Err(ContextError::InvalidBudget {
                max_context,
                reserved: reserved_response,
            });
        }
        Ok(Self { max_tokens })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// A prompt fits only when it is strictly shorter than the budget.
    pub fn admits(&self, len: usize) -> bool {
        len < self.max_tokens
    }
}

/// The prompt submitted to a backend for one generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    pub tokens: Vec<TokenId>,
    /// Index of the first retained turn in the source conversation
    pub first_turn: usize,
    /// Number of turns in the rendered window
    pub turns_retained: usize,
}

impl RenderedPrompt {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn turns_dropped(&self) -> usize {
        self.first_turn
    }
}
