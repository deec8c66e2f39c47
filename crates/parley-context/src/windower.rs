//! Context windower
//!
//! Selects the longest suffix of a conversation whose rendered prompt stays
//! under a [`PromptBudget`]. Trimming removes whole exchanges from the front
//! so a window never opens on an assistant reply, and the system preamble is
//! re-attached to whichever turn becomes first.

use std::sync::Arc;

use crate::context::{Conversation, Role, Turn};
use crate::error::{ContextError, ContextResult};
use crate::template::{ChatTemplate, TurnContext};
use crate::tokenizer::Tokenizer;
use crate::window::{PromptBudget, RenderedPrompt};

/// Build the prompt for `turns`, dropping the oldest exchanges until the
/// encoded prompt is strictly shorter than `budget`.
///
/// Fails with [`ContextError::EmptyConversation`] for an empty transcript and
/// with [`ContextError::ContextOverflow`] when even the smallest window does
/// not fit.
pub fn build_prompt(
    turns: &[Turn],
    system_preamble: &str,
    budget: PromptBudget,
    template: &ChatTemplate,
    tokenizer: &dyn Tokenizer,
) -> ContextResult<RenderedPrompt> {
    if turns.is_empty() {
        return Err(ContextError::EmptyConversation);
    }

    let mut start = 0;
    loop {
        let window = &turns[start..];
        let prompt = render_window(window, start, system_preamble, template, tokenizer)?;

        if budget.admits(prompt.len()) {
            return Ok(prompt);
        }

        let overflow = ContextError::ContextOverflow {
            tokens: prompt.len(),
            budget: budget.max_tokens(),
        };
        if window.len() <= 1 {
            return Err(overflow);
        }
        start = next_window_start(turns, start).ok_or(overflow)?;
    }
}

/// Drop one exchange; skip forward past any turn that cannot open a window.
fn next_window_start(turns: &[Turn], start: usize) -> Option<usize> {
    (start + 2..turns.len()).find(|&i| turns[i].role() == Role::User)
}

fn render_window(
    window: &[Turn],
    first_turn: usize,
    system_preamble: &str,
    template: &ChatTemplate,
    tokenizer: &dyn Tokenizer,
) -> ContextResult<RenderedPrompt> {
    let mut text = String::new();
    let mut tokens = Vec::new();

    for (i, turn) in window.iter().enumerate() {
        let rendered = template.render_turn(&TurnContext {
            role: turn.role(),
            text: turn.text(),
            is_first: i == 0,
            system: system_preamble,
        });
        tokens.extend(tokenizer.encode(&rendered, template.add_bos())?);
        text.push_str(&rendered);
    }

    Ok(RenderedPrompt {
        text,
        tokens,
        first_turn,
        turns_retained: window.len(),
    })
}

/// Template and tokenizer bound together for repeated windowing
#[derive(Clone)]
pub struct ContextWindower {
    template: ChatTemplate,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ContextWindower {
    pub fn new(template: ChatTemplate, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            template,
            tokenizer,
        }
    }

    pub fn template(&self) -> &ChatTemplate {
        &self.template
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    pub fn build_prompt(
        &self,
        conversation: &Conversation,
        budget: PromptBudget,
    ) -> ContextResult<RenderedPrompt> {
        build_prompt(
            conversation.turns(),
            conversation.system(),
            budget,
            &self.template,
            self.tokenizer.as_ref(),
        )
    }

    /// Recompute the prompt after the backend ran out of context space.
    ///
    /// The conversation is the one the stream started from; text generated so
    /// far stays with the caller and is not folded into the new prompt.
    pub fn rebuild_on_overflow(
        &self,
        conversation: &Conversation,
        budget: PromptBudget,
    ) -> ContextResult<RenderedPrompt> {
        self.build_prompt(conversation, budget)
    }
}

impl std::fmt::Debug for ContextWindower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextWindower")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}
