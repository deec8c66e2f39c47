//! Chat responder
//!
//! Drives one reply: windows the conversation, streams from the backend,
//! rebuilds the prompt whenever the backend runs out of context space, and
//! stops on end-of-sequence, a stop string, or the response token limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parley_context::{
    ContextError, ContextWindow, ContextWindower, Conversation, PromptBudget, Turn,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{BackendError, GenerationBackend, SamplingSettings, StreamStep};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("backend reported a full context {rebuilds} times in a row without progress")]
    BackendStalled { rebuilds: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    pub max_response_tokens: usize,
    /// Context space kept free for the reply
    pub response_reserve: usize,
    pub max_consecutive_rebuilds: usize,
    pub sampling: SamplingSettings,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            max_response_tokens: 1000,
            response_reserve: 250,
            max_consecutive_rebuilds: 3,
            sampling: SamplingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndOfSequence,
    StopString,
    MaxTokens,
}

/// A generated assistant turn plus generation accounting
#[derive(Debug, Clone)]
pub struct Reply {
    pub turn: Turn,
    pub response_tokens: usize,
    pub prompt_tokens: usize,
    pub turns_dropped: usize,
    pub rebuilds: usize,
    pub finish: FinishReason,
    pub elapsed: Duration,
}

impl Reply {
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.response_tokens as f64 / secs
        } else {
            0.0
        }
    }
}

/// Single-model chat front-end.
///
/// The backend holds one context buffer, so replies are generated one at a
/// time; concurrent callers queue on `in_flight`.
pub struct ChatResponder {
    backend: Arc<dyn GenerationBackend>,
    windower: ContextWindower,
    config: ResponderConfig,
    in_flight: Mutex<()>,
}

impl ChatResponder {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        windower: ContextWindower,
        config: ResponderConfig,
    ) -> Self {
        Self {
            backend,
            windower,
            config,
            in_flight: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    pub fn context_window(&self) -> ContextWindow {
        ContextWindow::new(self.backend.max_seq_len(), self.config.response_reserve)
    }

    pub fn budget(&self) -> Result<PromptBudget, RuntimeError> {
        Ok(self.context_window().budget()?)
    }

    /// Generate the next assistant turn for `conversation`.
    pub async fn respond(&self, conversation: &Conversation) -> Result<Reply, RuntimeError> {
        let _guard = self.in_flight.lock().await;

        let budget = self.budget()?;
        let prompt = self.windower.build_prompt(conversation, budget)?;
        let prompt_tokens = prompt.len();
        let turns_dropped = prompt.turns_dropped();
        debug!(
            backend = self.backend.name(),
            prompt_tokens,
            turns_dropped,
            budget = budget.max_tokens(),
            "prompt windowed"
        );

        let started = Instant::now();
        let mut stream = self
            .backend
            .begin_stream(&prompt, &self.config.sampling)
            .await?;

        let stop_strings = self.windower.template().stop_strings();
        let mut text = String::new();
        let mut response_tokens = 0;
        let mut rebuilds = 0;
        let mut consecutive_rebuilds = 0;

        let finish = loop {
            let Some(step) = stream.next().await else {
                break FinishReason::EndOfSequence;
            };
            let StreamStep {
                text: chunk,
                end_of_sequence,
                context_full,
            } = step?;

            let chunk = if text.is_empty() {
                chunk.trim_start()
            } else {
                chunk.as_str()
            };
            text.push_str(chunk);

            if let Some(cut) = find_stop(&text, stop_strings) {
                text.truncate(cut);
                text.truncate(text.trim_end().len());
                break FinishReason::StopString;
            }

            if context_full {
                consecutive_rebuilds += 1;
                if consecutive_rebuilds > self.config.max_consecutive_rebuilds {
                    warn!(
                        rebuilds = consecutive_rebuilds,
                        "backend made no progress after rebuild"
                    );
                    return Err(RuntimeError::BackendStalled {
                        rebuilds: consecutive_rebuilds,
                    });
                }
                rebuilds += 1;
                let rebuilt = self.windower.rebuild_on_overflow(conversation, budget)?;
                debug!(
                    rebuilds,
                    prompt_tokens = rebuilt.len(),
                    response_tokens,
                    "context full, restarting stream"
                );
                stream = self
                    .backend
                    .begin_stream(&rebuilt, &self.config.sampling)
                    .await?;
            } else {
                consecutive_rebuilds = 0;
            }

            // The response budget spans rebuilds.
            response_tokens += 1;
            if response_tokens >= self.config.max_response_tokens {
                break FinishReason::MaxTokens;
            }

            if end_of_sequence {
                break FinishReason::EndOfSequence;
            }
        };

        let reply = Reply {
            turn: Turn::assistant(text),
            response_tokens,
            prompt_tokens,
            turns_dropped,
            rebuilds,
            finish,
            elapsed: started.elapsed(),
        };
        info!(
            backend = self.backend.name(),
            response_tokens = reply.response_tokens,
            rebuilds = reply.rebuilds,
            finish = ?reply.finish,
            tokens_per_second = reply.tokens_per_second(),
            "reply generated"
        );

        Ok(reply)
    }

    /// Generate a reply and return the conversation with it appended.
    pub async fn respond_and_append(
        &self,
        mut conversation: Conversation,
    ) -> Result<(Conversation, Reply), RuntimeError> {
        let reply = self.respond(&conversation).await?;
        conversation.push(reply.turn.clone());
        Ok((conversation, reply))
    }

    /// Release the backend. Call once at process stop.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        info!(backend = self.backend.name(), "shutting down backend");
        self.backend.shutdown().await?;
        Ok(())
    }
}

fn find_stop(text: &str, stop_strings: &[String]) -> Option<usize> {
    stop_strings
        .iter()
        .filter_map(|stop| text.find(stop.as_str()))
        .min()
}
