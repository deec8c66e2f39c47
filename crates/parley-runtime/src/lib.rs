//! Runtime abstractions for generation backends.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use parley_context::RenderedPrompt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod completions;
pub mod responder;

pub use completions::CompletionsBackend;
pub use responder::{ChatResponder, FinishReason, Reply, ResponderConfig, RuntimeError};

/// Sampler configuration, forwarded to the backend untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingSettings {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub typical: f32,
    pub repetition_penalty: f32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            temperature: 0.95,
            top_k: 50,
            top_p: 0.8,
            typical: 0.0,
            repetition_penalty: 1.1,
        }
    }
}

/// One step of a generation stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStep {
    pub text: String,
    pub end_of_sequence: bool,
    /// The backend has no room left for further tokens
    pub context_full: bool,
}

impl StreamStep {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn end(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            end_of_sequence: true,
            context_full: false,
        }
    }

    pub fn context_full(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            end_of_sequence: false,
            context_full: true,
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamStep, BackendError>> + Send>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("mock backend has no queued stream")]
    MockQueueEmpty,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no stream event from backend within {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("backend error: {0}")]
    Message(String),
}

/// A text-generation engine holding a fixed-size context buffer.
///
/// Handles are constructed once at process start, shared behind an `Arc`, and
/// released with [`GenerationBackend::shutdown`] at process stop.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Maximum sequence length, prompt plus generated tokens.
    fn max_seq_len(&self) -> usize;

    async fn begin_stream(
        &self,
        prompt: &RenderedPrompt,
        settings: &SamplingSettings,
    ) -> Result<TokenStream, BackendError>;

    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockBackend {
    max_seq_len: usize,
    stream_queue: Mutex<VecDeque<Result<Vec<StreamStep>, BackendError>>>,
    prompts: Mutex<Vec<RenderedPrompt>>,
}

impl MockBackend {
    pub fn new(max_seq_len: usize) -> Self {
        Self {
            max_seq_len,
            stream_queue: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue_stream(&self, result: Result<Vec<StreamStep>, BackendError>) {
        self.stream_queue
            .lock()
            .expect("mock stream queue poisoned")
            .push_back(result);
    }

    /// Every prompt passed to `begin_stream`, in call order
    pub fn prompts(&self) -> Vec<RenderedPrompt> {
        self.prompts.lock().expect("mock prompt log poisoned").clone()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    async fn begin_stream(
        &self,
        prompt: &RenderedPrompt,
        _settings: &SamplingSettings,
    ) -> Result<TokenStream, BackendError> {
        self.prompts
            .lock()
            .expect("mock prompt log poisoned")
            .push(prompt.clone());

        let next = self
            .stream_queue
            .lock()
            .expect("mock stream queue poisoned")
            .pop_front()
            .unwrap_or(Err(BackendError::MockQueueEmpty))?;

        Ok(Box::pin(stream::iter(next.into_iter().map(Ok))))
    }
}
