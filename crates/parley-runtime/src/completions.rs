//! OpenAI-compatible completions backend
//!
//! Streams from a `/v1/completions` endpoint (vLLM, llama.cpp server,
//! text-generation-inference) over server-sent events. Each request asks for
//! exactly the context space left after the prompt, so a `length` finish
//! means the backend's context buffer is full.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parley_context::RenderedPrompt;
use reqwest::Client;
use reqwest_eventsource::{retry::Never, Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{BackendError, GenerationBackend, SamplingSettings, StreamStep, TokenStream};

const DONE_SENTINEL: &str = "[DONE]";
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct CompletionsBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: Option<String>,
    max_seq_len: usize,
    /// Longest wait for the next stream event before the reply is abandoned
    idle_timeout: Duration,
}

impl CompletionsBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: Option<String>,
        max_seq_len: usize,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            model,
            max_seq_len,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request_body(&self, prompt: &RenderedPrompt, settings: &SamplingSettings) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            prompt: prompt.text.clone(),
            max_tokens: self.max_seq_len.saturating_sub(prompt.len()).max(1),
            stream: true,
            temperature: settings.temperature,
            top_k: settings.top_k,
            top_p: settings.top_p,
            typical_p: settings.typical,
            repetition_penalty: settings.repetition_penalty,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    prompt: String,
    max_tokens: usize,
    stream: bool,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    typical_p: f32,
    repetition_penalty: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
    finish_reason: Option<String>,
}

fn parse_step(data: &str) -> Result<StreamStep, BackendError> {
    let chunk: CompletionChunk =
        serde_json::from_str(data).map_err(|e| BackendError::Decode(e.to_string()))?;
    let choice = chunk
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Decode("completion chunk has no choices".to_string()))?;

    Ok(match choice.finish_reason.as_deref() {
        Some("length") => StreamStep::context_full(choice.text),
        Some(_) => StreamStep::end(choice.text),
        None => StreamStep::text(choice.text),
    })
}

async fn map_stream_error(err: reqwest_eventsource::Error) -> BackendError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            BackendError::HttpStatus {
                status: status.as_u16(),
                body,
            }
        }
        reqwest_eventsource::Error::InvalidContentType(content_type, _) => BackendError::Decode(
            format!("unexpected content type {content_type:?}, expected text/event-stream"),
        ),
        reqwest_eventsource::Error::Transport(e) => BackendError::Transport(e.to_string()),
        other => BackendError::Decode(other.to_string()),
    }
}

#[async_trait]
impl GenerationBackend for CompletionsBackend {
    fn name(&self) -> &'static str {
        "completions"
    }

    fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    async fn begin_stream(
        &self,
        prompt: &RenderedPrompt,
        settings: &SamplingSettings,
    ) -> Result<TokenStream, BackendError> {
        let body = self.request_body(prompt, settings);
        debug!(
            prompt_tokens = prompt.len(),
            max_tokens = body.max_tokens,
            "starting completion stream"
        );

        let mut request = self.client.post(self.endpoint("/completions")).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let mut source =
            EventSource::new(request).map_err(|e| BackendError::Transport(e.to_string()))?;
        source.set_retry_policy(Box::new(Never));

        let idle_timeout = self.idle_timeout;
        let steps = stream::unfold(Some(source), move |state| async move {
            let mut source = state?;
            loop {
                let Ok(event) = tokio::time::timeout(idle_timeout, source.next()).await else {
                    source.close();
                    warn!(?idle_timeout, "completion stream went idle");
                    return Some((
                        Err(BackendError::Timeout {
                            after_ms: u64::try_from(idle_timeout.as_millis()).unwrap_or(u64::MAX),
                        }),
                        None,
                    ));
                };
                match event {
                    None => return None,
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        if message.data.trim() == DONE_SENTINEL {
                            source.close();
                            return None;
                        }
                        return match parse_step(&message.data) {
                            Ok(step) => Some((Ok(step), Some(source))),
                            Err(e) => {
                                source.close();
                                Some((Err(e), None))
                            }
                        };
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                        source.close();
                        return None;
                    }
                    Some(Err(err)) => {
                        source.close();
                        let err = map_stream_error(err).await;
                        warn!(error = %err, "completion stream failed");
                        return Some((Err(err), None));
                    }
                }
            }
        });

        Ok(Box::pin(steps))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use httpmock::prelude::*;
    use parley_context::RenderedPrompt;
    use serde_json::json;

    use super::*;

    fn prompt(len: usize) -> RenderedPrompt {
        RenderedPrompt {
            text: "[INST] hi [/INST]".to_string(),
            tokens: vec![0; len],
            first_turn: 0,
            turns_retained: 1,
        }
    }

    fn sse(events: &[serde_json::Value]) -> String {
        let mut body: String = events
            .iter()
            .map(|event| format!("data: {event}\n\n"))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn collect(stream: TokenStream) -> Vec<Result<StreamStep, BackendError>> {
        stream.collect().await
    }

    #[test]
    fn endpoint_building() {
        let backend = CompletionsBackend::new("http://localhost:8000/v1/", None, 4096).unwrap();
        assert_eq!(
            backend.endpoint("/completions"),
            "http://localhost:8000/v1/completions"
        );
    }

    #[test]
    fn request_asks_for_remaining_context_space() {
        let backend = CompletionsBackend::new("http://localhost:8000/v1", None, 100).unwrap();
        let body = backend.request_body(&prompt(60), &SamplingSettings::default());

        assert_eq!(body.max_tokens, 40);
        assert!(body.stream);
        assert_eq!(body.top_k, 50);
    }

    #[test]
    fn finish_reasons_map_to_step_flags() {
        let length = parse_step(r#"{"choices":[{"text":"a","finish_reason":"length"}]}"#).unwrap();
        let stop = parse_step(r#"{"choices":[{"text":"b","finish_reason":"stop"}]}"#).unwrap();
        let more = parse_step(r#"{"choices":[{"text":"c","finish_reason":null}]}"#).unwrap();

        assert_eq!(length, StreamStep::context_full("a"));
        assert_eq!(stop, StreamStep::end("b"));
        assert_eq!(more, StreamStep::text("c"));
        assert!(matches!(
            parse_step(r#"{"choices":[]}"#),
            Err(BackendError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn streams_completion_chunks() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/completions")
                    .header("authorization", "Bearer test-key");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(sse(&[
                        json!({"choices": [{"text": " Hello", "finish_reason": null}]}),
                        json!({"choices": [{"text": " there", "finish_reason": "stop"}]}),
                    ]));
            })
            .await;

        let backend = CompletionsBackend::new(format!("{}/v1", server.base_url()), None, 100)
            .unwrap()
            .with_api_key(Some("test-key".to_string()));
        let stream = backend
            .begin_stream(&prompt(10), &SamplingSettings::default())
            .await
            .unwrap();
        let steps: Vec<StreamStep> = collect(stream)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            steps,
            vec![StreamStep::text(" Hello"), StreamStep::end(" there")]
        );
    }

    #[tokio::test]
    async fn stalled_backend_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .delay(Duration::from_secs(2))
                    .body(sse(&[]));
            })
            .await;

        let backend = CompletionsBackend::new(format!("{}/v1", server.base_url()), None, 100)
            .unwrap()
            .with_idle_timeout(Duration::from_millis(100));
        let stream = backend
            .begin_stream(&prompt(10), &SamplingSettings::default())
            .await
            .unwrap();
        let steps = collect(stream).await;

        assert_eq!(steps, vec![Err(BackendError::Timeout { after_ms: 100 })]);
    }

    #[tokio::test]
    async fn surfaces_http_status_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/completions");
                then.status(503).body("model loading");
            })
            .await;

        let backend =
            CompletionsBackend::new(format!("{}/v1", server.base_url()), None, 100).unwrap();
        let stream = backend
            .begin_stream(&prompt(10), &SamplingSettings::default())
            .await
            .unwrap();
        let steps = collect(stream).await;

        assert_eq!(steps.len(), 1);
        match &steps[0] {
            Err(BackendError::HttpStatus { status, body }) => {
                assert_eq!(*status, 503);
                assert!(body.contains("model loading"));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }
}
