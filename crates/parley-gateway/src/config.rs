//! Gateway configuration
//!
//! Every option can be given on the command line or through a `PARLEY_*`
//! environment variable (a `.env` file is loaded at start).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parley_context::{ByteTokenizer, ChatMode, ChatTemplate, ContextWindower, Tokenizer};
use parley_runtime::{
    ChatResponder, CompletionsBackend, GenerationBackend, ResponderConfig, RuntimeError,
    SamplingSettings,
};

use crate::error::GatewayError;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "parley-gateway",
    version,
    about = "Windowed chat endpoint in front of a text-generation backend"
)]
pub struct ServerConfig {
    #[arg(long, env = "PARLEY_BIND_ADDR", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    #[arg(
        long,
        env = "PARLEY_BACKEND_URL",
        default_value = "http://127.0.0.1:8000/v1",
        help = "Base URL of an OpenAI-compatible completions server"
    )]
    pub backend_url: String,

    #[arg(long, env = "PARLEY_BACKEND_MODEL")]
    pub backend_model: Option<String>,

    #[arg(long, env = "PARLEY_BACKEND_API_KEY", hide_env_values = true)]
    pub backend_api_key: Option<String>,

    #[arg(
        long,
        env = "PARLEY_BACKEND_IDLE_TIMEOUT",
        default_value_t = 60,
        help = "Seconds to wait for the next streamed token before failing the request"
    )]
    pub backend_idle_timeout: u64,

    #[arg(
        long,
        env = "PARLEY_MAX_SEQ_LEN",
        default_value_t = 4096,
        help = "Backend context length, prompt plus reply"
    )]
    pub max_seq_len: usize,

    #[arg(
        long,
        env = "PARLEY_TOKENIZER",
        help = "tokenizer.json for exact counts (needs the token-counting feature)"
    )]
    pub tokenizer: Option<PathBuf>,

    #[arg(short, long, env = "PARLEY_MODE", default_value = "llama", help = "llama, codellama or raw")]
    pub mode: ChatMode,

    #[arg(long, default_value = "User", help = "Username in raw chat mode")]
    pub username: String,

    #[arg(long, default_value = "Chatbort", help = "Bot name in raw chat mode")]
    pub botname: String,

    #[arg(
        long,
        env = "PARLEY_FIRST_TEMPLATE",
        requires = "continuation_template",
        help = "Custom template for the first retained turn, with <|system_prompt|> and <|user_prompt|>"
    )]
    pub first_template: Option<String>,

    #[arg(
        long,
        env = "PARLEY_CONTINUATION_TEMPLATE",
        requires = "first_template",
        help = "Custom template for later user turns, with <|user_prompt|>"
    )]
    pub continuation_template: Option<String>,

    #[arg(long, env = "PARLEY_TEMPLATE_BOS", help = "Prefix each turn of a custom template with BOS")]
    pub template_bos: bool,

    #[arg(long = "stop-string", help = "Extra string that ends a reply (repeatable)")]
    pub stop_strings: Vec<String>,

    #[arg(long, default_value_t = 0.95)]
    pub temperature: f32,

    #[arg(long, default_value_t = 50)]
    pub top_k: u32,

    #[arg(long, default_value_t = 0.8)]
    pub top_p: f32,

    #[arg(long, default_value_t = 0.0)]
    pub typical: f32,

    #[arg(long, default_value_t = 1.1)]
    pub repetition_penalty: f32,

    #[arg(long, env = "PARLEY_MAX_RESPONSE_TOKENS", default_value_t = 1000)]
    pub max_response_tokens: usize,

    #[arg(
        long,
        env = "PARLEY_RESPONSE_RESERVE",
        default_value_t = 250,
        help = "Context space kept free for the reply"
    )]
    pub response_reserve: usize,
}

impl ServerConfig {
    pub fn sampling(&self) -> SamplingSettings {
        SamplingSettings {
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            typical: self.typical,
            repetition_penalty: self.repetition_penalty,
        }
    }

    pub fn responder_config(&self) -> ResponderConfig {
        ResponderConfig {
            max_response_tokens: self.max_response_tokens,
            response_reserve: self.response_reserve,
            sampling: self.sampling(),
            ..ResponderConfig::default()
        }
    }

    /// Custom templates take precedence over `mode`.
    pub fn chat_template(&self) -> Result<ChatTemplate, GatewayError> {
        let template = match (&self.first_template, &self.continuation_template) {
            (Some(first), Some(continuation)) => ChatTemplate::parse(first, continuation)
                .map_err(|e| GatewayError::Config(e.to_string()))?
                .with_bos(self.template_bos),
            (None, None) => ChatTemplate::for_mode(self.mode, &self.username, &self.botname),
            _ => {
                return Err(GatewayError::Config(
                    "first and continuation templates must be given together".to_string(),
                ))
            }
        };

        if self.stop_strings.is_empty() {
            return Ok(template);
        }
        let mut stop_strings = template.stop_strings().to_vec();
        stop_strings.extend(self.stop_strings.iter().cloned());
        Ok(template.with_stop_strings(stop_strings))
    }

    pub fn tokenizer(&self) -> Result<Arc<dyn Tokenizer>, GatewayError> {
        match &self.tokenizer {
            None => Ok(Arc::new(ByteTokenizer)),
            #[cfg(feature = "token-counting")]
            Some(path) => Ok(Arc::new(
                parley_context::HfTokenizer::from_file(path).map_err(RuntimeError::from)?,
            )),
            #[cfg(not(feature = "token-counting"))]
            Some(path) => Err(GatewayError::Config(format!(
                "tokenizer {} given but parley-gateway was built without the token-counting feature",
                path.display()
            ))),
        }
    }

    pub fn backend(&self) -> Result<Arc<dyn GenerationBackend>, GatewayError> {
        let backend = CompletionsBackend::new(
            self.backend_url.clone(),
            self.backend_model.clone(),
            self.max_seq_len,
        )
        .map_err(RuntimeError::from)?
        .with_api_key(self.backend_api_key.clone())
        .with_idle_timeout(Duration::from_secs(self.backend_idle_timeout));
        Ok(Arc::new(backend))
    }

    /// Construct the backend handle and the responder that owns it.
    pub fn build_responder(&self) -> Result<ChatResponder, GatewayError> {
        let windower = ContextWindower::new(self.chat_template()?, self.tokenizer()?);
        let responder = ChatResponder::new(self.backend()?, windower, self.responder_config());
        // Reject a reserve that leaves no room for any prompt before serving.
        responder.budget()?;
        Ok(responder)
    }
}
