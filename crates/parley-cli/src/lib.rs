use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use parley_context::{
    ByteTokenizer, ChatMode, ChatTemplate, ContextError, ContextWindower, Conversation,
    PromptBudget, RenderedPrompt,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "parley-cli",
    version,
    about = "Parley command line client",
    long_about = "Parley command line client for sending conversations to a gateway, previewing context windows offline, and chatting interactively"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PARLEY_SERVER",
        default_value = "http://127.0.0.1:5000",
        help = "Gateway base HTTP URL"
    )]
    pub server: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Send a conversation file and print the generated reply")]
    Send {
        #[arg(long, help = "Path to a conversation JSON file")]
        file: PathBuf,
        #[arg(long, help = "Override the file's system preamble")]
        system: Option<String>,
    },
    #[command(about = "Show the window a conversation file would be trimmed to")]
    Render {
        #[arg(long, help = "Path to a conversation JSON file")]
        file: PathBuf,
        #[arg(long, default_value_t = 4096, help = "Backend context length in tokens")]
        max_seq_len: usize,
        #[arg(long, default_value_t = 250, help = "Tokens reserved for the reply")]
        reserve: usize,
        #[arg(long, default_value = "llama", help = "Prompt format (llama, codellama, raw)")]
        mode: ChatMode,
        #[arg(long, default_value = "User", help = "Speaker label for raw mode")]
        username: String,
        #[arg(long, default_value = "Chatbort", help = "Bot label for raw mode")]
        botname: String,
    },
    #[command(about = "Interactive chat against the gateway")]
    Chat {
        #[arg(long, help = "System preamble for the session")]
        system: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("http transport error: {0}")]
    HttpTransport(String),
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("json decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(String),
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Error payload returned by the gateway
#[derive(Debug, Clone, Deserialize)]
struct GatewayErrorBody {
    error: String,
    message: String,
}

#[derive(Debug, Clone)]
pub struct ParleyClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ParleyClient {
    pub fn new(base_url: &str) -> Result<Self, CliError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| CliError::InvalidArgument(format!("server url `{base_url}`: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(CliError::InvalidArgument(format!(
                "server url must be http or https, got `{}`",
                base_url.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| CliError::HttpTransport(err.to_string()))?;

        Ok(Self { base_url, http })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Post the transcript and return it with the assistant reply appended
    pub async fn converse(&self, conversation: &Conversation) -> Result<Conversation, CliError> {
        if conversation.is_empty() {
            return Err(CliError::InvalidArgument(
                "conversation cannot be empty".to_string(),
            ));
        }

        let updated: Conversation = self.post_json("/conversation", conversation).await?;
        if updated.len() <= conversation.len() {
            return Err(CliError::Decode(
                "gateway response is missing the assistant turn".to_string(),
            ));
        }
        Ok(updated)
    }

    async fn post_json<TReq, TRes>(&self, path: &str, payload: &TReq) -> Result<TRes, CliError>
    where
        TReq: Serialize + Sync,
        TRes: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(self.endpoint(path))
            .json(payload)
            .send()
            .await
            .map_err(|err| CliError::HttpTransport(err.to_string()))?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            let body = match serde_json::from_str::<GatewayErrorBody>(&body) {
                Ok(parsed) => format!("{}: {}", parsed.error, parsed.message),
                Err(_) => body,
            };
            return Err(CliError::HttpStatus { status, body });
        }

        response
            .json::<TRes>()
            .await
            .map_err(|err| CliError::Decode(err.to_string()))
    }
}

pub fn load_conversation(path: &Path) -> Result<Conversation, CliError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| CliError::Io(format!("{}: {err}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|err| CliError::Decode(format!("{}: {err}", path.display())))
}

/// Window a conversation offline with the byte tokenizer
pub fn render_window(
    conversation: &Conversation,
    max_seq_len: usize,
    reserve: usize,
    template: ChatTemplate,
) -> Result<(RenderedPrompt, PromptBudget), CliError> {
    let budget = PromptBudget::from_context(max_seq_len, reserve)?;
    let windower = ContextWindower::new(template, Arc::new(ByteTokenizer));
    let prompt = windower.build_prompt(conversation, budget)?;
    Ok((prompt, budget))
}

fn describe_window(
    conversation: &Conversation,
    prompt: &RenderedPrompt,
    budget: PromptBudget,
) -> String {
    format!(
        "window: turns {}..{} of {} ({} dropped), {}/{} tokens\n\n{}",
        prompt.first_turn,
        prompt.first_turn + prompt.turns_retained,
        conversation.len(),
        prompt.turns_dropped(),
        prompt.len(),
        budget.max_tokens(),
        prompt.text
    )
}

pub async fn run(cli: Cli) -> Result<String, CliError> {
    match cli.command {
        Commands::Send { file, system } => {
            let mut conversation = load_conversation(&file)?;
            if system.is_some() {
                conversation.set_system(system);
            }
            let client = ParleyClient::new(&cli.server)?;
            let updated = client.converse(&conversation).await?;
            Ok(updated
                .last()
                .map(|turn| turn.text().to_string())
                .unwrap_or_default())
        }
        Commands::Render {
            file,
            max_seq_len,
            reserve,
            mode,
            username,
            botname,
        } => {
            let conversation = load_conversation(&file)?;
            let template = ChatTemplate::for_mode(mode, &username, &botname);
            let (prompt, budget) = render_window(&conversation, max_seq_len, reserve, template)?;
            Ok(describe_window(&conversation, &prompt, budget))
        }
        Commands::Chat { .. } => Err(CliError::InvalidArgument(
            "`chat` is interactive; run it from a terminal".to_string(),
        )),
    }
}
