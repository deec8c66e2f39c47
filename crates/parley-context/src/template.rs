//! Chat prompt templates
//!
//! Templates are parsed once into literal and placeholder segments and then
//! rendered from a [`TurnContext`]. Placeholders are never substituted a
//! second time, so user text that happens to contain `<|system_prompt|>` is
//! emitted verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::Role;
use crate::error::{ContextError, ContextResult};

/// Placeholder for the system preamble (first turn only)
pub const SYSTEM_PLACEHOLDER: &str = "<|system_prompt|>";
/// Placeholder for the user's message
pub const USER_PLACEHOLDER: &str = "<|user_prompt|>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    System,
    UserPrompt,
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = source;

        loop {
            let next = [
                (rest.find(SYSTEM_PLACEHOLDER), SYSTEM_PLACEHOLDER, Segment::System),
                (rest.find(USER_PLACEHOLDER), USER_PLACEHOLDER, Segment::UserPrompt),
            ]
            .into_iter()
            .filter_map(|(pos, token, segment)| pos.map(|pos| (pos, token, segment)))
            .min_by_key(|(pos, _, _)| *pos);

            let Some((pos, token, segment)) = next else {
                if !rest.is_empty() {
                    segments.push(Segment::Literal(rest.to_string()));
                }
                break;
            };

            if pos > 0 {
                segments.push(Segment::Literal(rest[..pos].to_string()));
            }
            segments.push(segment);
            rest = &rest[pos + token.len()..];
        }

        Self { segments }
    }

    pub fn uses_system(&self) -> bool {
        self.segments.contains(&Segment::System)
    }

    pub fn uses_user_prompt(&self) -> bool {
        self.segments.contains(&Segment::UserPrompt)
    }

    pub fn render(&self, system: &str, user_prompt: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::System => out.push_str(system),
                Segment::UserPrompt => out.push_str(user_prompt),
            }
        }
        out
    }
}

impl FromStr for Template {
    type Err = ContextError;

    fn from_str(source: &str) -> ContextResult<Self> {
        Ok(Self::parse(source))
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::System => f.write_str(SYSTEM_PLACEHOLDER)?,
                Segment::UserPrompt => f.write_str(USER_PLACEHOLDER)?,
            }
        }
        Ok(())
    }
}

/// Everything a template needs to render one turn
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub role: Role,
    pub text: &'a str,
    /// Whether this is the first turn of the rendered window
    pub is_first: bool,
    pub system: &'a str,
}

/// Prompt format families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Llama 2 chat finetunes
    #[default]
    Llama,
    /// Code Llama instruct
    Codellama,
    /// Plain `User: ... / Bot:` transcript
    Raw,
}

impl FromStr for ChatMode {
    type Err = ContextError;

    fn from_str(s: &str) -> ContextResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "llama" => Ok(Self::Llama),
            "codellama" => Ok(Self::Codellama),
            "raw" => Ok(Self::Raw),
            other => Err(ContextError::UnknownChatMode(other.to_string())),
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Llama => "llama",
            Self::Codellama => "codellama",
            Self::Raw => "raw",
        })
    }
}

const LLAMA_FIRST: &str = "[INST] <<SYS>>\n<|system_prompt|>\n<</SYS>>\n\n<|user_prompt|> [/INST]";
const LLAMA_CONTINUATION: &str = "[INST] <|user_prompt|> [/INST]";

/// First/continuation template pair plus encoding and stop conventions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplate {
    first: Template,
    continuation: Template,
    add_bos: bool,
    stop_strings: Vec<String>,
}

impl ChatTemplate {
    /// Build a template pair. The continuation template may not reference
    /// the system preamble: only the first retained turn carries it.
    pub fn new(first: Template, continuation: Template) -> ContextResult<Self> {
        if continuation.uses_system() {
            return Err(ContextError::InvalidTemplate(format!(
                "continuation template must not contain {SYSTEM_PLACEHOLDER}"
            )));
        }
        if !first.uses_user_prompt() || !continuation.uses_user_prompt() {
            return Err(ContextError::InvalidTemplate(format!(
                "templates must contain {USER_PLACEHOLDER}"
            )));
        }

        Ok(Self {
            first,
            continuation,
            add_bos: false,
            stop_strings: Vec::new(),
        })
    }

    pub fn parse(first: &str, continuation: &str) -> ContextResult<Self> {
        Self::new(Template::parse(first), Template::parse(continuation))
    }

    /// Llama 2 `[INST]` format, one BOS per rendered turn
    pub fn llama() -> Self {
        Self {
            first: Template::parse(LLAMA_FIRST),
            continuation: Template::parse(LLAMA_CONTINUATION),
            add_bos: true,
            stop_strings: Vec::new(),
        }
    }

    /// Plain transcript with speaker labels
    pub fn raw(username: &str, botname: &str) -> Self {
        let first = format!("{SYSTEM_PLACEHOLDER}\n{username}: {USER_PLACEHOLDER}\n{botname}:");
        let continuation = format!("{username}: {USER_PLACEHOLDER}\n{botname}:");

        let mut stop_strings = Vec::new();
        let initial: String = username.chars().take(1).collect();
        for label in [
            username.to_string(),
            initial,
            username.to_uppercase(),
            username.to_lowercase(),
        ] {
            let stop = format!("{label}:");
            if label.is_empty() || stop_strings.contains(&stop) {
                continue;
            }
            stop_strings.push(stop);
        }

        Self {
            first: Template::parse(&first),
            continuation: Template::parse(&continuation),
            add_bos: false,
            stop_strings,
        }
    }

    pub fn for_mode(mode: ChatMode, username: &str, botname: &str) -> Self {
        match mode {
            ChatMode::Llama | ChatMode::Codellama => Self::llama(),
            ChatMode::Raw => Self::raw(username, botname),
        }
    }

    #[must_use]
    pub fn with_bos(mut self, add_bos: bool) -> Self {
        self.add_bos = add_bos;
        self
    }

    #[must_use]
    pub fn with_stop_strings(mut self, stop_strings: Vec<String>) -> Self {
        self.stop_strings = stop_strings;
        self
    }

    pub fn add_bos(&self) -> bool {
        self.add_bos
    }

    /// Strings that end a reply when the backend emits them
    pub fn stop_strings(&self) -> &[String] {
        &self.stop_strings
    }

    /// Render one turn: the first turn of a window goes through the first
    /// template, later user turns through the continuation template, and
    /// everything else is emitted as its stored text.
    pub fn render_turn(&self, ctx: &TurnContext<'_>) -> String {
        if ctx.is_first {
            return self.first.render(ctx.system, ctx.text);
        }
        match ctx.role {
            Role::User => self.continuation.render("", ctx.text),
            Role::Assistant | Role::System => ctx.text.to_string(),
        }
    }
}
