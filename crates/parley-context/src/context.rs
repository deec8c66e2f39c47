//! Conversation types
//!
//! A [`Conversation`] serializes to the `/conversation` wire format:
//! `{"system": "...", "conversation": [{"role": "user", "message": "..."}]}`.

use serde::{Deserialize, Serialize};

/// Turn role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    #[serde(rename = "message", alias = "text")]
    text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Conversation transcript plus its standalone system preamble
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(rename = "conversation", default)]
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(system: Option<String>) -> Self {
        Self {
            system,
            turns: Vec::new(),
        }
    }

    pub fn with_turns(system: Option<String>, turns: Vec<Turn>) -> Self {
        Self { system, turns }
    }

    /// System preamble, or the empty string when none was given
    pub fn system(&self) -> &str {
        self.system.as_deref().unwrap_or_default()
    }

    pub fn set_system(&mut self, system: Option<String>) {
        self.system = system;
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_deserializes_wire_format() {
        let json = r#"{
            "system": "You are helpful.",
            "conversation": [
                {"role": "user", "message": "Hi"},
                {"role": "assistant", "message": "Hello!"}
            ]
        }"#;

        let conversation: Conversation = serde_json::from_str(json).unwrap();

        assert_eq!(conversation.system(), "You are helpful.");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[0], Turn::user("Hi"));
        assert_eq!(conversation.turns()[1].role(), Role::Assistant);
    }

    #[test]
    fn missing_system_reads_as_empty() {
        let conversation: Conversation =
            serde_json::from_str(r#"{"conversation": [{"role": "user", "message": "Hi"}]}"#)
                .unwrap();

        assert_eq!(conversation.system(), "");
    }

    #[test]
    fn appended_turn_serializes_as_message() {
        let mut conversation = Conversation::new(Some("sys".to_string()));
        conversation.push(Turn::user("Hi"));
        conversation.push(Turn::assistant("Hello!"));

        let value = serde_json::to_value(&conversation).unwrap();

        assert_eq!(value["system"], "sys");
        assert_eq!(value["conversation"][1]["role"], "assistant");
        assert_eq!(value["conversation"][1]["message"], "Hello!");
    }

    #[test]
    fn unknown_role_is_rejected() {
        let result = serde_json::from_str::<Conversation>(
            r#"{"conversation": [{"role": "narrator", "message": "Once"}]}"#,
        );

        assert!(result.is_err());
    }
}
