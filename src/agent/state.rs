use serde::{Deserialize, Serialize};

use crate::llm::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Synthetic result of a tool action, replayed to the LLM as a user turn.
    Observation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn to_message(&self) -> Message {
        let role = match self.role {
            Role::System => "system",
            Role::User | Role::Observation => "user",
            Role::Assistant => "assistant",
        };
        Message::new(role, self.content.clone())
    }
}

/// A cited passage. Equality for deduplication is `(filename, page, content)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub filename: String,
    pub page: u32,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
}

impl SourceRecord {
    fn same_passage(&self, other: &SourceRecord) -> bool {
        self.filename == other.filename && self.page == other.page && self.content == other.content
    }
}

/// Everything threaded through one run of the agent loop.
///
/// Components take the state by value and hand back the updated value, so
/// each transition can be exercised on its own.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<Turn>,
    pub context: String,
    pub sources: Vec<SourceRecord>,
    pub step_count: u32,
    pub retry_count: u32,
    /// `None` until the validator has run.
    pub is_valid: Option<bool>,
    pub final_answer: String,
}

impl ConversationState {
    /// Fresh state for a query, seeded with prior chat turns. Anything that is
    /// not a user turn in the history is replayed as an assistant turn.
    pub fn new(query: &str, history: &[Message]) -> Self {
        let mut messages: Vec<Turn> = history
            .iter()
            .map(|m| {
                let role = if m.role == "user" {
                    Role::User
                } else {
                    Role::Assistant
                };
                Turn::new(role, m.content.clone())
            })
            .collect();
        messages.push(Turn::new(Role::User, query));

        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Turn::new(role, content));
    }

    pub fn last_message(&self) -> Option<&Turn> {
        self.messages.last()
    }

    /// Add a source unless an equal passage is already present. Returns
    /// whether it was added.
    pub fn add_source(&mut self, source: SourceRecord) -> bool {
        if self.sources.iter().any(|s| s.same_passage(&source)) {
            return false;
        }
        self.sources.push(source);
        true
    }

    pub fn wire_messages(&self) -> Vec<Message> {
        self.messages.iter().map(Turn::to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(filename: &str, page: u32, content: &str) -> SourceRecord {
        SourceRecord {
            filename: filename.to_string(),
            page,
            content: content.to_string(),
            chunk_id: None,
            chunk_index: None,
        }
    }

    #[test]
    fn test_new_seeds_history_then_query() {
        let history = vec![
            Message::new("user", "hi"),
            Message::new("assistant", "hello"),
            Message::new("bot", "odd role"),
        ];
        let state = ConversationState::new("what is X?", &history);
        let roles: Vec<Role> = state.messages.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Assistant, Role::User]
        );
        assert_eq!(state.last_message().unwrap().content, "what is X?");
        assert_eq!(state.is_valid, None);
        assert_eq!(state.step_count, 0);
    }

    #[test]
    fn test_add_source_dedups_on_triple() {
        let mut state = ConversationState::default();
        assert!(state.add_source(source("a.pdf", 1, "alpha")));
        assert!(!state.add_source(source("a.pdf", 1, "alpha")));
        assert!(state.add_source(source("a.pdf", 2, "alpha")));
        assert!(state.add_source(source("b.pdf", 1, "alpha")));

        let mut with_id = source("a.pdf", 1, "alpha");
        with_id.chunk_id = Some("c1".to_string());
        assert!(!state.add_source(with_id));
        assert_eq!(state.sources.len(), 3);
    }

    #[test]
    fn test_observation_is_sent_as_user() {
        let turn = Turn::new(Role::Observation, "Observation: nothing");
        assert_eq!(turn.to_message(), Message::new("user", "Observation: nothing"));
    }
}
