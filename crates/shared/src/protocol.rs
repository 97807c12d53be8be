//! JSON payloads exchanged with the conversation backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Conversation, ConversationId, Message};

/// Title shown for conversations the backend returns without a label.
pub const UNTITLED_CONVERSATION_LABEL: &str = "Untitled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    #[serde(default)]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        let title = match record.label {
            Some(label) if !label.trim().is_empty() => label,
            _ => UNTITLED_CONVERSATION_LABEL.to_string(),
        };
        Self {
            id: record.id,
            title,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameConversationRequest {
    pub conversation_id: ConversationId,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConversationRequest {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesQuery {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePair {
    pub query: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPromptRequest {
    pub conversation_id: ConversationId,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPromptResponse {
    #[serde(default)]
    pub response: Option<String>,
}

/// Flattens stored exchanges into a transcript, user message first within each pair.
pub fn expand_pairs(pairs: impl IntoIterator<Item = MessagePair>) -> Vec<Message> {
    pairs
        .into_iter()
        .flat_map(|pair| [Message::user(pair.query), Message::assistant(pair.response)])
        .collect()
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
