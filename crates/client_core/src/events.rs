use shared::domain::{Conversation, ConversationId, Message};

use crate::session::SessionPhase;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationsChanged(Vec<Conversation>),
    ActiveConversationChanged(Option<ConversationId>),
    PhaseChanged(SessionPhase),
    MessagesReplaced {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },
    MessageAppended {
        conversation_id: ConversationId,
        message: Message,
    },
    RevealProgress {
        conversation_id: ConversationId,
        content: String,
    },
    RevealFinished {
        conversation_id: ConversationId,
    },
    TitleInferred {
        conversation_id: ConversationId,
        title: String,
    },
    SendFailed {
        conversation_id: ConversationId,
        error: String,
    },
    Error(String),
}
