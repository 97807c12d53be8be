//! In-memory persistence bridge used by the unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{Conversation, ConversationId},
    error::ErrorCode,
    protocol::MessagePair,
};
use tokio::sync::Notify;

use crate::{
    bridge::PersistenceBridge,
    error::{RemoteError, RemoteResult},
};

#[derive(Default)]
struct FakeState {
    conversations: Vec<Conversation>,
    histories: HashMap<ConversationId, Vec<MessagePair>>,
    next_id: i64,
    replies: VecDeque<String>,
    failing: HashSet<&'static str>,
    create_calls: usize,
    list_calls: usize,
    sent_prompts: Vec<(ConversationId, String)>,
    renames: Vec<(ConversationId, String)>,
}

#[derive(Default)]
pub struct FakeBridge {
    state: Mutex<FakeState>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    history_gate: Mutex<Option<Arc<Notify>>>,
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub fn conversation(id: i64, title: &str, created_minute: u32) -> Conversation {
    Conversation {
        id: ConversationId(id),
        title: title.to_string(),
        created_at: at(created_minute),
        updated_at: None,
    }
}

impl FakeBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_conversations(conversations: Vec<Conversation>) -> Arc<Self> {
        let bridge = Self::default();
        {
            let mut state = bridge.state.lock().expect("fake state");
            state.next_id = conversations.iter().map(|c| c.id.0).max().unwrap_or(0);
            state.conversations = conversations;
        }
        Arc::new(bridge)
    }

    pub fn set_history(&self, id: ConversationId, pairs: Vec<(&str, &str)>) {
        self.state.lock().expect("fake state").histories.insert(
            id,
            pairs
                .into_iter()
                .map(|(query, response)| MessagePair {
                    query: query.into(),
                    response: response.into(),
                })
                .collect(),
        );
    }

    pub fn history(&self, id: ConversationId) -> Vec<MessagePair> {
        self.state
            .lock()
            .expect("fake state")
            .histories
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn queue_reply(&self, reply: &str) {
        self.state
            .lock()
            .expect("fake state")
            .replies
            .push_back(reply.to_string());
    }

    pub fn fail(&self, operation: &'static str) {
        self.state.lock().expect("fake state").failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().expect("fake state").failing.remove(operation);
    }

    /// Makes `send_prompt` wait until the returned notify is signalled.
    pub fn gate_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().expect("gate") = Some(gate.clone());
        gate
    }

    /// Holds every `list_messages` call until `release_history`.
    pub fn gate_history(&self) {
        *self.history_gate.lock().expect("gate") = Some(Arc::new(Notify::new()));
    }

    pub fn release_history(&self) {
        if let Some(gate) = self.history_gate.lock().expect("gate").take() {
            gate.notify_waiters();
        }
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().expect("fake state").create_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().expect("fake state").list_calls
    }

    pub fn sent_prompts(&self) -> Vec<(ConversationId, String)> {
        self.state.lock().expect("fake state").sent_prompts.clone()
    }

    pub fn renames(&self) -> Vec<(ConversationId, String)> {
        self.state.lock().expect("fake state").renames.clone()
    }

    fn check(&self, operation: &'static str) -> RemoteResult<()> {
        if self
            .state
            .lock()
            .expect("fake state")
            .failing
            .contains(operation)
        {
            return Err(RemoteError::new(
                operation,
                ErrorCode::Internal,
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceBridge for FakeBridge {
    async fn list_conversations(&self) -> RemoteResult<Vec<Conversation>> {
        self.check("list_conversations")?;
        let mut state = self.state.lock().expect("fake state");
        state.list_calls += 1;
        Ok(state.conversations.clone())
    }

    async fn create_conversation(&self, title: &str) -> RemoteResult<Conversation> {
        let mut state = self.state.lock().expect("fake state");
        state.create_calls += 1;
        drop(state);
        self.check("create_conversation")?;

        let mut state = self.state.lock().expect("fake state");
        state.next_id += 1;
        let conversation = Conversation {
            id: ConversationId(state.next_id),
            title: title.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        state.conversations.insert(0, conversation.clone());
        Ok(conversation)
    }

    async fn rename_conversation(&self, id: ConversationId, title: &str) -> RemoteResult<()> {
        self.check("rename_conversation")?;
        let mut state = self.state.lock().expect("fake state");
        state.renames.push((id, title.to_string()));
        if let Some(conversation) = state.conversations.iter_mut().find(|c| c.id == id) {
            conversation.title = title.to_string();
        }
        Ok(())
    }

    async fn delete_conversation(&self, id: ConversationId) -> RemoteResult<()> {
        self.check("delete_conversation")?;
        let mut state = self.state.lock().expect("fake state");
        state.conversations.retain(|c| c.id != id);
        state.histories.remove(&id);
        Ok(())
    }

    async fn list_messages(&self, id: ConversationId) -> RemoteResult<Vec<MessagePair>> {
        let gate = self.history_gate.lock().expect("gate").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check("list_messages")?;
        Ok(self.history(id))
    }

    async fn send_prompt(&self, id: ConversationId, text: &str) -> RemoteResult<String> {
        {
            let mut state = self.state.lock().expect("fake state");
            state.sent_prompts.push((id, text.to_string()));
        }
        let gate = self.send_gate.lock().expect("gate").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check("send_prompt")?;

        let mut state = self.state.lock().expect("fake state");
        let reply = state
            .replies
            .pop_front()
            .unwrap_or_else(|| format!("echo: {text}"));
        state
            .histories
            .entry(id)
            .or_default()
            .push(MessagePair {
                query: text.to_string(),
                response: reply.clone(),
            });
        Ok(reply)
    }
}
