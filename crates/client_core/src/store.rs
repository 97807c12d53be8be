use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::domain::{Conversation, ConversationId};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};

use crate::{
    bridge::PersistenceBridge,
    error::{ClientError, ClientResult},
    events::ClientEvent,
};

struct Entry {
    conversation: Conversation,
    // Higher is more recent; breaks ties between equal activity timestamps.
    recency: u64,
}

#[derive(Default)]
struct StoreState {
    entries: Vec<Entry>,
    next_recency: u64,
}

impl StoreState {
    fn bump_recency(&mut self) -> u64 {
        self.next_recency += 1;
        self.next_recency
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            b.conversation
                .last_activity()
                .cmp(&a.conversation.last_activity())
                .then(b.recency.cmp(&a.recency))
        });
    }

    fn position(&self, id: ConversationId) -> Option<usize> {
        self.entries.iter().position(|e| e.conversation.id == id)
    }

    /// "Now", but never older than the newest entry so a touched conversation sorts first.
    fn activity_stamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        self.entries
            .iter()
            .map(|e| e.conversation.last_activity())
            .max()
            .map_or(now, |newest| newest.max(now))
    }

    fn snapshot(&self) -> Vec<Conversation> {
        self.entries.iter().map(|e| e.conversation.clone()).collect()
    }
}

/// Recency-ordered conversation summaries shared by the sidebar and the session.
pub struct ConversationStore {
    bridge: Arc<dyn PersistenceBridge>,
    inner: RwLock<StoreState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ConversationStore {
    pub fn new(
        bridge: Arc<dyn PersistenceBridge>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            inner: RwLock::new(StoreState::default()),
            events,
        })
    }

    pub async fn list(&self) -> Vec<Conversation> {
        self.inner.read().await.snapshot()
    }

    pub async fn get(&self, id: ConversationId) -> Option<Conversation> {
        let guard = self.inner.read().await;
        guard
            .position(id)
            .map(|index| guard.entries[index].conversation.clone())
    }

    pub async fn contains(&self, id: ConversationId) -> bool {
        self.inner.read().await.position(id).is_some()
    }

    pub async fn refresh(&self) -> ClientResult<Vec<Conversation>> {
        let conversations = self.bridge.list_conversations().await.map_err(|err| {
            error!("store: failed to load conversations: {err}");
            err
        })?;

        let snapshot = {
            let mut guard = self.inner.write().await;
            let base = guard.next_recency;
            let count = conversations.len() as u64;
            // Earlier entries in the backend's answer win ties, like a stable sort would.
            guard.entries = conversations
                .into_iter()
                .enumerate()
                .map(|(index, conversation)| Entry {
                    conversation,
                    recency: base + count - index as u64,
                })
                .collect();
            guard.next_recency = base + count;
            guard.sort();
            guard.snapshot()
        };
        info!(count = snapshot.len(), "store: conversations loaded");
        self.publish(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn create(&self, initial_title: &str) -> ClientResult<Conversation> {
        let conversation = self
            .bridge
            .create_conversation(initial_title)
            .await
            .map_err(|err| {
                error!("store: failed to create conversation: {err}");
                err
            })?;

        let snapshot = {
            let mut guard = self.inner.write().await;
            let recency = guard.bump_recency();
            guard.entries.insert(
                0,
                Entry {
                    conversation: conversation.clone(),
                    recency,
                },
            );
            guard.sort();
            guard.snapshot()
        };
        info!(conversation_id = conversation.id.0, "store: conversation created");
        self.publish(snapshot);
        Ok(conversation)
    }

    /// Persists first; the local title only changes once the backend accepted it.
    pub async fn rename(&self, id: ConversationId, new_title: &str) -> ClientResult<()> {
        self.ensure_present(id).await?;
        self.bridge
            .rename_conversation(id, new_title)
            .await
            .map_err(|err| {
                error!(conversation_id = id.0, "store: failed to rename conversation: {err}");
                err
            })?;

        let snapshot = {
            let mut guard = self.inner.write().await;
            let index = guard
                .position(id)
                .ok_or(ClientError::StaleReference { conversation_id: id })?;
            let stamp = guard.activity_stamp();
            let recency = guard.bump_recency();
            let entry = &mut guard.entries[index];
            entry.conversation.title = new_title.to_string();
            entry.conversation.updated_at = Some(stamp);
            entry.recency = recency;
            guard.sort();
            guard.snapshot()
        };
        info!(conversation_id = id.0, "store: conversation renamed");
        self.publish(snapshot);
        Ok(())
    }

    pub async fn touch(&self, id: ConversationId) -> ClientResult<()> {
        let snapshot = {
            let mut guard = self.inner.write().await;
            let index = guard
                .position(id)
                .ok_or(ClientError::StaleReference { conversation_id: id })?;
            let stamp = guard.activity_stamp();
            let recency = guard.bump_recency();
            let entry = &mut guard.entries[index];
            entry.conversation.updated_at = Some(stamp);
            entry.recency = recency;
            guard.sort();
            guard.snapshot()
        };
        self.publish(snapshot);
        Ok(())
    }

    pub async fn delete(&self, id: ConversationId) -> ClientResult<()> {
        self.ensure_present(id).await?;
        self.bridge.delete_conversation(id).await.map_err(|err| {
            error!(conversation_id = id.0, "store: failed to delete conversation: {err}");
            err
        })?;

        let snapshot = {
            let mut guard = self.inner.write().await;
            guard.entries.retain(|e| e.conversation.id != id);
            guard.snapshot()
        };
        info!(conversation_id = id.0, "store: conversation deleted");
        self.publish(snapshot);
        Ok(())
    }

    async fn ensure_present(&self, id: ConversationId) -> ClientResult<()> {
        if self.contains(id).await {
            Ok(())
        } else {
            Err(ClientError::StaleReference { conversation_id: id })
        }
    }

    fn publish(&self, snapshot: Vec<Conversation>) {
        let _ = self
            .events
            .send(ClientEvent::ConversationsChanged(snapshot));
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
