//! Active conversation, transcript, and the single-flight send pipeline.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use shared::{
    domain::{Conversation, ConversationId, Message},
    error::ErrorCode,
    protocol::expand_pairs,
};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::{
    bridge::PersistenceBridge,
    config::ClientSettings,
    error::{ClientError, ClientResult, RemoteError},
    events::ClientEvent,
    store::ConversationStore,
    stream::{RevealHandle, RevealSink, StreamRenderer},
    title::{infer_title, DEFAULT_CONVERSATION_TITLE},
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    /// A conversation is being created for a prompt sent with nothing active.
    PendingCreation,
    Sending,
    Streaming,
}

impl SessionPhase {
    pub fn is_busy(self) -> bool {
        self != SessionPhase::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyPrompt,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Ignored(IgnoreReason),
    /// A conversation was created; the prompt goes out once the view confirms it.
    Deferred { conversation_id: ConversationId },
    Delivered {
        conversation_id: ConversationId,
        reply: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub active_conversation_id: Option<ConversationId>,
    pub messages: Vec<Message>,
    pub phase: SessionPhase,
    pub loading_messages: bool,
}

impl SessionSnapshot {
    pub fn sending(&self) -> bool {
        self.phase.is_busy()
    }
}

#[derive(Debug, Clone)]
struct DeferredPrompt {
    conversation_id: ConversationId,
    text: String,
    placeholder: Message,
}

struct ActiveReveal {
    conversation_id: ConversationId,
    slot: usize,
    full_text: String,
    handle: RevealHandle,
}

struct SessionState {
    active_conversation_id: Option<ConversationId>,
    messages: Vec<Message>,
    phase: SessionPhase,
    deferred: Option<DeferredPrompt>,
    reveal: Option<ActiveReveal>,
    // Bumped on every switch so late results from an older view are dropped.
    generation: u64,
    // View generation of the send still waiting on the backend, whichever view is shown now.
    send_generation: Option<u64>,
    loading_generation: Option<u64>,
}

impl SessionState {
    fn loading_messages(&self) -> bool {
        self.loading_generation == Some(self.generation)
    }

    fn own_pipeline_running(&self) -> bool {
        self.reveal.is_some() || self.send_generation == Some(self.generation)
    }

    fn deferred_targets_active(&self) -> bool {
        self.active_conversation_id.is_some()
            && self.deferred.as_ref().map(|d| d.conversation_id) == self.active_conversation_id
    }
}

pub struct SessionController {
    bridge: Arc<dyn PersistenceBridge>,
    store: Arc<ConversationStore>,
    renderer: StreamRenderer,
    inner: Mutex<SessionState>,
    phase_tx: watch::Sender<SessionPhase>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionController {
    pub fn new(bridge: Arc<dyn PersistenceBridge>, renderer: StreamRenderer) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = ConversationStore::new(Arc::clone(&bridge), events.clone());
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);
        Arc::new(Self {
            bridge,
            store,
            renderer,
            inner: Mutex::new(SessionState {
                active_conversation_id: None,
                messages: Vec::new(),
                phase: SessionPhase::Idle,
                deferred: None,
                reveal: None,
                generation: 0,
                send_generation: None,
                loading_generation: None,
            }),
            phase_tx,
            events,
        })
    }

    pub fn from_settings(bridge: Arc<dyn PersistenceBridge>, settings: &ClientSettings) -> Arc<Self> {
        Self::new(bridge, StreamRenderer::from_settings(settings))
    }

    /// Shared with the sidebar; all list mutations go through it.
    pub fn store(&self) -> Arc<ConversationStore> {
        Arc::clone(&self.store)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.store.list().await
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock().await;
        SessionSnapshot {
            active_conversation_id: state.active_conversation_id,
            messages: state.messages.clone(),
            phase: state.phase,
            loading_messages: state.loading_messages(),
        }
    }

    pub async fn active_conversation_id(&self) -> Option<ConversationId> {
        self.inner.lock().await.active_conversation_id
    }

    pub async fn has_deferred_prompt(&self) -> bool {
        self.inner.lock().await.deferred.is_some()
    }

    pub async fn send_message(self: &Arc<Self>, text: &str) -> ClientResult<SendOutcome> {
        let prompt = text.trim();
        if prompt.is_empty() {
            debug!("session: ignoring empty prompt");
            return Ok(SendOutcome::Ignored(IgnoreReason::EmptyPrompt));
        }

        let target = {
            let mut state = self.inner.lock().await;
            if state.phase.is_busy()
                || state.send_generation.is_some()
                || state.loading_messages()
            {
                info!(phase = ?state.phase, "session: send ignored while the session is busy");
                return Ok(SendOutcome::Ignored(IgnoreReason::Busy));
            }

            let active = state.active_conversation_id;
            match active {
                None => {
                    self.set_phase(&mut state, SessionPhase::PendingCreation);
                    None
                }
                Some(conversation_id) => {
                    state.send_generation = Some(state.generation);
                    self.set_phase(&mut state, SessionPhase::Sending);
                    self.append_message(&mut state, conversation_id, Message::user(prompt));
                    Some((conversation_id, state.generation))
                }
            }
        };

        match target {
            None => self.create_and_defer(text, prompt).await,
            Some((conversation_id, generation)) => {
                self.deliver(conversation_id, text.to_string(), generation)
                    .await
            }
        }
    }

    async fn create_and_defer(&self, text: &str, prompt: &str) -> ClientResult<SendOutcome> {
        let conversation = match self.store.create(DEFAULT_CONVERSATION_TITLE).await {
            Ok(conversation) => conversation,
            Err(err) => {
                let mut state = self.inner.lock().await;
                if state.phase == SessionPhase::PendingCreation {
                    self.set_phase(&mut state, SessionPhase::Idle);
                }
                return Err(err);
            }
        };

        let mut state = self.inner.lock().await;
        state.deferred = Some(DeferredPrompt {
            conversation_id: conversation.id,
            text: text.to_string(),
            placeholder: Message::user(prompt),
        });
        self.activate(&mut state, Some(conversation.id));
        self.set_phase(&mut state, SessionPhase::PendingCreation);
        info!(
            conversation_id = conversation.id.0,
            "session: prompt deferred until the new conversation is confirmed"
        );
        Ok(SendOutcome::Deferred {
            conversation_id: conversation.id,
        })
    }

    async fn deliver(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        text: String,
        generation: u64,
    ) -> ClientResult<SendOutcome> {
        let reply = match self.bridge.send_prompt(conversation_id, &text).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                let err = RemoteError::new(
                    "send_prompt",
                    ErrorCode::Malformed,
                    "assistant reply was empty",
                );
                return Err(self.fail_send(conversation_id, generation, err).await);
            }
            Err(err) => return Err(self.fail_send(conversation_id, generation, err).await),
        };

        {
            let mut state = self.inner.lock().await;
            state.send_generation = None;
            if state.generation == generation
                && state.active_conversation_id == Some(conversation_id)
            {
                self.append_message(&mut state, conversation_id, Message::assistant(""));
                let slot = state.messages.len() - 1;
                self.set_phase(&mut state, SessionPhase::Streaming);
                let sink = Arc::new(SessionRevealSink {
                    controller: Arc::downgrade(self),
                    conversation_id,
                    generation,
                });
                let handle = self.renderer.start(reply.clone(), sink);
                state.reveal = Some(ActiveReveal {
                    conversation_id,
                    slot,
                    full_text: reply.clone(),
                    handle,
                });
            } else {
                info!(
                    conversation_id = conversation_id.0,
                    "session: reply arrived after the view moved on; not rendered"
                );
                if state.phase == SessionPhase::Sending {
                    self.settle_phase(&mut state);
                }
            }
        }

        self.after_reply(conversation_id, &reply).await;
        Ok(SendOutcome::Delivered {
            conversation_id,
            reply,
        })
    }

    async fn fail_send(
        &self,
        conversation_id: ConversationId,
        generation: u64,
        err: RemoteError,
    ) -> ClientError {
        error!(conversation_id = conversation_id.0, "session: failed to send prompt: {err}");
        {
            let mut state = self.inner.lock().await;
            state.send_generation = None;
            if state.phase == SessionPhase::Sending {
                self.settle_phase(&mut state);
            }
            if state.generation != generation {
                debug!(conversation_id = conversation_id.0, "session: failed send belonged to an earlier view");
            }
        }
        self.emit(ClientEvent::SendFailed {
            conversation_id,
            error: err.to_string(),
        });
        err.into()
    }

    /// Title inference and recency bump; independent of the reveal.
    async fn after_reply(&self, conversation_id: ConversationId, reply: &str) {
        if let Some(conversation) = self.store.get(conversation_id).await {
            if let Some(title) = infer_title(&conversation.title, reply) {
                match self.store.rename(conversation_id, &title).await {
                    Ok(()) => {
                        info!(conversation_id = conversation_id.0, title = title.as_str(), "session: conversation titled from reply");
                        self.emit(ClientEvent::TitleInferred {
                            conversation_id,
                            title,
                        });
                    }
                    Err(err) => {
                        warn!(conversation_id = conversation_id.0, "session: failed to update conversation title: {err}");
                        self.emit(ClientEvent::Error(format!(
                            "failed to update conversation title: {err}"
                        )));
                    }
                }
            }
        }

        if let Err(err) = self.store.touch(conversation_id).await {
            warn!(conversation_id = conversation_id.0, "session: conversation vanished before it could be touched: {err}");
        }
    }

    pub async fn reload_conversations(self: &Arc<Self>) -> ClientResult<Vec<Conversation>> {
        let conversations = self.store.refresh().await?;
        self.flush_deferred_logged().await;
        Ok(conversations)
    }

    /// Called once the view has navigated: reloads the list and installs the routed conversation.
    pub async fn sync_route(self: &Arc<Self>, route: Option<ConversationId>) -> ClientResult<()> {
        let conversations = self.store.refresh().await?;
        match route {
            Some(id) if conversations.iter().any(|c| c.id == id) => {
                self.open_conversation(id).await?;
            }
            Some(id) => {
                warn!(conversation_id = id.0, "session: route references an unknown conversation");
                self.clear_active().await;
            }
            None => self.clear_active().await,
        }
        self.flush_deferred_logged().await;
        Ok(())
    }

    pub async fn select_conversation(self: &Arc<Self>, id: ConversationId) -> ClientResult<()> {
        if !self.store.contains(id).await {
            return Err(ClientError::StaleReference {
                conversation_id: id,
            });
        }
        self.open_conversation(id).await?;
        self.flush_deferred_logged().await;
        Ok(())
    }

    pub async fn new_conversation(&self) -> ClientResult<Conversation> {
        let conversation = self.store.create(DEFAULT_CONVERSATION_TITLE).await?;
        let mut state = self.inner.lock().await;
        self.activate(&mut state, Some(conversation.id));
        self.settle_phase(&mut state);
        Ok(conversation)
    }

    pub async fn rename_conversation(&self, id: ConversationId, title: &str) -> ClientResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ClientError::Validation(
                "conversation title must not be empty".into(),
            ));
        }
        self.store.rename(id, title).await
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> ClientResult<()> {
        self.store.delete(id).await?;

        let mut state = self.inner.lock().await;
        if state
            .deferred
            .as_ref()
            .is_some_and(|deferred| deferred.conversation_id == id)
        {
            state.deferred = None;
        }
        if state.active_conversation_id == Some(id) {
            self.activate(&mut state, None);
            self.settle_phase(&mut state);
        }
        Ok(())
    }

    /// Delivers the deferred prompt once its conversation is active, listed and
    /// its history is installed.
    ///
    /// The prompt is taken out of the state under the same lock that checks the
    /// conditions, so concurrent triggers deliver it at most once.
    pub async fn flush_deferred(self: &Arc<Self>) -> ClientResult<Option<SendOutcome>> {
        let (conversation_id, text, generation) = {
            let mut state = self.inner.lock().await;
            let target = match &state.deferred {
                Some(deferred)
                    if state.active_conversation_id == Some(deferred.conversation_id)
                        && state.send_generation.is_none()
                        && state.reveal.is_none() =>
                {
                    deferred.conversation_id
                }
                _ => return Ok(None),
            };
            if state.loading_messages() {
                debug!(conversation_id = target.0, "session: deferred prompt waits for history");
                return Ok(None);
            }
            if !self.store.contains(target).await {
                debug!(conversation_id = target.0, "session: deferred prompt waits for list reload");
                return Ok(None);
            }
            let Some(deferred) = state.deferred.take() else {
                return Ok(None);
            };

            state.send_generation = Some(state.generation);
            self.set_phase(&mut state, SessionPhase::Sending);
            self.append_message(&mut state, deferred.conversation_id, deferred.placeholder);
            (deferred.conversation_id, deferred.text, state.generation)
        };

        info!(conversation_id = conversation_id.0, "session: flushing deferred prompt");
        self.deliver(conversation_id, text, generation)
            .await
            .map(Some)
    }

    async fn flush_deferred_logged(self: &Arc<Self>) {
        if let Err(err) = self.flush_deferred().await {
            warn!("session: deferred prompt delivery failed: {err}");
        }
    }

    async fn open_conversation(&self, id: ConversationId) -> ClientResult<()> {
        let generation = {
            let mut state = self.inner.lock().await;
            if state.active_conversation_id == Some(id)
                && (state.own_pipeline_running() || state.loading_messages())
            {
                debug!(conversation_id = id.0, "session: keeping view while it is busy");
                return Ok(());
            }
            self.activate(&mut state, Some(id));
            self.settle_phase(&mut state);
            state.loading_generation = Some(state.generation);
            state.generation
        };

        let loaded = self.bridge.list_messages(id).await;
        let mut state = self.inner.lock().await;
        if state.loading_generation == Some(generation) {
            state.loading_generation = None;
        }
        let pairs = match loaded {
            Ok(pairs) => pairs,
            Err(err) => {
                drop(state);
                error!(conversation_id = id.0, "session: failed to load messages: {err}");
                self.emit(ClientEvent::Error(err.to_string()));
                return Err(err.into());
            }
        };

        if state.generation != generation {
            debug!(conversation_id = id.0, "session: discarding messages for a stale view");
            return Ok(());
        }
        // Sends and flushes wait for the load, so nothing was appended meanwhile.
        state.messages = expand_pairs(pairs);
        info!(conversation_id = id.0, count = state.messages.len(), "session: messages loaded");
        self.emit(ClientEvent::MessagesReplaced {
            conversation_id: id,
            messages: state.messages.clone(),
        });
        Ok(())
    }

    async fn clear_active(&self) {
        let mut state = self.inner.lock().await;
        if state.active_conversation_id.is_some() || state.phase.is_busy() {
            self.activate(&mut state, None);
            self.settle_phase(&mut state);
        }
    }

    /// Switches the view: stops the reveal, clears the transcript, invalidates older results.
    fn activate(&self, state: &mut SessionState, id: Option<ConversationId>) {
        self.cancel_reveal(state);
        state.active_conversation_id = id;
        state.messages.clear();
        state.generation += 1;
        self.emit(ClientEvent::ActiveConversationChanged(id));
    }

    /// Phase for a view with no reveal of its own: a send still waiting on the
    /// backend keeps the session busy even after the view moved on.
    fn settle_phase(&self, state: &mut SessionState) {
        let phase = if state.send_generation.is_some() {
            SessionPhase::Sending
        } else if state.deferred_targets_active() {
            SessionPhase::PendingCreation
        } else {
            SessionPhase::Idle
        };
        self.set_phase(state, phase);
    }

    fn cancel_reveal(&self, state: &mut SessionState) {
        let Some(reveal) = state.reveal.take() else {
            return;
        };
        reveal.handle.cancel();
        if let Some(message) = state.messages.get_mut(reveal.slot) {
            message.content.clone_from(&reveal.full_text);
        }
        info!(conversation_id = reveal.conversation_id.0, "session: reveal cut short; full reply kept");
        self.emit(ClientEvent::RevealProgress {
            conversation_id: reveal.conversation_id,
            content: reveal.full_text,
        });
        self.emit(ClientEvent::RevealFinished {
            conversation_id: reveal.conversation_id,
        });
    }

    fn append_message(
        &self,
        state: &mut SessionState,
        conversation_id: ConversationId,
        message: Message,
    ) {
        state.messages.push(message.clone());
        self.emit(ClientEvent::MessageAppended {
            conversation_id,
            message,
        });
    }

    fn set_phase(&self, state: &mut SessionState, phase: SessionPhase) {
        if state.phase == phase {
            return;
        }
        debug!(from = ?state.phase, to = ?phase, "session: phase change");
        state.phase = phase;
        self.phase_tx.send_replace(phase);
        self.emit(ClientEvent::PhaseChanged(phase));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

struct SessionRevealSink {
    controller: Weak<SessionController>,
    conversation_id: ConversationId,
    generation: u64,
}

#[async_trait]
impl RevealSink for SessionRevealSink {
    async fn show(&self, prefix: &str) -> bool {
        let Some(controller) = self.controller.upgrade() else {
            return false;
        };
        let mut state = controller.inner.lock().await;
        if state.generation != self.generation {
            return false;
        }
        let Some(slot) = state.reveal.as_ref().map(|reveal| reveal.slot) else {
            return false;
        };
        let Some(message) = state.messages.get_mut(slot) else {
            return false;
        };
        message.content.clear();
        message.content.push_str(prefix);
        controller.emit(ClientEvent::RevealProgress {
            conversation_id: self.conversation_id,
            content: prefix.to_string(),
        });
        true
    }

    async fn finish(&self) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        let mut state = controller.inner.lock().await;
        if state.generation != self.generation {
            return;
        }
        state.reveal = None;
        controller.set_phase(&mut state, SessionPhase::Idle);
        controller.emit(ClientEvent::RevealFinished {
            conversation_id: self.conversation_id,
        });
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
