use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Conversation, ConversationId},
    error::ErrorCode,
    protocol::{
        ConversationRecord, CreateConversationRequest, DeleteConversationRequest,
        ListMessagesQuery, MessagePair, RenameConversationRequest, SendPromptRequest,
        SendPromptResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    config::ClientSettings,
    error::{RemoteError, RemoteResult},
};

const CONVERSATIONS_PATH: &str = "conversations/user/";
const MESSAGES_PATH: &str = "conversations/message/";
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

#[async_trait]
pub trait PersistenceBridge: Send + Sync {
    async fn list_conversations(&self) -> RemoteResult<Vec<Conversation>>;
    async fn create_conversation(&self, title: &str) -> RemoteResult<Conversation>;
    async fn rename_conversation(&self, id: ConversationId, title: &str) -> RemoteResult<()>;
    async fn delete_conversation(&self, id: ConversationId) -> RemoteResult<()>;
    /// Stored exchanges in chronological order.
    async fn list_messages(&self, id: ConversationId) -> RemoteResult<Vec<MessagePair>>;
    async fn send_prompt(&self, id: ConversationId, text: &str) -> RemoteResult<String>;
}

pub struct MissingPersistenceBridge;

impl MissingPersistenceBridge {
    fn unavailable<T>(operation: &'static str) -> RemoteResult<T> {
        Err(RemoteError::new(
            operation,
            ErrorCode::Unavailable,
            "conversation backend is not configured",
        ))
    }
}

#[async_trait]
impl PersistenceBridge for MissingPersistenceBridge {
    async fn list_conversations(&self) -> RemoteResult<Vec<Conversation>> {
        Self::unavailable("list_conversations")
    }

    async fn create_conversation(&self, _title: &str) -> RemoteResult<Conversation> {
        Self::unavailable("create_conversation")
    }

    async fn rename_conversation(&self, _id: ConversationId, _title: &str) -> RemoteResult<()> {
        Self::unavailable("rename_conversation")
    }

    async fn delete_conversation(&self, _id: ConversationId) -> RemoteResult<()> {
        Self::unavailable("delete_conversation")
    }

    async fn list_messages(&self, _id: ConversationId) -> RemoteResult<Vec<MessagePair>> {
        Self::unavailable("list_messages")
    }

    async fn send_prompt(&self, _id: ConversationId, _text: &str) -> RemoteResult<String> {
        Self::unavailable("send_prompt")
    }
}

/// JSON-over-HTTP bridge with token authentication.
pub struct HttpPersistenceBridge {
    http: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpPersistenceBridge {
    pub fn new(base_url: Url, auth_token: Option<String>, http: Client) -> Self {
        Self {
            http,
            base_url,
            auth_token,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build http client")?;
        Ok(Self::new(
            settings.base_url()?,
            settings.auth_token.clone(),
            http,
        ))
    }

    fn endpoint(&self, operation: &'static str, path: &str) -> RemoteResult<Url> {
        self.base_url.join(path).map_err(|err| {
            RemoteError::new(
                operation,
                ErrorCode::Validation,
                format!("invalid endpoint '{path}': {err}"),
            )
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(reqwest::header::AUTHORIZATION, format!("Token {token}")),
            None => request,
        }
    }

    async fn dispatch(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| map_transport_error(operation, err))?;

        let status = response.status();
        if status.is_success() {
            debug!(operation, status = status.as_u16(), "bridge: request ok");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
        Err(RemoteError::new(
            operation,
            ErrorCode::from_status(status.as_u16()),
            format!("server returned {status}: {preview}"),
        ))
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> RemoteResult<T> {
        self.dispatch(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| {
                RemoteError::new(
                    operation,
                    ErrorCode::Malformed,
                    format!("unexpected response body: {err}"),
                )
            })
    }
}

fn map_transport_error(operation: &'static str, err: reqwest::Error) -> RemoteError {
    let code = if err.is_decode() {
        ErrorCode::Malformed
    } else if let Some(status) = err.status() {
        ErrorCode::from_status(status.as_u16())
    } else {
        ErrorCode::Transport
    };
    RemoteError::new(operation, code, err.to_string())
}

#[async_trait]
impl PersistenceBridge for HttpPersistenceBridge {
    async fn list_conversations(&self) -> RemoteResult<Vec<Conversation>> {
        let url = self.endpoint("list_conversations", CONVERSATIONS_PATH)?;
        let records: Option<Vec<ConversationRecord>> = self
            .fetch_json("list_conversations", self.http.get(url))
            .await?;
        Ok(records
            .unwrap_or_default()
            .into_iter()
            .map(Conversation::from)
            .collect())
    }

    async fn create_conversation(&self, title: &str) -> RemoteResult<Conversation> {
        let url = self.endpoint("create_conversation", CONVERSATIONS_PATH)?;
        let record: ConversationRecord = self
            .fetch_json(
                "create_conversation",
                self.http.post(url).json(&CreateConversationRequest {
                    label: title.to_string(),
                }),
            )
            .await?;
        Ok(record.into())
    }

    async fn rename_conversation(&self, id: ConversationId, title: &str) -> RemoteResult<()> {
        let url = self.endpoint("rename_conversation", CONVERSATIONS_PATH)?;
        self.dispatch(
            "rename_conversation",
            self.http.patch(url).json(&RenameConversationRequest {
                conversation_id: id,
                label: title.to_string(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_conversation(&self, id: ConversationId) -> RemoteResult<()> {
        let url = self.endpoint("delete_conversation", CONVERSATIONS_PATH)?;
        self.dispatch(
            "delete_conversation",
            self.http.delete(url).json(&DeleteConversationRequest {
                conversation_id: id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn list_messages(&self, id: ConversationId) -> RemoteResult<Vec<MessagePair>> {
        let url = self.endpoint("list_messages", MESSAGES_PATH)?;
        let pairs: Option<Vec<MessagePair>> = self
            .fetch_json(
                "list_messages",
                self.http
                    .get(url)
                    .query(&ListMessagesQuery { conversation_id: id }),
            )
            .await?;
        Ok(pairs.unwrap_or_default())
    }

    async fn send_prompt(&self, id: ConversationId, text: &str) -> RemoteResult<String> {
        let url = self.endpoint("send_prompt", MESSAGES_PATH)?;
        let body: SendPromptResponse = self
            .fetch_json(
                "send_prompt",
                self.http.post(url).json(&SendPromptRequest {
                    conversation_id: id,
                    prompt: text.to_string(),
                }),
            )
            .await?;
        body.response.ok_or_else(|| {
            RemoteError::new(
                "send_prompt",
                ErrorCode::Malformed,
                "response payload is missing the reply text",
            )
        })
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
