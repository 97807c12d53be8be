use shared::{
    domain::ConversationId,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {source}")]
pub struct RemoteError {
    pub operation: &'static str,
    pub source: ApiError,
}

impl RemoteError {
    pub fn new(operation: &'static str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            operation,
            source: ApiError::new(code, message),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.source.code
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("conversation {conversation_id} is no longer present")]
    StaleReference { conversation_id: ConversationId },
    #[error("invalid input: {0}")]
    Validation(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
