//! Client-side conversation state: the recency-ordered conversation list,
//! the active transcript, and the send pipeline that talks to the backend.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod store;
pub mod stream;
pub mod title;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

pub use bridge::{HttpPersistenceBridge, MissingPersistenceBridge, PersistenceBridge};
pub use config::{load_settings, ClientSettings};
pub use error::{ClientError, ClientResult, RemoteError};
pub use events::ClientEvent;
pub use session::{IgnoreReason, SendOutcome, SessionController, SessionPhase, SessionSnapshot};
pub use store::ConversationStore;
pub use stream::{RevealFrames, RevealHandle, RevealSink, StreamRenderer};
pub use title::{infer_title, DEFAULT_CONVERSATION_TITLE};
