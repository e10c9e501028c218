//! Messaging Transport Seam
//!
//! Everything the orchestrator needs from a chat backend: the transport
//! trait and its id/event/error types, an in-memory mock, bounded retry,
//! the privileged moderation wrapper, and the ingestion strategies.

pub mod enforcement;
pub mod ingest;
pub mod mock;
pub mod retry;
pub mod traits;

pub use enforcement::EnforcementActions;
pub use ingest::{EventSource, PollingSource, PushSource};
pub use mock::MockChatTransport;
pub use traits::{
    Button, ChatError, ChatEvent, ChatId, ChatResult, ChatTransport, MessageId, SendOptions,
    UserId,
};
