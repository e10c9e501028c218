//! Messaging Transport Abstractions
//!
//! These traits keep the orchestrator independent of any concrete chat
//! backend and enable full test coverage via MockChatTransport. Production
//! adapters (long-poll or webhook-fed) implement `ChatTransport` outside the
//! core and plug into the same wiring.

use async_trait::async_trait;
use std::fmt;

/// Stable member identity on the messaging transport
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct UserId(pub i64);

/// Chat identifier (the gated group or a personal chat)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ChatId(pub i64);

/// Message identifier, unique within a chat
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct MessageId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inline keyboard button: a label and the callback payload it sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(label: &str, callback_data: &str) -> Self {
        Self {
            label: label.to_string(),
            callback_data: callback_data.to_string(),
        }
    }
}

/// Extra delivery options for outbound messages
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Inline keyboard, outer vec is rows
    pub buttons: Vec<Vec<Button>>,
    /// Render the body in a monospace block (QR codes)
    pub monospace: bool,
}

impl SendOptions {
    /// Plain text, no keyboard
    pub fn none() -> Self {
        Self::default()
    }

    /// Text with an inline keyboard
    pub fn keyboard(rows: Vec<Vec<Button>>) -> Self {
        Self {
            buttons: rows,
            monospace: false,
        }
    }

    /// Monospace block (used for rendered QR codes)
    pub fn code_block() -> Self {
        Self {
            buttons: Vec::new(),
            monospace: true,
        }
    }
}

/// Inbound event delivered by the transport integration.
///
/// Commands arrive as plain `Message` events; the router parses them. The
/// transport is at-least-once: any event may be duplicated or reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A new member appeared in the gated group
    MemberJoined {
        chat: ChatId,
        user: UserId,
        username: Option<String>,
    },
    /// A text message in some chat (commands included)
    Message {
        chat: ChatId,
        user: UserId,
        text: String,
    },
    /// An inline keyboard button was pressed
    CallbackPressed {
        chat: ChatId,
        user: UserId,
        data: String,
    },
}

/// Result type for transport operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("member not found: {0}")]
    MemberNotFound(UserId),

    #[error("unauthorized operation")]
    Unauthorized,
}

impl ChatError {
    /// Transient errors worth retrying; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Network(_))
    }
}

/// Messaging transport abstraction.
///
/// All privileged moderation calls (`restrict_member`, `unrestrict_member`,
/// `ban_member`) require the bot to hold admin rights in the gated group;
/// implementations map missing rights to `ChatError::Unauthorized`.
#[async_trait]
pub trait ChatTransport: Clone + Send + Sync + 'static {
    /// Send a text message, returning the transport-assigned message id
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        options: &SendOptions,
    ) -> ChatResult<MessageId>;

    /// Delete a previously sent message (best-effort cleanup)
    async fn delete_message(&self, chat: ChatId, message: MessageId) -> ChatResult<()>;

    /// Strip a member's send permissions in a chat
    async fn restrict_member(&self, chat: ChatId, user: UserId) -> ChatResult<()>;

    /// Restore a member's full permissions in a chat
    async fn unrestrict_member(&self, chat: ChatId, user: UserId) -> ChatResult<()>;

    /// Remove a member from a chat until the given unix time (seconds)
    async fn ban_member(&self, chat: ChatId, user: UserId, until_unix: u64) -> ChatResult<()>;

    /// Drain events queued since the last poll (non-blocking)
    async fn poll_events(&self) -> ChatResult<Vec<ChatEvent>>;
}
