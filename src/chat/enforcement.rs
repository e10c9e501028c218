//! Enforcement Actions
//!
//! The three privileged moderation calls the orchestrator needs: restrict on
//! join, unrestrict on admission, ban on rejection or timeout. Each call
//! retries transient transport failures, then hands the outcome back to the
//! caller; callers downgrade failures to a retry message or a log line,
//! never a process failure.

use super::retry::retry_with_backoff;
use super::traits::{ChatError, ChatId, ChatResult, ChatTransport, UserId};
use tracing::debug;

/// Moderation wrapper bound to the gated group
#[derive(Clone)]
pub struct EnforcementActions<T: ChatTransport> {
    transport: T,
    group_chat: ChatId,
}

impl<T: ChatTransport> EnforcementActions<T> {
    pub fn new(transport: T, group_chat: ChatId) -> Self {
        Self {
            transport,
            group_chat,
        }
    }

    /// The group this wrapper moderates
    pub fn group_chat(&self) -> ChatId {
        self.group_chat
    }

    /// Strip a member's send permissions in the gated group
    pub async fn restrict(&self, user: UserId) -> ChatResult<()> {
        let chat = self.group_chat;
        retry_with_backoff(
            || {
                let transport = self.transport.clone();
                async move { transport.restrict_member(chat, user).await }
            },
            ChatError::is_retryable,
        )
        .await?;
        debug!(%user, %chat, "member restricted");
        Ok(())
    }

    /// Restore a member's full permissions in the gated group
    pub async fn unrestrict(&self, user: UserId) -> ChatResult<()> {
        let chat = self.group_chat;
        retry_with_backoff(
            || {
                let transport = self.transport.clone();
                async move { transport.unrestrict_member(chat, user).await }
            },
            ChatError::is_retryable,
        )
        .await?;
        debug!(%user, %chat, "member unrestricted");
        Ok(())
    }

    /// Remove a member from the gated group until the given unix time
    pub async fn ban_until(&self, user: UserId, until_unix: u64) -> ChatResult<()> {
        let chat = self.group_chat;
        retry_with_backoff(
            || {
                let transport = self.transport.clone();
                async move { transport.ban_member(chat, user, until_unix).await }
            },
            ChatError::is_retryable,
        )
        .await?;
        debug!(%user, %chat, until_unix, "member banned");
        Ok(())
    }
}
