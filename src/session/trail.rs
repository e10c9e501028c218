//! Message Trail
//!
//! Transient onboarding messages pile up while a member verifies: the group
//! prompt, the device-choice question, the verification link or QR. The trail
//! remembers them so a terminal transition can sweep the chats clean in one
//! pass. Trails live inside their session and are mutated only through the
//! session store.

use crate::chat::{ChatId, ChatTransport, MessageId};
use futures::future::join_all;
use tracing::warn;

/// One recorded transient message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailEntry {
    pub chat: ChatId,
    pub message: MessageId,
}

/// Append-only ledger of a session's transient messages
#[derive(Debug, Clone, Default)]
pub struct MessageTrail {
    entries: Vec<TrailEntry>,
}

impl MessageTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sent message
    pub fn record(&mut self, chat: ChatId, message: MessageId) {
        self.entries.push(TrailEntry { chat, message });
    }

    /// Remove and return the entries for one chat, preserving order
    pub fn take_for(&mut self, chat: ChatId) -> Vec<TrailEntry> {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.chat == chat);
        self.entries = kept;
        taken
    }

    /// Remove and return everything
    pub fn drain_all(&mut self) -> Vec<TrailEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn entries(&self) -> &[TrailEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Delete a batch of recorded messages, best-effort and concurrent.
///
/// Deletion failures are logged and swallowed: a prompt that outlives its
/// session is cosmetic, not a correctness problem.
pub async fn delete_trail<T: ChatTransport>(transport: &T, entries: &[TrailEntry]) {
    let deletions = entries.iter().map(|entry| {
        let transport = transport.clone();
        let entry = *entry;
        async move {
            if let Err(e) = transport.delete_message(entry.chat, entry.message).await {
                warn!(
                    chat = %entry.chat,
                    message = %entry.message,
                    error = %e,
                    "failed to delete onboarding message"
                );
            }
        }
    });
    join_all(deletions).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::mock::MockChatTransport;
    use crate::chat::SendOptions;

    #[test]
    fn take_for_splits_by_chat_preserving_order() {
        let mut trail = MessageTrail::new();
        trail.record(ChatId(1), MessageId(10));
        trail.record(ChatId(2), MessageId(20));
        trail.record(ChatId(1), MessageId(11));

        let group = trail.take_for(ChatId(1));
        assert_eq!(
            group,
            vec![
                TrailEntry {
                    chat: ChatId(1),
                    message: MessageId(10)
                },
                TrailEntry {
                    chat: ChatId(1),
                    message: MessageId(11)
                },
            ]
        );
        assert_eq!(trail.len(), 1);
        assert_eq!(trail.entries()[0].chat, ChatId(2));
    }

    #[test]
    fn drain_all_empties_the_trail() {
        let mut trail = MessageTrail::new();
        trail.record(ChatId(1), MessageId(10));
        trail.record(ChatId(2), MessageId(20));

        assert_eq!(trail.drain_all().len(), 2);
        assert!(trail.is_empty());
        assert!(trail.drain_all().is_empty());
    }

    #[tokio::test]
    async fn delete_trail_issues_one_delete_per_entry() {
        let transport = MockChatTransport::new();
        let chat = ChatId(5);
        let first = transport
            .send_message(chat, "a", &SendOptions::none())
            .await
            .unwrap();
        let second = transport
            .send_message(chat, "b", &SendOptions::none())
            .await
            .unwrap();

        let entries = vec![
            TrailEntry {
                chat,
                message: first,
            },
            TrailEntry {
                chat,
                message: second,
            },
        ];
        delete_trail(&transport, &entries).await;

        let deleted = transport.deleted_messages();
        assert_eq!(deleted.len(), 2);
        assert!(deleted.contains(&(chat, first)));
        assert!(deleted.contains(&(chat, second)));
    }

    #[tokio::test]
    async fn delete_trail_swallows_failures() {
        let transport = MockChatTransport::new();
        transport.set_fail_deletes(true);

        let entries = vec![TrailEntry {
            chat: ChatId(5),
            message: MessageId(1),
        }];
        // Must not panic or error out.
        delete_trail(&transport, &entries).await;
        assert!(transport.deleted_messages().is_empty());
    }
}
