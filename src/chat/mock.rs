//! Mock Chat Transport
//!
//! In-memory `ChatTransport` used by the test suite and by the `memory`
//! transport mode for local runs. Records every outbound call for assertions
//! and replays queued inbound events through `poll_events`.

use super::traits::*;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Mock chat transport
#[derive(Clone)]
pub struct MockChatTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    sent_messages: Vec<SentMessage>,
    deleted_messages: Vec<(ChatId, MessageId)>,
    restricted: Vec<(ChatId, UserId)>,
    unrestricted: Vec<(ChatId, UserId)>,
    banned: Vec<(ChatId, UserId, u64)>,
    pending_events: Vec<ChatEvent>,
    next_message_id: i64,
    fail_sends: bool,
    fail_deletes: bool,
    fail_restricts: bool,
    fail_unrestricts: bool,
    fail_bans: bool,
}

/// One recorded outbound message
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat: ChatId,
    pub id: MessageId,
    pub text: String,
    pub buttons: Vec<Vec<Button>>,
    pub monospace: bool,
}

impl MockChatTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_message_id: 1,
                ..MockState::default()
            })),
        }
    }

    /// Queue an inbound event for the next `poll_events`
    pub fn queue_event(&self, event: ChatEvent) {
        self.state.lock().unwrap().pending_events.push(event);
    }

    /// All recorded outbound messages
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent_messages.clone()
    }

    /// Texts sent to one chat, in order
    pub fn sent_texts_in(&self, chat: ChatId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent_messages
            .iter()
            .filter(|m| m.chat == chat)
            .map(|m| m.text.clone())
            .collect()
    }

    /// All recorded deletions
    pub fn deleted_messages(&self) -> Vec<(ChatId, MessageId)> {
        self.state.lock().unwrap().deleted_messages.clone()
    }

    /// All recorded restrictions
    pub fn restricted(&self) -> Vec<(ChatId, UserId)> {
        self.state.lock().unwrap().restricted.clone()
    }

    /// All recorded permission restorations
    pub fn unrestricted(&self) -> Vec<(ChatId, UserId)> {
        self.state.lock().unwrap().unrestricted.clone()
    }

    /// All recorded bans
    pub fn banned(&self) -> Vec<(ChatId, UserId, u64)> {
        self.state.lock().unwrap().banned.clone()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    pub fn set_fail_restricts(&self, fail: bool) {
        self.state.lock().unwrap().fail_restricts = fail;
    }

    pub fn set_fail_unrestricts(&self, fail: bool) {
        self.state.lock().unwrap().fail_unrestricts = fail;
    }

    pub fn set_fail_bans(&self, fail: bool) {
        self.state.lock().unwrap().fail_bans = fail;
    }

    /// Clear all recorded state
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        *state = MockState {
            next_message_id: 1,
            ..MockState::default()
        };
    }
}

impl Default for MockChatTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for MockChatTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        options: &SendOptions,
    ) -> ChatResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(ChatError::Protocol("injected send failure".to_string()));
        }
        let id = MessageId(state.next_message_id);
        state.next_message_id += 1;
        state.sent_messages.push(SentMessage {
            chat,
            id,
            text: text.to_string(),
            buttons: options.buttons.clone(),
            monospace: options.monospace,
        });
        Ok(id)
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(ChatError::Protocol("injected delete failure".to_string()));
        }
        state.deleted_messages.push((chat, message));
        Ok(())
    }

    async fn restrict_member(&self, chat: ChatId, user: UserId) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_restricts {
            return Err(ChatError::Protocol("injected restrict failure".to_string()));
        }
        state.restricted.push((chat, user));
        Ok(())
    }

    async fn unrestrict_member(&self, chat: ChatId, user: UserId) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_unrestricts {
            return Err(ChatError::Protocol(
                "injected unrestrict failure".to_string(),
            ));
        }
        state.unrestricted.push((chat, user));
        Ok(())
    }

    async fn ban_member(&self, chat: ChatId, user: UserId, until_unix: u64) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_bans {
            return Err(ChatError::Protocol("injected ban failure".to_string()));
        }
        state.banned.push((chat, user, until_unix));
        Ok(())
    }

    async fn poll_events(&self) -> ChatResult<Vec<ChatEvent>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.pending_events.drain(..).collect())
    }
}
