//! Verification Session Store
//!
//! The authoritative map of pending members. Sessions are ephemeral: RAM
//! only, created on join, deleted after the terminal transition finishes its
//! enforcement and cleanup. Every transition goes through the guarded API
//! here (callers never touch the map), so concurrent webhooks, chat
//! commands, and sweep ticks converge on exactly one terminal outcome per
//! member. The compare-and-set in [`SessionStore::advance`] is the single
//! commit point; losers observe `false` and perform no side effects.

use super::trail::{MessageTrail, TrailEntry};
use crate::chat::{ChatId, MessageId, UserId};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Verification progress of one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Joined and muted, told how to start verifying
    Restricted,
    /// Asked whether they verify on this device or another
    AwaitingDeviceChoice,
    /// Verification link or QR delivered, waiting for the proof webhook
    AwaitingProof,
    /// Proof accepted and member admitted (terminal)
    Verified,
    /// Proof invalid, member ineligible, or processing failed closed (terminal)
    Rejected,
    /// Timed out by the sweeper (terminal)
    Expired,
}

impl SessionState {
    /// States a session can still leave
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            SessionState::Restricted
                | SessionState::AwaitingDeviceChoice
                | SessionState::AwaitingProof
        )
    }

    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

/// All pending states, for transitions that accept any live session
pub const PENDING_STATES: &[SessionState] = &[
    SessionState::Restricted,
    SessionState::AwaitingDeviceChoice,
    SessionState::AwaitingProof,
];

/// One member's verification session.
///
/// Ephemeral: RAM only, lost on restart. The transport re-delivers a join,
/// or the user re-invokes the entry command.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    pub user_id: UserId,
    pub group_chat_id: ChatId,
    /// Private chat for the verification flow; absent until the user starts it
    pub personal_chat_id: Option<ChatId>,
    pub state: SessionState,
    /// Unix seconds when the member was restricted; anchors the timeout
    pub created_at: u64,
    /// One-way latch set on admission; the sweeper never acts once it is set
    pub verified: bool,
    /// Token minted into the newest verification request's callback URL;
    /// once set, the proof webhook must present it
    pub callback_token: Option<String>,
    pub trail: MessageTrail,
}

/// Result of [`SessionStore::begin`]: a snapshot of the stored session and
/// whether this call created it
#[derive(Debug, Clone)]
pub struct BeginOutcome {
    pub session: VerificationSession,
    pub created: bool,
}

/// Guarded map of user → live verification session.
///
/// All operations are total: absence of a session is a valid, silently
/// ignored outcome for every mutator except `begin`. The internal lock is
/// never held across collaborator calls; slow work (proof verification,
/// profile lookup) happens outside, then commits through `advance`/`finish`.
pub struct SessionStore {
    sessions: Mutex<HashMap<UserId, VerificationSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a `Restricted` session for the user, or return the existing
    /// one untouched (idempotent re-entry).
    pub async fn begin(&self, user: UserId, group_chat: ChatId) -> BeginOutcome {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&user) {
            return BeginOutcome {
                session: existing.clone(),
                created: false,
            };
        }

        let session = VerificationSession {
            user_id: user,
            group_chat_id: group_chat,
            personal_chat_id: None,
            state: SessionState::Restricted,
            created_at: now_unix(),
            verified: false,
            callback_token: None,
            trail: MessageTrail::new(),
        };
        sessions.insert(user, session.clone());
        BeginOutcome {
            session,
            created: true,
        }
    }

    /// Record where to reach the user; no-op without a live session
    pub async fn attach_personal_chat(&self, user: UserId, chat: ChatId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&user) {
            session.personal_chat_id = Some(chat);
        }
    }

    /// Record the token minted into the newest verification request's
    /// callback URL. Replaces any earlier token, so only the newest link
    /// stays honored. No-op without a live session.
    pub async fn set_callback_token(&self, user: UserId, token: String) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&user) {
            session.callback_token = Some(token);
        }
    }

    /// Atomic compare-and-set transition. Succeeds only if the session
    /// exists and its current state is in `from`; returns `false` otherwise.
    /// A `false` means the caller lost the race (or the event is a stale
    /// duplicate) and must perform no side effects.
    pub async fn advance(&self, user: UserId, from: &[SessionState], to: SessionState) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&user) {
            Some(session) if from.contains(&session.state) => {
                session.state = to;
                true
            }
            _ => false,
        }
    }

    /// Set the verified latch; no-op without a live session
    pub async fn mark_verified(&self, user: UserId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&user) {
            session.verified = true;
        }
    }

    /// Remove and return the session for draining, but only if it already
    /// sits in `outcome`, the terminal state the caller won via `advance`.
    /// Repeat or mismatched calls return `None`.
    pub async fn finish(
        &self,
        user: UserId,
        outcome: SessionState,
    ) -> Option<VerificationSession> {
        if !outcome.is_terminal() {
            return None;
        }
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&user) {
            Some(session) if session.state == outcome => sessions.remove(&user),
            _ => None,
        }
    }

    /// Append a sent message to the live session's trail; no-op without one
    pub async fn record_message(&self, user: UserId, chat: ChatId, message: MessageId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&user) {
            session.trail.record(chat, message);
        }
    }

    /// Detach and return the live session's trail entries for one chat
    /// (used to replace an obsolete prompt before a refresh)
    pub async fn take_messages_in(&self, user: UserId, chat: ChatId) -> Vec<TrailEntry> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&user) {
            Some(session) => session.trail.take_for(chat),
            None => Vec::new(),
        }
    }

    /// Snapshot the pending sessions created before `deadline` whose latch
    /// is unset. Only the sweeper calls this; the subsequent `advance` CAS
    /// is what decides whether each candidate actually expires.
    pub async fn expired_before(&self, deadline: u64) -> Vec<VerificationSession> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|s| s.state.is_pending() && !s.verified && s.created_at < deadline)
            .cloned()
            .collect()
    }

    /// Number of live sessions (health endpoint, tests)
    pub async fn live_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Snapshot of one live session, if any
    pub async fn get(&self, user: UserId) -> Option<VerificationSession> {
        self.sessions.lock().await.get(&user).cloned()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Current unix time in seconds
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
