//! Event Routing and Admission Flow
//!
//! Dispatches inbound chat events and proof webhooks onto guarded session
//! transitions. Every transition goes through the store's compare-and-set,
//! so a duplicated or reordered delivery settles as a no-op once the session
//! has moved past the expected state. The transport delivers at-least-once;
//! the store decides what happened last.

use crate::chat::{Button, ChatEvent, ChatId, ChatTransport, EnforcementActions, SendOptions, UserId};
use crate::session::{delete_trail, now_unix, SessionState, SessionStore, PENDING_STATES};
use crate::verify::{
    decode_proof_body, evaluate, extract_identity, Eligibility, EligibilityThresholds,
    IneligibleReason, ProfileError, ProfileLookup, ProofError, ProofProtocol,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback payload for the "reading on a phone" button
pub const CALLBACK_DEVICE_MOBILE: &str = "device:mobile";

/// Callback payload for the "reading on a computer" button
pub const CALLBACK_DEVICE_DESKTOP: &str = "device:desktop";

/// How verification requests reach members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Ask each member where they are reading, then link or QR accordingly
    #[default]
    Ask,
    /// Always send a tappable link
    Link,
    /// Always render a QR code
    Qr,
}

/// Where the member will open the verification flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Tappable link, opened in place
    Mobile,
    /// QR code, scanned from another screen
    Desktop,
}

/// Parse a device-choice callback payload
pub fn parse_device_callback(data: &str) -> Option<DeviceKind> {
    match data.trim() {
        CALLBACK_DEVICE_MOBILE => Some(DeviceKind::Mobile),
        CALLBACK_DEVICE_DESKTOP => Some(DeviceKind::Desktop),
        _ => None,
    }
}

/// Deep-link entry commands understood in personal chats
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryCommand {
    /// `/start verifyme_<groupChatId>`
    Verify { group_chat: ChatId },
    /// `/start` with a missing or unreadable payload
    Invalid,
    /// Anything that is not an entry command
    Other,
}

/// Parse an entry command from personal-chat message text
pub fn parse_entry_command(text: &str) -> EntryCommand {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.first().copied() != Some("/start") {
        return EntryCommand::Other;
    }
    let Some(payload) = parts.get(1) else {
        return EntryCommand::Invalid;
    };
    let Some(raw_id) = payload.strip_prefix("verifyme_") else {
        return EntryCommand::Invalid;
    };
    match raw_id.parse::<i64>() {
        Ok(id) => EntryCommand::Verify {
            group_chat: ChatId(id),
        },
        Err(_) => EntryCommand::Invalid,
    }
}

/// How a proof webhook settled, for the HTTP layer to report back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofOutcome {
    /// Member admitted
    Verified,
    /// Member rejected (invalid proof, ineligible profile, or fail-closed)
    Rejected,
    /// No live session matched the callback
    NoSession,
    /// The payload could not be read; the session is untouched
    Malformed,
}

/// Why a member was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionNotice {
    /// The proof itself did not validate
    InvalidProof,
    /// The proof was fine but the profile missed a threshold
    Ineligible(IneligibleReason),
}

/// Settings the router needs beyond its collaborators
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// The one group this process guards
    pub group_chat: ChatId,
    /// Prefix the entry deep link is built from, e.g. `https://t.me/bot?start=`
    pub entry_link_base: String,
    /// How verification requests reach members
    pub delivery: DeliveryMode,
    /// Ban duration for rejected and timed-out members
    pub penalty: Duration,
    /// Profile thresholds for admission
    pub thresholds: EligibilityThresholds,
}

/// Routes inbound events onto guarded session transitions.
///
/// Holds the store plus the three collaborators: the chat transport for
/// messaging and enforcement, the proof protocol for request building and
/// validation, and the profile lookup feeding the eligibility policy.
pub struct EventRouter<T: ChatTransport, P: ProofProtocol, L: ProfileLookup> {
    store: Arc<SessionStore>,
    transport: T,
    enforcement: EnforcementActions<T>,
    proof: P,
    profiles: L,
    config: RouterConfig,
}

impl<T: ChatTransport, P: ProofProtocol, L: ProfileLookup> EventRouter<T, P, L> {
    pub fn new(
        store: Arc<SessionStore>,
        transport: T,
        proof: P,
        profiles: L,
        config: RouterConfig,
    ) -> Self {
        let enforcement = EnforcementActions::new(transport.clone(), config.group_chat);
        Self {
            store,
            transport,
            enforcement,
            proof,
            profiles,
            config,
        }
    }

    /// The deep link members follow to start verifying for the guarded group
    pub fn entry_link(&self) -> String {
        format!(
            "{}verifyme_{}",
            self.config.entry_link_base, self.config.group_chat
        )
    }

    /// Dispatch one inbound chat event.
    ///
    /// Never fails: per-member problems are logged and isolated, they must
    /// not take the event loop down with them.
    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::MemberJoined {
                chat,
                user,
                username,
            } => {
                self.handle_member_joined(chat, user, username.as_deref())
                    .await;
            }
            ChatEvent::Message { chat, user, text } => {
                self.handle_message(chat, user, &text).await;
            }
            ChatEvent::CallbackPressed { chat, user, data } => {
                self.handle_callback(chat, user, &data).await;
            }
        }
    }

    /// A member joined the guarded group: restrict them and invite them to
    /// verify. Re-joins refresh the standing prompt instead of stacking a
    /// second one.
    async fn handle_member_joined(&self, chat: ChatId, user: UserId, username: Option<&str>) {
        if chat != self.config.group_chat {
            debug!(%chat, "join event for a chat this process does not guard");
            return;
        }

        let outcome = self.store.begin(user, chat).await;
        if let Err(e) = self.enforcement.restrict(user).await {
            warn!(%user, error = %e, "could not restrict a joining member");
        }
        if !outcome.created {
            debug!(%user, "repeat join, refreshing the group prompt");
            let stale = self.store.take_messages_in(user, chat).await;
            delete_trail(&self.transport, &stale).await;
        }

        let text = msg_group_join_prompt(username, &self.entry_link());
        self.send_and_record(user, chat, &text, SendOptions::none())
            .await;
        info!(%user, created = outcome.created, "member restricted pending verification");
    }

    /// Personal-chat text: only entry commands matter, everything else is
    /// small talk.
    async fn handle_message(&self, chat: ChatId, user: UserId, text: &str) {
        if chat == self.config.group_chat {
            return;
        }
        match parse_entry_command(text) {
            EntryCommand::Verify { group_chat } if group_chat == self.config.group_chat => {
                self.handle_entry(user, chat).await;
            }
            EntryCommand::Verify { group_chat } => {
                debug!(%user, %group_chat, "entry link names a group this process does not guard");
                self.send(chat, &msg_invalid_entry_link()).await;
            }
            EntryCommand::Invalid => {
                self.send(chat, &msg_invalid_entry_link()).await;
            }
            EntryCommand::Other => {}
        }
    }

    /// Entry command received in a personal chat. Creates the session if it
    /// is gone (sessions do not survive a restart; the deep link still has
    /// to work afterwards), then moves the member toward a verification
    /// request according to the configured delivery mode.
    async fn handle_entry(&self, user: UserId, personal_chat: ChatId) {
        let outcome = self.store.begin(user, self.config.group_chat).await;
        if outcome.created {
            info!(%user, "entry command opened a fresh session");
        }
        self.store.attach_personal_chat(user, personal_chat).await;

        match self.config.delivery {
            DeliveryMode::Ask => {
                self.store
                    .advance(
                        user,
                        &[SessionState::Restricted],
                        SessionState::AwaitingDeviceChoice,
                    )
                    .await;
                match self.store.get(user).await.map(|s| s.state) {
                    Some(SessionState::AwaitingDeviceChoice) => {
                        let keyboard = SendOptions::keyboard(vec![vec![
                            Button::new("📱 On my phone", CALLBACK_DEVICE_MOBILE),
                            Button::new("💻 On a computer", CALLBACK_DEVICE_DESKTOP),
                        ]]);
                        self.send_and_record(
                            user,
                            personal_chat,
                            &msg_device_choice_prompt(),
                            keyboard,
                        )
                        .await;
                    }
                    Some(SessionState::AwaitingProof) => {
                        // Repeat /start after choosing: hand out a fresh link.
                        self.deliver_request(user, personal_chat, DeviceKind::Mobile)
                            .await;
                    }
                    other => debug!(%user, state = ?other, "entry command for a settled session"),
                }
            }
            DeliveryMode::Link | DeliveryMode::Qr => {
                self.store
                    .advance(
                        user,
                        &[
                            SessionState::Restricted,
                            SessionState::AwaitingDeviceChoice,
                        ],
                        SessionState::AwaitingProof,
                    )
                    .await;
                if self.store.get(user).await.map(|s| s.state)
                    == Some(SessionState::AwaitingProof)
                {
                    let kind = match self.config.delivery {
                        DeliveryMode::Qr => DeviceKind::Desktop,
                        _ => DeviceKind::Mobile,
                    };
                    self.deliver_request(user, personal_chat, kind).await;
                }
            }
        }
    }

    /// Device-choice button pressed. The compare-and-set makes a double
    /// press build exactly one verification request.
    async fn handle_callback(&self, chat: ChatId, user: UserId, data: &str) {
        let Some(kind) = parse_device_callback(data) else {
            debug!(%user, data, "unrecognized callback payload");
            return;
        };
        if !self
            .store
            .advance(
                user,
                &[SessionState::AwaitingDeviceChoice],
                SessionState::AwaitingProof,
            )
            .await
        {
            debug!(%user, "stale device choice ignored");
            return;
        }

        // The group invitation has served its purpose.
        let prompt = self.store.take_messages_in(user, self.config.group_chat).await;
        delete_trail(&self.transport, &prompt).await;

        if !self.deliver_request(user, chat, kind).await {
            // Re-arm the buttons so the member can press again.
            self.store
                .advance(
                    user,
                    &[SessionState::AwaitingProof],
                    SessionState::AwaitingDeviceChoice,
                )
                .await;
        }
    }

    /// Build a verification request and place it in the personal chat,
    /// as a link or as a scannable QR block. Returns false if no request
    /// could be built.
    async fn deliver_request(&self, user: UserId, personal_chat: ChatId, kind: DeviceKind) -> bool {
        let request = match self
            .proof
            .build_request_url(user, self.config.group_chat)
            .await
        {
            Ok(request) => request,
            Err(e) => {
                warn!(%user, error = %e, "could not build a verification request");
                self.send(personal_chat, &msg_request_unavailable()).await;
                return false;
            }
        };
        // Bind the webhook to this request; earlier links go stale.
        self.store
            .set_callback_token(user, request.session_token.clone())
            .await;

        match kind {
            DeviceKind::Mobile => {
                self.send_and_record(
                    user,
                    personal_chat,
                    &msg_verification_link(&request.url),
                    SendOptions::none(),
                )
                .await;
            }
            DeviceKind::Desktop => match qr2term::generate_qr_string(&request.url) {
                Ok(qr) => {
                    self.send_and_record(user, personal_chat, &qr, SendOptions::code_block())
                        .await;
                    self.send_and_record(
                        user,
                        personal_chat,
                        &msg_scan_instructions(&request.url),
                        SendOptions::none(),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(%user, error = %e, "QR rendering failed, sending the plain link");
                    self.send_and_record(
                        user,
                        personal_chat,
                        &msg_verification_link(&request.url),
                        SendOptions::none(),
                    )
                    .await;
                }
            },
        }
        true
    }

    /// A proof webhook arrived for `user`. Checks the callback against the
    /// session (group, issued token), validates the payload, consults the
    /// profile and the policy, and settles the session exactly once.
    pub async fn handle_proof(
        &self,
        user: UserId,
        group_chat: ChatId,
        token: Option<&str>,
        raw_body: &str,
    ) -> ProofOutcome {
        let Some(session) = self.store.get(user).await else {
            debug!(%user, "proof for an unknown or settled session");
            return ProofOutcome::NoSession;
        };
        if session.group_chat_id != group_chat {
            warn!(%user, %group_chat, "proof callback names a group this session is not for");
            return ProofOutcome::NoSession;
        }
        if session.callback_token.as_deref() != token {
            warn!(%user, "proof callback does not carry the issued token");
            return ProofOutcome::NoSession;
        }
        let personal_chat = session.personal_chat_id;

        let decoded = match decode_proof_body(raw_body) {
            Ok(decoded) => decoded,
            Err(e) => {
                info!(%user, error = %e, "discarding an unreadable proof payload");
                return self.settle_malformed(user, personal_chat).await;
            }
        };
        let identity = match extract_identity(&decoded) {
            Ok(identity) => identity,
            Err(e) => {
                info!(%user, error = %e, "proof carries no usable identity");
                return self.settle_malformed(user, personal_chat).await;
            }
        };

        let valid = match self.proof.verify(&decoded).await {
            Ok(valid) => valid,
            Err(ProofError::Malformed(e)) => {
                info!(%user, error = %e, "verifier refused the payload shape");
                return self.settle_malformed(user, personal_chat).await;
            }
            Err(e) => {
                warn!(%user, error = %e, "proof verification could not run");
                return self.settle_error(user, personal_chat).await;
            }
        };
        if !valid {
            info!(%user, username = %identity.username, "proof failed validation");
            return self
                .settle_rejection(user, personal_chat, RejectionNotice::InvalidProof)
                .await;
        }

        let mut snapshot = match self.profiles.fetch_profile(&identity.username).await {
            Ok(snapshot) => snapshot,
            Err(ProfileError::NotFound(name)) => {
                info!(%user, username = %name, "claimed profile does not exist");
                return self
                    .settle_rejection(user, personal_chat, RejectionNotice::InvalidProof)
                    .await;
            }
            Err(e) => {
                warn!(%user, error = %e, "profile lookup failed");
                return self.settle_error(user, personal_chat).await;
            }
        };
        // The proof claim carries the contribution count; the profile API
        // does not expose it.
        if snapshot.contributions_last_year.is_none() {
            snapshot.contributions_last_year = identity.contributions.clone();
        }

        match evaluate(&snapshot, Utc::now(), &self.config.thresholds) {
            Eligibility::Eligible => {
                self.settle_admission(user, personal_chat, &identity.username)
                    .await
            }
            Eligibility::Ineligible(reason) => {
                info!(
                    %user,
                    username = %identity.username,
                    reason = ?reason,
                    "profile is below the entry bar"
                );
                self.settle_rejection(user, personal_chat, RejectionNotice::Ineligible(reason))
                    .await
            }
        }
    }

    /// Unreadable payload: no transition, so a well-formed retry still lands.
    async fn settle_malformed(&self, user: UserId, personal_chat: Option<ChatId>) -> ProofOutcome {
        if let Some(chat) = personal_chat {
            self.send_and_record(user, chat, &msg_unreadable_proof(), SendOptions::none())
                .await;
        }
        ProofOutcome::Malformed
    }

    async fn settle_admission(
        &self,
        user: UserId,
        personal_chat: Option<ChatId>,
        username: &str,
    ) -> ProofOutcome {
        // Latch before committing so a sweep scanning right now already
        // skips this session; the compare-and-set below is the actual
        // commit point.
        self.store.mark_verified(user).await;
        if !self
            .store
            .advance(user, PENDING_STATES, SessionState::Verified)
            .await
        {
            info!(%user, "admission lost the settlement race");
            return ProofOutcome::NoSession;
        }

        if let Err(e) = self.enforcement.unrestrict(user).await {
            warn!(%user, error = %e, "could not lift restrictions for a verified member");
        }
        if let Some(chat) = personal_chat {
            self.send(chat, &msg_admitted_user()).await;
        }
        self.send(self.config.group_chat, &msg_admitted_group(username))
            .await;
        self.drain(user, SessionState::Verified).await;
        info!(%user, username, "member admitted");
        ProofOutcome::Verified
    }

    async fn settle_rejection(
        &self,
        user: UserId,
        personal_chat: Option<ChatId>,
        notice: RejectionNotice,
    ) -> ProofOutcome {
        if !self
            .store
            .advance(user, PENDING_STATES, SessionState::Rejected)
            .await
        {
            info!(%user, "rejection lost the settlement race");
            return ProofOutcome::NoSession;
        }

        let until = now_unix() + self.config.penalty.as_secs();
        if let Err(e) = self.enforcement.ban_until(user, until).await {
            warn!(%user, error = %e, "could not ban a rejected member");
        }
        if let Some(chat) = personal_chat {
            self.send(chat, &msg_rejected(&notice, self.config.penalty))
                .await;
        }
        self.drain(user, SessionState::Rejected).await;
        info!(%user, notice = ?notice, "member rejected");
        ProofOutcome::Rejected
    }

    /// Collaborator failure: fail closed without punishing. The member did
    /// nothing wrong, so the restriction is re-asserted but no ban lands,
    /// and the retry message carries a fresh entry link.
    async fn settle_error(&self, user: UserId, personal_chat: Option<ChatId>) -> ProofOutcome {
        if !self
            .store
            .advance(user, PENDING_STATES, SessionState::Rejected)
            .await
        {
            info!(%user, "failure settlement lost the race");
            return ProofOutcome::NoSession;
        }

        if let Err(e) = self.enforcement.restrict(user).await {
            warn!(%user, error = %e, "could not re-restrict after a processing failure");
        }
        if let Some(chat) = personal_chat {
            self.send(chat, &msg_retry_after_error(&self.entry_link()))
                .await;
        }
        self.drain(user, SessionState::Rejected).await;
        ProofOutcome::Rejected
    }

    /// Remove the session in the given terminal state and delete every
    /// trail message it accumulated.
    async fn drain(&self, user: UserId, outcome: SessionState) {
        if let Some(mut session) = self.store.finish(user, outcome).await {
            delete_trail(&self.transport, &session.trail.drain_all()).await;
        }
    }

    /// Send a transient onboarding message and record it on the trail
    async fn send_and_record(&self, user: UserId, chat: ChatId, text: &str, options: SendOptions) {
        match self.transport.send_message(chat, text, &options).await {
            Ok(message) => self.store.record_message(user, chat, message).await,
            Err(e) => warn!(%user, %chat, error = %e, "failed to send an onboarding message"),
        }
    }

    /// Send a message that should outlive the session (terminal notices)
    async fn send(&self, chat: ChatId, text: &str) {
        if let Err(e) = self
            .transport
            .send_message(chat, text, &SendOptions::none())
            .await
        {
            warn!(%chat, error = %e, "failed to send a notification");
        }
    }
}

// ============================================================================
// Member-Facing Message Templates
// ============================================================================

/// Group prompt shown when a member joins restricted
pub fn msg_group_join_prompt(display_name: Option<&str>, entry_link: &str) -> String {
    let greeting = match display_name {
        Some(name) => format!("Welcome, {name}!"),
        None => "Welcome!".to_string(),
    };
    format!(
        "👋 {}\n\n\
         This group admits verified GitHub accounts only, so posting is\n\
         disabled until you finish a quick check. Start here:\n{}",
        greeting, entry_link
    )
}

/// Reply to an entry command whose payload is missing or unreadable
pub fn msg_invalid_entry_link() -> String {
    "That verification link is incomplete. Use the one posted in the group you joined."
        .to_string()
}

/// Personal-chat prompt asking where the member is reading
pub fn msg_device_choice_prompt() -> String {
    "🔐 Let's verify your GitHub account.\n\n\
     Where are you reading this message? The verification flow opens on\n\
     your phone, so pick the option that matches."
        .to_string()
}

/// Verification link for a member already on their phone
pub fn msg_verification_link(url: &str) -> String {
    format!(
        "📱 Open this link on your phone to verify:\n{}\n\n\
         Your restrictions lift automatically once the proof arrives.",
        url
    )
}

/// Instructions under a rendered QR code
pub fn msg_scan_instructions(url: &str) -> String {
    format!(
        "🖥 Scan the code above with your phone to verify.\n\
         If scanning is awkward, the same link works directly:\n{}",
        url
    )
}

/// Shown when the proof collaborator could not mint a request
pub fn msg_request_unavailable() -> String {
    "⚠️ Could not prepare your verification request. Give it a moment and try again.".to_string()
}

/// Shown when a submitted proof could not even be parsed
pub fn msg_unreadable_proof() -> String {
    "⚠️ That proof submission could not be read. Use your verification link and try once more."
        .to_string()
}

/// Personal-chat congratulations after admission
pub fn msg_admitted_user() -> String {
    "🎉 Verification complete! Your restrictions are lifted. Welcome aboard.".to_string()
}

/// Group announcement after admission
pub fn msg_admitted_group(username: &str) -> String {
    format!("✅ {} verified their GitHub account and can now post.", username)
}

/// Personal-chat notice after a rejection, naming the penalty
pub fn msg_rejected(notice: &RejectionNotice, penalty: Duration) -> String {
    format!(
        "❌ Verification declined: {}.\n\n\
         You can rejoin and try again in {}.",
        describe_rejection(notice),
        humantime::format_duration(penalty)
    )
}

/// Personal-chat notice after a processing failure on our side
pub fn msg_retry_after_error(entry_link: &str) -> String {
    format!(
        "⚠️ Something went wrong on our side while checking your proof.\n\
         You are not penalized. Start over whenever you like:\n{}",
        entry_link
    )
}

fn describe_rejection(notice: &RejectionNotice) -> &'static str {
    match notice {
        RejectionNotice::InvalidProof => "the proof did not validate",
        RejectionNotice::Ineligible(IneligibleReason::MissingData) => {
            "your profile was missing required attributes"
        }
        RejectionNotice::Ineligible(IneligibleReason::AccountTooYoung) => {
            "your account is too new"
        }
        RejectionNotice::Ineligible(IneligibleReason::NotEnoughRepos) => {
            "your account has too few public repositories"
        }
        RejectionNotice::Ineligible(IneligibleReason::NotEnoughContributions) => {
            "your account has too few recent contributions"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MockChatTransport;
    use crate::verify::{MockProfileLookup, MockProofProtocol, ProfileSnapshot};
    use chrono::Duration as ChronoDuration;

    const GROUP: ChatId = ChatId(-1001);
    const PERSONAL: ChatId = ChatId(555);
    const USER: UserId = UserId(42);
    /// The token `MockProofProtocol` stamps on every request it builds
    const TOKEN: Option<&str> = Some("mock-token");

    struct Fixture {
        router: EventRouter<MockChatTransport, MockProofProtocol, MockProfileLookup>,
        transport: MockChatTransport,
        proof: MockProofProtocol,
        profiles: MockProfileLookup,
        store: Arc<SessionStore>,
    }

    fn fixture(delivery: DeliveryMode) -> Fixture {
        let store = Arc::new(SessionStore::new());
        let transport = MockChatTransport::new();
        let proof = MockProofProtocol::new();
        let profiles = MockProfileLookup::new();
        let config = RouterConfig {
            group_chat: GROUP,
            entry_link_base: "https://t.me/doorman_bot?start=".to_string(),
            delivery,
            penalty: Duration::from_secs(86_400),
            thresholds: EligibilityThresholds::default(),
        };
        let router = EventRouter::new(
            Arc::clone(&store),
            transport.clone(),
            proof.clone(),
            profiles.clone(),
            config,
        );
        Fixture {
            router,
            transport,
            proof,
            profiles,
            store,
        }
    }

    fn eligible_snapshot() -> ProfileSnapshot {
        ProfileSnapshot {
            account_created_at: Some((Utc::now() - ChronoDuration::days(730)).to_rfc3339()),
            public_repos: Some(12),
            contributions_last_year: None,
        }
    }

    fn proof_body(username: &str, contributions: &str) -> String {
        let context = serde_json::json!({
            "extractedParameters": {
                "URL_PARAMS_1": username,
                "contributions": contributions,
            }
        });
        serde_json::json!({
            "claimData": { "provider": "http", "context": context.to_string() }
        })
        .to_string()
    }

    async fn join(fix: &Fixture) {
        fix.router
            .handle_event(ChatEvent::MemberJoined {
                chat: GROUP,
                user: USER,
                username: Some("alice".to_string()),
            })
            .await;
    }

    async fn enter(fix: &Fixture) {
        fix.router
            .handle_event(ChatEvent::Message {
                chat: PERSONAL,
                user: USER,
                text: format!("/start verifyme_{}", GROUP),
            })
            .await;
    }

    async fn choose_mobile(fix: &Fixture) {
        fix.router
            .handle_event(ChatEvent::CallbackPressed {
                chat: PERSONAL,
                user: USER,
                data: CALLBACK_DEVICE_MOBILE.to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn join_restricts_and_prompts() {
        let fix = fixture(DeliveryMode::Ask);
        join(&fix).await;

        assert_eq!(fix.transport.restricted(), vec![(GROUP, USER)]);
        let texts = fix.transport.sent_texts_in(GROUP);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("verifyme_-1001"));

        let session = fix.store.get(USER).await.unwrap();
        assert_eq!(session.state, SessionState::Restricted);
        assert_eq!(session.trail.len(), 1);
    }

    #[tokio::test]
    async fn repeat_join_refreshes_the_prompt() {
        let fix = fixture(DeliveryMode::Ask);
        join(&fix).await;
        let first_prompt = fix.transport.sent_messages()[0].id;
        join(&fix).await;

        assert_eq!(fix.store.live_count().await, 1);
        assert_eq!(fix.transport.restricted().len(), 2);
        assert!(fix
            .transport
            .deleted_messages()
            .contains(&(GROUP, first_prompt)));
        // Only the fresh prompt remains on the trail.
        assert_eq!(fix.store.get(USER).await.unwrap().trail.len(), 1);
    }

    #[tokio::test]
    async fn entry_command_asks_for_a_device() {
        let fix = fixture(DeliveryMode::Ask);
        join(&fix).await;
        enter(&fix).await;

        let session = fix.store.get(USER).await.unwrap();
        assert_eq!(session.state, SessionState::AwaitingDeviceChoice);
        assert_eq!(session.personal_chat_id, Some(PERSONAL));

        let personal: Vec<_> = fix
            .transport
            .sent_messages()
            .into_iter()
            .filter(|m| m.chat == PERSONAL)
            .collect();
        assert_eq!(personal.len(), 1);
        assert_eq!(personal[0].buttons.len(), 1);
        assert_eq!(personal[0].buttons[0].len(), 2);
    }

    #[tokio::test]
    async fn bad_entry_payloads_are_explained_not_processed() {
        let fix = fixture(DeliveryMode::Ask);
        for text in ["/start", "/start verifyme_sevens", "/start groupme_7"] {
            fix.router
                .handle_event(ChatEvent::Message {
                    chat: PERSONAL,
                    user: USER,
                    text: text.to_string(),
                })
                .await;
        }
        assert_eq!(fix.store.live_count().await, 0);
        assert_eq!(fix.transport.sent_texts_in(PERSONAL).len(), 3);

        // Small talk gets no reply at all.
        fix.router
            .handle_event(ChatEvent::Message {
                chat: PERSONAL,
                user: USER,
                text: "hello there".to_string(),
            })
            .await;
        assert_eq!(fix.transport.sent_texts_in(PERSONAL).len(), 3);
    }

    #[tokio::test]
    async fn entry_link_for_another_group_is_refused() {
        let fix = fixture(DeliveryMode::Ask);
        fix.router
            .handle_event(ChatEvent::Message {
                chat: PERSONAL,
                user: USER,
                text: "/start verifyme_777".to_string(),
            })
            .await;

        assert_eq!(fix.store.live_count().await, 0);
        assert_eq!(fix.transport.sent_texts_in(PERSONAL).len(), 1);
    }

    #[tokio::test]
    async fn group_chatter_is_ignored() {
        let fix = fixture(DeliveryMode::Ask);
        join(&fix).await;
        fix.router
            .handle_event(ChatEvent::Message {
                chat: GROUP,
                user: USER,
                text: format!("/start verifyme_{}", GROUP),
            })
            .await;

        // The entry command only counts in a personal chat.
        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::Restricted
        );
    }

    #[tokio::test]
    async fn entry_command_recreates_a_lost_session() {
        // A restart wipes sessions; the deep link still works afterwards.
        let fix = fixture(DeliveryMode::Link);
        enter(&fix).await;

        let session = fix.store.get(USER).await.unwrap();
        assert_eq!(session.state, SessionState::AwaitingProof);
        assert_eq!(fix.proof.built_requests(), vec![(USER, GROUP)]);
    }

    #[tokio::test]
    async fn device_choice_sends_the_link_and_drops_the_group_prompt() {
        let fix = fixture(DeliveryMode::Ask);
        join(&fix).await;
        let group_prompt = fix.transport.sent_messages()[0].id;
        enter(&fix).await;
        choose_mobile(&fix).await;

        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::AwaitingProof
        );
        assert_eq!(fix.proof.built_requests(), vec![(USER, GROUP)]);
        assert!(fix
            .transport
            .deleted_messages()
            .contains(&(GROUP, group_prompt)));
        let texts = fix.transport.sent_texts_in(PERSONAL);
        assert!(texts.last().unwrap().contains("https://proof.example/start"));
    }

    #[tokio::test]
    async fn double_device_choice_builds_one_request() {
        let fix = fixture(DeliveryMode::Ask);
        join(&fix).await;
        enter(&fix).await;
        choose_mobile(&fix).await;
        choose_mobile(&fix).await;
        fix.router
            .handle_event(ChatEvent::CallbackPressed {
                chat: PERSONAL,
                user: USER,
                data: CALLBACK_DEVICE_DESKTOP.to_string(),
            })
            .await;

        assert_eq!(fix.proof.built_requests().len(), 1);
    }

    #[tokio::test]
    async fn stale_device_callback_is_a_no_op() {
        let fix = fixture(DeliveryMode::Ask);
        choose_mobile(&fix).await;

        assert!(fix.proof.built_requests().is_empty());
        assert!(fix.transport.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn failed_request_build_rearms_the_choice() {
        let fix = fixture(DeliveryMode::Ask);
        join(&fix).await;
        enter(&fix).await;
        fix.proof.set_fail_build(true);
        choose_mobile(&fix).await;

        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::AwaitingDeviceChoice
        );

        // The member can press again once the hiccup passes.
        fix.proof.set_fail_build(false);
        choose_mobile(&fix).await;
        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::AwaitingProof
        );
        assert_eq!(fix.proof.built_requests().len(), 1);
    }

    #[tokio::test]
    async fn qr_mode_sends_a_scannable_block() {
        let fix = fixture(DeliveryMode::Qr);
        join(&fix).await;
        enter(&fix).await;

        let personal: Vec<_> = fix
            .transport
            .sent_messages()
            .into_iter()
            .filter(|m| m.chat == PERSONAL)
            .collect();
        assert!(personal.iter().any(|m| m.monospace));
        assert!(personal
            .iter()
            .any(|m| m.text.contains("https://proof.example/start")));
        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::AwaitingProof
        );
    }

    #[tokio::test]
    async fn valid_proof_admits_and_cleans_up() {
        let fix = fixture(DeliveryMode::Ask);
        fix.profiles.insert("octocat", eligible_snapshot());
        join(&fix).await;
        enter(&fix).await;
        choose_mobile(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::Verified);

        assert_eq!(fix.transport.unrestricted(), vec![(GROUP, USER)]);
        assert!(fix.transport.banned().is_empty());
        assert!(fix
            .transport
            .sent_texts_in(GROUP)
            .iter()
            .any(|t| t.contains("octocat")));
        assert!(fix.store.get(USER).await.is_none());
        assert_eq!(fix.store.live_count().await, 0);
        // Three trail messages died: the group prompt at device choice,
        // the device prompt and the link at settlement.
        assert_eq!(fix.transport.deleted_messages().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_success_webhook_settles_once() {
        let fix = fixture(DeliveryMode::Link);
        fix.profiles.insert("octocat", eligible_snapshot());
        join(&fix).await;
        enter(&fix).await;

        let body = proof_body("octocat", "400");
        assert_eq!(
            fix.router.handle_proof(USER, GROUP, TOKEN, &body).await,
            ProofOutcome::Verified
        );
        assert_eq!(
            fix.router.handle_proof(USER, GROUP, TOKEN, &body).await,
            ProofOutcome::NoSession
        );
        assert_eq!(fix.transport.unrestricted().len(), 1);
    }

    #[tokio::test]
    async fn invalid_proof_bans_for_the_penalty() {
        let fix = fixture(DeliveryMode::Link);
        join(&fix).await;
        enter(&fix).await;
        fix.proof.set_verdict(false);

        let before = now_unix();
        let outcome = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::Rejected);

        let banned = fix.transport.banned();
        assert_eq!(banned.len(), 1);
        let (chat, user, until) = banned[0];
        assert_eq!((chat, user), (GROUP, USER));
        assert!(until >= before + 86_400);
        assert!(fix.store.get(USER).await.is_none());
        assert!(fix
            .transport
            .sent_texts_in(PERSONAL)
            .iter()
            .any(|t| t.contains("declined")));
    }

    #[tokio::test]
    async fn ineligible_profile_is_rejected() {
        let fix = fixture(DeliveryMode::Link);
        let mut snapshot = eligible_snapshot();
        snapshot.public_repos = Some(5); // not strictly above the bar
        fix.profiles.insert("octocat", snapshot);
        join(&fix).await;
        enter(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::Rejected);
        assert_eq!(fix.transport.banned().len(), 1);
        assert!(fix.transport.unrestricted().is_empty());
    }

    #[tokio::test]
    async fn unknown_profile_is_rejected() {
        let fix = fixture(DeliveryMode::Link);
        join(&fix).await;
        enter(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, &proof_body("ghost", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::Rejected);
        assert_eq!(fix.transport.banned().len(), 1);
    }

    #[tokio::test]
    async fn missing_contribution_claim_rejects() {
        // Neither the profile nor the proof carries a contribution count.
        let fix = fixture(DeliveryMode::Link);
        fix.profiles.insert("octocat", eligible_snapshot());
        join(&fix).await;
        enter(&fix).await;

        let context = serde_json::json!({
            "extractedParameters": { "URL_PARAMS_1": "octocat" }
        });
        let body = serde_json::json!({
            "claimData": { "context": context.to_string() }
        })
        .to_string();

        let outcome = fix.router.handle_proof(USER, GROUP, TOKEN, &body).await;
        assert_eq!(outcome, ProofOutcome::Rejected);
    }

    #[tokio::test]
    async fn profile_outage_fails_closed_without_banning() {
        let fix = fixture(DeliveryMode::Link);
        fix.profiles.set_fail(true);
        join(&fix).await;
        enter(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::Rejected);
        assert!(fix.transport.banned().is_empty());
        // Restricted on join, re-asserted on the failure.
        assert_eq!(fix.transport.restricted().len(), 2);
        assert!(fix
            .transport
            .sent_texts_in(PERSONAL)
            .iter()
            .any(|t| t.contains("verifyme_-1001")));
        assert!(fix.store.get(USER).await.is_none());
    }

    #[tokio::test]
    async fn verifier_outage_fails_closed_without_banning() {
        let fix = fixture(DeliveryMode::Link);
        fix.proof.set_fail_verify(true);
        join(&fix).await;
        enter(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::Rejected);
        assert!(fix.transport.banned().is_empty());
        assert!(fix.store.get(USER).await.is_none());
    }

    #[tokio::test]
    async fn unreadable_proof_leaves_the_session_pending() {
        let fix = fixture(DeliveryMode::Link);
        join(&fix).await;
        enter(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, "certainly not json")
            .await;
        assert_eq!(outcome, ProofOutcome::Malformed);
        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::AwaitingProof
        );
        assert!(fix.transport.banned().is_empty());

        // A well-formed retry still lands.
        fix.profiles.insert("octocat", eligible_snapshot());
        let retry = fix
            .router
            .handle_proof(USER, GROUP, TOKEN, &proof_body("octocat", "400"))
            .await;
        assert_eq!(retry, ProofOutcome::Verified);
    }

    #[tokio::test]
    async fn proof_without_a_session_is_ignored() {
        let fix = fixture(DeliveryMode::Link);
        let outcome = fix
            .router
            .handle_proof(USER, GROUP, None, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::NoSession);
        assert!(fix.transport.sent_messages().is_empty());
        assert!(fix.transport.banned().is_empty());
    }

    #[tokio::test]
    async fn proof_for_the_wrong_group_is_ignored() {
        let fix = fixture(DeliveryMode::Link);
        join(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, ChatId(-999), None, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::NoSession);
        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::Restricted
        );
    }

    #[tokio::test]
    async fn proof_with_the_wrong_token_is_refused() {
        let fix = fixture(DeliveryMode::Link);
        fix.profiles.insert("octocat", eligible_snapshot());
        join(&fix).await;
        enter(&fix).await;

        let body = proof_body("octocat", "400");
        let outcome = fix
            .router
            .handle_proof(USER, GROUP, Some("not-the-issued-token"), &body)
            .await;
        assert_eq!(outcome, ProofOutcome::NoSession);
        assert!(fix.transport.unrestricted().is_empty());
        assert_eq!(
            fix.store.get(USER).await.unwrap().state,
            SessionState::AwaitingProof
        );

        // The link the member actually holds still settles.
        assert_eq!(
            fix.router.handle_proof(USER, GROUP, TOKEN, &body).await,
            ProofOutcome::Verified
        );
    }

    #[tokio::test]
    async fn proof_without_the_issued_token_is_refused() {
        let fix = fixture(DeliveryMode::Link);
        join(&fix).await;
        enter(&fix).await;

        let outcome = fix
            .router
            .handle_proof(USER, GROUP, None, &proof_body("octocat", "400"))
            .await;
        assert_eq!(outcome, ProofOutcome::NoSession);
        assert!(fix.transport.banned().is_empty());
        assert_eq!(fix.store.live_count().await, 1);
    }

    #[test]
    fn entry_command_parsing() {
        assert_eq!(
            parse_entry_command("/start verifyme_-1001"),
            EntryCommand::Verify {
                group_chat: ChatId(-1001)
            }
        );
        assert_eq!(
            parse_entry_command("  /start   verifyme_7  "),
            EntryCommand::Verify {
                group_chat: ChatId(7)
            }
        );
        assert_eq!(parse_entry_command("/start"), EntryCommand::Invalid);
        assert_eq!(
            parse_entry_command("/start verifyme_seven"),
            EntryCommand::Invalid
        );
        assert_eq!(parse_entry_command("/start join_7"), EntryCommand::Invalid);
        assert_eq!(
            parse_entry_command("/startle verifyme_7"),
            EntryCommand::Other
        );
        assert_eq!(parse_entry_command("hello"), EntryCommand::Other);
        assert_eq!(parse_entry_command(""), EntryCommand::Other);
    }

    #[test]
    fn device_callback_parsing() {
        assert_eq!(
            parse_device_callback("device:mobile"),
            Some(DeviceKind::Mobile)
        );
        assert_eq!(
            parse_device_callback(" device:desktop "),
            Some(DeviceKind::Desktop)
        );
        assert_eq!(parse_device_callback("device:toaster"), None);
        assert_eq!(parse_device_callback(""), None);
    }
}
