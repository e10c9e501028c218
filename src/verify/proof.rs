//! Proof Protocol Seam
//!
//! Building the verification request a member opens, and checking the proof
//! the provider posts back. Cryptographic validation is delegated to a
//! verifier service over HTTP; this module only parses the payload's claim
//! context to recover the claimed identity. Proof SDKs percent-encode the
//! posted body, so decoding happens here too.

use crate::chat::{ChatId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default timeout for verifier service requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A verification request ready to hand to the member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    /// URL the member opens to produce the proof
    pub url: String,
    /// Random token tying the webhook callback to this request
    pub session_token: String,
}

/// Identity claims recovered from a submitted proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofIdentity {
    pub username: String,
    /// Yearly contribution count as claimed by the provider, raw
    pub contributions: Option<String>,
}

/// Result type for proof operations
pub type ProofResult<T> = Result<T, ProofError>;

/// Proof protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("malformed proof payload: {0}")]
    Malformed(String),

    #[error("proof service unreachable: {0}")]
    Unreachable(String),

    #[error("proof request failed: {0}")]
    RequestFailed(String),

    #[error("invalid proof service response: {0}")]
    InvalidResponse(String),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Proof-issuance and proof-verification abstraction
#[async_trait]
pub trait ProofProtocol: Send + Sync + 'static {
    /// Build the verification request for one member and group
    async fn build_request_url(
        &self,
        user: UserId,
        group_chat: ChatId,
    ) -> ProofResult<ProofRequest>;

    /// Check a submitted proof's validity. `Ok(false)` is a clean "invalid"
    /// verdict; errors mean the check itself could not run.
    async fn verify(&self, raw_proof: &str) -> ProofResult<bool>;
}

// ============================================================================
// Payload parsing (local, no cryptography)
// ============================================================================

/// Wire shape of the posted proof (only the fields this crate reads)
#[derive(Debug, Deserialize)]
struct RawProof {
    #[serde(rename = "claimData")]
    claim_data: ClaimData,
}

#[derive(Debug, Deserialize)]
struct ClaimData {
    /// JSON-in-a-string: the provider nests the extracted parameters here
    context: String,
}

#[derive(Debug, Deserialize)]
struct ClaimContext {
    #[serde(rename = "extractedParameters", default)]
    extracted_parameters: HashMap<String, String>,
}

/// Normalize a webhook body into proof JSON text.
///
/// Plain JSON passes through; otherwise one round of percent-decoding is
/// attempted before giving up.
pub fn decode_proof_body(body: &str) -> ProofResult<String> {
    let trimmed = body.trim();
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }
    if let Some(decoded) = percent_decode(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&decoded).is_ok() {
            return Ok(decoded);
        }
    }
    Err(ProofError::Malformed(
        "body is neither JSON nor percent-encoded JSON".to_string(),
    ))
}

/// Recover the claimed identity from decoded proof JSON.
///
/// The provider names the username parameter `URL_PARAMS_1`; some provider
/// versions use `username`. Either is accepted.
pub fn extract_identity(raw_proof: &str) -> ProofResult<ProofIdentity> {
    let proof: RawProof = serde_json::from_str(raw_proof)
        .map_err(|e| ProofError::Malformed(format!("proof json: {e}")))?;
    let context: ClaimContext = serde_json::from_str(&proof.claim_data.context)
        .map_err(|e| ProofError::Malformed(format!("claim context: {e}")))?;

    let params = context.extracted_parameters;
    let username = params
        .get("URL_PARAMS_1")
        .or_else(|| params.get("username"))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProofError::Malformed("no username in extracted parameters".to_string()))?
        .to_string();

    Ok(ProofIdentity {
        username,
        contributions: params.get("contributions").cloned(),
    })
}

/// Percent-decode per `decodeURIComponent` semantics ('+' stays literal).
/// Returns `None` on truncated escapes or invalid UTF-8.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// ============================================================================
// Verifier service client
// ============================================================================

/// Connection settings for the verifier service
#[derive(Debug, Clone)]
pub struct ProofServiceConfig {
    pub verifier_base_url: String,
    pub app_id: String,
    pub app_secret: String,
    pub provider_id: String,
    /// Base URL of this process, for the webhook callback
    pub callback_base_url: String,
    /// Where the proof app sends the member afterwards (group invite)
    pub redirect_url: String,
}

/// `ProofProtocol` backed by a verifier service.
///
/// `POST {verifier}/sessions` mints the request URL; `POST {verifier}/verify`
/// returns the validity verdict. The app secret rides in a bearer header, so
/// no proof cryptography runs in this process.
pub struct HttpProofService {
    http_client: reqwest::Client,
    config: ProofServiceConfig,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    app_id: &'a str,
    provider_id: &'a str,
    callback_url: String,
    redirect_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    request_url: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest {
    proof: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
}

impl HttpProofService {
    pub fn new(config: ProofServiceConfig) -> ProofResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProofError::ClientBuild(e.to_string()))?;
        Ok(Self {
            http_client,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.verifier_base_url.trim_end_matches('/'),
            path
        )
    }

    fn callback_url(&self, user: UserId, group_chat: ChatId, token: &str) -> String {
        format!(
            "{}/receive-proofs?user_id={}&chat_id={}&token={}",
            self.config.callback_base_url.trim_end_matches('/'),
            user,
            group_chat,
            token
        )
    }
}

fn map_request_error(e: reqwest::Error) -> ProofError {
    if e.is_timeout() {
        ProofError::Unreachable(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ProofError::Unreachable(format!("connection failed: {e}"))
    } else {
        ProofError::RequestFailed(e.to_string())
    }
}

#[async_trait]
impl ProofProtocol for HttpProofService {
    async fn build_request_url(
        &self,
        user: UserId,
        group_chat: ChatId,
    ) -> ProofResult<ProofRequest> {
        let token = hex::encode(rand::random::<[u8; 16]>());
        let body = SessionRequest {
            app_id: &self.config.app_id,
            provider_id: &self.config.provider_id,
            callback_url: self.callback_url(user, group_chat, &token),
            redirect_url: &self.config.redirect_url,
        };

        let response = self
            .http_client
            .post(self.endpoint("sessions"))
            .bearer_auth(&self.config.app_secret)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        if !response.status().is_success() {
            return Err(ProofError::RequestFailed(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let session: SessionResponse = response.json().await.map_err(|e| {
            ProofError::InvalidResponse(format!("failed to parse session response: {e}"))
        })?;

        Ok(ProofRequest {
            url: session.request_url,
            session_token: token,
        })
    }

    async fn verify(&self, raw_proof: &str) -> ProofResult<bool> {
        let proof: serde_json::Value = serde_json::from_str(raw_proof)
            .map_err(|e| ProofError::Malformed(format!("proof json: {e}")))?;

        let response = self
            .http_client
            .post(self.endpoint("verify"))
            .bearer_auth(&self.config.app_secret)
            .json(&VerifyRequest { proof })
            .send()
            .await
            .map_err(map_request_error)?;

        if !response.status().is_success() {
            return Err(ProofError::RequestFailed(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let verdict: VerifyResponse = response.json().await.map_err(|e| {
            ProofError::InvalidResponse(format!("failed to parse verify response: {e}"))
        })?;
        Ok(verdict.valid)
    }
}

// ============================================================================
// Mock protocol for tests
// ============================================================================

/// Mock proof protocol for tests
#[derive(Clone, Default)]
pub struct MockProofProtocol {
    state: Arc<Mutex<MockProofState>>,
}

struct MockProofState {
    verdict: bool,
    fail_build: bool,
    fail_verify: bool,
    built: Vec<(UserId, ChatId)>,
}

impl Default for MockProofState {
    fn default() -> Self {
        Self {
            verdict: true,
            fail_build: false,
            fail_verify: false,
            built: Vec::new(),
        }
    }
}

impl MockProofProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the verdict `verify` reports
    pub fn set_verdict(&self, valid: bool) {
        self.state.lock().unwrap().verdict = valid;
    }

    pub fn set_fail_build(&self, fail: bool) {
        self.state.lock().unwrap().fail_build = fail;
    }

    pub fn set_fail_verify(&self, fail: bool) {
        self.state.lock().unwrap().fail_verify = fail;
    }

    /// Requests built so far, in order
    pub fn built_requests(&self) -> Vec<(UserId, ChatId)> {
        self.state.lock().unwrap().built.clone()
    }
}

#[async_trait]
impl ProofProtocol for MockProofProtocol {
    async fn build_request_url(
        &self,
        user: UserId,
        group_chat: ChatId,
    ) -> ProofResult<ProofRequest> {
        let mut state = self.state.lock().unwrap();
        if state.fail_build {
            return Err(ProofError::RequestFailed(
                "injected build failure".to_string(),
            ));
        }
        state.built.push((user, group_chat));
        Ok(ProofRequest {
            url: format!("https://proof.example/start?user={user}&chat={group_chat}"),
            session_token: "mock-token".to_string(),
        })
    }

    async fn verify(&self, raw_proof: &str) -> ProofResult<bool> {
        let state = self.state.lock().unwrap();
        if state.fail_verify {
            return Err(ProofError::Unreachable(
                "injected verify failure".to_string(),
            ));
        }
        if serde_json::from_str::<serde_json::Value>(raw_proof).is_err() {
            return Err(ProofError::Malformed("proof json".to_string()));
        }
        Ok(state.verdict)
    }
}
