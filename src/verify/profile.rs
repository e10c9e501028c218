//! Profile Lookup
//!
//! The external reputation source consulted before admission. Only the
//! snapshot crosses into the policy, and it is never persisted beyond the
//! decision.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default connection timeout for profile requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Attributes the eligibility policy consumes.
///
/// Raw where the upstream is raw: the contribution count arrives as a string
/// and is parsed by the policy, which treats garbage as ineligible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// RFC 3339 account creation timestamp
    pub account_created_at: Option<String>,
    pub public_repos: Option<u64>,
    /// Contribution count over the last year, string-typed at the source
    pub contributions_last_year: Option<String>,
}

/// Result type for profile operations
pub type ProfileResult<T> = Result<T, ProfileError>;

/// Profile lookup errors
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("profile service unreachable: {0}")]
    Unreachable(String),

    #[error("profile request failed: {0}")]
    RequestFailed(String),

    #[error("invalid profile response: {0}")]
    InvalidResponse(String),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// External profile source abstraction
#[async_trait]
pub trait ProfileLookup: Send + Sync + 'static {
    /// Fetch the snapshot for a username
    async fn fetch_profile(&self, username: &str) -> ProfileResult<ProfileSnapshot>;
}

/// GitHub REST implementation.
///
/// `GET {api_base}/users/{username}` supplies the creation date and public
/// repo count. The yearly contribution count is not exposed by this
/// endpoint; the router fills it in from the proof's extracted parameters.
pub struct GithubProfileClient {
    http_client: reqwest::Client,
    api_base: String,
}

/// The fields this crate reads from the user response.
#[derive(Debug, Deserialize)]
struct GithubUser {
    created_at: Option<String>,
    public_repos: Option<u64>,
}

impl GithubProfileClient {
    /// Errors when the client cannot be built; the user agent is free-form
    /// config and reqwest enforces header-value rules only here.
    pub fn new(api_base: &str, user_agent: &str, timeout: Duration) -> ProfileResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProfileError::ClientBuild(e.to_string()))?;
        Ok(Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProfileLookup for GithubProfileClient {
    async fn fetch_profile(&self, username: &str) -> ProfileResult<ProfileSnapshot> {
        let url = format!("{}/users/{}", self.api_base, username);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProfileError::Unreachable(format!("request timed out: {e}"))
            } else if e.is_connect() {
                ProfileError::Unreachable(format!("connection failed: {e}"))
            } else {
                ProfileError::RequestFailed(e.to_string())
            }
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProfileError::NotFound(username.to_string()));
        }
        if !response.status().is_success() {
            return Err(ProfileError::RequestFailed(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let user: GithubUser = response.json().await.map_err(|e| {
            ProfileError::InvalidResponse(format!("failed to parse user response: {e}"))
        })?;

        Ok(ProfileSnapshot {
            account_created_at: user.created_at,
            public_repos: user.public_repos,
            contributions_last_year: None,
        })
    }
}

/// Mock profile source for tests
#[derive(Clone, Default)]
pub struct MockProfileLookup {
    state: Arc<Mutex<MockLookupState>>,
}

#[derive(Default)]
struct MockLookupState {
    profiles: HashMap<String, ProfileSnapshot>,
    fail: bool,
    fetched: Vec<String>,
}

impl MockProfileLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the snapshot returned for a username
    pub fn insert(&self, username: &str, snapshot: ProfileSnapshot) {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(username.to_string(), snapshot);
    }

    /// Make every fetch fail with a transport error
    pub fn set_fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    /// Usernames fetched so far, in order
    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }
}

#[async_trait]
impl ProfileLookup for MockProfileLookup {
    async fn fetch_profile(&self, username: &str) -> ProfileResult<ProfileSnapshot> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(username.to_string());
        if state.fail {
            return Err(ProfileError::RequestFailed(
                "injected profile failure".to_string(),
            ));
        }
        state
            .profiles
            .get(username)
            .cloned()
            .ok_or_else(|| ProfileError::NotFound(username.to_string()))
    }
}
