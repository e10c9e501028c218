//! Configuration management for the Doorman bot
//!
//! Operator settings live in a TOML file. Everything with a sane default
//! is defaulted, so a minimal config only needs the `[chat]` identity of
//! the guarded group and the `[proof]` verifier credentials.

use doorman::router::DeliveryMode;
use doorman::verify::{EligibilityThresholds, ProofServiceConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How chat events reach the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionMode {
    /// Poll the transport on a fixed interval
    #[default]
    Poll,
    /// Receive events pushed through a channel by an embedding integration
    Push,
}

/// Doorman bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoormanConfig {
    /// The guarded group and its event feed
    pub chat: ChatConfig,

    /// Session lifecycle timing and request delivery
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Admission thresholds applied to the proven profile
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Proof verifier credentials and endpoints
    pub proof: ProofConfig,

    /// Profile lookups against the GitHub API
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Webhook listener
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chat-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Numeric chat id of the group this process guards
    pub group_chat_id: i64,

    /// Deep-link prefix the entry command is appended to,
    /// e.g. "https://t.me/doorman_bot?start="
    pub entry_link_base: String,

    /// Transport backend ("memory" is the only built-in; real chat
    /// networks plug in through the library's ChatTransport trait)
    #[serde(default = "default_transport")]
    pub transport: String,

    /// How events arrive: poll the transport or receive pushes
    #[serde(default)]
    pub ingestion: IngestionMode,

    /// Poll cadence when ingestion is "poll" (e.g. "2s")
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

/// Session lifecycle configuration
///
/// Durations are humantime strings ("30m", "24h", "90s") so the file
/// reads the way operators think about them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// How long a member may stay pending before the sweeper bans them
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// How often expired sessions are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,

    /// Ban duration for rejected and timed-out members
    #[serde(default = "default_penalty")]
    pub penalty: String,

    /// "ask" for a device prompt, "link" or "qr" to skip it
    #[serde(default)]
    pub delivery: DeliveryMode,
}

/// Admission policy thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Account must be at least this many whole calendar months old
    #[serde(default = "default_min_account_age_months")]
    pub min_account_age_months: u32,

    /// Public repository count must exceed this
    #[serde(default = "default_min_public_repos")]
    pub min_public_repos: u64,

    /// Yearly contribution count must exceed this
    #[serde(default = "default_min_contributions")]
    pub min_contributions: u64,
}

/// Proof verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    /// Application id issued by the verifier service
    pub app_id: String,

    /// Application secret, sent as a bearer token
    pub app_secret: String,

    /// Which identity provider the proof must come from
    pub provider_id: String,

    /// Verifier endpoint that mints request URLs and validates proofs
    pub verifier_base_url: String,

    /// Public base URL of this process; proof webhooks arrive at
    /// `<callback_base_url>/receive-proofs`
    pub callback_base_url: String,

    /// Where the proof app sends the member afterwards (optional)
    #[serde(default)]
    pub redirect_url: String,
}

/// GitHub profile lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (humantime string)
    #[serde(default = "default_profile_timeout")]
    pub request_timeout: String,
}

/// Webhook listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address the proof webhook listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_transport() -> String {
    "memory".to_string()
}

fn default_poll_interval() -> String {
    "2s".to_string()
}

fn default_timeout() -> String {
    "30m".to_string()
}

fn default_sweep_interval() -> String {
    "1m".to_string()
}

fn default_penalty() -> String {
    "24h".to_string()
}

fn default_min_account_age_months() -> u32 {
    EligibilityThresholds::default().min_account_age_months
}

fn default_min_public_repos() -> u64 {
    EligibilityThresholds::default().min_public_repos
}

fn default_min_contributions() -> u64 {
    EligibilityThresholds::default().min_contributions
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    format!("doorman/{}", env!("CARGO_PKG_VERSION"))
}

fn default_profile_timeout() -> String {
    "10s".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            sweep_interval: default_sweep_interval(),
            penalty: default_penalty(),
            delivery: DeliveryMode::default(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_account_age_months: default_min_account_age_months(),
            min_public_repos: default_min_public_repos(),
            min_contributions: default_min_contributions(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            github_api_base: default_github_api_base(),
            user_agent: default_user_agent(),
            request_timeout: default_profile_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    humantime::parse_duration(value)
        .map_err(|e| format!("Invalid duration '{}' for {}: {}", value, field, e).into())
}

impl ChatConfig {
    pub fn poll_every(&self) -> Result<Duration, Box<dyn std::error::Error>> {
        parse_duration_field("chat.poll_interval", &self.poll_interval)
    }
}

impl VerificationConfig {
    pub fn timeout_window(&self) -> Result<Duration, Box<dyn std::error::Error>> {
        parse_duration_field("verification.timeout", &self.timeout)
    }

    pub fn sweep_every(&self) -> Result<Duration, Box<dyn std::error::Error>> {
        parse_duration_field("verification.sweep_interval", &self.sweep_interval)
    }

    pub fn penalty_duration(&self) -> Result<Duration, Box<dyn std::error::Error>> {
        parse_duration_field("verification.penalty", &self.penalty)
    }
}

impl PolicyConfig {
    pub fn thresholds(&self) -> EligibilityThresholds {
        EligibilityThresholds {
            min_account_age_months: self.min_account_age_months,
            min_public_repos: self.min_public_repos,
            min_contributions: self.min_contributions,
        }
    }
}

impl ProofConfig {
    pub fn service_config(&self) -> ProofServiceConfig {
        ProofServiceConfig {
            verifier_base_url: self.verifier_base_url.clone(),
            app_id: self.app_id.clone(),
            app_secret: self.app_secret.clone(),
            provider_id: self.provider_id.clone(),
            callback_base_url: self.callback_base_url.clone(),
            redirect_url: self.redirect_url.clone(),
        }
    }
}

impl ProfileConfig {
    pub fn request_window(&self) -> Result<Duration, Box<dyn std::error::Error>> {
        parse_duration_field("profile.request_timeout", &self.request_timeout)
    }
}

impl DoormanConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: DoormanConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Reject configurations that would otherwise fail at an awkward time
    /// later (mid-sweep, first poll, first webhook).
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.chat.group_chat_id == 0 {
            return Err("chat.group_chat_id must be set to the guarded group's id".into());
        }
        if self.chat.entry_link_base.is_empty() {
            return Err("chat.entry_link_base must be set (deep-link prefix)".into());
        }
        if self.chat.transport != "memory" {
            return Err(format!(
                "Unsupported transport '{}': this binary ships the in-memory transport only",
                self.chat.transport
            )
            .into());
        }

        for (field, value) in [
            ("proof.app_id", &self.proof.app_id),
            ("proof.app_secret", &self.proof.app_secret),
            ("proof.provider_id", &self.proof.provider_id),
            ("proof.verifier_base_url", &self.proof.verifier_base_url),
            ("proof.callback_base_url", &self.proof.callback_base_url),
        ] {
            if value.is_empty() {
                return Err(format!("{} must be set", field).into());
            }
        }

        // Durations are strings in the file; check them all here
        self.chat.poll_every()?;
        self.verification.timeout_window()?;
        self.verification.sweep_every()?;
        self.verification.penalty_duration()?;
        self.profile.request_window()?;

        Ok(())
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml() -> String {
        format!(
            r#"# Doorman Bot Configuration (Operator Settings)
#
# New members of the guarded group are muted on join and must prove a live
# GitHub identity before they may post. This file controls which group is
# guarded, the proof verifier credentials, and the admission thresholds.

[chat]
# Numeric chat id of the group to guard (required)
group_chat_id = 0

# Deep-link prefix for the verification entry command (required).
# The bot appends "verifyme_<group id>" to this.
entry_link_base = "https://t.me/doorman_bot?start="

# Transport backend. "memory" is the only built-in; real chat networks
# plug in through the library's ChatTransport trait.
transport = "memory"

# Event ingestion: "poll" the transport, or "push" via an embedding channel
ingestion = "poll"
poll_interval = "2s"

[verification]
# Pending members are banned after this long without a settled proof
timeout = "30m"

# How often expired sessions are swept
sweep_interval = "1m"

# Rejected and timed-out members may rejoin after this long
penalty = "24h"

# "ask" prompts for phone/computer, "link" always sends a link,
# "qr" always sends a scannable code
delivery = "ask"

[policy]
# Account must be at least this many whole calendar months old
min_account_age_months = {min_age}

# Public repository count must exceed this
min_public_repos = {min_repos}

# Yearly contribution count must exceed this
min_contributions = {min_contributions}

[proof]
# Credentials issued by the proof verifier service (required)
app_id = ""
app_secret = ""
provider_id = ""

# Verifier endpoint that mints request URLs and validates proofs (required)
verifier_base_url = ""

# Public base URL of this process; proof webhooks arrive at
# <callback_base_url>/receive-proofs (required)
callback_base_url = ""

# Where the proof app sends the member once they finish (optional)
redirect_url = ""

[profile]
github_api_base = "https://api.github.com"
user_agent = "{user_agent}"
request_timeout = "10s"

[http]
# Webhook listener address
bind_addr = "0.0.0.0:8080"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"
"#,
            min_age = default_min_account_age_months(),
            min_repos = default_min_public_repos(),
            min_contributions = default_min_contributions(),
            user_agent = default_user_agent(),
        )
    }

    /// Create and save a default configuration file
    ///
    /// The template is not loadable as-is: the group id and the proof
    /// credentials are placeholders the operator must fill in.
    pub fn create_default(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml();

        // Create parent directory if needed
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Get the default config file path
///
/// - Linux: ~/.local/share/doorman/config.toml
pub fn default_config_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("doorman")
        .join("config.toml")
}
