use super::config::{default_config_path, DoormanConfig, IngestionMode};
use doorman::chat::{
    ChatId, EnforcementActions, EventSource, MockChatTransport, PollingSource, PushSource,
};
use doorman::http::{self, AppState};
use doorman::router::{EventRouter, RouterConfig};
use doorman::session::{SessionStore, TimeoutSweeper};
use doorman::verify::{GithubProfileClient, HttpProofService};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Run the bot service
///
/// This command starts the gatekeeper: the chat event loop that restricts
/// joining members, the proof webhook listener, and the timeout sweeper
/// that bans members who never finish verifying.
///
/// ## Configuration Loading
///
/// Configuration is loaded from one of these sources (in order of precedence):
/// 1. `--config` flag if provided
/// 2. Default config at `~/.local/share/doorman/config.toml`
///
/// If the config file doesn't exist, a commented template is written and
/// the command returns so the operator can fill in the group id and the
/// verifier credentials.
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🚪 Starting Doorman bot service...");
    println!();

    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    println!("Config: {}", config_path.display());

    if !config_path.exists() {
        println!();
        println!("📝 No config file found. Creating default configuration...");
        DoormanConfig::create_default(&config_path)?;
        println!("   Created: {}", config_path.display());
        println!("   Fill in [chat] and [proof], then run again.");
        return Ok(());
    }

    let config = DoormanConfig::load(&config_path)?;

    // RUST_LOG wins over the config file when set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    serve_until(config, shutdown_signal()).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for Ctrl+C: {}", e),
    }
}

/// Wire the service together and run it until `shutdown` resolves.
///
/// Split from [`execute`] so tests can drive the loop with their own
/// shutdown future instead of a real signal.
pub async fn serve_until(
    config: DoormanConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let group_chat = ChatId(config.chat.group_chat_id);
    let transport = MockChatTransport::new();
    let store = Arc::new(SessionStore::new());

    let proof = HttpProofService::new(config.proof.service_config())?;
    let profiles = GithubProfileClient::new(
        &config.profile.github_api_base,
        &config.profile.user_agent,
        config.profile.request_window()?,
    )?;

    let router = Arc::new(EventRouter::new(
        store.clone(),
        transport.clone(),
        proof,
        profiles,
        RouterConfig {
            group_chat,
            entry_link_base: config.chat.entry_link_base.clone(),
            delivery: config.verification.delivery,
            penalty: config.verification.penalty_duration()?,
            thresholds: config.policy.thresholds(),
        },
    ));

    let sweeper = TimeoutSweeper::new(
        store.clone(),
        EnforcementActions::new(transport.clone(), group_chat),
        transport.clone(),
        config.verification.timeout_window()?,
        config.verification.penalty_duration()?,
        config.verification.sweep_every()?,
    );
    tokio::spawn(sweeper.run());

    let http_state = Arc::new(AppState {
        router: router.clone(),
        store: store.clone(),
    });
    let bind_addr = config.http.bind_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = http::serve(&bind_addr, http_state).await {
            error!(error = %e, "webhook listener failed");
        }
    });

    let mut source: Box<dyn EventSource> = match config.chat.ingestion {
        IngestionMode::Poll => Box::new(PollingSource::new(
            transport.clone(),
            config.chat.poll_every()?,
        )),
        IngestionMode::Push => {
            // The binary has no in-process producer; embedders feed the
            // channel through the library. Dropping the sender here makes
            // the source note the closed channel once and park, which
            // leaves the webhook and sweeper as the active surfaces.
            let (_feed, source) = PushSource::channel(64);
            Box::new(source)
        }
    };

    info!(
        group_chat = config.chat.group_chat_id,
        delivery = ?config.verification.delivery,
        ingestion = ?config.chat.ingestion,
        "doorman gatekeeper running"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("doorman shutting down");
                break;
            }
            batch = source.next_batch() => match batch {
                Ok(events) => {
                    for event in events {
                        router.handle_event(event).await;
                    }
                }
                Err(e) => {
                    // Transient transport trouble; the next tick retries.
                    error!(error = %e, "event source failed");
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> DoormanConfig {
        let contents = r#"
[chat]
group_chat_id = -1001
entry_link_base = "https://t.me/doorman_bot?start="
poll_interval = "10ms"

[proof]
app_id = "app"
app_secret = "secret"
provider_id = "provider"
verifier_base_url = "http://127.0.0.1:1"
callback_base_url = "http://127.0.0.1:1"

[http]
bind_addr = "127.0.0.1:0"
"#;
        toml::from_str(contents).unwrap()
    }

    #[tokio::test]
    async fn test_serve_until_stops_on_shutdown() {
        let config = test_config();

        let result = serve_until(config, async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_serve_until_with_push_ingestion() {
        let mut config = test_config();
        config.chat.ingestion = IngestionMode::Push;

        let result = serve_until(config, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_serve_until_rejects_a_bad_user_agent() {
        let mut config = test_config();
        config.profile.user_agent = "doorman\nbot".to_string();
        // Free-form in the TOML, so validation lets it through; the
        // header rules bite when the profile client is built.
        assert!(config.validate().is_ok());

        let result = serve_until(config, async {}).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_creates_template_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let result = execute(Some(config_path.to_string_lossy().to_string())).await;

        assert!(result.is_ok());
        assert!(config_path.exists());
        let contents = std::fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("[chat]"));
        assert!(contents.contains("[proof]"));
    }

    #[tokio::test]
    async fn test_execute_rejects_broken_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "not toml at all [").unwrap();

        let result = execute(Some(config_path.to_string_lossy().to_string())).await;

        assert!(result.is_err());
    }
}
