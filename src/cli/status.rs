use super::config::{default_config_path, DoormanConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Check bot health and status
///
/// Queries the running service's health endpoint and displays:
/// - Whether the webhook listener is up
/// - The guarded group
/// - How many verifications are currently pending
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    println!("📊 Doorman Bot Status");
    println!();

    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = DoormanConfig::load(&config_path)?;

    let url = health_url(&config.http.bind_addr);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()?;
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| format!("Bot service unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Health endpoint returned {}", response.status()).into());
    }

    let health: serde_json::Value = response
        .json()
        .await
        .map_err(|e| format!("Malformed health response: {}", e))?;

    println!("  ✅ Bot Status: Running");
    println!("  Guarded group: {}", config.chat.group_chat_id);
    if let Some(live) = health.get("live_sessions").and_then(|v| v.as_u64()) {
        println!("  Pending verifications: {}", live);
    }

    Ok(())
}

/// Turn the listener bind address into a queryable URL.
///
/// A wildcard bind is reachable locally but not routable as written.
fn health_url(bind_addr: &str) -> String {
    let addr = match bind_addr.strip_prefix("0.0.0.0") {
        Some(rest) => format!("127.0.0.1{}", rest),
        None => bind_addr.to_string(),
    };
    format!("http://{}/health", addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_health_url_rewrites_wildcard_bind() {
        assert_eq!(health_url("0.0.0.0:8080"), "http://127.0.0.1:8080/health");
    }

    #[test]
    fn test_health_url_keeps_explicit_host() {
        assert_eq!(health_url("10.0.0.5:9000"), "http://10.0.0.5:9000/health");
    }

    #[tokio::test]
    async fn test_status_reports_unreachable_service() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let contents = r#"
[chat]
group_chat_id = -1001
entry_link_base = "https://t.me/doorman_bot?start="

[proof]
app_id = "app"
app_secret = "secret"
provider_id = "provider"
verifier_base_url = "http://127.0.0.1:1"
callback_base_url = "http://127.0.0.1:1"

[http]
bind_addr = "127.0.0.1:1"
"#;
        std::fs::write(&config_path, contents).unwrap();

        let result = execute(Some(config_path.to_string_lossy().to_string())).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unreachable"));
    }
}
