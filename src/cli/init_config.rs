use super::config::{default_config_path, DoormanConfig};
use std::path::PathBuf;

/// Write a commented configuration template
///
/// Refuses to clobber an existing file unless `--force` is given. The
/// template is not runnable as written: the operator must fill in the
/// guarded group id and the proof verifier credentials.
pub fn execute(path: Option<String>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.map(PathBuf::from).unwrap_or_else(default_config_path);

    if path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    DoormanConfig::create_default(&path)?;

    println!("📝 Wrote config template: {}", path.display());
    println!("   Fill in [chat] and [proof], then start the bot with `doorman run`.");

    Ok(())
}
