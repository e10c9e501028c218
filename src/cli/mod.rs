use clap::{Parser, Subcommand};

pub mod config;
pub mod init_config;
pub mod run;
pub mod status;
pub mod version;

#[derive(Parser)]
#[command(name = "doorman")]
#[command(author = "Doorman Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verification gatekeeper bot for closed chat groups", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot service
    Run {
        /// Path to config file (default: ~/.local/share/doorman/config.toml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Check bot health and status
    Status {
        /// Path to config file (default: ~/.local/share/doorman/config.toml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Write a commented configuration template
    InitConfig {
        /// Where to write the template (default: ~/.local/share/doorman/config.toml)
        #[arg(long)]
        path: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config } => run::execute(config).await,
        Commands::Status { config } => status::execute(config).await,
        Commands::InitConfig { path, force } => init_config::execute(path, force),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
