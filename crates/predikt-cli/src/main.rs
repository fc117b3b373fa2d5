//! Predikt CLI - operator commands
//!
//! Usage:
//!   predikt provision
//!   predikt inspect-token <token>

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use predikt_api::auth::{SecretSlot, SigningSecret, TokenConfig, TokenService};
use predikt_api::state::AppState;
use predikt_core::{AppConfig, ConfigKey, ConfigStore, FileConfigStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "predikt")]
#[command(about = "Credential and session token service CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables take precedence)
    #[arg(long, global = true, env = "PREDIKT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the startup configuration steps and report the result
    Provision,
    /// Validate a token against the provisioned signing secret
    InspectToken {
        /// Encoded token
        token: String,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            AppConfig::from_file(path)?.with_env_override()?
        }
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn provision(config: AppConfig) -> anyhow::Result<()> {
    let run_config = FileConfigStore::new(&config.storage.run_config_path);

    AppState::bootstrap(config)
        .await
        .context("Startup configuration failed")?;

    let database = run_config
        .get(ConfigKey::DatabaseLocation)
        .await?
        .unwrap_or_default();

    println!("Signing secret:      ready");
    println!("Run configuration:   {}", run_config.path().display());
    println!("Credential database: {database}");
    Ok(())
}

async fn inspect_token(config: AppConfig, token: &str) -> anyhow::Result<()> {
    let run_config = FileConfigStore::new(&config.storage.run_config_path);
    let Some(secret) = run_config.get(ConfigKey::TokenSecret).await? else {
        bail!(
            "No signing secret in {}, run `predikt provision` first",
            run_config.path().display()
        );
    };

    let slot = SecretSlot::preloaded(SigningSecret::new(secret.into_bytes()));
    let tokens = TokenService::new(TokenConfig::from(&config.auth), Arc::new(slot));

    match tokens.validate(token) {
        Ok(claims) => {
            tracing::info!(subject = %claims.sub, exp = claims.exp, "Token accepted");
            println!("{}", serde_json::to_string_pretty(&claims)?);
            Ok(())
        }
        Err(rejection) => {
            tracing::warn!(code = rejection.code(), "Token rejected");
            bail!("{} ({})", rejection, rejection.code())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Provision => provision(config).await,
        Commands::InspectToken { token } => inspect_token(config, &token).await,
    }
}
