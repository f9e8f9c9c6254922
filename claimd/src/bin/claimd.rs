use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use claimd::{api, ClaimService};
use claims::{Config, DiscordConfig, SecretWords};

#[derive(Parser)]
#[command(name = "claimd", about = "Reward-claim backend service")]
struct Cli {
    #[arg(long, default_value = "claims.db")]
    db_path: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8090")]
    api_addr: String,
    #[arg(long, env = "ADMIN_API_KEY", default_value = "local-dev-token", hide_env_values = true)]
    admin_token: String,
    /// Comma-separated list of the 12 ordered secret words.
    #[arg(long, env = "SECRET_KEYS", hide_env_values = true)]
    secret_keys: String,
    #[arg(long, env = "CLAIM_TOKEN_SECRET", default_value = "local-dev-token-secret", hide_env_values = true)]
    token_secret: String,
    #[arg(long, default_value_t = 15)]
    token_ttl_minutes: i64,
    #[arg(long, default_value_t = 90)]
    claim_window_days: i64,
    #[arg(long, default_value_t = 365)]
    membership_days: i64,
    #[arg(long, default_value_t = 1)]
    max_key_attempts: u32,
    #[arg(long, env = "REWARD_SIGNER_KEY", hide_env_values = true)]
    signer_key: Option<String>,
    #[arg(long, env = "REWARD_CONTRACT_ADDRESS")]
    contract_address: Option<String>,
    #[arg(long, env = "STRIPE_SECRET_KEY", hide_env_values = true)]
    stripe_secret_key: Option<String>,
    #[arg(long, env = "STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
    stripe_webhook_secret: Option<String>,
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    notify_webhook: Option<String>,
    #[arg(long, env = "DISCORD_CLIENT_ID")]
    discord_client_id: Option<String>,
    #[arg(long, env = "DISCORD_CLIENT_SECRET", hide_env_values = true)]
    discord_client_secret: Option<String>,
    #[arg(long, env = "DISCORD_REDIRECT_URI")]
    discord_redirect_uri: Option<String>,
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    discord_bot_token: Option<String>,
    #[arg(long, env = "DISCORD_GUILD_ID")]
    discord_guild_id: Option<String>,
    #[arg(long, env = "DISCORD_ROLE_SOLO_ID")]
    discord_role_solo: Option<String>,
    #[arg(long, env = "DISCORD_ROLE_PRO_ID")]
    discord_role_pro: Option<String>,
    #[arg(long, env = "DISCORD_ROLE_VIP_ID")]
    discord_role_vip: Option<String>,
}

impl Cli {
    fn discord_config(&self) -> Option<DiscordConfig> {
        Some(DiscordConfig {
            client_id: self.discord_client_id.clone()?,
            client_secret: self.discord_client_secret.clone()?,
            redirect_uri: self.discord_redirect_uri.clone()?,
            bot_token: self.discord_bot_token.clone()?,
            guild_id: self.discord_guild_id.clone()?,
            role_solo: self.discord_role_solo.clone()?,
            role_pro: self.discord_role_pro.clone()?,
            role_vip: self.discord_role_vip.clone()?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let secret_words =
        SecretWords::from_csv(&cli.secret_keys).context("invalid secret word list")?;

    let mut config = Config::with_db_path(&cli.db_path);
    config.api_addr = cli.api_addr.parse().context("invalid api address")?;
    config.admin_token = cli.admin_token.clone();
    config.token_secret = cli.token_secret.clone();
    config.token_ttl_minutes = cli.token_ttl_minutes;
    config.claim_window_days = cli.claim_window_days;
    config.membership_days = cli.membership_days;
    config.max_key_attempts = cli.max_key_attempts;
    config.signer_key = cli.signer_key.clone();
    config.contract_address = cli.contract_address.clone();
    config.stripe_secret_key = cli.stripe_secret_key.clone();
    config.stripe_webhook_secret = cli.stripe_webhook_secret.clone();
    config.notify_webhook = cli.notify_webhook.clone();
    config.discord = cli.discord_config();

    let service = ClaimService::new(config, secret_words).context("failed to start service")?;
    let api_task = tokio::spawn(api::serve(service.clone()));
    info!(api = %service.api_addr(), "claimd online");

    signal::ctrl_c()
        .await
        .context("failed to install signal handler")?;
    info!("shutting down");
    api_task.abort();
    Ok(())
}
