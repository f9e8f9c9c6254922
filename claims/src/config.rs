use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::Duration;

use crate::tier::Tier;

/// Process-wide configuration, loaded once at startup. Holds secrets
/// (signer key, token secret, webhook secret, admin token), so it
/// intentionally does not implement `Debug`.
#[derive(Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub api_addr: SocketAddr,
    pub admin_token: String,
    pub token_secret: String,
    pub token_ttl_minutes: i64,
    pub claim_window_days: i64,
    pub membership_days: i64,
    pub max_key_attempts: u32,
    pub signer_key: Option<String>,
    pub contract_address: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub notify_webhook: Option<String>,
    pub discord: Option<DiscordConfig>,
}

/// Discord OAuth + bot credentials for account linking and role management.
#[derive(Clone)]
pub struct DiscordConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub bot_token: String,
    pub guild_id: String,
    pub role_solo: String,
    pub role_pro: String,
    pub role_vip: String,
}

impl DiscordConfig {
    pub fn role_for(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Solo => Some(&self.role_solo),
            Tier::Pro => Some(&self.role_pro),
            Tier::Vip => Some(&self.role_vip),
            Tier::Expired => None,
        }
    }
}

impl Config {
    pub fn with_db_path(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::minutes(self.token_ttl_minutes)
    }

    pub fn claim_window(&self) -> Duration {
        Duration::days(self.claim_window_days)
    }

    pub fn membership(&self) -> Duration {
        Duration::days(self.membership_days)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("claims.db"),
            api_addr: "127.0.0.1:8090".parse().expect("loopback socket"),
            admin_token: "local-dev-token".to_string(),
            token_secret: "local-dev-token-secret".to_string(),
            token_ttl_minutes: 15,
            claim_window_days: 90,
            membership_days: 365,
            max_key_attempts: 1,
            signer_key: None,
            contract_address: None,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            notify_webhook: None,
            discord: None,
        }
    }
}
