use serde::Deserialize;

use claims::{ClaimError, DiscordConfig, Tier};

const API_BASE: &str = "https://discord.com/api";

/// Discord REST client for OAuth code exchange and guild role management.
/// Gateway bot mechanics are out of scope; only the REST surface is used.
pub struct DiscordClient {
    http: reqwest::Client,
    config: DiscordConfig,
}

#[derive(Debug, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn role_for(&self, tier: Tier) -> Option<&str> {
        self.config.role_for(tier)
    }

    /// Exchanges an OAuth authorization code and resolves the authenticated
    /// user.
    pub async fn authenticated_user(&self, code: &str) -> Result<DiscordUser, ClaimError> {
        let token = self.exchange_code(code).await?;
        let user: DiscordUser = self
            .http
            .get(format!("{API_BASE}/users/@me"))
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(user)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ClaimError> {
        let response: TokenResponse = self
            .http
            .post(format!("{API_BASE}/oauth2/token"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;
        response
            .access_token
            .ok_or_else(|| ClaimError::Upstream("discord code exchange failed".to_string()))
    }

    pub async fn add_role(&self, user_id: &str, role_id: &str) -> Result<(), ClaimError> {
        let response = self
            .http
            .put(format!(
                "{API_BASE}/guilds/{}/members/{user_id}/roles/{role_id}",
                self.config.guild_id
            ))
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClaimError::Upstream(format!(
                "discord role grant failed: {}",
                response.status()
            )))
        }
    }

    /// Removes a role. A 404 counts as success: the member already left or
    /// the role is already gone.
    pub async fn remove_role(&self, user_id: &str, role_id: &str) -> Result<(), ClaimError> {
        let response = self
            .http
            .delete(format!(
                "{API_BASE}/guilds/{}/members/{user_id}/roles/{role_id}",
                self.config.guild_id
            ))
            .header("Authorization", format!("Bot {}", self.config.bot_token))
            .send()
            .await?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(ClaimError::Upstream(format!(
                "discord role removal failed: {}",
                response.status()
            )))
        }
    }
}
