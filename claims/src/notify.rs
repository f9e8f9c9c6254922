use serde_json::json;
use tracing::warn;

use crate::tier::Tier;

/// Observability sink: posts claim-funnel events to a Discord webhook as
/// embeds. Sends are spawned and best-effort; a sink failure never blocks
/// or fails the request that produced the event.
#[derive(Clone)]
pub struct Notifier {
    webhook_url: Option<String>,
    http: reqwest::Client,
}

#[derive(Clone, Debug)]
pub enum NotifyEvent {
    Purchase {
        email: String,
        tier: Tier,
        amount_cents: u64,
    },
    KeyAttempt {
        email: String,
        ok: bool,
    },
    ClaimSigned {
        email: String,
        wallet: String,
        amount: u64,
    },
    ClaimConfirmed {
        email: String,
        tx_hash: String,
    },
    ExpiryReminder {
        email: String,
        days_left: i64,
    },
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn send(&self, event: NotifyEvent) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let body = embed(&event);
        let http = self.http.clone();
        tokio::spawn(async move {
            if let Err(err) = http.post(&url).json(&body).send().await {
                warn!(%err, "notification webhook failed");
            }
        });
    }
}

fn embed(event: &NotifyEvent) -> serde_json::Value {
    let embed = match event {
        NotifyEvent::Purchase {
            email,
            tier,
            amount_cents,
        } => json!({
            "title": "New purchase",
            "color": 0x00FF88,
            "fields": [
                {"name": "Email", "value": mask_email(email), "inline": true},
                {"name": "Pack", "value": tier.as_str(), "inline": true},
                {"name": "Amount", "value": format!("{}.{:02}", amount_cents / 100, amount_cents % 100), "inline": true},
            ],
        }),
        NotifyEvent::KeyAttempt { email, ok } => json!({
            "title": if *ok { "Keys verified" } else { "Key attempt failed" },
            "color": if *ok { 0x00FF88 } else { 0xFF4757 },
            "fields": [
                {"name": "Email", "value": mask_email(email), "inline": true},
                {"name": "Result", "value": if *ok { "success" } else { "failure" }, "inline": true},
            ],
        }),
        NotifyEvent::ClaimSigned {
            email,
            wallet,
            amount,
        } => json!({
            "title": "Reward authorized",
            "color": 0x00FF00,
            "fields": [
                {"name": "Email", "value": mask_email(email), "inline": true},
                {"name": "Wallet", "value": shorten_address(wallet), "inline": true},
                {"name": "USDC", "value": format!("{}", amount / 1_000_000), "inline": true},
            ],
        }),
        NotifyEvent::ClaimConfirmed { email, tx_hash } => json!({
            "title": "Reward sent",
            "color": 0x00FF00,
            "fields": [
                {"name": "Email", "value": mask_email(email), "inline": true},
                {"name": "Tx", "value": tx_hash, "inline": false},
            ],
        }),
        NotifyEvent::ExpiryReminder { email, days_left } => json!({
            "title": "Membership expiring",
            "color": 0xFFA502,
            "fields": [
                {"name": "Email", "value": mask_email(email), "inline": true},
                {"name": "Days left", "value": days_left.to_string(), "inline": true},
            ],
        }),
    };
    json!({ "embeds": [embed] })
}

/// Keeps the first character and the domain; never log full emails.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

pub fn shorten_address(address: &str) -> String {
    if address.len() > 10 {
        format!("{}...{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}
