use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::tier::Tier;

/// Purchase record keyed by normalized email. Created by the checkout
/// webhook, mutated by Discord linking, claim processing and the expiry
/// sweep. Never hard-deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    pub tier: Tier,
    pub amount_paid_cents: u64,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub discord_id: Option<String>,
    pub claimed: bool,
    pub claim_wallet: Option<String>,
    pub claim_tx_hash: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub key_attempts: u32,
    pub reminder_sent: bool,
}

impl Customer {
    pub fn new(email: &str, tier: Tier, amount_paid_cents: u64, membership: Duration) -> Self {
        Self::purchased_at(email, tier, amount_paid_cents, Utc::now(), membership)
    }

    pub fn purchased_at(
        email: &str,
        tier: Tier,
        amount_paid_cents: u64,
        purchased_at: DateTime<Utc>,
        membership: Duration,
    ) -> Self {
        Self {
            email: normalize_email(email),
            tier,
            amount_paid_cents,
            purchased_at,
            expires_at: purchased_at + membership,
            discord_id: None,
            claimed: false,
            claim_wallet: None,
            claim_tx_hash: None,
            claimed_at: None,
            key_attempts: 0,
            reminder_sent: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.tier == Tier::Expired || self.expires_at <= now
    }
}

/// Emails are compared case-insensitively throughout; this is the single
/// normalization used for storage keys, eligibility and email hashing.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
