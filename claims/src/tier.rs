use std::fmt;

use serde::{Deserialize, Serialize};

/// Reward amounts per pack, in USDC minor units (6 decimals).
pub const SOLO_REWARD: u64 = 20_000_000;
pub const PRO_REWARD: u64 = 50_000_000;
pub const VIP_REWARD: u64 = 100_000_000;

/// Amount-paid thresholds (in cents) used when the tier has to be inferred
/// from a payment record instead of checkout metadata.
pub const VIP_THRESHOLD_CENTS: u64 = 54_000;
pub const PRO_THRESHOLD_CENTS: u64 = 29_000;

/// Purchase level. Determines the claimable reward amount and the Discord
/// role. `Expired` marks customers whose membership has lapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Solo,
    Pro,
    Vip,
    Expired,
}

impl Tier {
    pub fn from_pack(pack: &str) -> Option<Self> {
        match pack.trim().to_lowercase().as_str() {
            "solo" => Some(Tier::Solo),
            "pro" => Some(Tier::Pro),
            "vip" => Some(Tier::Vip),
            _ => None,
        }
    }

    pub fn from_amount_cents(cents: u64) -> Self {
        if cents >= VIP_THRESHOLD_CENTS {
            Tier::Vip
        } else if cents >= PRO_THRESHOLD_CENTS {
            Tier::Pro
        } else {
            Tier::Solo
        }
    }

    /// Claimable reward in USDC minor units. `None` for lapsed memberships.
    pub fn reward_amount(self) -> Option<u64> {
        match self {
            Tier::Solo => Some(SOLO_REWARD),
            Tier::Pro => Some(PRO_REWARD),
            Tier::Vip => Some(VIP_REWARD),
            Tier::Expired => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Solo => "solo",
            Tier::Pro => "pro",
            Tier::Vip => "vip",
            Tier::Expired => "expired",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
