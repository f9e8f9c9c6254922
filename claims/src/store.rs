use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::customer::{normalize_email, Customer};
use crate::error::ClaimError;
use crate::tier::Tier;

/// Durable customer and claim state, backed by sled.
///
/// Every state transition that guards an invariant (claimed flag, token
/// burning, attempt counting) goes through a compare-and-swap loop so that
/// two concurrent requests can never both observe the permissive state and
/// both write.
#[derive(Debug)]
pub struct CustomerStore {
    _db: sled::Db,
    customers: sled::Tree,
    used_tokens: sled::Tree,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StoreStats {
    pub total_sales: u64,
    pub total_revenue_cents: u64,
    pub total_claims: u64,
}

impl CustomerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClaimError> {
        let db = sled::open(path)?;
        let customers = db.open_tree("customers")?;
        let used_tokens = db.open_tree("used_tokens")?;
        Ok(Self {
            _db: db,
            customers,
            used_tokens,
        })
    }

    pub fn get(&self, email: &str) -> Result<Option<Customer>, ClaimError> {
        let key = normalize_email(email);
        match self.customers.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Inserts or refreshes a purchase record. Claim state, Discord link and
    /// attempt counters of an existing record survive the upsert; tier,
    /// amount and the purchase/expiry timestamps are replaced.
    pub fn upsert_purchase(&self, incoming: Customer) -> Result<Customer, ClaimError> {
        let key = incoming.email.clone();
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let merged = match &current {
                Some(bytes) => {
                    let existing: Customer = decode(bytes)?;
                    Customer {
                        discord_id: existing.discord_id,
                        claimed: existing.claimed,
                        claim_wallet: existing.claim_wallet,
                        claim_tx_hash: existing.claim_tx_hash,
                        claimed_at: existing.claimed_at,
                        key_attempts: existing.key_attempts,
                        reminder_sent: existing.reminder_sent,
                        ..incoming.clone()
                    }
                }
                None => incoming.clone(),
            };
            if self.swap(&key, current, &merged)? {
                return Ok(merged);
            }
        }
    }

    /// Atomically transitions a record to claimed. Exactly one of any number
    /// of concurrent callers succeeds; the rest observe `AlreadyClaimed`.
    pub fn begin_claim(
        &self,
        email: &str,
        wallet: &str,
        window: Duration,
    ) -> Result<Customer, ClaimError> {
        let key = normalize_email(email);
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let bytes = current.as_ref().ok_or(ClaimError::NotFound)?;
            let existing: Customer = decode(bytes)?;
            if existing.claimed {
                return Err(ClaimError::AlreadyClaimed);
            }
            if Utc::now() > existing.purchased_at + window {
                return Err(ClaimError::ClaimExpired);
            }
            let updated = Customer {
                claimed: true,
                claim_wallet: Some(wallet.to_string()),
                claimed_at: Some(Utc::now()),
                ..existing
            };
            if self.swap(&key, current, &updated)? {
                return Ok(updated);
            }
        }
    }

    /// Records the on-chain transaction hash after the client-side contract
    /// call. Only valid on a record that has already been claimed.
    pub fn record_claim_tx(&self, email: &str, tx_hash: &str) -> Result<Customer, ClaimError> {
        let key = normalize_email(email);
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let bytes = current.as_ref().ok_or(ClaimError::NotFound)?;
            let existing: Customer = decode(bytes)?;
            if !existing.claimed {
                return Err(ClaimError::InvalidInput("claim has not been processed"));
            }
            let updated = Customer {
                claim_tx_hash: Some(tx_hash.to_string()),
                ..existing
            };
            if self.swap(&key, current, &updated)? {
                return Ok(updated);
            }
        }
    }

    /// Atomically charges one key attempt against the budget. Admission and
    /// increment happen in a single CAS, so concurrent submissions cannot
    /// all observe a spent budget as free.
    pub fn reserve_key_attempt(
        &self,
        email: &str,
        max_attempts: u32,
    ) -> Result<Customer, ClaimError> {
        let key = normalize_email(email);
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let bytes = current.as_ref().ok_or(ClaimError::NotFound)?;
            let existing: Customer = decode(bytes)?;
            if existing.key_attempts >= max_attempts {
                return Err(ClaimError::InvalidKeys);
            }
            let updated = Customer {
                key_attempts: existing.key_attempts + 1,
                ..existing
            };
            if self.swap(&key, current, &updated)? {
                return Ok(updated);
            }
        }
    }

    /// Refunds a reserved key attempt after a verification that should not
    /// count against the budget.
    pub fn release_key_attempt(&self, email: &str) -> Result<(), ClaimError> {
        let key = normalize_email(email);
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let bytes = current.as_ref().ok_or(ClaimError::NotFound)?;
            let existing: Customer = decode(bytes)?;
            let updated = Customer {
                key_attempts: existing.key_attempts.saturating_sub(1),
                ..existing
            };
            if self.swap(&key, current, &updated)? {
                return Ok(());
            }
        }
    }

    pub fn link_discord(&self, email: &str, discord_id: &str) -> Result<Customer, ClaimError> {
        let key = normalize_email(email);
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let bytes = current.as_ref().ok_or(ClaimError::NotFound)?;
            let existing: Customer = decode(bytes)?;
            let updated = Customer {
                discord_id: Some(discord_id.to_string()),
                ..existing
            };
            if self.swap(&key, current, &updated)? {
                return Ok(updated);
            }
        }
    }

    pub fn mark_reminder_sent(&self, email: &str) -> Result<(), ClaimError> {
        let key = normalize_email(email);
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let bytes = current.as_ref().ok_or(ClaimError::NotFound)?;
            let existing: Customer = decode(bytes)?;
            let updated = Customer {
                reminder_sent: true,
                ..existing
            };
            if self.swap(&key, current, &updated)? {
                return Ok(());
            }
        }
    }

    /// Burns a claim token. The first caller wins; replaying a burned token
    /// fails with the same error as a forged one.
    pub fn burn_token(&self, token: &str) -> Result<(), ClaimError> {
        let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        match self
            .used_tokens
            .compare_and_swap(digest, None::<&[u8]>, Some(&[1u8][..]))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(ClaimError::invalid_token()),
        }
    }

    /// Non-expired customers inside the reminder horizon that have not been
    /// reminded yet.
    pub fn reminder_candidates(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> Result<Vec<Customer>, ClaimError> {
        let mut out = Vec::new();
        for entry in self.customers.iter() {
            let (_, bytes) = entry?;
            let customer: Customer = decode(&bytes)?;
            if customer.tier != Tier::Expired
                && !customer.reminder_sent
                && customer.expires_at > now
                && customer.expires_at <= now + horizon
            {
                out.push(customer);
            }
        }
        Ok(out)
    }

    /// Customers whose membership lapsed but whose tier has not been set to
    /// expired yet.
    pub fn expired_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Customer>, ClaimError> {
        let mut out = Vec::new();
        for entry in self.customers.iter() {
            let (_, bytes) = entry?;
            let customer: Customer = decode(&bytes)?;
            if customer.tier != Tier::Expired && customer.expires_at <= now {
                out.push(customer);
            }
        }
        Ok(out)
    }

    pub fn mark_expired(&self, email: &str) -> Result<Customer, ClaimError> {
        let key = normalize_email(email);
        loop {
            let current = self.customers.get(key.as_bytes())?;
            let bytes = current.as_ref().ok_or(ClaimError::NotFound)?;
            let existing: Customer = decode(bytes)?;
            let updated = Customer {
                tier: Tier::Expired,
                ..existing
            };
            if self.swap(&key, current, &updated)? {
                return Ok(updated);
            }
        }
    }

    pub fn customers(&self) -> Result<Vec<Customer>, ClaimError> {
        let mut out = Vec::new();
        for entry in self.customers.iter() {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats, ClaimError> {
        let mut stats = StoreStats::default();
        for entry in self.customers.iter() {
            let (_, bytes) = entry?;
            let customer: Customer = decode(&bytes)?;
            stats.total_sales += 1;
            stats.total_revenue_cents += customer.amount_paid_cents;
            if customer.claimed {
                stats.total_claims += 1;
            }
        }
        Ok(stats)
    }

    /// Single CAS attempt; returns false when the record moved underneath us
    /// and the caller should re-read.
    fn swap(
        &self,
        key: &str,
        current: Option<sled::IVec>,
        next: &Customer,
    ) -> Result<bool, ClaimError> {
        let encoded = encode(next)?;
        Ok(self
            .customers
            .compare_and_swap(key.as_bytes(), current, Some(encoded))?
            .is_ok())
    }
}

fn encode(customer: &Customer) -> Result<Vec<u8>, ClaimError> {
    Ok(bincode::serialize(customer)?)
}

fn decode(bytes: &[u8]) -> Result<Customer, ClaimError> {
    Ok(bincode::deserialize(bytes)?)
}
