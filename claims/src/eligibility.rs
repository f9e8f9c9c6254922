use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::customer::{normalize_email, Customer};
use crate::error::ClaimError;
use crate::store::CustomerStore;
use crate::stripe::StripeClient;
use crate::tier::Tier;

/// Outcome of an eligibility lookup.
#[derive(Clone, Debug)]
pub enum Resolution {
    /// A non-expired record already exists in the primary store.
    OnRecord(Tier),
    /// The purchase was found at the payment processor; the rebuilt record
    /// has not been persisted yet (the resolver itself stays read-only).
    Recovered(Customer),
}

impl Resolution {
    pub fn tier(&self) -> Tier {
        match self {
            Resolution::OnRecord(tier) => *tier,
            Resolution::Recovered(customer) => customer.tier,
        }
    }
}

/// Determines whether, and at what tier, an email is entitled to claim.
/// Primary store first, payment processor as fallback.
pub struct EligibilityResolver {
    stripe: Option<StripeClient>,
    membership: Duration,
}

impl EligibilityResolver {
    pub fn new(stripe: Option<StripeClient>, membership: Duration) -> Self {
        Self { stripe, membership }
    }

    pub async fn resolve(
        &self,
        store: &CustomerStore,
        email: &str,
    ) -> Result<Resolution, ClaimError> {
        self.resolve_at(store, email, Utc::now()).await
    }

    pub async fn resolve_at(
        &self,
        store: &CustomerStore,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Resolution, ClaimError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(ClaimError::InvalidInput("invalid email"));
        }

        match store.get(&email)? {
            Some(customer) if !customer.is_expired(now) => {
                return Ok(Resolution::OnRecord(customer.tier));
            }
            // A lapsed record is authoritative: the purchase is known and
            // its entitlement is gone, so the processor is not re-queried.
            Some(_) => return Err(ClaimError::NotFound),
            None => {}
        }

        let stripe = self.stripe.as_ref().ok_or(ClaimError::Config(
            "payment processor credentials are not configured",
        ))?;
        let Some(purchase) = stripe.find_paid_purchase(&email).await? else {
            return Err(ClaimError::NotFound);
        };

        let purchased_at = Utc
            .timestamp_opt(purchase.created, 0)
            .single()
            .unwrap_or(now);
        let tier = Tier::from_amount_cents(purchase.amount_cents);
        Ok(Resolution::Recovered(Customer::purchased_at(
            &email,
            tier,
            purchase.amount_cents,
            purchased_at,
            self.membership,
        )))
    }
}
