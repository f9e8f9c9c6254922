use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::customer::normalize_email;
use crate::error::ClaimError;

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

/// Webhook signatures older than this are rejected to limit replay.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Minimal Stripe REST client used as the eligibility fallback when the
/// primary store has no record for an email.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
}

/// A completed payment recovered from Stripe, enough to rebuild a customer
/// record: the paid amount (tier is inferred from it) and the charge time.
#[derive(Clone, Copy, Debug)]
pub struct RecoveredPurchase {
    pub amount_cents: u64,
    pub created: i64,
}

impl StripeClient {
    pub fn new(secret_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.to_string(),
        }
    }

    /// Looks for a completed payment matching `email`: paid checkout
    /// sessions first, then the customer's charge history.
    pub async fn find_paid_purchase(
        &self,
        email: &str,
    ) -> Result<Option<RecoveredPurchase>, ClaimError> {
        if let Some(found) = self.paid_checkout_session(email).await? {
            return Ok(Some(found));
        }
        self.succeeded_charge(email).await
    }

    async fn paid_checkout_session(
        &self,
        email: &str,
    ) -> Result<Option<RecoveredPurchase>, ClaimError> {
        let email = normalize_email(email);
        let page: Page<CheckoutSession> = self
            .http
            .get(format!("{API_BASE}/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .query(&[("limit", "100")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(page
            .data
            .into_iter()
            .find(|session| {
                session.payment_status.as_deref() == Some("paid")
                    && session
                        .email()
                        .map(|e| normalize_email(e) == email)
                        .unwrap_or(false)
            })
            .map(|session| RecoveredPurchase {
                amount_cents: session.amount_total.unwrap_or(0),
                created: session.created.unwrap_or(0),
            }))
    }

    async fn succeeded_charge(
        &self,
        email: &str,
    ) -> Result<Option<RecoveredPurchase>, ClaimError> {
        let customers: Page<StripeCustomer> = self
            .http
            .get(format!("{API_BASE}/customers"))
            .bearer_auth(&self.secret_key)
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(customer) = customers.data.into_iter().next() else {
            return Ok(None);
        };

        let charges: Page<Charge> = self
            .http
            .get(format!("{API_BASE}/charges"))
            .bearer_auth(&self.secret_key)
            .query(&[("customer", customer.id.as_str()), ("limit", "5")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(charges
            .data
            .into_iter()
            .find(|charge| charge.status.as_deref() == Some("succeeded"))
            .map(|charge| RecoveredPurchase {
                amount_cents: charge.amount.unwrap_or(0),
                created: charge.created.unwrap_or(0),
            }))
    }
}

/// Verifies a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>` over
/// `"{t}.{payload}"`). The MAC comparison is constant-time; a stale
/// timestamp fails even with a valid MAC.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &[u8],
    now: i64,
) -> Result<(), ClaimError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(sig) = hex::decode(value) {
                    candidates.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(ClaimError::Unauthorized)?;
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(ClaimError::Unauthorized);
    }

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| ClaimError::Config("invalid webhook secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    use subtle::ConstantTimeEq;
    for candidate in &candidates {
        if candidate.len() == expected.len()
            && bool::from(candidate.as_slice().ct_eq(expected.as_slice()))
        {
            return Ok(());
        }
    }
    Err(ClaimError::Unauthorized)
}

/// The slice of a `checkout.session.completed` event the webhook consumes.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: CheckoutSession,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    pub amount_total: Option<u64>,
    pub payment_status: Option<String>,
    pub created: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

impl CheckoutSession {
    pub fn email(&self) -> Option<&str> {
        self.customer_email
            .as_deref()
            .or_else(|| self.customer_details.as_ref()?.email.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Charge {
    status: Option<String>,
    amount: Option<u64>,
    created: Option<i64>,
}
