use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

use claims::signer::{email_hash, parse_address};
use claims::stripe::{verify_webhook_signature, StripeClient, WebhookEvent};
use claims::{
    mask_email, normalize_email, ClaimError, ClaimSignature, Config, Customer, CustomerStore,
    EligibilityResolver, Notifier, NotifyEvent, Resolution, RewardSigner, SecretWords, StoreStats,
    Tier, TokenIssuer,
};

use crate::discord::DiscordClient;

/// Customers are reminded once when their membership expires within this
/// many days.
const REMINDER_HORIZON_DAYS: i64 = 30;

/// A signed claim authorization returned by `/claim/process`.
#[derive(Clone, Debug, Serialize)]
pub struct ClaimGrant {
    pub signature: String,
    pub signer: String,
    pub amount: u64,
    pub pack: Tier,
}

/// A customer linked to a Discord account.
#[derive(Clone, Debug, Serialize)]
pub struct LinkedMember {
    pub email: String,
    pub pack: Tier,
}

#[derive(Clone, Debug, Serialize)]
pub struct SweepEntry {
    pub email: String,
    pub status: &'static str,
}

/// The claim funnel behind the HTTP surface: eligibility, key verification,
/// token issuance, signature issuance and claim state tracking, glued to the
/// checkout webhook and Discord membership management.
pub struct ClaimService {
    config: Config,
    store: CustomerStore,
    secret_words: SecretWords,
    tokens: TokenIssuer,
    signer: Option<RewardSigner>,
    resolver: EligibilityResolver,
    notifier: Notifier,
    discord: Option<DiscordClient>,
}

impl ClaimService {
    pub fn new(config: Config, secret_words: SecretWords) -> Result<Arc<Self>, ClaimError> {
        let store = CustomerStore::open(&config.db_path)?;
        let tokens = TokenIssuer::new(config.token_secret.as_bytes(), config.token_ttl());
        let signer = match (&config.signer_key, &config.contract_address) {
            (Some(key), Some(contract)) => Some(RewardSigner::new(key, contract)?),
            _ => None,
        };
        let stripe = config.stripe_secret_key.as_deref().map(StripeClient::new);
        let resolver = EligibilityResolver::new(stripe, config.membership());
        let notifier = Notifier::new(config.notify_webhook.clone());
        let discord = config.discord.clone().map(DiscordClient::new);
        Ok(Arc::new(Self {
            config,
            store,
            secret_words,
            tokens,
            signer,
            resolver,
            notifier,
            discord,
        }))
    }

    pub fn api_addr(&self) -> std::net::SocketAddr {
        self.config.api_addr
    }

    pub fn admin_token(&self) -> &str {
        &self.config.admin_token
    }

    pub fn store(&self) -> &CustomerStore {
        &self.store
    }

    /// Eligibility check. When the purchase is only found at the payment
    /// processor, the rebuilt record is persisted so the rest of the funnel
    /// (attempt limiting, claim tracking) has state to work against.
    pub async fn verify_email(&self, email: &str) -> Result<Tier, ClaimError> {
        match self.resolver.resolve(&self.store, email).await? {
            Resolution::OnRecord(tier) => Ok(tier),
            Resolution::Recovered(customer) => {
                info!(email = %mask_email(&customer.email), "backfilled purchase from processor");
                Ok(self.store.upsert_purchase(customer)?.tier)
            }
        }
    }

    /// Validates the 12 submitted words and mints a claim token. Attempts
    /// are limited per customer: each submission reserves one attempt in a
    /// single CAS before any verification runs, so concurrent submissions
    /// against a spent budget are all turned away. The attempt notification
    /// is fire-and-forget and cannot fail the request.
    pub async fn verify_keys(&self, email: &str, keys: &[String]) -> Result<String, ClaimError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(ClaimError::InvalidInput("invalid email"));
        }
        self.store
            .reserve_key_attempt(&email, self.config.max_key_attempts)?;

        let all_match = match self.secret_words.verify(keys) {
            Ok(verdict) => verdict,
            Err(err) => {
                // A malformed submission can never succeed; it is not a guess
                // and does not consume the budget.
                self.store.release_key_attempt(&email)?;
                return Err(err);
            }
        };
        self.notifier.send(NotifyEvent::KeyAttempt {
            email: email.clone(),
            ok: all_match,
        });

        if !all_match {
            return Err(ClaimError::InvalidKeys);
        }
        // Successful verifications stay free; only wrong guesses are charged.
        self.store.release_key_attempt(&email)?;
        self.tokens.issue(&email)
    }

    /// Burns the claim token, atomically marks the customer claimed and
    /// issues the oracle signature the client submits on-chain.
    pub async fn process_claim(
        &self,
        token: &str,
        wallet_address: &str,
    ) -> Result<ClaimGrant, ClaimError> {
        parse_address(wallet_address)?;
        let signer = self.signer()?;

        let email = self.tokens.verify(token)?;
        self.store.burn_token(token)?;

        let customer = self
            .store
            .begin_claim(&email, wallet_address, self.config.claim_window())?;
        let amount = customer.tier.reward_amount().ok_or(ClaimError::ClaimExpired)?;
        let signed = signer.sign(wallet_address, email_hash(&email), amount)?;

        self.notifier.send(NotifyEvent::ClaimSigned {
            email: email.clone(),
            wallet: wallet_address.to_string(),
            amount,
        });
        info!(
            email = %mask_email(&email),
            pack = %customer.tier,
            "claim authorized"
        );

        Ok(ClaimGrant {
            signature: signed.signature,
            signer: signed.signer,
            amount,
            pack: customer.tier,
        })
    }

    /// Records the transaction hash after the client-side contract call.
    pub fn confirm_claim(&self, email: &str, tx_hash: &str) -> Result<(), ClaimError> {
        let updated = self.store.record_claim_tx(email, tx_hash)?;
        self.notifier.send(NotifyEvent::ClaimConfirmed {
            email: updated.email,
            tx_hash: tx_hash.to_string(),
        });
        Ok(())
    }

    /// Stateless oracle signing for clients that track replay on-chain.
    pub fn sign_claim(
        &self,
        user_address: &str,
        email_hash_hex: &str,
        pack: &str,
    ) -> Result<ClaimSignature, ClaimError> {
        let signer = self.signer()?;
        let tier = Tier::from_pack(pack).ok_or(ClaimError::InvalidInput("unknown pack"))?;
        let amount = tier
            .reward_amount()
            .ok_or(ClaimError::InvalidInput("unknown pack"))?;
        let hash = parse_email_hash(email_hash_hex)?;
        signer.sign(user_address, hash, amount)
    }

    /// Checkout webhook ingest: verifies the signature, upserts the customer
    /// and emits a purchase notification.
    pub fn ingest_webhook(&self, payload: &[u8], signature_header: &str) -> Result<(), ClaimError> {
        let secret = self
            .config
            .stripe_webhook_secret
            .as_deref()
            .ok_or(ClaimError::Config("webhook secret is not configured"))?;
        verify_webhook_signature(
            payload,
            signature_header,
            secret.as_bytes(),
            Utc::now().timestamp(),
        )?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|_| ClaimError::InvalidInput("malformed webhook payload"))?;
        if event.kind != "checkout.session.completed" {
            return Ok(());
        }

        let session = event.data.object;
        let email = session
            .email()
            .ok_or(ClaimError::InvalidInput("checkout session has no email"))?
            .to_string();
        let amount_cents = session.amount_total.unwrap_or(0);
        let tier = session
            .metadata
            .get("pack")
            .and_then(|pack| Tier::from_pack(pack))
            .unwrap_or_else(|| Tier::from_amount_cents(amount_cents));

        let customer = Customer::new(&email, tier, amount_cents, self.config.membership());
        self.store.upsert_purchase(customer)?;
        self.notifier.send(NotifyEvent::Purchase {
            email: email.clone(),
            tier,
            amount_cents,
        });
        info!(email = %mask_email(&email), pack = %tier, "checkout completed");
        Ok(())
    }

    /// Discord OAuth callback: resolves the authenticated user's email,
    /// links the Discord id to a non-expired customer and grants the tier
    /// role.
    pub async fn link_discord(&self, code: &str) -> Result<LinkedMember, ClaimError> {
        let discord = self
            .discord
            .as_ref()
            .ok_or(ClaimError::Config("discord credentials are not configured"))?;
        let user = discord.authenticated_user(code).await?;
        let email = user
            .email
            .ok_or(ClaimError::InvalidInput("discord account has no email"))?;

        let customer = self.store.get(&email)?.ok_or(ClaimError::NotFound)?;
        if customer.is_expired(Utc::now()) {
            return Err(ClaimError::NotFound);
        }
        let linked = self.store.link_discord(&email, &user.id)?;
        if let Some(role) = discord.role_for(linked.tier) {
            discord.add_role(&user.id, role).await?;
        }
        info!(email = %mask_email(&linked.email), "discord linked");
        Ok(LinkedMember {
            email: linked.email,
            pack: linked.tier,
        })
    }

    /// Expiry sweep: reminds customers approaching expiry, then demotes
    /// lapsed memberships and removes their Discord role. Customers whose
    /// role removal fails are retried on the next sweep.
    pub async fn sweep_expired(&self) -> Result<Vec<SweepEntry>, ClaimError> {
        let now = Utc::now();
        let mut processed = Vec::new();
        for customer in self
            .store
            .reminder_candidates(now, Duration::days(REMINDER_HORIZON_DAYS))?
        {
            self.notifier.send(NotifyEvent::ExpiryReminder {
                email: customer.email.clone(),
                days_left: (customer.expires_at - now).num_days(),
            });
            self.store.mark_reminder_sent(&customer.email)?;
            processed.push(SweepEntry {
                email: customer.email,
                status: "reminder-sent",
            });
        }
        for customer in self.store.expired_candidates(now)? {
            if let (Some(discord), Some(discord_id)) = (&self.discord, &customer.discord_id) {
                if let Some(role) = discord.role_for(customer.tier) {
                    if let Err(err) = discord.remove_role(discord_id, role).await {
                        tracing::warn!(
                            email = %mask_email(&customer.email),
                            %err,
                            "role removal failed"
                        );
                        processed.push(SweepEntry {
                            email: customer.email,
                            status: "role-removal-failed",
                        });
                        continue;
                    }
                }
            }
            self.store.mark_expired(&customer.email)?;
            processed.push(SweepEntry {
                email: customer.email,
                status: "expired",
            });
        }
        Ok(processed)
    }

    pub fn stats(&self) -> Result<StoreStats, ClaimError> {
        self.store.stats()
    }

    pub fn customers(&self) -> Result<Vec<Customer>, ClaimError> {
        self.store.customers()
    }

    fn signer(&self) -> Result<&RewardSigner, ClaimError> {
        self.signer.as_ref().ok_or(ClaimError::Config(
            "signer key or contract address is not configured",
        ))
    }
}

fn parse_email_hash(raw: &str) -> Result<[u8; 32], ClaimError> {
    let stripped = raw
        .trim()
        .strip_prefix("0x")
        .ok_or(ClaimError::InvalidInput("email hash must be 0x-prefixed"))?;
    let decoded =
        hex::decode(stripped).map_err(|_| ClaimError::InvalidInput("email hash must be hex"))?;
    if decoded.len() != 32 {
        return Err(ClaimError::InvalidInput("email hash must be 32 bytes"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&decoded);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const WORDS: &str =
        "aurora,beacon,cipher,dawn,ember,falcon,glacier,harbor,ignite,jasper,krypton,lumen";
    const SIGNER_KEY: &str =
        "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const CONTRACT: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
    const WALLET: &str = "0x1234567890123456789012345678901234567890";

    fn service() -> (Arc<ClaimService>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_db_path(dir.path().join("claims.db"));
        config.signer_key = Some(SIGNER_KEY.to_string());
        config.contract_address = Some(CONTRACT.to_string());
        config.stripe_webhook_secret = Some("whsec_test".to_string());
        let words = SecretWords::from_csv(WORDS).unwrap();
        (ClaimService::new(config, words).unwrap(), dir)
    }

    fn correct_words() -> Vec<String> {
        WORDS.split(',').map(str::to_string).collect()
    }

    fn seed_pro(service: &ClaimService, email: &str) {
        service
            .store()
            .upsert_purchase(Customer::new(email, Tier::Pro, 29_000, Duration::days(365)))
            .unwrap();
    }

    #[tokio::test]
    async fn full_claim_flow_signs_once() {
        let (service, _dir) = service();
        seed_pro(&service, "buyer@test.com");

        let token = service
            .verify_keys("buyer@test.com", &correct_words())
            .await
            .unwrap();
        let grant = service.process_claim(&token, WALLET).await.unwrap();
        assert_eq!(grant.amount, 50_000_000);
        assert_eq!(grant.pack, Tier::Pro);

        // Replaying the burned token fails.
        assert!(service.process_claim(&token, WALLET).await.is_err());

        // A fresh token cannot claim a second time. The pause puts the new
        // token past the one-second expiry resolution so it encodes
        // differently from the burned one.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let token2 = service
            .verify_keys("buyer@test.com", &correct_words())
            .await
            .unwrap();
        assert!(matches!(
            service.process_claim(&token2, WALLET).await,
            Err(ClaimError::AlreadyClaimed)
        ));
    }

    #[tokio::test]
    async fn key_attempts_are_limited() {
        let (service, _dir) = service();
        seed_pro(&service, "buyer@test.com");

        let mut wrong = correct_words();
        wrong[3] = "wrong".to_string();
        assert!(matches!(
            service.verify_keys("buyer@test.com", &wrong).await,
            Err(ClaimError::InvalidKeys)
        ));
        // The single allowed attempt is spent; even correct words fail now.
        assert!(matches!(
            service.verify_keys("buyer@test.com", &correct_words()).await,
            Err(ClaimError::InvalidKeys)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_guesses_charge_the_budget_once() {
        let (service, _dir) = service();
        seed_pro(&service, "buyer@test.com");

        let mut wrong = correct_words();
        wrong[0] = "wrong".to_string();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let service = service.clone();
            let wrong = wrong.clone();
            handles.push(tokio::spawn(async move {
                service.verify_keys("buyer@test.com", &wrong).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        // One submission was admitted and charged; the rest were turned
        // away at admission without touching the counter.
        let customer = service.store().get("buyer@test.com").unwrap().unwrap();
        assert_eq!(customer.key_attempts, 1);
    }

    #[tokio::test]
    async fn successful_and_malformed_submissions_stay_free() {
        let (service, _dir) = service();
        seed_pro(&service, "buyer@test.com");

        // A wrong-length submission is rejected but not charged.
        assert!(matches!(
            service.verify_keys("buyer@test.com", &correct_words()[..5]).await,
            Err(ClaimError::InvalidInput(_))
        ));
        // Correct words succeed repeatedly; the budget is refunded each time.
        service
            .verify_keys("buyer@test.com", &correct_words())
            .await
            .unwrap();
        service
            .verify_keys("buyer@test.com", &correct_words())
            .await
            .unwrap();
        let customer = service.store().get("buyer@test.com").unwrap().unwrap();
        assert_eq!(customer.key_attempts, 0);
    }

    #[tokio::test]
    async fn unknown_email_cannot_verify_keys() {
        let (service, _dir) = service();
        assert!(matches!(
            service.verify_keys("ghost@test.com", &correct_words()).await,
            Err(ClaimError::NotFound)
        ));
    }

    #[tokio::test]
    async fn invalid_wallet_is_rejected_before_state_changes() {
        let (service, _dir) = service();
        seed_pro(&service, "buyer@test.com");
        let token = service
            .verify_keys("buyer@test.com", &correct_words())
            .await
            .unwrap();
        assert!(service.process_claim(&token, "not-an-address").await.is_err());
        // The token was not burned and the customer is still claimable.
        let grant = service.process_claim(&token, WALLET).await.unwrap();
        assert_eq!(grant.amount, 50_000_000);
    }

    #[tokio::test]
    async fn concurrent_claims_resolve_to_one_success() {
        let (service, _dir) = service();
        seed_pro(&service, "buyer@test.com");
        let token_a = service
            .verify_keys("buyer@test.com", &correct_words())
            .await
            .unwrap();
        let token_b = service
            .verify_keys("buyer@test.com", &correct_words())
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            service.process_claim(&token_a, WALLET),
            service.process_claim(&token_b, WALLET),
        );
        assert_eq!(
            a.is_ok() as u8 + b.is_ok() as u8,
            1,
            "exactly one concurrent claim must succeed"
        );
    }

    #[tokio::test]
    async fn webhook_upserts_customer() {
        let (service, _dir) = service();
        let payload = br#"{
            "type": "checkout.session.completed",
            "data": {"object": {
                "customer_email": "Buyer@Test.com",
                "amount_total": 29000,
                "payment_status": "paid",
                "metadata": {"pack": "pro"}
            }}
        }"#;
        let timestamp = Utc::now().timestamp();
        let header = {
            use hmac::{Hmac, Mac};
            let mut mac = Hmac::<sha2::Sha256>::new_from_slice(b"whsec_test").unwrap();
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
        };

        service.ingest_webhook(payload, &header).unwrap();
        let customer = service.store().get("buyer@test.com").unwrap().unwrap();
        assert_eq!(customer.tier, Tier::Pro);
        assert_eq!(customer.amount_paid_cents, 29_000);

        // A bad signature is rejected.
        assert!(matches!(
            service.ingest_webhook(payload, "t=0,v1=00"),
            Err(ClaimError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn sign_claim_requires_valid_inputs() {
        let (service, _dir) = service();
        let hash = format!("0x{}", hex::encode(email_hash("user@test.com")));
        let signed = service.sign_claim(WALLET, &hash, "solo").unwrap();
        assert_eq!(signed.amount, 20_000_000);
        assert!(signed.signature.starts_with("0x"));

        assert!(service.sign_claim(WALLET, &hash, "mega").is_err());
        assert!(service.sign_claim(WALLET, "0x1234", "solo").is_err());
        assert!(service.sign_claim("bogus", &hash, "solo").is_err());
    }
}
