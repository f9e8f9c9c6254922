//! Checkout webhook ingest and the admin surface, driven over HTTP.

use std::sync::Arc;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::net::TcpListener;

use claimd::{api, ClaimService};
use claims::{Config, Customer, SecretWords, Tier};

const WORDS: &str =
    "aurora,beacon,cipher,dawn,ember,falcon,glacier,harbor,ignite,jasper,krypton,lumen";
const WEBHOOK_SECRET: &[u8] = b"whsec_test";
const ADMIN_TOKEN: &str = "local-dev-token";

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::with_db_path(dir.path().join("claims.db"));
    config.stripe_webhook_secret = Some("whsec_test".to_string());
    config
}

async fn spawn_server(config: Config) -> (String, Arc<ClaimService>) {
    let words = SecretWords::from_csv(WORDS).unwrap();
    let service = ClaimService::new(config, words).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(service.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), service)
}

fn stripe_header(payload: &[u8]) -> String {
    let timestamp = Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

fn checkout_payload(email: &str, amount_cents: u64, pack: Option<&str>) -> Vec<u8> {
    let mut object = json!({
        "customer_email": email,
        "amount_total": amount_cents,
        "payment_status": "paid",
        "created": Utc::now().timestamp(),
    });
    if let Some(pack) = pack {
        object["metadata"] = json!({"pack": pack});
    }
    serde_json::to_vec(&json!({
        "type": "checkout.session.completed",
        "data": {"object": object},
    }))
    .unwrap()
}

#[tokio::test]
async fn webhook_purchase_becomes_claimable() {
    let dir = tempfile::tempdir().unwrap();
    let (base, service) = spawn_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let payload = checkout_payload("Buyer@Test.com", 54_000, Some("vip"));
    let resp = client
        .post(format!("{base}/webhook/stripe"))
        .header("stripe-signature", stripe_header(&payload))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["received"], true);

    let resp = client
        .post(format!("{base}/verify-email"))
        .json(&json!({"email": "buyer@test.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["pack"], "vip");

    let stored = service.store().get("buyer@test.com").unwrap().unwrap();
    assert_eq!(stored.amount_paid_cents, 54_000);
}

#[tokio::test]
async fn webhook_infers_tier_from_amount_when_metadata_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let (base, service) = spawn_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let payload = checkout_payload("buyer@test.com", 29_000, None);
    let resp = client
        .post(format!("{base}/webhook/stripe"))
        .header("stripe-signature", stripe_header(&payload))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let stored = service.store().get("buyer@test.com").unwrap().unwrap();
    assert_eq!(stored.tier, Tier::Pro);
}

#[tokio::test]
async fn webhook_rejects_bad_and_missing_signatures() {
    let dir = tempfile::tempdir().unwrap();
    let (base, service) = spawn_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let payload = checkout_payload("buyer@test.com", 29_000, Some("pro"));

    // Signature computed over a different body.
    let other = checkout_payload("buyer@test.com", 99_000, Some("vip"));
    let resp = client
        .post(format!("{base}/webhook/stripe"))
        .header("stripe-signature", stripe_header(&other))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // No signature header at all fails the same way, so the processor
    // retries instead of dropping the delivery.
    let resp = client
        .post(format!("{base}/webhook/stripe"))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert!(service.store().get("buyer@test.com").unwrap().is_none());
}

#[tokio::test]
async fn replayed_webhook_does_not_reset_claim_state() {
    let dir = tempfile::tempdir().unwrap();
    let (base, service) = spawn_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let payload = checkout_payload("buyer@test.com", 29_000, Some("pro"));
    let resp = client
        .post(format!("{base}/webhook/stripe"))
        .header("stripe-signature", stripe_header(&payload))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    service
        .store()
        .begin_claim(
            "buyer@test.com",
            "0x1234567890123456789012345678901234567890",
            Duration::days(90),
        )
        .unwrap();

    let resp = client
        .post(format!("{base}/webhook/stripe"))
        .header("stripe-signature", stripe_header(&payload))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(service.store().get("buyer@test.com").unwrap().unwrap().claimed);
}

#[tokio::test]
async fn admin_surface_requires_the_bearer_token() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _service) = spawn_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/admin/stats")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/admin/stats"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/admin/customers"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn admin_stats_report_sales_and_claim_rate() {
    let dir = tempfile::tempdir().unwrap();
    let (base, service) = spawn_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    for email in ["a@test.com", "b@test.com"] {
        service
            .store()
            .upsert_purchase(Customer::new(email, Tier::Pro, 29_000, Duration::days(365)))
            .unwrap();
    }
    service
        .store()
        .begin_claim(
            "a@test.com",
            "0x1234567890123456789012345678901234567890",
            Duration::days(90),
        )
        .unwrap();

    let resp = client
        .get(format!("{base}/admin/stats"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total_sales"], 2);
    assert_eq!(body["total_revenue_cents"], 58_000);
    assert_eq!(body["total_claims"], 1);
    assert_eq!(body["claim_rate"], "50.0%");
}

#[tokio::test]
async fn expiry_sweep_demotes_lapsed_memberships() {
    let dir = tempfile::tempdir().unwrap();
    let (base, service) = spawn_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let mut lapsed = Customer::new("old@test.com", Tier::Pro, 29_000, Duration::days(365));
    lapsed.expires_at = Utc::now() - Duration::days(2);
    service.store().upsert_purchase(lapsed).unwrap();
    let mut ending = Customer::new("soon@test.com", Tier::Pro, 29_000, Duration::days(365));
    ending.expires_at = Utc::now() + Duration::days(10);
    service.store().upsert_purchase(ending).unwrap();
    service
        .store()
        .upsert_purchase(Customer::new("fresh@test.com", Tier::Solo, 9_900, Duration::days(365)))
        .unwrap();

    let resp = client
        .post(format!("{base}/admin/expire"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let processed = body["processed"].as_array().unwrap();
    assert_eq!(processed.len(), 2);
    assert_eq!(processed[0]["email"], "soon@test.com");
    assert_eq!(processed[0]["status"], "reminder-sent");
    assert_eq!(processed[1]["email"], "old@test.com");
    assert_eq!(processed[1]["status"], "expired");

    // The reminder is sent once; a second sweep only sees nothing new.
    let resp = client
        .post(format!("{base}/admin/expire"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["processed"].as_array().unwrap().is_empty());

    // A demoted membership is no longer eligible.
    let resp = client
        .post(format!("{base}/verify-email"))
        .json(&json!({"email": "old@test.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(
        service.store().get("old@test.com").unwrap().unwrap().tier,
        Tier::Expired
    );
}
