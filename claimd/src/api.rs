use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tracing::warn;

use claims::{ClaimError, Customer, StoreStats, Tier};

use crate::service::{ClaimGrant, ClaimService, LinkedMember, SweepEntry};

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn serve(service: Arc<ClaimService>) -> Result<()> {
    let addr = service.api_addr();
    let app = router(service);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(service: Arc<ClaimService>) -> Router {
    Router::new()
        .route("/verify-email", post(verify_email))
        .route("/claim/verify", post(claim_verify))
        .route("/claim/process", post(claim_process))
        .route("/claim/confirm", post(claim_confirm))
        .route("/sign-claim", post(sign_claim))
        .route("/webhook/stripe", post(stripe_webhook))
        .route("/discord/callback", get(discord_callback))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/customers", get(admin_customers))
        .route("/admin/expire", post(admin_expire))
        .with_state(service)
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Deserialize)]
struct VerifyEmailRequest {
    email: String,
}

#[derive(Serialize)]
struct VerifyEmailResponse {
    success: bool,
    pack: Tier,
}

async fn verify_email(
    State(service): State<Arc<ClaimService>>,
    Json(request): Json<VerifyEmailRequest>,
) -> ApiResult<VerifyEmailResponse> {
    let pack = service
        .verify_email(&request.email)
        .await
        .map_err(map_error)?;
    Ok(Json(VerifyEmailResponse {
        success: true,
        pack,
    }))
}

#[derive(Deserialize)]
struct ClaimVerifyRequest {
    email: String,
    keys: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimVerifyResponse {
    success: bool,
    claim_token: String,
}

async fn claim_verify(
    State(service): State<Arc<ClaimService>>,
    Json(request): Json<ClaimVerifyRequest>,
) -> ApiResult<ClaimVerifyResponse> {
    let claim_token = service
        .verify_keys(&request.email, &request.keys)
        .await
        .map_err(map_error)?;
    Ok(Json(ClaimVerifyResponse {
        success: true,
        claim_token,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimProcessRequest {
    claim_token: String,
    wallet_address: String,
}

#[derive(Serialize)]
struct ClaimProcessResponse {
    success: bool,
    #[serde(flatten)]
    grant: ClaimGrant,
}

async fn claim_process(
    State(service): State<Arc<ClaimService>>,
    Json(request): Json<ClaimProcessRequest>,
) -> ApiResult<ClaimProcessResponse> {
    let grant = service
        .process_claim(&request.claim_token, &request.wallet_address)
        .await
        .map_err(map_error)?;
    Ok(Json(ClaimProcessResponse {
        success: true,
        grant,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimConfirmRequest {
    email: String,
    tx_hash: String,
}

#[derive(Serialize)]
struct AckResponse {
    success: bool,
}

async fn claim_confirm(
    State(service): State<Arc<ClaimService>>,
    Json(request): Json<ClaimConfirmRequest>,
) -> ApiResult<AckResponse> {
    service
        .confirm_claim(&request.email, &request.tx_hash)
        .map_err(map_error)?;
    Ok(Json(AckResponse { success: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignClaimRequest {
    user_address: String,
    email_hash: String,
    pack: String,
}

#[derive(Serialize)]
struct SignClaimResponse {
    signature: String,
    signer: String,
    amount: u64,
}

async fn sign_claim(
    State(service): State<Arc<ClaimService>>,
    Json(request): Json<SignClaimRequest>,
) -> ApiResult<SignClaimResponse> {
    let signed = service
        .sign_claim(&request.user_address, &request.email_hash, &request.pack)
        .map_err(map_error)?;
    Ok(Json(SignClaimResponse {
        signature: signed.signature,
        signer: signed.signer,
        amount: signed.amount,
    }))
}

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
}

async fn stripe_webhook(
    State(service): State<Arc<ClaimService>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    // A missing header fails verification like any bad signature; all
    // signature failures map to 400 so the processor retries per its policy.
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    service.ingest_webhook(&body, signature).map_err(|err| match err {
        ClaimError::Unauthorized => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                success: false,
                error: "webhook signature verification failed".to_string(),
            }),
        ),
        other => map_error(other),
    })?;
    Ok(Json(WebhookAck { received: true }))
}

#[derive(Deserialize)]
struct DiscordCallbackQuery {
    code: String,
}

#[derive(Serialize)]
struct DiscordCallbackResponse {
    success: bool,
    #[serde(flatten)]
    member: LinkedMember,
}

async fn discord_callback(
    State(service): State<Arc<ClaimService>>,
    Query(query): Query<DiscordCallbackQuery>,
) -> ApiResult<DiscordCallbackResponse> {
    let member = service.link_discord(&query.code).await.map_err(map_error)?;
    Ok(Json(DiscordCallbackResponse {
        success: true,
        member,
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: StoreStats,
    claim_rate: String,
}

async fn admin_stats(
    State(service): State<Arc<ClaimService>>,
    headers: HeaderMap,
) -> ApiResult<StatsResponse> {
    require_admin(&headers, service.admin_token())?;
    let stats = service.stats().map_err(map_error)?;
    let claim_rate = if stats.total_sales > 0 {
        format!(
            "{:.1}%",
            stats.total_claims as f64 / stats.total_sales as f64 * 100.0
        )
    } else {
        "0%".to_string()
    };
    Ok(Json(StatsResponse { stats, claim_rate }))
}

async fn admin_customers(
    State(service): State<Arc<ClaimService>>,
    headers: HeaderMap,
) -> ApiResult<Vec<Customer>> {
    require_admin(&headers, service.admin_token())?;
    Ok(Json(service.customers().map_err(map_error)?))
}

#[derive(Serialize)]
struct SweepResponse {
    success: bool,
    processed: Vec<SweepEntry>,
}

async fn admin_expire(
    State(service): State<Arc<ClaimService>>,
    headers: HeaderMap,
) -> ApiResult<SweepResponse> {
    require_admin(&headers, service.admin_token())?;
    let processed = service.sweep_expired().await.map_err(map_error)?;
    Ok(Json(SweepResponse {
        success: true,
        processed,
    }))
}

/// Static bearer token compared in constant time.
fn require_admin(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let authorized = presented.is_some_and(|token| {
        token.len() == expected.len()
            && bool::from(token.as_bytes().ct_eq(expected.as_bytes()))
    });
    if authorized {
        Ok(())
    } else {
        Err(map_error(ClaimError::Unauthorized))
    }
}

/// Maps domain errors to HTTP responses. Client-facing messages stay
/// generic; details (never secrets) go to the server log only.
fn map_error(err: ClaimError) -> ApiError {
    let (status, message) = match &err {
        ClaimError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
        ClaimError::InvalidKeys => (StatusCode::BAD_REQUEST, err.to_string()),
        ClaimError::AlreadyClaimed => (StatusCode::BAD_REQUEST, err.to_string()),
        ClaimError::ClaimExpired => (StatusCode::BAD_REQUEST, err.to_string()),
        ClaimError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
        ClaimError::Unauthorized => (StatusCode::UNAUTHORIZED, err.to_string()),
        ClaimError::Config(_)
        | ClaimError::Upstream(_)
        | ClaimError::Storage(_)
        | ClaimError::Serialization(_) => {
            warn!(%err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    };
    (
        status,
        Json(ErrorBody {
            success: false,
            error: message,
        }),
    )
}
