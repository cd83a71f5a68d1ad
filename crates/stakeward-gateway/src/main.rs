use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use stakeward_core::{
    BuddyVerification, Commitment, CommitmentKind, CommitmentStatus, EngineError, Payment,
    PricingModel, Schedule, Store, VerificationMode,
};
use stakeward_engine::buddy::BuddyDecision;
use stakeward_engine::{SettlementEngine, SettlementNotifier, SettlementResult, SimulatedGateway};
use stakeward_platform::redis_bus::{BUDDY_REQUESTS_CHANNEL, PAYMENTS_CHANNEL, SETTLEMENTS_CHANNEL};
use stakeward_platform::{
    BuddyDecideRequest, BuddyLinkView, BuddyRequestedEvent, BuddyVerificationResponse,
    CheckInRequest, CheckInResponse, CommitmentView, CreateCommitmentRequest,
    CreateCommitmentResponse, CreateStakeRequest, CreateStakeResponse, DonationBatchRequest,
    DonationBatchResponse, FeePreviewView, GatewayWebhookEvent, PaymentSucceededEvent,
    PendingDonationView, ProgressView, RedisBus, ScheduleInput, ServiceConfig,
    SettlementCompletedEvent, SettlementView, SplitView, connect_database,
};
use stakeward_pricing::{FeePreview, Split};
use stakeward_store::PgStore;

const SIGNATURE_HEADER: &str = "x-gateway-signature";
const ADMIN_EMAIL_HEADER: &str = "x-admin-email";
const MAX_SCHEDULE_WEEKS: i32 = 52;

#[derive(Clone)]
struct AppState {
    engine: Arc<SettlementEngine>,
    store: Arc<dyn Store>,
    redis: RedisBus,
    webhook_secret: String,
    reconcile_secret: String,
    default_pricing_model: PricingModel,
}

/// Publishes settlement and buddy events onto the notification bus.
struct RedisNotifier {
    redis: RedisBus,
}

#[async_trait]
impl SettlementNotifier for RedisNotifier {
    async fn settlement_completed(
        &self,
        commitment: &Commitment,
        result: &SettlementResult,
    ) -> anyhow::Result<()> {
        let event = SettlementCompletedEvent {
            commitment_id: commitment.id,
            user_id: commitment.user_id,
            title: commitment.title.clone(),
            outcome: result.outcome.as_str().to_string(),
            stake: result.stake,
            refund_amount: result.refund_amount,
            donation_amount: result.donation_amount,
            charity_id: result.charity_id.clone(),
            settled_at: result.settled_at,
        };
        self.redis.publish_json(SETTLEMENTS_CHANNEL, &event).await
    }

    async fn buddy_requested(
        &self,
        commitment: &Commitment,
        verification: &BuddyVerification,
    ) -> anyhow::Result<()> {
        let event = BuddyRequestedEvent {
            commitment_id: commitment.id,
            user_id: commitment.user_id,
            title: commitment.title.clone(),
            buddy_email: verification.buddy_email.clone(),
            token: verification.token.clone(),
            expires_at: verification.expires_at,
        };
        self.redis.publish_json(BUDDY_REQUESTS_CHANNEL, &event).await
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "stakeward_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let default_pricing_model = PricingModel::parse(&config.default_pricing_model)
        .ok_or_else(|| anyhow::anyhow!("unknown PRICING_MODEL: {}", config.default_pricing_model))?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let notifier: Arc<dyn SettlementNotifier> = Arc::new(RedisNotifier {
        redis: redis.clone(),
    });
    let engine = Arc::new(SettlementEngine::new(
        store.clone(),
        Arc::new(SimulatedGateway),
        notifier,
        Duration::from_millis(config.gateway_timeout_ms),
    ));

    let state = AppState {
        engine,
        store,
        redis,
        webhook_secret: config.webhook_secret.clone(),
        reconcile_secret: config.reconcile_secret.clone(),
        default_pricing_model,
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/commitments", post(create_commitment).get(list_commitments))
        .route("/commitments/{commitment_id}", get(get_commitment))
        .route("/commitments/{commitment_id}/complete", post(complete_commitment))
        .route("/commitments/{commitment_id}/check-ins", post(create_check_in))
        .route(
            "/commitments/{commitment_id}/check-ins/{date}",
            delete(delete_check_in),
        )
        .route(
            "/commitments/{commitment_id}/buddy-verification",
            post(request_buddy_verification),
        )
        .route("/stakes", post(create_stake))
        .route("/webhooks/gateway", post(gateway_webhook))
        .route("/buddy/{token}", get(view_buddy_link).post(decide_buddy_link))
        .route("/internal/reconcile", post(run_reconcile))
        .route("/admin/donations/pending", get(list_pending_donations))
        .route("/admin/donations/batch", post(process_donation_batch))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_commitment(
    State(state): State<AppState>,
    Json(payload): Json<CreateCommitmentRequest>,
) -> Result<Json<CreateCommitmentResponse>, (StatusCode, String)> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "title is required".to_string()));
    }
    if payload.stake <= Decimal::ZERO || payload.stake.round_dp(2) != payload.stake {
        return Err((
            StatusCode::BAD_REQUEST,
            "stake must be a positive amount in cents".to_string(),
        ));
    }
    let charity_id = payload.charity_id.trim().to_string();
    if charity_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "charity_id is required".to_string()));
    }

    let kind = CommitmentKind::parse(&payload.kind)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown kind: {}", payload.kind)))?;
    let verification_mode = VerificationMode::parse(&payload.verification_mode).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("unknown verification_mode: {}", payload.verification_mode),
        )
    })?;
    let pricing_model = match payload.pricing_model.as_deref() {
        Some(raw) => PricingModel::parse(raw)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown pricing_model: {raw}")))?,
        None => state.default_pricing_model,
    };

    let (due_at, schedule) = match kind {
        CommitmentKind::OneTime => {
            let due_at = payload.due_at.ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    "one_time commitments need a due_at".to_string(),
                )
            })?;
            if due_at <= Utc::now() {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "due_at must be in the future".to_string(),
                ));
            }
            if payload.schedule.is_some() {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "one_time commitments take no schedule".to_string(),
                ));
            }
            (Some(due_at), None)
        }
        CommitmentKind::Periodic => {
            let input = payload.schedule.ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    "periodic commitments need a schedule".to_string(),
                )
            })?;
            (None, Some(validate_schedule(input)?))
        }
    };

    let buddy_email = match verification_mode {
        VerificationMode::Buddy => {
            let email = payload
                .buddy_email
                .as_deref()
                .map(str::trim)
                .filter(|e| e.contains('@'))
                .ok_or_else(|| {
                    (
                        StatusCode::BAD_REQUEST,
                        "buddy verification needs a valid buddy_email".to_string(),
                    )
                })?;
            Some(email.to_string())
        }
        _ => None,
    };

    let commitment = Commitment {
        id: Uuid::new_v4(),
        user_id: payload.user_id,
        title,
        stake: payload.stake,
        kind,
        due_at,
        schedule,
        charity_id,
        verification_mode,
        buddy_email,
        pricing_model,
        status: CommitmentStatus::Active,
        platform_fee_amount: Decimal::ZERO,
        refund_amount: Decimal::ZERO,
        charity_donation_amount: Decimal::ZERO,
        created_at: Utc::now(),
    };
    state
        .store
        .insert_commitment(&commitment)
        .await
        .map_err(internal_error)?;

    info!(commitment_id = %commitment.id, kind = kind.as_str(), "commitment created");

    Ok(Json(CreateCommitmentResponse {
        commitment_id: commitment.id,
        status: commitment.status.as_str().to_string(),
        fee_preview: preview_view(stakeward_pricing::preview(pricing_model, commitment.stake)),
        created_at: commitment.created_at,
    }))
}

fn validate_schedule(input: ScheduleInput) -> Result<Schedule, (StatusCode, String)> {
    if input.duration_weeks < 1 || input.duration_weeks > MAX_SCHEDULE_WEEKS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("duration_weeks must be between 1 and {MAX_SCHEDULE_WEEKS}"),
        ));
    }
    if input.days_of_week.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "days_of_week must not be empty".to_string(),
        ));
    }
    let mut days = input.days_of_week;
    days.sort_unstable();
    days.dedup();
    if days.iter().any(|day| !(0..=6).contains(day)) {
        return Err((
            StatusCode::BAD_REQUEST,
            "days_of_week entries must be 0 (Sunday) through 6 (Saturday)".to_string(),
        ));
    }
    Ok(Schedule {
        start_on: input.start_on,
        duration_weeks: input.duration_weeks,
        days_of_week: days,
    })
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Uuid,
}

async fn list_commitments(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<CommitmentView>>, (StatusCode, String)> {
    let commitments = state
        .store
        .commitments_for_user(query.user_id)
        .await
        .map_err(internal_error)?;

    let mut views = Vec::with_capacity(commitments.len());
    for commitment in commitments {
        views.push(commitment_view(&state, &commitment).await?);
    }
    Ok(Json(views))
}

async fn get_commitment(
    State(state): State<AppState>,
    Path(commitment_id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> Result<Json<CommitmentView>, (StatusCode, String)> {
    let commitment = state
        .engine
        .owned_commitment(commitment_id, query.user_id)
        .await
        .map_err(engine_error_response)?;
    Ok(Json(commitment_view(&state, &commitment).await?))
}

async fn commitment_view(
    state: &AppState,
    commitment: &Commitment,
) -> Result<CommitmentView, (StatusCode, String)> {
    let payment_status = state
        .store
        .latest_payment(commitment.id)
        .await
        .map_err(internal_error)?
        .map(|p| p.status.as_str().to_string());

    let progress = if commitment.kind == CommitmentKind::Periodic {
        let progress = state
            .engine
            .periodic_progress(commitment)
            .await
            .map_err(engine_error_response)?;
        Some(ProgressView {
            completed: progress.completed,
            expected: progress.expected,
            rate: progress.rate(),
        })
    } else {
        None
    };

    Ok(CommitmentView {
        commitment_id: commitment.id,
        title: commitment.title.clone(),
        stake: commitment.stake,
        kind: commitment.kind.as_str().to_string(),
        due_at: commitment.due_at,
        schedule: commitment.schedule.as_ref().map(|s| ScheduleInput {
            start_on: s.start_on,
            duration_weeks: s.duration_weeks,
            days_of_week: s.days_of_week.clone(),
        }),
        charity_id: commitment.charity_id.clone(),
        verification_mode: commitment.verification_mode.as_str().to_string(),
        pricing_model: commitment.pricing_model.as_str().to_string(),
        status: commitment.status.as_str().to_string(),
        payment_status,
        progress,
        platform_fee_amount: commitment.platform_fee_amount,
        refund_amount: commitment.refund_amount,
        charity_donation_amount: commitment.charity_donation_amount,
        created_at: commitment.created_at,
    })
}

async fn create_stake(
    State(state): State<AppState>,
    Json(payload): Json<CreateStakeRequest>,
) -> Result<Json<CreateStakeResponse>, (StatusCode, String)> {
    let capture = state
        .engine
        .create_stake(
            payload.commitment_id,
            payload.user_id,
            payload.amount,
            &payload.currency,
            payload.test_mode,
        )
        .await
        .map_err(engine_error_response)?;

    Ok(Json(CreateStakeResponse {
        payment_id: capture.payment.id,
        status: capture.payment.status.as_str().to_string(),
        client_handle: capture.client_handle,
        test_mode: capture.test_mode,
        fee_preview: preview_view(capture.preview),
    }))
}

async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, String)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "missing signature".to_string()))?;
    if !verify_signature(&state.webhook_secret, &body, signature) {
        return Err((StatusCode::UNAUTHORIZED, "invalid signature".to_string()));
    }

    let event: GatewayWebhookEvent = serde_json::from_slice(&body)
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid payload: {err}")))?;

    match event.event_type.as_str() {
        "charge.succeeded" => {
            // The conditional update makes redelivered webhooks a no-op.
            match state
                .store
                .mark_payment_succeeded(&event.gateway_ref)
                .await
                .map_err(internal_error)?
            {
                Some(payment) => {
                    info!(payment_id = %payment.id, "stake payment confirmed");
                    publish_payment_succeeded(&state, &payment).await;
                }
                None => info!(
                    gateway_ref = %event.gateway_ref,
                    "webhook for unknown or already-confirmed payment"
                ),
            }
        }
        "charge.failed" => {
            let marked = state
                .store
                .mark_payment_failed(&event.gateway_ref)
                .await
                .map_err(internal_error)?;
            if marked {
                warn!(
                    gateway_ref = %event.gateway_ref,
                    reason = event.failure_reason.as_deref().unwrap_or("unspecified"),
                    "stake payment failed"
                );
            }
        }
        other => info!(event_type = other, "ignoring unhandled webhook event"),
    }

    Ok(Json(json!({ "received": true })))
}

async fn publish_payment_succeeded(state: &AppState, payment: &Payment) {
    let event = PaymentSucceededEvent {
        payment_id: payment.id,
        commitment_id: payment.commitment_id,
        user_id: payment.user_id,
        amount: payment.amount,
        currency: payment.currency.clone(),
    };
    if let Err(err) = state.redis.publish_json(PAYMENTS_CHANNEL, &event).await {
        warn!("failed to publish payment event: {err:#}");
    }
}

async fn complete_commitment(
    State(state): State<AppState>,
    Path(commitment_id): Path<Uuid>,
    Json(query): Json<UserQuery>,
) -> Result<Json<SettlementView>, (StatusCode, String)> {
    let result = state
        .engine
        .complete_by_user(commitment_id, query.user_id)
        .await
        .map_err(engine_error_response)?;
    Ok(Json(settlement_view(result)))
}

async fn create_check_in(
    State(state): State<AppState>,
    Path(commitment_id): Path<Uuid>,
    Json(payload): Json<CheckInRequest>,
) -> Result<Json<CheckInResponse>, (StatusCode, String)> {
    let check_in = state
        .engine
        .check_in(commitment_id, payload.user_id, payload.date)
        .await
        .map_err(engine_error_response)?;
    let commitment = state
        .engine
        .owned_commitment(commitment_id, payload.user_id)
        .await
        .map_err(engine_error_response)?;
    let progress = state
        .engine
        .periodic_progress(&commitment)
        .await
        .map_err(engine_error_response)?;

    Ok(Json(CheckInResponse {
        check_in_id: check_in.id,
        instance_date: check_in.instance_date,
        progress: ProgressView {
            completed: progress.completed,
            expected: progress.expected,
            rate: progress.rate(),
        },
    }))
}

async fn delete_check_in(
    State(state): State<AppState>,
    Path((commitment_id, date)): Path<(Uuid, chrono::NaiveDate)>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    state
        .engine
        .undo_check_in(commitment_id, query.user_id, date)
        .await
        .map_err(engine_error_response)?;
    Ok(Json(json!({ "deleted": true })))
}

async fn request_buddy_verification(
    State(state): State<AppState>,
    Path(commitment_id): Path<Uuid>,
    Json(query): Json<UserQuery>,
) -> Result<Json<BuddyVerificationResponse>, (StatusCode, String)> {
    let verification = state
        .engine
        .request_buddy_verification(commitment_id, query.user_id)
        .await
        .map_err(engine_error_response)?;
    Ok(Json(BuddyVerificationResponse {
        verification_id: verification.id,
        token: verification.token,
        buddy_email: verification.buddy_email,
        expires_at: verification.expires_at,
    }))
}

async fn view_buddy_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<BuddyLinkView>, (StatusCode, String)> {
    let (verification, commitment) = state
        .engine
        .inspect_verification(&token)
        .await
        .map_err(engine_error_response)?;
    Ok(Json(BuddyLinkView {
        commitment_title: commitment.title,
        stake: commitment.stake,
        charity_id: commitment.charity_id,
        due_at: commitment.due_at,
        expires_at: verification.expires_at,
    }))
}

async fn decide_buddy_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<BuddyDecideRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let decision = match payload.decision.as_str() {
        "approved" => BuddyDecision::Approved,
        "rejected" => BuddyDecision::Rejected,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("decision must be approved or rejected, got {other}"),
            ));
        }
    };

    let outcome = state
        .engine
        .decide_verification(&token, decision, payload.reason)
        .await
        .map_err(engine_error_response)?;

    Ok(Json(json!({
        "decision": outcome.verification.status.as_str(),
        "settlement": outcome.settlement.map(settlement_view),
    })))
}

async fn run_reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, String)> {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !verify_bearer_secret(&state.reconcile_secret, authorization) {
        return Err((StatusCode::UNAUTHORIZED, "invalid reconcile secret".to_string()));
    }

    let summary = state
        .engine
        .reconcile()
        .await
        .map_err(engine_error_response)?;
    Ok(Json(json!(summary)))
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<String, (StatusCode, String)> {
    let email = headers
        .get(ADMIN_EMAIL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "missing admin email".to_string()))?;
    let allowed = state.store.is_admin(email).await.map_err(internal_error)?;
    if !allowed {
        return Err((StatusCode::FORBIDDEN, "not an admin".to_string()));
    }
    Ok(email.to_string())
}

async fn list_pending_donations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PendingDonationView>>, (StatusCode, String)> {
    require_admin(&state, &headers).await?;

    let payments = state
        .store
        .unprocessed_donations()
        .await
        .map_err(internal_error)?;
    let views = payments
        .into_iter()
        .map(|payment| PendingDonationView {
            payment_id: payment.id,
            commitment_id: payment.commitment_id,
            charity_id: payment.donation_charity.unwrap_or_default(),
            amount: payment.donation_amount.unwrap_or_default(),
            donated_at: payment.donated_at,
        })
        .collect();
    Ok(Json(views))
}

async fn process_donation_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DonationBatchRequest>,
) -> Result<Json<DonationBatchResponse>, (StatusCode, String)> {
    let admin_email = require_admin(&state, &headers).await?;

    if payload.payment_ids.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "payment_ids must not be empty".to_string(),
        ));
    }
    let receipt_url = payload.receipt_url.trim();
    if receipt_url.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "receipt_url is required".to_string(),
        ));
    }

    let batch_id = Uuid::new_v4();
    let processed = state
        .store
        .mark_donations_processed(
            &payload.payment_ids,
            &batch_id.to_string(),
            Some(receipt_url),
            &admin_email,
            Utc::now(),
        )
        .await
        .map_err(internal_error)?;
    let skipped = payload.payment_ids.len() as u64 - processed;

    info!(
        batch_id = %batch_id,
        processed,
        skipped,
        "donation batch recorded"
    );

    Ok(Json(DonationBatchResponse {
        batch_id,
        processed,
        skipped,
    }))
}

fn settlement_view(result: SettlementResult) -> SettlementView {
    SettlementView {
        commitment_id: result.commitment_id,
        outcome: result.outcome.as_str().to_string(),
        stake: result.stake,
        platform_fee: result.platform_fee,
        refund_amount: result.refund_amount,
        donation_amount: result.donation_amount,
        charity_id: result.charity_id,
        settled_at: result.settled_at,
    }
}

fn preview_view(preview: FeePreview) -> FeePreviewView {
    FeePreviewView {
        stake: preview.stake,
        on_success: split_view(preview.success),
        on_failure: split_view(preview.failure),
    }
}

fn split_view(split: Split) -> SplitView {
    SplitView {
        platform_fee: split.platform_fee,
        user_refund: split.user_refund,
        charity_donation: split.charity_donation,
    }
}

// Double-HMAC compare: both sides go through the MAC so the final check is
// `verify_slice`, which is constant time, same as the webhook path.
fn verify_bearer_secret(secret: &str, authorization: &str) -> bool {
    let Some(provided) = authorization.strip_prefix("Bearer ") else {
        return false;
    };
    let Ok(mut expected) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    expected.update(secret.as_bytes());
    let Ok(mut given) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    given.update(provided.as_bytes());
    expected.verify_slice(&given.finalize().into_bytes()).is_ok()
}

fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn engine_error_response(err: EngineError) -> (StatusCode, String) {
    match err {
        EngineError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        EngineError::AlreadySettled => (
            StatusCode::CONFLICT,
            "commitment is already settled".to_string(),
        ),
        EngineError::AlreadyProcessed => {
            (StatusCode::CONFLICT, "already processed".to_string())
        }
        EngineError::Expired => (StatusCode::GONE, "verification link expired".to_string()),
        EngineError::InvalidState(message) | EngineError::Validation(message) => {
            (StatusCode::BAD_REQUEST, message)
        }
        EngineError::GatewayTransient(message) => (StatusCode::BAD_GATEWAY, message),
        EngineError::Storage(err) => internal_error(err),
    }
}

fn internal_error(err: anyhow::Error) -> (StatusCode, String) {
    error!("storage error: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"event_type":"charge.succeeded","gateway_ref":"pi_123"}"#;
        let signature = sign("whsec_test", body);
        assert!(verify_signature("whsec_test", body, &signature));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let body = br#"{"event_type":"charge.succeeded","gateway_ref":"pi_123"}"#;
        let signature = sign("whsec_test", body);
        let tampered = br#"{"event_type":"charge.succeeded","gateway_ref":"pi_999"}"#;
        assert!(!verify_signature("whsec_test", tampered, &signature));
    }

    #[test]
    fn wrong_secret_and_garbage_signatures_are_rejected() {
        let body = b"payload";
        let signature = sign("whsec_a", body);
        assert!(!verify_signature("whsec_b", body, &signature));
        assert!(!verify_signature("whsec_a", body, "not-hex"));
        assert!(!verify_signature("whsec_a", body, ""));
    }

    #[test]
    fn bearer_secret_check_requires_the_exact_token() {
        assert!(verify_bearer_secret("cron_s3cret", "Bearer cron_s3cret"));
        assert!(!verify_bearer_secret("cron_s3cret", "Bearer cron_s3cre"));
        assert!(!verify_bearer_secret("cron_s3cret", "Bearer cron_s3cret2"));
        assert!(!verify_bearer_secret("cron_s3cret", "cron_s3cret"));
        assert!(!verify_bearer_secret("cron_s3cret", ""));
    }

    #[test]
    fn schedule_validation_normalizes_days() {
        let schedule = validate_schedule(ScheduleInput {
            start_on: chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            duration_weeks: 4,
            days_of_week: vec![5, 1, 3, 1],
        })
        .unwrap();
        assert_eq!(schedule.days_of_week, vec![1, 3, 5]);

        let bad_day = validate_schedule(ScheduleInput {
            start_on: chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            duration_weeks: 4,
            days_of_week: vec![7],
        });
        assert!(bad_day.is_err());

        let bad_weeks = validate_schedule(ScheduleInput {
            start_on: chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            duration_weeks: 0,
            days_of_week: vec![1],
        });
        assert!(bad_weeks.is_err());
    }
}
