use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub start_on: NaiveDate,
    pub duration_weeks: i32,
    /// Day numbers with Sunday as 0.
    pub days_of_week: Vec<i16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommitmentRequest {
    pub user_id: Uuid,
    pub title: String,
    pub stake: Decimal,
    pub kind: String,
    pub due_at: Option<DateTime<Utc>>,
    pub schedule: Option<ScheduleInput>,
    pub charity_id: String,
    pub verification_mode: String,
    pub buddy_email: Option<String>,
    pub pricing_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommitmentResponse {
    pub commitment_id: Uuid,
    pub status: String,
    pub fee_preview: FeePreviewView,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitView {
    pub platform_fee: Decimal,
    pub user_refund: Decimal,
    pub charity_donation: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeePreviewView {
    pub stake: Decimal,
    pub on_success: SplitView,
    pub on_failure: SplitView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentView {
    pub commitment_id: Uuid,
    pub title: String,
    pub stake: Decimal,
    pub kind: String,
    pub due_at: Option<DateTime<Utc>>,
    pub schedule: Option<ScheduleInput>,
    pub charity_id: String,
    pub verification_mode: String,
    pub pricing_model: String,
    pub status: String,
    pub payment_status: Option<String>,
    pub progress: Option<ProgressView>,
    pub platform_fee_amount: Decimal,
    pub refund_amount: Decimal,
    pub charity_donation_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressView {
    pub completed: i64,
    pub expected: i64,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStakeRequest {
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStakeResponse {
    pub payment_id: Uuid,
    pub status: String,
    pub client_handle: String,
    pub test_mode: bool,
    pub fee_preview: FeePreviewView,
}

/// Payment gateway callback body. The signature over the raw bytes is in
/// the `x-gateway-signature` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayWebhookEvent {
    pub event_type: String,
    pub gateway_ref: String,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementView {
    pub commitment_id: Uuid,
    pub outcome: String,
    pub stake: Decimal,
    pub platform_fee: Decimal,
    pub refund_amount: Decimal,
    pub donation_amount: Decimal,
    pub charity_id: Option<String>,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub user_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub check_in_id: Uuid,
    pub instance_date: NaiveDate,
    pub progress: ProgressView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyVerificationResponse {
    pub verification_id: Uuid,
    pub token: String,
    pub buddy_email: String,
    pub expires_at: DateTime<Utc>,
}

/// What the buddy sees before deciding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyLinkView {
    pub commitment_title: String,
    pub stake: Decimal,
    pub charity_id: String,
    pub due_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyDecideRequest {
    pub decision: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDonationView {
    pub payment_id: Uuid,
    pub commitment_id: Uuid,
    pub charity_id: String,
    pub amount: Decimal,
    pub donated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonationBatchRequest {
    pub payment_ids: Vec<Uuid>,
    pub receipt_url: String,
    pub processed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonationBatchResponse {
    pub batch_id: Uuid,
    pub processed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementCompletedEvent {
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub outcome: String,
    pub stake: Decimal,
    pub refund_amount: Decimal,
    pub donation_amount: Decimal,
    pub charity_id: Option<String>,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyRequestedEvent {
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub buddy_email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSucceededEvent {
    pub payment_id: Uuid,
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
}
