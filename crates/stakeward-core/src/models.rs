use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentKind {
    OneTime,
    Periodic,
}

impl CommitmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentKind::OneTime => "one_time",
            CommitmentKind::Periodic => "periodic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "one_time" => Some(CommitmentKind::OneTime),
            "periodic" => Some(CommitmentKind::Periodic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentStatus {
    Active,
    Completed,
    Failed,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentStatus::Active => "active",
            CommitmentStatus::Completed => "completed",
            CommitmentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(CommitmentStatus::Active),
            "completed" => Some(CommitmentStatus::Completed),
            "failed" => Some(CommitmentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    Integrity,
    Buddy,
    App,
}

impl VerificationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMode::Integrity => "integrity",
            VerificationMode::Buddy => "buddy",
            VerificationMode::App => "app",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "integrity" => Some(VerificationMode::Integrity),
            "buddy" => Some(VerificationMode::Buddy),
            "app" => Some(VerificationMode::App),
            _ => None,
        }
    }
}

/// Pricing policy fixed at stake creation. Settlement always uses the model
/// recorded on the commitment, so a config change never alters the economics
/// of an in-flight commitment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    Percentage,
    FlatFee,
}

impl PricingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingModel::Percentage => "percentage",
            PricingModel::FlatFee => "flat_fee",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "percentage" => Some(PricingModel::Percentage),
            "flat_fee" => Some(PricingModel::FlatFee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }

    pub fn terminal_status(&self) -> CommitmentStatus {
        match self {
            Outcome::Success => CommitmentStatus::Completed,
            Outcome::Failure => CommitmentStatus::Failed,
        }
    }
}

/// Recurring schedule for a periodic commitment. Day numbers are
/// Sunday-based (0 = Sunday .. 6 = Saturday).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub start_on: NaiveDate,
    pub duration_weeks: i32,
    pub days_of_week: Vec<i16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub stake: Decimal,
    pub kind: CommitmentKind,
    pub due_at: Option<DateTime<Utc>>,
    pub schedule: Option<Schedule>,
    pub charity_id: String,
    pub verification_mode: VerificationMode,
    pub buddy_email: Option<String>,
    pub pricing_model: PricingModel,
    pub status: CommitmentStatus,
    pub platform_fee_amount: Decimal,
    pub refund_amount: Decimal,
    pub charity_donation_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    Donated,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Donated => "donated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "donated" => Some(PaymentStatus::Donated),
            _ => None,
        }
    }

    /// Refunded and Donated are the two terminal settled states.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Refunded | PaymentStatus::Donated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub gateway_ref: String,
    pub status: PaymentStatus,
    pub refund_ref: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub donation_amount: Option<Decimal>,
    pub donation_charity: Option<String>,
    pub donated_at: Option<DateTime<Utc>>,
    pub donation_batch_id: Option<String>,
    pub donation_receipt_url: Option<String>,
    pub donation_processed_at: Option<DateTime<Utc>>,
    pub donation_processed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: Uuid,
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub instance_date: NaiveDate,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(VerificationStatus::Pending),
            "approved" => Some(VerificationStatus::Approved),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyVerification {
    pub id: Uuid,
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub buddy_email: String,
    pub token: String,
    pub status: VerificationStatus,
    pub rejection_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BuddyVerification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == VerificationStatus::Pending && now > self.expires_at
    }
}
