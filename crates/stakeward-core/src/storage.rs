use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    BuddyVerification, CheckIn, Commitment, CommitmentStatus, Payment, VerificationStatus,
};

/// Storage traits return `anyhow::Result` for infrastructure failures only;
/// domain outcomes travel as `Option` (absent rows) and `bool` (conditional
/// updates that matched zero rows). The `bool`-returning claim operations
/// must be atomic compare-and-set writes, not read-then-write.
#[async_trait]
pub trait CommitmentStore: Send + Sync {
    async fn insert_commitment(&self, commitment: &Commitment) -> anyhow::Result<()>;

    async fn commitment(&self, id: Uuid) -> anyhow::Result<Option<Commitment>>;

    async fn commitments_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Commitment>>;

    /// Active one-time commitments whose due date has passed.
    async fn overdue_one_time(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Commitment>>;

    /// All active periodic commitments; the caller decides which schedules
    /// have ended.
    async fn active_periodic(&self) -> anyhow::Result<Vec<Commitment>>;

    /// Active commitments whose payment already reached a settled state
    /// (refunded or donated) — the recoverable half-settled case.
    async fn active_with_settled_payment(&self) -> anyhow::Result<Vec<(Commitment, Payment)>>;

    /// Records the financial outcome, conditional on the commitment still
    /// being active. Returns false if the row was not active anymore.
    async fn record_outcome(
        &self,
        id: Uuid,
        status: CommitmentStatus,
        platform_fee: Decimal,
        refund: Decimal,
        donation: Decimal,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a stake payment, claiming the commitment's single settleable
    /// payment slot. Returns false when a pending or succeeded payment
    /// already exists for the commitment; failed payments do not block a
    /// retry.
    async fn insert_payment(&self, payment: &Payment) -> anyhow::Result<bool>;

    async fn payment(&self, id: Uuid) -> anyhow::Result<Option<Payment>>;

    async fn latest_payment(&self, commitment_id: Uuid) -> anyhow::Result<Option<Payment>>;

    async fn succeeded_payment(&self, commitment_id: Uuid) -> anyhow::Result<Option<Payment>>;

    /// Settled (refunded or donated) payment for a commitment, if any.
    async fn settled_payment(&self, commitment_id: Uuid) -> anyhow::Result<Option<Payment>>;

    /// Webhook transition pending -> succeeded. Returns the updated payment,
    /// or None when no pending payment matches the gateway reference.
    async fn mark_payment_succeeded(&self, gateway_ref: &str) -> anyhow::Result<Option<Payment>>;

    /// Webhook transition pending -> failed.
    async fn mark_payment_failed(&self, gateway_ref: &str) -> anyhow::Result<bool>;

    /// Claims a succeeded payment as refunded. The idempotency gate: exactly
    /// one concurrent caller wins.
    async fn claim_refund(
        &self,
        payment_id: Uuid,
        refund_ref: &str,
        refund_amount: Decimal,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Claims a succeeded payment as donated.
    async fn claim_donation(
        &self,
        payment_id: Uuid,
        donation_amount: Decimal,
        charity_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Donated payments not yet grouped into an admin batch.
    async fn unprocessed_donations(&self) -> anyhow::Result<Vec<Payment>>;

    async fn donated_payments(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Payment>>;

    /// Stamps batch metadata on donated payments that are not already in a
    /// batch. Returns the number of rows updated.
    async fn mark_donations_processed(
        &self,
        ids: &[Uuid],
        batch_id: &str,
        receipt_url: Option<&str>,
        processed_by: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait CheckInStore: Send + Sync {
    /// Returns false when a check-in for the instance date already exists.
    async fn insert_check_in(&self, check_in: &CheckIn) -> anyhow::Result<bool>;

    async fn delete_check_in(
        &self,
        commitment_id: Uuid,
        instance_date: NaiveDate,
    ) -> anyhow::Result<bool>;

    async fn count_check_ins(&self, commitment_id: Uuid) -> anyhow::Result<i64>;

    async fn check_ins(&self, commitment_id: Uuid) -> anyhow::Result<Vec<CheckIn>>;
}

#[async_trait]
pub trait BuddyVerificationStore: Send + Sync {
    async fn insert_verification(&self, verification: &BuddyVerification) -> anyhow::Result<()>;

    async fn verification_by_token(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<BuddyVerification>>;

    async fn approved_verification(
        &self,
        commitment_id: Uuid,
    ) -> anyhow::Result<Option<BuddyVerification>>;

    /// Consumes a pending token (single use). Returns false if the row was
    /// no longer pending.
    async fn claim_verification(
        &self,
        token: &str,
        status: VerificationStatus,
        rejection_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn is_admin(&self, email: &str) -> anyhow::Result<bool>;
}

pub trait Store:
    CommitmentStore + PaymentStore + CheckInStore + BuddyVerificationStore + AdminStore
{
}

impl<T> Store for T where
    T: CommitmentStore + PaymentStore + CheckInStore + BuddyVerificationStore + AdminStore
{
}
