use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use stakeward_core::{
    AdminStore, BuddyVerification, BuddyVerificationStore, CheckIn, CheckInStore, Commitment,
    CommitmentKind, CommitmentStatus, CommitmentStore, Payment, PaymentStatus, PaymentStore,
    PricingModel, Schedule, VerificationMode, VerificationStatus,
};

const COMMITMENT_COLUMNS: &str = "id, user_id, title, stake, kind, due_at, start_on, \
     duration_weeks, days_of_week, charity_id, verification_mode, buddy_email, pricing_model, \
     status, platform_fee_amount, refund_amount, charity_donation_amount, created_at";

const PAYMENT_COLUMNS: &str = "id, commitment_id, user_id, amount, currency, gateway_ref, \
     status, refund_ref, refund_amount, refunded_at, donation_amount, donation_charity, \
     donated_at, donation_batch_id, donation_receipt_url, donation_processed_at, \
     donation_processed_by, created_at";

const VERIFICATION_COLUMNS: &str = "id, commitment_id, user_id, buddy_email, token, status, \
     rejection_reason, expires_at, verified_at, created_at";

/// Postgres-backed store. Statuses live in TEXT columns; every claim is a
/// single conditional UPDATE so two racing callers cannot both win.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn commitment_from_row(row: &PgRow) -> Result<Commitment> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = CommitmentKind::parse(&kind_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown commitment kind {kind_raw}"))?;
    let status_raw: String = row.try_get("status")?;
    let status = CommitmentStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown commitment status {status_raw}"))?;
    let mode_raw: String = row.try_get("verification_mode")?;
    let verification_mode = VerificationMode::parse(&mode_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown verification mode {mode_raw}"))?;
    let pricing_raw: String = row.try_get("pricing_model")?;
    let pricing_model = PricingModel::parse(&pricing_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown pricing model {pricing_raw}"))?;

    let start_on: Option<NaiveDate> = row.try_get("start_on")?;
    let duration_weeks: Option<i32> = row.try_get("duration_weeks")?;
    let days_of_week: Option<Vec<i16>> = row.try_get("days_of_week")?;
    let schedule = match (start_on, duration_weeks, days_of_week) {
        (Some(start_on), Some(duration_weeks), Some(days_of_week)) => Some(Schedule {
            start_on,
            duration_weeks,
            days_of_week,
        }),
        _ => None,
    };

    Ok(Commitment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        stake: row.try_get("stake")?,
        kind,
        due_at: row.try_get("due_at")?,
        schedule,
        charity_id: row.try_get("charity_id")?,
        verification_mode,
        buddy_email: row.try_get("buddy_email")?,
        pricing_model,
        status,
        platform_fee_amount: row.try_get("platform_fee_amount")?,
        refund_amount: row.try_get("refund_amount")?,
        charity_donation_amount: row.try_get("charity_donation_amount")?,
        created_at: row.try_get("created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let status_raw: String = row.try_get("status")?;
    let status = PaymentStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown payment status {status_raw}"))?;

    Ok(Payment {
        id: row.try_get("id")?,
        commitment_id: row.try_get("commitment_id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        gateway_ref: row.try_get("gateway_ref")?,
        status,
        refund_ref: row.try_get("refund_ref")?,
        refund_amount: row.try_get("refund_amount")?,
        refunded_at: row.try_get("refunded_at")?,
        donation_amount: row.try_get("donation_amount")?,
        donation_charity: row.try_get("donation_charity")?,
        donated_at: row.try_get("donated_at")?,
        donation_batch_id: row.try_get("donation_batch_id")?,
        donation_receipt_url: row.try_get("donation_receipt_url")?,
        donation_processed_at: row.try_get("donation_processed_at")?,
        donation_processed_by: row.try_get("donation_processed_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn verification_from_row(row: &PgRow) -> Result<BuddyVerification> {
    let status_raw: String = row.try_get("status")?;
    let status = VerificationStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown verification status {status_raw}"))?;

    Ok(BuddyVerification {
        id: row.try_get("id")?,
        commitment_id: row.try_get("commitment_id")?,
        user_id: row.try_get("user_id")?,
        buddy_email: row.try_get("buddy_email")?,
        token: row.try_get("token")?,
        status,
        rejection_reason: row.try_get("rejection_reason")?,
        expires_at: row.try_get("expires_at")?,
        verified_at: row.try_get("verified_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn check_in_from_row(row: &PgRow) -> Result<CheckIn> {
    Ok(CheckIn {
        id: row.try_get("id")?,
        commitment_id: row.try_get("commitment_id")?,
        user_id: row.try_get("user_id")?,
        instance_date: row.try_get("instance_date")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl CommitmentStore for PgStore {
    async fn insert_commitment(&self, commitment: &Commitment) -> Result<()> {
        let (start_on, duration_weeks, days_of_week) = match &commitment.schedule {
            Some(s) => (
                Some(s.start_on),
                Some(s.duration_weeks),
                Some(s.days_of_week.clone()),
            ),
            None => (None, None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO commitments (
                id, user_id, title, stake, kind, due_at, start_on, duration_weeks,
                days_of_week, charity_id, verification_mode, buddy_email, pricing_model,
                status, platform_fee_amount, refund_amount, charity_donation_amount, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(commitment.id)
        .bind(commitment.user_id)
        .bind(&commitment.title)
        .bind(commitment.stake)
        .bind(commitment.kind.as_str())
        .bind(commitment.due_at)
        .bind(start_on)
        .bind(duration_weeks)
        .bind(days_of_week)
        .bind(&commitment.charity_id)
        .bind(commitment.verification_mode.as_str())
        .bind(&commitment.buddy_email)
        .bind(commitment.pricing_model.as_str())
        .bind(commitment.status.as_str())
        .bind(commitment.platform_fee_amount)
        .bind(commitment.refund_amount)
        .bind(commitment.charity_donation_amount)
        .bind(commitment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn commitment(&self, id: Uuid) -> Result<Option<Commitment>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMITMENT_COLUMNS} FROM commitments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(commitment_from_row).transpose()
    }

    async fn commitments_for_user(&self, user_id: Uuid) -> Result<Vec<Commitment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMITMENT_COLUMNS} FROM commitments WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(commitment_from_row).collect()
    }

    async fn overdue_one_time(&self, now: DateTime<Utc>) -> Result<Vec<Commitment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMITMENT_COLUMNS} FROM commitments \
             WHERE status = 'active' AND kind = 'one_time' AND due_at < $1"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(commitment_from_row).collect()
    }

    async fn active_periodic(&self) -> Result<Vec<Commitment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMITMENT_COLUMNS} FROM commitments \
             WHERE status = 'active' AND kind = 'periodic'"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(commitment_from_row).collect()
    }

    async fn active_with_settled_payment(&self) -> Result<Vec<(Commitment, Payment)>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT c.id
            FROM commitments c
            JOIN payments p ON p.commitment_id = c.id
            WHERE c.status = 'active' AND p.status IN ('refunded', 'donated')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pairs = Vec::with_capacity(ids.len());
        for id in ids {
            let commitment = self.commitment(id).await?;
            let payment = self.settled_payment(id).await?;
            if let (Some(commitment), Some(payment)) = (commitment, payment) {
                pairs.push((commitment, payment));
            }
        }
        Ok(pairs)
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        status: CommitmentStatus,
        platform_fee: Decimal,
        refund: Decimal,
        donation: Decimal,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE commitments
            SET status = $2,
                platform_fee_amount = $3,
                refund_amount = $4,
                charity_donation_amount = $5
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(platform_fee)
        .bind(refund)
        .bind(donation)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<bool> {
        // The partial unique index on (commitment_id) for pending/succeeded
        // rows is the arbiter; a concurrent second stake loses here instead
        // of double-charging.
        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                id, commitment_id, user_id, amount, currency, gateway_ref, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (commitment_id) WHERE status IN ('pending', 'succeeded') DO NOTHING
            "#,
        )
        .bind(payment.id)
        .bind(payment.commitment_id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.gateway_ref)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn latest_payment(&self, commitment_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE commitment_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(commitment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn succeeded_payment(&self, commitment_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE commitment_id = $1 AND status = 'succeeded' LIMIT 1"
        ))
        .bind(commitment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn settled_payment(&self, commitment_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE commitment_id = $1 AND status IN ('refunded', 'donated') LIMIT 1"
        ))
        .bind(commitment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn mark_payment_succeeded(&self, gateway_ref: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "UPDATE payments SET status = 'succeeded' \
             WHERE gateway_ref = $1 AND status = 'pending' \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(gateway_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payment_from_row).transpose()
    }

    async fn mark_payment_failed(&self, gateway_ref: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'failed' WHERE gateway_ref = $1 AND status = 'pending'",
        )
        .bind(gateway_ref)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_refund(
        &self,
        payment_id: Uuid,
        refund_ref: &str,
        refund_amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'refunded',
                refund_ref = $2,
                refund_amount = $3,
                refunded_at = $4
            WHERE id = $1 AND status = 'succeeded'
            "#,
        )
        .bind(payment_id)
        .bind(refund_ref)
        .bind(refund_amount)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_donation(
        &self,
        payment_id: Uuid,
        donation_amount: Decimal,
        charity_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'donated',
                donation_amount = $2,
                donation_charity = $3,
                donated_at = $4
            WHERE id = $1 AND status = 'succeeded'
            "#,
        )
        .bind(payment_id)
        .bind(donation_amount)
        .bind(charity_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn unprocessed_donations(&self) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status = 'donated' AND donation_processed_at IS NULL \
             ORDER BY donated_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }

    async fn donated_payments(&self, ids: &[Uuid]) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE id = ANY($1) AND status = 'donated'"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }

    async fn mark_donations_processed(
        &self,
        ids: &[Uuid],
        batch_id: &str,
        receipt_url: Option<&str>,
        processed_by: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET donation_batch_id = $2,
                donation_receipt_url = $3,
                donation_processed_by = $4,
                donation_processed_at = $5
            WHERE id = ANY($1) AND status = 'donated' AND donation_processed_at IS NULL
            "#,
        )
        .bind(ids)
        .bind(batch_id)
        .bind(receipt_url)
        .bind(processed_by)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CheckInStore for PgStore {
    async fn insert_check_in(&self, check_in: &CheckIn) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO check_ins (id, commitment_id, user_id, instance_date, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (commitment_id, instance_date) DO NOTHING
            "#,
        )
        .bind(check_in.id)
        .bind(check_in.commitment_id)
        .bind(check_in.user_id)
        .bind(check_in.instance_date)
        .bind(check_in.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_check_in(&self, commitment_id: Uuid, instance_date: NaiveDate) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM check_ins WHERE commitment_id = $1 AND instance_date = $2")
                .bind(commitment_id)
                .bind(instance_date)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_check_ins(&self, commitment_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM check_ins WHERE commitment_id = $1",
        )
        .bind(commitment_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn check_ins(&self, commitment_id: Uuid) -> Result<Vec<CheckIn>> {
        let rows = sqlx::query(
            "SELECT id, commitment_id, user_id, instance_date, completed_at \
             FROM check_ins WHERE commitment_id = $1 ORDER BY instance_date",
        )
        .bind(commitment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(check_in_from_row).collect()
    }
}

#[async_trait]
impl BuddyVerificationStore for PgStore {
    async fn insert_verification(&self, verification: &BuddyVerification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO buddy_verifications (
                id, commitment_id, user_id, buddy_email, token, status, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(verification.id)
        .bind(verification.commitment_id)
        .bind(verification.user_id)
        .bind(&verification.buddy_email)
        .bind(&verification.token)
        .bind(verification.status.as_str())
        .bind(verification.expires_at)
        .bind(verification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn verification_by_token(&self, token: &str) -> Result<Option<BuddyVerification>> {
        let row = sqlx::query(&format!(
            "SELECT {VERIFICATION_COLUMNS} FROM buddy_verifications WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(verification_from_row).transpose()
    }

    async fn approved_verification(
        &self,
        commitment_id: Uuid,
    ) -> Result<Option<BuddyVerification>> {
        let row = sqlx::query(&format!(
            "SELECT {VERIFICATION_COLUMNS} FROM buddy_verifications \
             WHERE commitment_id = $1 AND status = 'approved' LIMIT 1"
        ))
        .bind(commitment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(verification_from_row).transpose()
    }

    async fn claim_verification(
        &self,
        token: &str,
        status: VerificationStatus,
        rejection_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE buddy_verifications
            SET status = $2,
                rejection_reason = $3,
                verified_at = $4
            WHERE token = $1 AND status = 'pending'
            "#,
        )
        .bind(token)
        .bind(status.as_str())
        .bind(rejection_reason)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AdminStore for PgStore {
    async fn is_admin(&self, email: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM admins WHERE LOWER(email) = LOWER($1) AND active)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
