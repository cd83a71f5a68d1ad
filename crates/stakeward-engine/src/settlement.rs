use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use stakeward_core::{
    CheckIn, Commitment, CommitmentKind, CommitmentStatus, EngineError, Outcome, Payment,
    PaymentStatus, Store, VerificationMode,
};
use stakeward_pricing::FeePreview;
use stakeward_schedule::Progress;

use crate::gateway::{ChargeHandle, GatewayError, PaymentGateway};
use crate::notify::SettlementNotifier;

/// Outcome of a settled commitment, returned to every settlement trigger
/// (user action, buddy approval, reconcile sweep).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub commitment_id: Uuid,
    pub user_id: Uuid,
    pub outcome: Outcome,
    pub stake: Decimal,
    pub platform_fee: Decimal,
    pub refund_amount: Decimal,
    pub donation_amount: Decimal,
    pub charity_id: Option<String>,
    pub refund_ref: Option<String>,
    pub settled_at: DateTime<Utc>,
}

/// Result of stake capture: the recorded payment plus the client handle and
/// the fee breakdown for both outcomes.
#[derive(Debug, Clone)]
pub struct StakeCapture {
    pub payment: Payment,
    pub client_handle: String,
    pub test_mode: bool,
    pub preview: FeePreview,
}

/// Orchestrates the commitment lifecycle: stake capture, settlement with
/// the at-most-once payment claim, check-ins, and the user completion path.
/// Buddy verification and the reconcile sweep live in their own modules but
/// run through the same engine instance.
pub struct SettlementEngine {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn SettlementNotifier>,
    gateway_timeout: Duration,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn SettlementNotifier>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            gateway_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Resolves a commitment's financial outcome. At most one caller ever
    /// produces a side effect: the payment claim (`UPDATE ... WHERE status =
    /// 'succeeded'`) is the idempotency gate, and racing callers get
    /// `AlreadySettled`.
    pub async fn settle(
        &self,
        commitment_id: Uuid,
        outcome: Outcome,
    ) -> Result<SettlementResult, EngineError> {
        let commitment = self
            .store
            .commitment(commitment_id)
            .await?
            .ok_or(EngineError::NotFound("commitment"))?;
        if commitment.status != CommitmentStatus::Active {
            return Err(EngineError::AlreadySettled);
        }

        let Some(payment) = self.store.succeeded_payment(commitment_id).await? else {
            return match self.store.latest_payment(commitment_id).await? {
                Some(p) if p.status.is_settled() => Err(EngineError::AlreadySettled),
                Some(p) => Err(EngineError::InvalidState(format!(
                    "payment is {}",
                    p.status.as_str()
                ))),
                None => Err(EngineError::NotFound("payment")),
            };
        };

        // The model recorded at stake time, never the current default.
        let split = stakeward_pricing::split(commitment.pricing_model, payment.amount, outcome);
        let now = Utc::now();

        let refund_ref = match outcome {
            Outcome::Success => {
                // Refund first, claim second: the payment must never read
                // refunded without a confirmed gateway refund. A transient
                // failure leaves it succeeded and retryable.
                let refund_ref = self
                    .refund_with_timeout(&payment.gateway_ref, split.user_refund)
                    .await?;
                let claimed = self
                    .store
                    .claim_refund(payment.id, &refund_ref, split.user_refund, now)
                    .await?;
                if !claimed {
                    warn!(
                        commitment_id = %commitment_id,
                        payment_id = %payment.id,
                        refund_ref = %refund_ref,
                        "lost refund claim after gateway confirmation; flagging duplicate"
                    );
                    return Err(EngineError::AlreadySettled);
                }
                Some(refund_ref)
            }
            Outcome::Failure => {
                // Stake is already captured; the donation is recorded here
                // and transferred out-of-band by the admin batch process.
                let claimed = self
                    .store
                    .claim_donation(
                        payment.id,
                        split.charity_donation,
                        &commitment.charity_id,
                        now,
                    )
                    .await?;
                if !claimed {
                    return Err(EngineError::AlreadySettled);
                }
                None
            }
        };

        let status = outcome.terminal_status();
        match self
            .store
            .record_outcome(
                commitment.id,
                status,
                split.platform_fee,
                split.user_refund,
                split.charity_donation,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(
                commitment_id = %commitment.id,
                "commitment no longer active while recording outcome"
            ),
            // The payment is settled; a lost commitment update is the
            // recoverable half-settled state the reconcile sweep heals.
            Err(err) => warn!(
                commitment_id = %commitment.id,
                "commitment outcome write failed after payment settled: {err:#}"
            ),
        }

        let result = SettlementResult {
            commitment_id: commitment.id,
            user_id: commitment.user_id,
            outcome,
            stake: payment.amount,
            platform_fee: split.platform_fee,
            refund_amount: split.user_refund,
            donation_amount: split.charity_donation,
            charity_id: match outcome {
                Outcome::Failure => Some(commitment.charity_id.clone()),
                Outcome::Success => None,
            },
            refund_ref,
            settled_at: now,
        };

        info!(
            commitment_id = %result.commitment_id,
            outcome = outcome.as_str(),
            stake = %result.stake,
            platform_fee = %result.platform_fee,
            "commitment settled"
        );

        if let Err(err) = self
            .notifier
            .settlement_completed(&commitment, &result)
            .await
        {
            warn!("failed to publish settlement event: {err:#}");
        }

        Ok(result)
    }

    /// Captures the stake for a commitment. `test_mode` (an explicit flag,
    /// never inferred from the amount) bypasses the gateway and records an
    /// immediately-succeeded payment with synthetic references.
    pub async fn create_stake(
        &self,
        commitment_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        test_mode: bool,
    ) -> Result<StakeCapture, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("amount must be positive".into()));
        }
        if amount.round_dp(2) != amount {
            return Err(EngineError::Validation(
                "amount has sub-cent precision".into(),
            ));
        }

        let commitment = self.owned_commitment(commitment_id, user_id).await?;
        if commitment.status != CommitmentStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "commitment is {}",
                commitment.status.as_str()
            )));
        }
        if amount != commitment.stake {
            return Err(EngineError::Validation(
                "amount does not match the commitment stake".into(),
            ));
        }
        if let Some(existing) = self.store.latest_payment(commitment_id).await?
            && existing.status != PaymentStatus::Failed
        {
            return Err(EngineError::Validation(
                "stake already captured for this commitment".into(),
            ));
        }

        let (gateway_ref, client_handle, status) = if test_mode {
            (
                format!("test_pi_{}", Uuid::new_v4().simple()),
                format!("test_secret_{}", Uuid::new_v4().simple()),
                PaymentStatus::Succeeded,
            )
        } else {
            let handle = self
                .charge_with_timeout(amount, currency, commitment_id, user_id)
                .await?;
            (handle.gateway_ref, handle.client_handle, PaymentStatus::Pending)
        };

        let payment = Payment {
            id: Uuid::new_v4(),
            commitment_id,
            user_id,
            amount,
            currency: currency.to_string(),
            gateway_ref,
            status,
            refund_ref: None,
            refund_amount: None,
            refunded_at: None,
            donation_amount: None,
            donation_charity: None,
            donated_at: None,
            donation_batch_id: None,
            donation_receipt_url: None,
            donation_processed_at: None,
            donation_processed_by: None,
            created_at: Utc::now(),
        };
        // The insert doubles as the claim on the commitment's single
        // payment slot, so a concurrent second stake cannot double-charge.
        if !self.store.insert_payment(&payment).await? {
            return Err(EngineError::Validation(
                "stake already captured for this commitment".into(),
            ));
        }

        info!(
            commitment_id = %commitment_id,
            payment_id = %payment.id,
            test_mode,
            "stake captured"
        );

        Ok(StakeCapture {
            preview: stakeward_pricing::preview(commitment.pricing_model, amount),
            client_handle,
            test_mode,
            payment,
        })
    }

    /// Owner marks a one-time commitment as done (integrity and app
    /// verification modes). Buddy-verified commitments settle through the
    /// buddy's decision instead.
    pub async fn complete_by_user(
        &self,
        commitment_id: Uuid,
        user_id: Uuid,
    ) -> Result<SettlementResult, EngineError> {
        let commitment = self.owned_commitment(commitment_id, user_id).await?;
        if commitment.status != CommitmentStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "commitment is {}",
                commitment.status.as_str()
            )));
        }
        if commitment.verification_mode == VerificationMode::Buddy {
            return Err(EngineError::InvalidState(
                "buddy-verified commitments are settled by the buddy".into(),
            ));
        }
        if commitment.kind != CommitmentKind::OneTime {
            return Err(EngineError::InvalidState(
                "periodic commitments settle from check-ins when the schedule ends".into(),
            ));
        }
        self.settle(commitment_id, Outcome::Success).await
    }

    /// Records a check-in for a scheduled instance date.
    pub async fn check_in(
        &self,
        commitment_id: Uuid,
        user_id: Uuid,
        instance_date: NaiveDate,
    ) -> Result<CheckIn, EngineError> {
        let commitment = self.owned_commitment(commitment_id, user_id).await?;
        let schedule = self.active_schedule(&commitment)?;
        if !stakeward_schedule::expected_instances(schedule).contains(&instance_date) {
            return Err(EngineError::Validation(
                "date is not a scheduled instance".into(),
            ));
        }

        let check_in = CheckIn {
            id: Uuid::new_v4(),
            commitment_id,
            user_id,
            instance_date,
            completed_at: Utc::now(),
        };
        if !self.store.insert_check_in(&check_in).await? {
            return Err(EngineError::Validation(
                "already checked in for this date".into(),
            ));
        }
        Ok(check_in)
    }

    /// Removes a check-in (undo). Only while the commitment is active.
    pub async fn undo_check_in(
        &self,
        commitment_id: Uuid,
        user_id: Uuid,
        instance_date: NaiveDate,
    ) -> Result<(), EngineError> {
        let commitment = self.owned_commitment(commitment_id, user_id).await?;
        self.active_schedule(&commitment)?;
        if !self.store.delete_check_in(commitment_id, instance_date).await? {
            return Err(EngineError::NotFound("check-in"));
        }
        Ok(())
    }

    pub async fn periodic_progress(
        &self,
        commitment: &Commitment,
    ) -> Result<Progress, EngineError> {
        let Some(schedule) = commitment.schedule.as_ref() else {
            return Err(EngineError::InvalidState(
                "commitment has no schedule".into(),
            ));
        };
        let completed = self.store.count_check_ins(commitment.id).await?;
        Ok(stakeward_schedule::progress(schedule, completed))
    }

    /// Fetches a commitment, treating an ownership mismatch as absence.
    pub async fn owned_commitment(
        &self,
        commitment_id: Uuid,
        user_id: Uuid,
    ) -> Result<Commitment, EngineError> {
        let commitment = self
            .store
            .commitment(commitment_id)
            .await?
            .ok_or(EngineError::NotFound("commitment"))?;
        // Ownership mismatch reads the same as absence to the caller.
        if commitment.user_id != user_id {
            return Err(EngineError::NotFound("commitment"));
        }
        Ok(commitment)
    }

    fn active_schedule<'a>(
        &self,
        commitment: &'a Commitment,
    ) -> Result<&'a stakeward_core::Schedule, EngineError> {
        if commitment.status != CommitmentStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "commitment is {}",
                commitment.status.as_str()
            )));
        }
        if commitment.kind != CommitmentKind::Periodic {
            return Err(EngineError::InvalidState(
                "commitment is not periodic".into(),
            ));
        }
        commitment
            .schedule
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("commitment has no schedule".into()))
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn SettlementNotifier> {
        &self.notifier
    }

    async fn refund_with_timeout(
        &self,
        gateway_ref: &str,
        amount: Decimal,
    ) -> Result<String, EngineError> {
        match tokio::time::timeout(self.gateway_timeout, self.gateway.refund(gateway_ref, amount))
            .await
        {
            Ok(Ok(refund_ref)) => Ok(refund_ref),
            Ok(Err(err)) => Err(EngineError::GatewayTransient(err.to_string())),
            Err(_) => Err(EngineError::GatewayTransient(
                GatewayError::Timeout.to_string(),
            )),
        }
    }

    async fn charge_with_timeout(
        &self,
        amount: Decimal,
        currency: &str,
        commitment_id: Uuid,
        user_id: Uuid,
    ) -> Result<ChargeHandle, EngineError> {
        match tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.charge(amount, currency, commitment_id, user_id),
        )
        .await
        {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(err)) => Err(EngineError::GatewayTransient(err.to_string())),
            Err(_) => Err(EngineError::GatewayTransient(
                GatewayError::Timeout.to_string(),
            )),
        }
    }
}
