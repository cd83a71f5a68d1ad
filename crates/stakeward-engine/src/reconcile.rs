use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use stakeward_core::{Commitment, EngineError, Outcome, Payment, PaymentStatus};

use crate::settlement::SettlementEngine;

/// What one reconcile run did. Returned to the scheduler so the run is
/// observable from the outside.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileSummary {
    pub ran_at: Option<DateTime<Utc>>,
    pub checked: u64,
    pub updated: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

impl SettlementEngine {
    /// Periodic sweep over everything the request path may have left
    /// unfinished: half-settled commitments, one-time commitments past
    /// their deadline, and periodic commitments past their schedule end.
    /// Every item is independent; one failure never stops the run.
    pub async fn reconcile(&self) -> Result<ReconcileSummary, EngineError> {
        let now = Utc::now();
        let mut summary = ReconcileSummary {
            ran_at: Some(now),
            ..ReconcileSummary::default()
        };

        self.heal_half_settled(&mut summary).await?;
        self.sweep_overdue_one_time(now, &mut summary).await?;
        self.sweep_finished_periodic(now, &mut summary).await?;

        info!(
            checked = summary.checked,
            updated = summary.updated,
            failed = summary.failed,
            "reconcile run finished"
        );
        Ok(summary)
    }

    /// A settled payment under a still-active commitment means the outcome
    /// write was lost after the money moved. Re-derive the outcome from the
    /// payment and finish the record.
    async fn heal_half_settled(&self, summary: &mut ReconcileSummary) -> Result<(), EngineError> {
        for (commitment, payment) in self.store().active_with_settled_payment().await? {
            summary.checked += 1;
            match self.heal_one(&commitment, &payment).await {
                Ok(true) => summary.updated += 1,
                Ok(false) => {}
                Err(err) => {
                    summary.failed += 1;
                    summary
                        .errors
                        .push(format!("heal {}: {err}", commitment.id));
                }
            }
        }
        Ok(())
    }

    async fn heal_one(
        &self,
        commitment: &Commitment,
        payment: &Payment,
    ) -> Result<bool, EngineError> {
        let outcome = match payment.status {
            PaymentStatus::Refunded => Outcome::Success,
            PaymentStatus::Donated => Outcome::Failure,
            _ => return Ok(false),
        };
        let split =
            stakeward_pricing::split(commitment.pricing_model, payment.amount, outcome);
        warn!(
            commitment_id = %commitment.id,
            payment_id = %payment.id,
            outcome = outcome.as_str(),
            "healing half-settled commitment"
        );
        let updated = self
            .store()
            .record_outcome(
                commitment.id,
                outcome.terminal_status(),
                split.platform_fee,
                split.user_refund,
                split.charity_donation,
            )
            .await?;
        Ok(updated)
    }

    /// One-time commitments past their deadline fail, unless a buddy
    /// approval is already on record, in which case the interrupted
    /// approval path is finished as a success.
    async fn sweep_overdue_one_time(
        &self,
        now: DateTime<Utc>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), EngineError> {
        for commitment in self.store().overdue_one_time(now).await? {
            summary.checked += 1;
            let outcome = match self.store().approved_verification(commitment.id).await {
                Ok(Some(_)) => Outcome::Success,
                Ok(None) => Outcome::Failure,
                Err(err) => {
                    summary.failed += 1;
                    summary
                        .errors
                        .push(format!("sweep {}: {err}", commitment.id));
                    continue;
                }
            };
            self.sweep_settle(commitment.id, outcome, summary).await;
        }
        Ok(())
    }

    /// Periodic commitments whose schedule window has closed settle from
    /// their check-in count.
    async fn sweep_finished_periodic(
        &self,
        now: DateTime<Utc>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), EngineError> {
        let today = now.date_naive();
        for commitment in self.store().active_periodic().await? {
            let Some(schedule) = commitment.schedule.as_ref() else {
                continue;
            };
            if today <= stakeward_schedule::end_date(schedule) {
                continue;
            }
            summary.checked += 1;
            let outcome = match self.periodic_progress(&commitment).await {
                Ok(progress) => progress.outcome(),
                Err(err) => {
                    summary.failed += 1;
                    summary
                        .errors
                        .push(format!("sweep {}: {err}", commitment.id));
                    continue;
                }
            };
            self.sweep_settle(commitment.id, outcome, summary).await;
        }
        Ok(())
    }

    async fn sweep_settle(
        &self,
        commitment_id: uuid::Uuid,
        outcome: Outcome,
        summary: &mut ReconcileSummary,
    ) {
        match self.settle(commitment_id, outcome).await {
            Ok(_) => summary.updated += 1,
            // Another trigger won the claim between listing and settling.
            Err(EngineError::AlreadySettled) => {}
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(format!("settle {commitment_id}: {err}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use stakeward_core::{
        CommitmentStatus, CommitmentStore, PaymentStatus, PaymentStore, VerificationMode,
    };
    use stakeward_store::MemoryStore;

    use super::*;
    use crate::buddy::BuddyDecision;
    use crate::gateway::GatewayError;
    use crate::testutil::{
        StubGateway, dollars, engine, one_time_commitment, periodic_commitment, succeeded_payment,
    };

    #[tokio::test]
    async fn overdue_one_time_commitment_fails_and_donates() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let mut commitment = one_time_commitment(Uuid::new_v4(), dollars(2000));
        commitment.due_at = Some(Utc::now() - chrono::Duration::days(1));
        store.insert_commitment(&commitment).await.unwrap();
        let payment = succeeded_payment(&commitment);
        store.insert_payment(&payment).await.unwrap();

        let summary = engine.reconcile().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(gateway.refund_count(), 0);

        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Failed);
        let stored = store.payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Donated);
    }

    #[tokio::test]
    async fn overdue_commitment_with_buddy_approval_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        let mut commitment = one_time_commitment(user, dollars(2000));
        commitment.verification_mode = VerificationMode::Buddy;
        commitment.buddy_email = Some("buddy@example.com".to_string());
        commitment.due_at = Some(Utc::now() + chrono::Duration::hours(1));
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        // Approval path dies on the gateway call, then the deadline passes.
        let verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();
        gateway.fail_next_refund(GatewayError::Unreachable("connection reset".into()));
        let failed = engine
            .decide_verification(&verification.token, BuddyDecision::Approved, None)
            .await;
        assert!(failed.is_err());

        let mut overdue = store.commitment(commitment.id).await.unwrap().unwrap();
        overdue.due_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.insert_commitment(&overdue).await.unwrap();

        let summary = engine.reconcile().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(gateway.refund_count(), 1);

        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Completed);
    }

    #[tokio::test]
    async fn finished_periodic_commitment_settles_from_check_ins() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        // Mondays for one week, well in the past.
        let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let commitment = periodic_commitment(user, dollars(2000), start, 1, &[1]);
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        // Both scheduled Mondays checked in.
        for date in stakeward_schedule::expected_instances(
            commitment.schedule.as_ref().unwrap(),
        ) {
            engine.check_in(commitment.id, user, date).await.unwrap();
        }

        let summary = engine.reconcile().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(gateway.refund_count(), 1);

        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Completed);
    }

    #[tokio::test]
    async fn periodic_commitment_below_threshold_fails() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let commitment = periodic_commitment(Uuid::new_v4(), dollars(2000), start, 1, &[1, 3, 5]);
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        let summary = engine.reconcile().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(gateway.refund_count(), 0);

        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Failed);
    }

    #[tokio::test]
    async fn transient_failures_are_reported_and_retried_next_run() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        let mut commitment = one_time_commitment(user, dollars(2000));
        commitment.verification_mode = VerificationMode::Buddy;
        commitment.buddy_email = Some("buddy@example.com".to_string());
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();
        let verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();
        gateway.fail_next_refund(GatewayError::Unreachable("connection reset".into()));
        let _ = engine
            .decide_verification(&verification.token, BuddyDecision::Approved, None)
            .await;

        let mut overdue = store.commitment(commitment.id).await.unwrap().unwrap();
        overdue.due_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.insert_commitment(&overdue).await.unwrap();

        gateway.fail_next_refund(GatewayError::Timeout);
        let first = engine.reconcile().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.updated, 0);
        assert_eq!(first.errors.len(), 1);
        assert!(first.errors[0].contains(&commitment.id.to_string()));

        let second = engine.reconcile().await.unwrap();
        assert_eq!(second.failed, 0);
        assert_eq!(second.updated, 1);
        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Completed);
    }

    #[tokio::test]
    async fn half_settled_commitments_are_healed() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(StubGateway::new()));

        let commitment = one_time_commitment(Uuid::new_v4(), dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();
        let payment = succeeded_payment(&commitment);
        store.insert_payment(&payment).await.unwrap();
        // The refund claim landed but the commitment update was lost.
        store
            .claim_refund(payment.id, "re_lost", dollars(1900), Utc::now())
            .await
            .unwrap();

        let summary = engine.reconcile().await.unwrap();
        assert_eq!(summary.updated, 1);

        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Completed);
        assert_eq!(stored.refund_amount, dollars(1900));
        assert_eq!(stored.platform_fee_amount, dollars(100));
    }

    #[tokio::test]
    async fn an_empty_run_reports_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, Arc::new(StubGateway::new()));

        let summary = engine.reconcile().await.unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(summary.updated, 0);
        assert!(summary.errors.is_empty());
        assert!(summary.ran_at.is_some());
    }
}
