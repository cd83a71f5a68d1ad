pub mod buddy;
pub mod gateway;
pub mod notify;
pub mod reconcile;
pub mod settlement;
pub mod token;

pub use buddy::BuddyDecision;
pub use gateway::{ChargeHandle, GatewayError, PaymentGateway, SimulatedGateway};
pub use notify::{NoopNotifier, SettlementNotifier};
pub use reconcile::ReconcileSummary;
pub use settlement::{SettlementEngine, SettlementResult, StakeCapture};

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use uuid::Uuid;

    use stakeward_core::{
        Commitment, CommitmentKind, CommitmentStatus, Payment, PaymentStatus, PricingModel,
        Schedule, VerificationMode,
    };
    use stakeward_store::MemoryStore;

    use crate::gateway::{ChargeHandle, GatewayError, PaymentGateway};
    use crate::notify::NoopNotifier;
    use crate::settlement::SettlementEngine;

    /// Gateway double: scripted refund failures, call counting.
    #[derive(Default)]
    pub struct StubGateway {
        pub charge_calls: AtomicUsize,
        pub refund_calls: AtomicUsize,
        scripted_refund_errors: Mutex<VecDeque<GatewayError>>,
    }

    impl StubGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next_refund(&self, err: GatewayError) {
            self.scripted_refund_errors.lock().unwrap().push_back(err);
        }

        pub fn refund_count(&self) -> usize {
            self.refund_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn charge(
            &self,
            _amount: Decimal,
            _currency: &str,
            _commitment_id: Uuid,
            _user_id: Uuid,
        ) -> Result<ChargeHandle, GatewayError> {
            self.charge_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChargeHandle {
                gateway_ref: format!("stub_pi_{}", Uuid::new_v4().simple()),
                client_handle: format!("stub_secret_{}", Uuid::new_v4().simple()),
            })
        }

        async fn refund(
            &self,
            _gateway_ref: &str,
            _amount: Decimal,
        ) -> Result<String, GatewayError> {
            if let Some(err) = self.scripted_refund_errors.lock().unwrap().pop_front() {
                return Err(err);
            }
            let n = self.refund_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("stub_re_{n}"))
        }
    }

    pub fn engine(store: Arc<MemoryStore>, gateway: Arc<StubGateway>) -> SettlementEngine {
        SettlementEngine::new(
            store,
            gateway,
            Arc::new(NoopNotifier),
            Duration::from_secs(2),
        )
    }

    pub fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    pub fn one_time_commitment(user_id: Uuid, stake: Decimal) -> Commitment {
        Commitment {
            id: Uuid::new_v4(),
            user_id,
            title: "run a 10k".to_string(),
            stake,
            kind: CommitmentKind::OneTime,
            due_at: Some(Utc::now() + chrono::Duration::days(7)),
            schedule: None,
            charity_id: "unicef".to_string(),
            verification_mode: VerificationMode::Integrity,
            buddy_email: None,
            pricing_model: PricingModel::Percentage,
            status: CommitmentStatus::Active,
            platform_fee_amount: Decimal::ZERO,
            refund_amount: Decimal::ZERO,
            charity_donation_amount: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn periodic_commitment(
        user_id: Uuid,
        stake: Decimal,
        start_on: NaiveDate,
        duration_weeks: i32,
        days_of_week: &[i16],
    ) -> Commitment {
        let mut commitment = one_time_commitment(user_id, stake);
        commitment.kind = CommitmentKind::Periodic;
        commitment.due_at = None;
        commitment.schedule = Some(Schedule {
            start_on,
            duration_weeks,
            days_of_week: days_of_week.to_vec(),
        });
        commitment
    }

    pub fn succeeded_payment(commitment: &Commitment) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            commitment_id: commitment.id,
            user_id: commitment.user_id,
            amount: commitment.stake,
            currency: "usd".to_string(),
            gateway_ref: format!("pi_{}", Uuid::new_v4().simple()),
            status: PaymentStatus::Succeeded,
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
        }
    }
}
