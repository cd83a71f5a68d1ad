use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use stakeward_core::{
    BuddyVerification, Commitment, CommitmentStatus, EngineError, Outcome, VerificationMode,
    VerificationStatus,
};

use crate::settlement::{SettlementEngine, SettlementResult};
use crate::token;

/// How long a buddy link stays valid.
const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuddyDecision {
    Approved,
    Rejected,
}

impl BuddyDecision {
    fn verification_status(self) -> VerificationStatus {
        match self {
            BuddyDecision::Approved => VerificationStatus::Approved,
            BuddyDecision::Rejected => VerificationStatus::Rejected,
        }
    }
}

/// What a buddy's decision produced: a settlement on approval, nothing on
/// rejection (the commitment stays active and either completes later or
/// fails at the deadline).
#[derive(Debug)]
pub struct DecisionOutcome {
    pub verification: BuddyVerification,
    pub settlement: Option<SettlementResult>,
}

impl SettlementEngine {
    /// Issues a single-use verification link for the commitment's buddy.
    /// Re-requesting replaces nothing: each request mints a fresh token and
    /// the older pending tokens simply expire.
    pub async fn request_buddy_verification(
        &self,
        commitment_id: Uuid,
        user_id: Uuid,
    ) -> Result<BuddyVerification, EngineError> {
        let commitment = self.owned_commitment(commitment_id, user_id).await?;
        if commitment.status != CommitmentStatus::Active {
            return Err(EngineError::InvalidState(format!(
                "commitment is {}",
                commitment.status.as_str()
            )));
        }
        if commitment.verification_mode != VerificationMode::Buddy {
            return Err(EngineError::InvalidState(
                "commitment is not buddy-verified".into(),
            ));
        }
        let Some(buddy_email) = commitment.buddy_email.clone() else {
            return Err(EngineError::InvalidState(
                "commitment has no buddy email".into(),
            ));
        };

        let now = Utc::now();
        let verification = BuddyVerification {
            id: Uuid::new_v4(),
            commitment_id,
            user_id: commitment.user_id,
            buddy_email,
            token: token::generate(),
            status: VerificationStatus::Pending,
            rejection_reason: None,
            expires_at: now + Duration::days(TOKEN_TTL_DAYS),
            verified_at: None,
            created_at: now,
        };
        self.store().insert_verification(&verification).await?;

        info!(
            commitment_id = %commitment_id,
            verification_id = %verification.id,
            "buddy verification requested"
        );

        if let Err(err) = self
            .notifier()
            .buddy_requested(&commitment, &verification)
            .await
        {
            warn!("failed to publish buddy request event: {err:#}");
        }

        Ok(verification)
    }

    /// Looks up the verification behind a buddy link so the buddy can see
    /// what they are vouching for. Expired and already-decided tokens are
    /// rejected here, before the decision form is ever shown.
    pub async fn inspect_verification(
        &self,
        token: &str,
    ) -> Result<(BuddyVerification, Commitment), EngineError> {
        let verification = self
            .store()
            .verification_by_token(token)
            .await?
            .ok_or(EngineError::NotFound("verification"))?;
        if verification.status != VerificationStatus::Pending {
            return Err(EngineError::AlreadyProcessed);
        }
        if verification.is_expired(Utc::now()) {
            return Err(EngineError::Expired);
        }
        let commitment = self
            .store()
            .commitment(verification.commitment_id)
            .await?
            .ok_or(EngineError::NotFound("commitment"))?;
        Ok((verification, commitment))
    }

    /// Records the buddy's decision. The token is consumed first with a
    /// conditional claim, so a double-submitted form decides at most once;
    /// approval then settles the commitment as a success.
    pub async fn decide_verification(
        &self,
        token: &str,
        decision: BuddyDecision,
        reason: Option<String>,
    ) -> Result<DecisionOutcome, EngineError> {
        let verification = self
            .store()
            .verification_by_token(token)
            .await?
            .ok_or(EngineError::NotFound("verification"))?;
        if verification.is_expired(Utc::now()) {
            return Err(EngineError::Expired);
        }

        // The reason is optional either way; rejections without one are
        // recorded with a null reason.
        let reason = reason.filter(|r| !r.trim().is_empty());
        let now = Utc::now();
        let status = decision.verification_status();
        let claimed = self
            .store()
            .claim_verification(token, status, reason.as_deref(), now)
            .await?;
        if !claimed {
            return Err(EngineError::AlreadyProcessed);
        }

        let mut verification = verification;
        verification.status = status;
        verification.rejection_reason = reason;
        verification.verified_at = Some(now);

        info!(
            commitment_id = %verification.commitment_id,
            decision = status.as_str(),
            "buddy decision recorded"
        );

        let settlement = match decision {
            BuddyDecision::Approved => {
                // The token is already consumed. If settlement hits a
                // transient gateway error the approval stays on record and
                // the reconcile sweep finishes the job.
                Some(
                    self.settle(verification.commitment_id, Outcome::Success)
                        .await?,
                )
            }
            // Rejection does not fail the commitment. The owner can request
            // a fresh verification; the deadline sweep is what fails it.
            BuddyDecision::Rejected => None,
        };

        Ok(DecisionOutcome {
            verification,
            settlement,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use stakeward_core::{
        BuddyVerificationStore, CommitmentStatus, CommitmentStore, EngineError, PaymentStore,
        VerificationMode, VerificationStatus,
    };
    use stakeward_store::MemoryStore;

    use super::*;
    use crate::testutil::{StubGateway, dollars, engine, one_time_commitment, succeeded_payment};

    fn buddy_commitment(user_id: Uuid, stake: Decimal) -> stakeward_core::Commitment {
        let mut commitment = one_time_commitment(user_id, stake);
        commitment.verification_mode = VerificationMode::Buddy;
        commitment.buddy_email = Some("buddy@example.com".to_string());
        commitment
    }

    #[tokio::test]
    async fn approval_settles_the_commitment_as_a_success() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        let commitment = buddy_commitment(user, dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        let verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();
        assert_eq!(verification.token.len(), 64);

        let (seen, seen_commitment) = engine
            .inspect_verification(&verification.token)
            .await
            .unwrap();
        assert_eq!(seen.id, verification.id);
        assert_eq!(seen_commitment.id, commitment.id);

        let outcome = engine
            .decide_verification(&verification.token, BuddyDecision::Approved, None)
            .await
            .unwrap();
        let settlement = outcome.settlement.unwrap();
        assert_eq!(settlement.refund_amount, dollars(1900));
        assert_eq!(gateway.refund_count(), 1);

        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Completed);
    }

    #[tokio::test]
    async fn rejection_records_the_reason_and_leaves_the_commitment_active() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        let commitment = buddy_commitment(user, dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        let verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();

        let outcome = engine
            .decide_verification(
                &verification.token,
                BuddyDecision::Rejected,
                Some("never saw the race bib".to_string()),
            )
            .await
            .unwrap();
        assert!(outcome.settlement.is_none());
        assert_eq!(outcome.verification.status, VerificationStatus::Rejected);
        assert_eq!(
            outcome.verification.rejection_reason.as_deref(),
            Some("never saw the race bib")
        );
        assert_eq!(gateway.refund_count(), 0);

        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Active);
    }

    #[tokio::test]
    async fn rejection_without_a_reason_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        let commitment = buddy_commitment(user, dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        let verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();
        let outcome = engine
            .decide_verification(&verification.token, BuddyDecision::Rejected, None)
            .await
            .unwrap();
        assert!(outcome.settlement.is_none());
        assert_eq!(outcome.verification.status, VerificationStatus::Rejected);
        assert!(outcome.verification.rejection_reason.is_none());

        let stored = store
            .verification_by_token(&verification.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, VerificationStatus::Rejected);
        assert!(stored.rejection_reason.is_none());
        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Active);
    }

    #[tokio::test]
    async fn a_token_decides_at_most_once() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        let commitment = buddy_commitment(user, dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        let verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();
        engine
            .decide_verification(&verification.token, BuddyDecision::Approved, None)
            .await
            .unwrap();

        let second = engine
            .decide_verification(&verification.token, BuddyDecision::Approved, None)
            .await;
        assert!(matches!(second, Err(EngineError::AlreadyProcessed)));
        assert_eq!(gateway.refund_count(), 1);

        let inspect = engine.inspect_verification(&verification.token).await;
        assert!(matches!(inspect, Err(EngineError::AlreadyProcessed)));
    }

    #[tokio::test]
    async fn expired_tokens_are_refused() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(StubGateway::new()));

        let user = Uuid::new_v4();
        let commitment = buddy_commitment(user, dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();

        let mut verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();
        verification.expires_at = Utc::now() - chrono::Duration::hours(1);
        store.insert_verification(&verification).await.unwrap();

        let inspect = engine.inspect_verification(&verification.token).await;
        assert!(matches!(inspect, Err(EngineError::Expired)));

        let decide = engine
            .decide_verification(&verification.token, BuddyDecision::Approved, None)
            .await;
        assert!(matches!(decide, Err(EngineError::Expired)));

        let stored = store
            .verification_by_token(&verification.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, VerificationStatus::Pending);
    }

    #[tokio::test]
    async fn requests_need_buddy_mode_and_an_email() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(StubGateway::new()));

        let user = Uuid::new_v4();
        let commitment = one_time_commitment(user, dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();

        let wrong_mode = engine.request_buddy_verification(commitment.id, user).await;
        assert!(matches!(wrong_mode, Err(EngineError::InvalidState(_))));

        let mut no_email = buddy_commitment(user, dollars(2000));
        no_email.buddy_email = None;
        store.insert_commitment(&no_email).await.unwrap();
        let missing = engine.request_buddy_verification(no_email.id, user).await;
        assert!(matches!(missing, Err(EngineError::InvalidState(_))));
    }

    #[tokio::test]
    async fn approval_with_transient_settlement_failure_keeps_the_approval() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let engine = engine(store.clone(), gateway.clone());

        let user = Uuid::new_v4();
        let commitment = buddy_commitment(user, dollars(2000));
        store.insert_commitment(&commitment).await.unwrap();
        store
            .insert_payment(&succeeded_payment(&commitment))
            .await
            .unwrap();

        let verification = engine
            .request_buddy_verification(commitment.id, user)
            .await
            .unwrap();

        gateway.fail_next_refund(crate::gateway::GatewayError::Unreachable(
            "connection reset".into(),
        ));
        let failed = engine
            .decide_verification(&verification.token, BuddyDecision::Approved, None)
            .await;
        assert!(matches!(failed, Err(EngineError::GatewayTransient(_))));

        // The approval is on record for the reconcile sweep to act on.
        let approved = store
            .approved_verification(commitment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.id, verification.id);
        let stored = store.commitment(commitment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommitmentStatus::Active);
    }
}
