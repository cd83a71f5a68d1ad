use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use stakeward_core::{
    AdminStore, BuddyVerification, BuddyVerificationStore, CheckIn, CheckInStore, Commitment,
    CommitmentKind, CommitmentStatus, CommitmentStore, Payment, PaymentStatus, PaymentStore,
    VerificationStatus,
};

/// In-memory store with the same conditional-claim semantics as `PgStore`.
/// Claims take the write lock for the whole check-and-set, so concurrent
/// callers observe the same single-winner behavior as the SQL
/// `UPDATE ... WHERE status = ...` path.
#[derive(Default)]
pub struct MemoryStore {
    commitments: RwLock<HashMap<Uuid, Commitment>>,
    payments: RwLock<HashMap<Uuid, Payment>>,
    check_ins: RwLock<HashMap<(Uuid, NaiveDate), CheckIn>>,
    verifications: RwLock<HashMap<String, BuddyVerification>>,
    admins: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_admin(&self, email: &str) {
        self.admins.write().await.insert(email.to_lowercase());
    }
}

#[async_trait]
impl CommitmentStore for MemoryStore {
    async fn insert_commitment(&self, commitment: &Commitment) -> anyhow::Result<()> {
        self.commitments
            .write()
            .await
            .insert(commitment.id, commitment.clone());
        Ok(())
    }

    async fn commitment(&self, id: Uuid) -> anyhow::Result<Option<Commitment>> {
        Ok(self.commitments.read().await.get(&id).cloned())
    }

    async fn commitments_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Commitment>> {
        let mut items: Vec<Commitment> = self
            .commitments
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|c| c.created_at);
        Ok(items)
    }

    async fn overdue_one_time(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Commitment>> {
        Ok(self
            .commitments
            .read()
            .await
            .values()
            .filter(|c| {
                c.status == CommitmentStatus::Active
                    && c.kind == CommitmentKind::OneTime
                    && c.due_at.is_some_and(|due| due < now)
            })
            .cloned()
            .collect())
    }

    async fn active_periodic(&self) -> anyhow::Result<Vec<Commitment>> {
        Ok(self
            .commitments
            .read()
            .await
            .values()
            .filter(|c| {
                c.status == CommitmentStatus::Active && c.kind == CommitmentKind::Periodic
            })
            .cloned()
            .collect())
    }

    async fn active_with_settled_payment(&self) -> anyhow::Result<Vec<(Commitment, Payment)>> {
        let commitments = self.commitments.read().await;
        let payments = self.payments.read().await;
        let mut pairs = Vec::new();
        for commitment in commitments.values() {
            if commitment.status != CommitmentStatus::Active {
                continue;
            }
            if let Some(payment) = payments
                .values()
                .find(|p| p.commitment_id == commitment.id && p.status.is_settled())
            {
                pairs.push((commitment.clone(), payment.clone()));
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
    ) -> anyhow::Result<bool> {
        let mut commitments = self.commitments.write().await;
        let Some(commitment) = commitments.get_mut(&id) else {
            return Ok(false);
        };
        if commitment.status != CommitmentStatus::Active {
            return Ok(false);
        }
        commitment.status = status;
        commitment.platform_fee_amount = platform_fee;
        commitment.refund_amount = refund;
        commitment.charity_donation_amount = donation;
        Ok(true)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> anyhow::Result<bool> {
        let mut payments = self.payments.write().await;
        let slot_taken = payments.values().any(|p| {
            p.id != payment.id
                && p.commitment_id == payment.commitment_id
                && matches!(p.status, PaymentStatus::Pending | PaymentStatus::Succeeded)
        });
        if slot_taken {
            return Ok(false);
        }
        payments.insert(payment.id, payment.clone());
        Ok(true)
    }

    async fn payment(&self, id: Uuid) -> anyhow::Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn latest_payment(&self, commitment_id: Uuid) -> anyhow::Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.commitment_id == commitment_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn succeeded_payment(&self, commitment_id: Uuid) -> anyhow::Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.commitment_id == commitment_id && p.status == PaymentStatus::Succeeded)
            .cloned())
    }

    async fn settled_payment(&self, commitment_id: Uuid) -> anyhow::Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.commitment_id == commitment_id && p.status.is_settled())
            .cloned())
    }

    async fn mark_payment_succeeded(&self, gateway_ref: &str) -> anyhow::Result<Option<Payment>> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .values_mut()
            .find(|p| p.gateway_ref == gateway_ref && p.status == PaymentStatus::Pending);
        Ok(payment.map(|p| {
            p.status = PaymentStatus::Succeeded;
            p.clone()
        }))
    }

    async fn mark_payment_failed(&self, gateway_ref: &str) -> anyhow::Result<bool> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .values_mut()
            .find(|p| p.gateway_ref == gateway_ref && p.status == PaymentStatus::Pending);
        Ok(match payment {
            Some(p) => {
                p.status = PaymentStatus::Failed;
                true
            }
            None => false,
        })
    }

    async fn claim_refund(
        &self,
        payment_id: Uuid,
        refund_ref: &str,
        refund_amount: Decimal,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut payments = self.payments.write().await;
        let Some(payment) = payments.get_mut(&payment_id) else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Succeeded {
            return Ok(false);
        }
        payment.status = PaymentStatus::Refunded;
        payment.refund_ref = Some(refund_ref.to_string());
        payment.refund_amount = Some(refund_amount);
        payment.refunded_at = Some(at);
        Ok(true)
    }

    async fn claim_donation(
        &self,
        payment_id: Uuid,
        donation_amount: Decimal,
        charity_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut payments = self.payments.write().await;
        let Some(payment) = payments.get_mut(&payment_id) else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Succeeded {
            return Ok(false);
        }
        payment.status = PaymentStatus::Donated;
        payment.donation_amount = Some(donation_amount);
        payment.donation_charity = Some(charity_id.to_string());
        payment.donated_at = Some(at);
        Ok(true)
    }

    async fn unprocessed_donations(&self) -> anyhow::Result<Vec<Payment>> {
        let mut items: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.status == PaymentStatus::Donated && p.donation_processed_at.is_none())
            .cloned()
            .collect();
        items.sort_by_key(|p| p.donated_at);
        Ok(items)
    }

    async fn donated_payments(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| payments.get(id))
            .filter(|p| p.status == PaymentStatus::Donated)
            .cloned()
            .collect())
    }

    async fn mark_donations_processed(
        &self,
        ids: &[Uuid],
        batch_id: &str,
        receipt_url: Option<&str>,
        processed_by: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let mut payments = self.payments.write().await;
        let mut updated = 0;
        for id in ids {
            let Some(payment) = payments.get_mut(id) else {
                continue;
            };
            if payment.status != PaymentStatus::Donated || payment.donation_processed_at.is_some() {
                continue;
            }
            payment.donation_batch_id = Some(batch_id.to_string());
            payment.donation_receipt_url = receipt_url.map(str::to_string);
            payment.donation_processed_by = Some(processed_by.to_string());
            payment.donation_processed_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl CheckInStore for MemoryStore {
    async fn insert_check_in(&self, check_in: &CheckIn) -> anyhow::Result<bool> {
        let mut check_ins = self.check_ins.write().await;
        let key = (check_in.commitment_id, check_in.instance_date);
        if check_ins.contains_key(&key) {
            return Ok(false);
        }
        check_ins.insert(key, check_in.clone());
        Ok(true)
    }

    async fn delete_check_in(
        &self,
        commitment_id: Uuid,
        instance_date: NaiveDate,
    ) -> anyhow::Result<bool> {
        Ok(self
            .check_ins
            .write()
            .await
            .remove(&(commitment_id, instance_date))
            .is_some())
    }

    async fn count_check_ins(&self, commitment_id: Uuid) -> anyhow::Result<i64> {
        Ok(self
            .check_ins
            .read()
            .await
            .keys()
            .filter(|(id, _)| *id == commitment_id)
            .count() as i64)
    }

    async fn check_ins(&self, commitment_id: Uuid) -> anyhow::Result<Vec<CheckIn>> {
        let mut items: Vec<CheckIn> = self
            .check_ins
            .read()
            .await
            .values()
            .filter(|c| c.commitment_id == commitment_id)
            .cloned()
            .collect();
        items.sort_by_key(|c| c.instance_date);
        Ok(items)
    }
}

#[async_trait]
impl BuddyVerificationStore for MemoryStore {
    async fn insert_verification(&self, verification: &BuddyVerification) -> anyhow::Result<()> {
        self.verifications
            .write()
            .await
            .insert(verification.token.clone(), verification.clone());
        Ok(())
    }

    async fn verification_by_token(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<BuddyVerification>> {
        Ok(self.verifications.read().await.get(token).cloned())
    }

    async fn approved_verification(
        &self,
        commitment_id: Uuid,
    ) -> anyhow::Result<Option<BuddyVerification>> {
        Ok(self
            .verifications
            .read()
            .await
            .values()
            .find(|v| {
                v.commitment_id == commitment_id && v.status == VerificationStatus::Approved
            })
            .cloned())
    }

    async fn claim_verification(
        &self,
        token: &str,
        status: VerificationStatus,
        rejection_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut verifications = self.verifications.write().await;
        let Some(verification) = verifications.get_mut(token) else {
            return Ok(false);
        };
        if verification.status != VerificationStatus::Pending {
            return Ok(false);
        }
        verification.status = status;
        verification.rejection_reason = rejection_reason.map(str::to_string);
        verification.verified_at = Some(at);
        Ok(true)
    }
}

#[async_trait]
impl AdminStore for MemoryStore {
    async fn is_admin(&self, email: &str) -> anyhow::Result<bool> {
        Ok(self.admins.read().await.contains(&email.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(commitment_id: Uuid, status: PaymentStatus) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            commitment_id,
            user_id: Uuid::new_v4(),
            amount: Decimal::new(2000, 2),
            currency: "usd".to_string(),
            gateway_ref: format!("pi_{}", Uuid::new_v4().simple()),
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
        }
    }

    #[tokio::test]
    async fn refund_claim_is_single_winner() {
        let store = MemoryStore::new();
        let p = payment(Uuid::new_v4(), PaymentStatus::Succeeded);
        store.insert_payment(&p).await.unwrap();

        let now = Utc::now();
        let first = store
            .claim_refund(p.id, "re_1", Decimal::new(1900, 2), now)
            .await
            .unwrap();
        let second = store
            .claim_refund(p.id, "re_2", Decimal::new(1900, 2), now)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        let stored = store.payment(p.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Refunded);
        assert_eq!(stored.refund_ref.as_deref(), Some("re_1"));
    }

    #[tokio::test]
    async fn payment_slot_is_single_winner_per_commitment() {
        let store = MemoryStore::new();
        let commitment_id = Uuid::new_v4();

        let first = payment(commitment_id, PaymentStatus::Pending);
        assert!(store.insert_payment(&first).await.unwrap());
        let second = payment(commitment_id, PaymentStatus::Pending);
        assert!(!store.insert_payment(&second).await.unwrap());

        // A failed payment frees the slot for a retry.
        assert!(store.mark_payment_failed(&first.gateway_ref).await.unwrap());
        assert!(store.insert_payment(&second).await.unwrap());
    }

    #[tokio::test]
    async fn donation_claim_rejects_pending_payment() {
        let store = MemoryStore::new();
        let p = payment(Uuid::new_v4(), PaymentStatus::Pending);
        store.insert_payment(&p).await.unwrap();

        let claimed = store
            .claim_donation(p.id, Decimal::new(1500, 2), "unicef", Utc::now())
            .await
            .unwrap();
        assert!(!claimed);
    }

    #[tokio::test]
    async fn duplicate_check_in_is_rejected() {
        let store = MemoryStore::new();
        let commitment_id = Uuid::new_v4();
        let check_in = CheckIn {
            id: Uuid::new_v4(),
            commitment_id,
            user_id: Uuid::new_v4(),
            instance_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            completed_at: Utc::now(),
        };
        assert!(store.insert_check_in(&check_in).await.unwrap());
        assert!(!store.insert_check_in(&check_in).await.unwrap());
        assert_eq!(store.count_check_ins(commitment_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_marking_skips_processed_donations() {
        let store = MemoryStore::new();
        let mut a = payment(Uuid::new_v4(), PaymentStatus::Donated);
        a.donated_at = Some(Utc::now());
        let mut b = payment(Uuid::new_v4(), PaymentStatus::Donated);
        b.donated_at = Some(Utc::now());
        b.donation_processed_at = Some(Utc::now());
        store.insert_payment(&a).await.unwrap();
        store.insert_payment(&b).await.unwrap();

        let updated = store
            .mark_donations_processed(
                &[a.id, b.id],
                "batch-7",
                Some("https://example.com/receipt.pdf"),
                "admin@stakeward.dev",
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let stored = store.payment(a.id).await.unwrap().unwrap();
        assert_eq!(stored.donation_batch_id.as_deref(), Some("batch-7"));
    }
}
