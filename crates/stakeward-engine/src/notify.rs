use async_trait::async_trait;
use stakeward_core::{BuddyVerification, Commitment};

use crate::settlement::SettlementResult;

/// Outbound event seam. Implementations publish to the notification bus;
/// failures are logged by the engine and never fail the financial operation.
#[async_trait]
pub trait SettlementNotifier: Send + Sync {
    async fn settlement_completed(
        &self,
        commitment: &Commitment,
        result: &SettlementResult,
    ) -> anyhow::Result<()>;

    async fn buddy_requested(
        &self,
        commitment: &Commitment,
        verification: &BuddyVerification,
    ) -> anyhow::Result<()>;
}

pub struct NoopNotifier;

#[async_trait]
impl SettlementNotifier for NoopNotifier {
    async fn settlement_completed(
        &self,
        _commitment: &Commitment,
        _result: &SettlementResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn buddy_requested(
        &self,
        _commitment: &Commitment,
        _verification: &BuddyVerification,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
