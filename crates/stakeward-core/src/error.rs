use thiserror::Error;

/// Error taxonomy shared by the settlement engine, the buddy protocol and
/// the reconciliation sweep.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The payment for this commitment is already in a terminal settled
    /// state. Not a fault of the overall system; the specific caller lost
    /// the race and must not retry.
    #[error("payment already settled")]
    AlreadySettled,

    /// The verification token was already consumed.
    #[error("verification already processed")]
    AlreadyProcessed,

    #[error("verification link expired")]
    Expired,

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Gateway call failed or timed out. The payment is left untouched so
    /// the caller (or the next reconcile run) can retry.
    #[error("gateway unavailable: {0}")]
    GatewayTransient(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::GatewayTransient(_) | EngineError::Storage(_)
        )
    }
}
