use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway refused the request: {0}")]
    Refused(String),

    #[error("gateway unreachable: {0}")]
    Unreachable(String),
}

/// Opaque references returned by a charge: `gateway_ref` identifies the
/// charge server-side, `client_handle` is handed to the client to finish
/// the payment flow.
#[derive(Debug, Clone)]
pub struct ChargeHandle {
    pub gateway_ref: String,
    pub client_handle: String,
}

/// Thin wrapper over the payment provider's charge and partial-refund
/// primitives. Calls are treated as at-least-once; the settlement engine's
/// conditional payment claim is what prevents a retry from double-settling.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        amount: Decimal,
        currency: &str,
        commitment_id: Uuid,
        user_id: Uuid,
    ) -> Result<ChargeHandle, GatewayError>;

    async fn refund(&self, gateway_ref: &str, amount: Decimal) -> Result<String, GatewayError>;
}

/// Gateway stand-in for local runs and the documented test-mode stake path.
/// Always succeeds with synthetic references.
#[derive(Default)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(
        &self,
        _amount: Decimal,
        _currency: &str,
        _commitment_id: Uuid,
        _user_id: Uuid,
    ) -> Result<ChargeHandle, GatewayError> {
        Ok(ChargeHandle {
            gateway_ref: format!("sim_pi_{}", Uuid::new_v4().simple()),
            client_handle: format!("sim_secret_{}", Uuid::new_v4().simple()),
        })
    }

    async fn refund(&self, _gateway_ref: &str, _amount: Decimal) -> Result<String, GatewayError> {
        Ok(format!("sim_re_{}", Uuid::new_v4().simple()))
    }
}
