use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::Amount;
use crate::model::{PaymentMethod, PayoutId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rejected payout: {0}")]
    Rejected(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Receipt from the gateway. The money has not moved yet; the outcome arrives
/// later through the settlement webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAck {
    pub reference: String,
}

/// External system that moves money to banks and mobile wallets.
#[async_trait]
pub trait SettlementGateway: Send + Sync + Debug {
    async fn submit_payout(
        &self,
        payout: PayoutId,
        amount: Amount,
        method: &PaymentMethod,
    ) -> Result<GatewayAck, GatewayError>;
}

/// Accepts every payout and only logs it. Settlement must be fed back manually.
#[derive(Debug, Default)]
pub struct LoggingGateway;

#[async_trait]
impl SettlementGateway for LoggingGateway {
    async fn submit_payout(
        &self,
        payout: PayoutId,
        amount: Amount,
        method: &PaymentMethod,
    ) -> Result<GatewayAck, GatewayError> {
        let reference = Uuid::new_v4().simple().to_string();
        info!(
            payout = %payout,
            amount = %amount,
            destination = %method.masked_identifier,
            reference = %reference,
            "payout submitted"
        );
        Ok(GatewayAck { reference })
    }
}
