//! Client for the external payment gateway.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway unreachable: {0}")]
    Unreachable(String),

    #[error("payment gateway returned an unexpected response: {0}")]
    BadResponse(String),
}

/// State of a charge as reported by the gateway.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    pub amount_cents: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RefundReceipt {
    pub reference: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct RefundRequest {
    pub order_id: i32,
    pub restaurant_id: i32,
    pub amount_cents: i64,
    pub reason: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Looks up a charge; the engine never assumes success without this answer.
    async fn verify_charge(&self, charge_ref: &str) -> Result<ChargeVerification, GatewayError>;

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError>;
}

pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn verify_charge(&self, charge_ref: &str) -> Result<ChargeVerification, GatewayError> {
        let response = self
            .client
            .get(format!("{}/charges/{}", self.base_url, charge_ref))
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::BadResponse(format!(
                "status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, GatewayError> {
        let response = self
            .client
            .post(format!("{}/refunds", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::BadResponse(format!(
                "status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))
    }
}
