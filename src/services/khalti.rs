//! Khalti ePayment (KPG-2) gateway.
//!
//! Amounts cross the wire in paisa. A payment is only trusted after a
//! server-side lookup reports `Completed` for the same amount.

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

use crate::{config::KhaltiConfig, errors::ServiceError};

#[derive(Debug, Clone, Serialize)]
pub struct InitiatePayment {
    pub return_url: String,
    pub website_url: String,
    /// Paisa
    pub amount: i64,
    pub purchase_order_id: String,
    pub purchase_order_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InitiatedPayment {
    pub pidx: String,
    pub payment_url: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum LookupStatus {
    Completed,
    Pending,
    Initiated,
    Expired,
    #[serde(rename = "User canceled")]
    UserCanceled,
    Refunded,
    #[serde(rename = "Partially Refunded")]
    PartiallyRefunded,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PaymentLookup {
    pub pidx: String,
    /// Paisa
    pub total_amount: i64,
    pub status: LookupStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub refunded: bool,
}

/// Online wallet checkout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: &InitiatePayment) -> Result<InitiatedPayment, ServiceError>;
    async fn lookup(&self, pidx: &str) -> Result<PaymentLookup, ServiceError>;
}

pub fn to_paisa(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))
}

pub fn from_paisa(paisa: i64) -> Decimal {
    Decimal::new(paisa, 2)
}

#[derive(Clone, Debug)]
pub struct KhaltiGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct KhaltiErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error_key: Option<String>,
}

impl KhaltiGateway {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Khalti client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    /// None when no secret key is configured.
    pub fn from_config(cfg: &KhaltiConfig) -> Result<Option<Self>, ServiceError> {
        match (&cfg.secret_key, cfg.is_enabled()) {
            (Some(key), true) => Ok(Some(Self::new(cfg.base_url.clone(), key.clone())?)),
            _ => Ok(None),
        }
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Key {}", self.secret_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<KhaltiErrorBody>(&text)
                .ok()
                .and_then(|b| b.detail.or(b.error_key))
                .unwrap_or(text);
            warn!(%url, status = status.as_u16(), %detail, "Khalti request failed");
            return Err(if status.is_client_error() {
                ServiceError::PaymentFailed(detail)
            } else {
                ServiceError::ExternalServiceError(format!("Khalti responded with HTTP {}", status.as_u16()))
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("unexpected Khalti response: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    #[instrument(skip(self, request), fields(order = %request.purchase_order_id, amount = request.amount))]
    async fn initiate(&self, request: &InitiatePayment) -> Result<InitiatedPayment, ServiceError> {
        self.post("/epayment/initiate/", request).await
    }

    #[instrument(skip(self))]
    async fn lookup(&self, pidx: &str) -> Result<PaymentLookup, ServiceError> {
        self.post("/epayment/lookup/", &serde_json::json!({ "pidx": pidx }))
            .await
    }
}
