//! Client for the IRD Central Billing Monitoring System.
//!
//! CBMS answers every call with a bare numeric code: `200` means the bill was
//! stored and `101` means it already exists. Anything else is a failure.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::{config::CbmsConfig, errors::ServiceError};

const BILL_PATH: &str = "/api/bill";
const BILL_RETURN_PATH: &str = "/api/billreturn";

pub const CODE_OK: i32 = 200;
pub const CODE_ALREADY_EXISTS: i32 = 101;

/// Sales bill in the IRD JSON shape.
#[derive(Debug, Clone, Serialize)]
pub struct CbmsBill {
    pub username: String,
    pub password: String,
    pub seller_pan: String,
    pub buyer_pan: String,
    pub buyer_name: String,
    pub fiscal_year: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub total_sales: f64,
    pub taxable_sales_vat: f64,
    pub vat: f64,
    pub excisable_amount: f64,
    pub excise: f64,
    pub taxable_sales_hst: f64,
    pub hst: f64,
    pub amount_for_esf: f64,
    pub esf: f64,
    pub export_sales: f64,
    pub tax_exempted_sales: f64,
    pub isrealtime: bool,
    #[serde(rename = "datetimeClient")]
    pub datetime_client: String,
}

/// Credit note cancelling a previously reported bill.
#[derive(Debug, Clone, Serialize)]
pub struct CbmsBillReturn {
    pub username: String,
    pub password: String,
    pub seller_pan: String,
    pub buyer_pan: String,
    pub buyer_name: String,
    pub fiscal_year: String,
    pub ref_invoice_number: String,
    pub credit_note_number: String,
    pub credit_note_date: String,
    pub reason_for_return: String,
    pub total_sales: f64,
    pub taxable_sales_vat: f64,
    pub vat: f64,
    pub excisable_amount: f64,
    pub excise: f64,
    pub taxable_sales_hst: f64,
    pub hst: f64,
    pub amount_for_esf: f64,
    pub esf: f64,
    pub export_sales: f64,
    pub tax_exempted_sales: f64,
    pub isrealtime: bool,
    #[serde(rename = "datetimeClient")]
    pub datetime_client: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbmsOutcome {
    pub code: Option<i32>,
    pub body: String,
}

impl CbmsOutcome {
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim().trim_matches('"');
        Self {
            code: trimmed.parse().ok(),
            body: body.trim().to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, Some(CODE_OK) | Some(CODE_ALREADY_EXISTS))
    }
}

#[derive(Clone, Debug)]
pub struct CbmsClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl CbmsClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("CBMS client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// None unless the integration is enabled with credentials.
    pub fn from_config(cfg: &CbmsConfig) -> Result<Option<Self>, ServiceError> {
        match (cfg.enabled, &cfg.username, &cfg.password) {
            (true, Some(user), Some(pass)) => Ok(Some(Self::new(
                cfg.base_url.clone(),
                user.clone(),
                pass.clone(),
                Duration::from_secs(cfg.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    #[instrument(skip(self, bill), fields(invoice = %bill.invoice_number))]
    pub async fn post_bill(&self, bill: &CbmsBill) -> Result<CbmsOutcome, ServiceError> {
        self.post(BILL_PATH, bill).await
    }

    #[instrument(skip(self, bill_return), fields(invoice = %bill_return.ref_invoice_number))]
    pub async fn post_bill_return(
        &self,
        bill_return: &CbmsBillReturn,
    ) -> Result<CbmsOutcome, ServiceError> {
        self.post(BILL_RETURN_PATH, bill_return).await
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<CbmsOutcome, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), body = %text, "CBMS returned HTTP error");
            return Err(ServiceError::ExternalServiceError(format!(
                "CBMS responded with HTTP {}",
                status.as_u16()
            )));
        }

        let outcome = CbmsOutcome::parse(&text);
        debug!(%url, code = ?outcome.code, "CBMS response");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_bill() -> CbmsBill {
        CbmsBill {
            username: "u".into(),
            password: "p".into(),
            seller_pan: "123456789".into(),
            buyer_pan: String::new(),
            buyer_name: String::new(),
            fiscal_year: "2081.082".into(),
            invoice_number: "2081/82-000001".into(),
            invoice_date: "2024.08.01".into(),
            total_sales: 1130.0,
            taxable_sales_vat: 1000.0,
            vat: 130.0,
            excisable_amount: 0.0,
            excise: 0.0,
            taxable_sales_hst: 0.0,
            hst: 0.0,
            amount_for_esf: 0.0,
            esf: 0.0,
            export_sales: 0.0,
            tax_exempted_sales: 0.0,
            isrealtime: true,
            datetime_client: "2024-08-01T10:00:00Z".into(),
        }
    }

    #[test]
    fn outcome_codes() {
        assert!(CbmsOutcome::parse("200").is_success());
        assert!(CbmsOutcome::parse(" 101\n").is_success());
        assert!(!CbmsOutcome::parse("100").is_success());
        assert!(!CbmsOutcome::parse("<html>").is_success());
    }

    #[tokio::test]
    async fn posts_bill_in_ird_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/bill"))
            .and(body_partial_json(serde_json::json!({
                "invoice_number": "2081/82-000001",
                "datetimeClient": "2024-08-01T10:00:00Z"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("200"))
            .expect(1)
            .mount(&server)
            .await;

        let client = CbmsClient::new(server.uri(), "u", "p", Duration::from_secs(5)).unwrap();
        let outcome = client.post_bill(&sample_bill()).await.unwrap();
        assert_eq!(outcome.code, Some(200));
    }

    #[tokio::test]
    async fn http_errors_are_external_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/bill"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = CbmsClient::new(server.uri(), "u", "p", Duration::from_secs(5)).unwrap();
        let err = client.post_bill(&sample_bill()).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExternalServiceError(_)));
    }
}
