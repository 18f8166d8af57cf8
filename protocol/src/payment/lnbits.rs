//! LNbits payment gateway.
//!
//! Both operations go to the same endpoint, `POST /api/v1/payments`,
//! authenticated with the wallet's invoice key in `X-Api-Key`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::{GatewayError, InvoiceRequest, PaymentGateway, PaymentResponse};
use crate::config::{GATEWAY_API_KEY_HEADER, GATEWAY_PAYMENTS_PATH, GATEWAY_TIMEOUT};

/// Client for an LNbits instance.
#[derive(Debug, Clone)]
pub struct LnbitsGateway {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct DecodeRequest<'a> {
    data: &'a str,
}

impl LnbitsGateway {
    /// `base_url` is the scheme and host, e.g. `https://legend.lnbits.com`.
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: GATEWAY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn payments_url(&self) -> String {
        format!("{}{}", self.base_url, GATEWAY_PAYMENTS_PATH)
    }

    fn post<T: Serialize + ?Sized>(&self, body: &T) -> reqwest::RequestBuilder {
        self.client
            .post(self.payments_url())
            .header(GATEWAY_API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
            .json(body)
    }
}

#[async_trait]
impl PaymentGateway for LnbitsGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<PaymentResponse, GatewayError> {
        let response = self.post(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status != StatusCode::CREATED {
            warn!(status = status.as_u16(), "gateway refused invoice request");
            return Err(GatewayError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let invoice: PaymentResponse = serde_json::from_slice(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if invoice.payment_request.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "empty payment_request".to_string(),
            ));
        }

        debug!(payment_hash = %invoice.payment_hash, "invoice created");
        Ok(invoice)
    }

    async fn validate_payment_request(&self, payment_request: &str) -> Result<bool, GatewayError> {
        let response = self
            .post(&DecodeRequest {
                data: payment_request,
            })
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        let valid = status == StatusCode::OK && !body.is_empty();
        debug!(status = status.as_u16(), valid, "payment request checked");
        Ok(valid)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
