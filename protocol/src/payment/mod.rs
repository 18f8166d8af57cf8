//! # Payment Gateway
//!
//! Lightning invoices are issued and checked by an external gateway. The
//! registration flow only talks to the [`PaymentGateway`] trait, so tests
//! (and alternative gateways) can stand in for the real one.
//!
//! ```text
//! mod.rs     — PaymentGateway trait, request/response types, GatewayError
//! lnbits.rs  — LnbitsGateway: the LNbits REST API over reqwest
//! ```

pub mod lnbits;

pub use lnbits::LnbitsGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid status code from gateway: {status}")]
    UnexpectedStatus { status: u16 },

    #[error("could not parse gateway response: {0}")]
    InvalidResponse(String),
}

/// An incoming invoice to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceRequest {
    /// Always `false`: the invoice is for receiving funds.
    pub out: bool,
    pub memo: String,
    pub amount: u64,
    /// Where the gateway calls back once the invoice is paid.
    pub webhook: String,
}

impl InvoiceRequest {
    pub fn incoming(amount: u64, memo: impl Into<String>, webhook: impl Into<String>) -> Self {
        Self {
            out: false,
            memo: memo.into(),
            amount,
            webhook: webhook.into(),
        }
    }
}

/// The gateway's answer to an invoice request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_hash: String,
    pub payment_request: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an invoice. The gateway must answer 201.
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<PaymentResponse, GatewayError>;

    /// Ask whether a previously issued payment request is still usable.
    ///
    /// `Ok(false)` means the gateway rejected it; `Err` means the question
    /// could not be asked.
    async fn validate_payment_request(&self, payment_request: &str) -> Result<bool, GatewayError>;
}
