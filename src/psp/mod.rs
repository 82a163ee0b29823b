pub mod currency;
pub mod mock;
pub mod nvp;
pub mod paypal;
pub mod transport;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// API credentials. Password and signature are kept out of `Debug` output.
#[derive(Debug)]
pub struct Credentials {
    username: String,
    password: SecretString,
    signature: SecretString,
}

impl Credentials {
    pub fn new(username: String, password: String, signature: String) -> Self {
        Self {
            username,
            password: SecretString::from(password),
            signature: SecretString::from(signature),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        self.password.expose_secret()
    }

    pub(crate) fn signature(&self) -> &str {
        self.signature.expose_secret()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum PaymentStatus {
    Paid,
    Refunded,
    Voided,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub authorization_id: String,
    pub order_total: Decimal,
    pub currency_code: String,
}

/// Refunds are always issued for the full captured amount; `amount_to_refund`
/// is accepted from the host but not sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub capture_transaction_id: String,
    pub amount_to_refund: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoidRequest {
    pub authorization_transaction_id: Option<String>,
    pub capture_transaction_id: Option<String>,
}

impl VoidRequest {
    /// The id to void: the authorization id unless it is missing or empty,
    /// then the capture id.
    pub fn transaction_id(&self) -> Option<&str> {
        fn non_empty(id: &Option<String>) -> Option<&str> {
            id.as_deref().filter(|id| !id.is_empty())
        }
        non_empty(&self.authorization_transaction_id).or_else(|| non_empty(&self.capture_transaction_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRecurringRequest {
    pub subscription_transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionRequest {
    Capture(CaptureRequest),
    Refund(RefundRequest),
    Void(VoidRequest),
    CancelRecurring(CancelRecurringRequest),
}

/// Result of one gateway operation. Declines land in `errors`; the call
/// succeeded when there are none.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionOutcome {
    pub new_payment_status: Option<PaymentStatus>,
    pub transaction_id: Option<String>,
    pub transaction_result: Option<String>,
    pub errors: Vec<String>,
}

impl TransactionOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        let mut outcome = Self::default();
        outcome.add_error(error);
        outcome
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderCapabilities {
    pub supports_capture: bool,
    pub supports_refund: bool,
    pub supports_partial_refund: bool,
    pub supports_void: bool,
    pub supports_recurring_cancel: bool,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> ProviderCapabilities;
    async fn capture(&self, request: &CaptureRequest) -> Result<TransactionOutcome>;
    async fn refund(&self, request: &RefundRequest) -> Result<TransactionOutcome>;
    async fn void(&self, request: &VoidRequest) -> Result<TransactionOutcome>;
    async fn cancel_recurring_payment(&self, request: &CancelRecurringRequest) -> Result<TransactionOutcome>;

    async fn process(&self, request: &TransactionRequest) -> Result<TransactionOutcome> {
        match request {
            TransactionRequest::Capture(r) => self.capture(r).await,
            TransactionRequest::Refund(r) => self.refund(r).await,
            TransactionRequest::Void(r) => self.void(r).await,
            TransactionRequest::CancelRecurring(r) => self.cancel_recurring_payment(r).await,
        }
    }
}
