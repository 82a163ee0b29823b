use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::currency::Currency;
use super::nvp::{
    Acknowledged, ApiBinding, CaptureResponse, DoCapture, DoVoid, ManageRecurringPaymentsProfileStatus,
    NvpOperation, RefundResponse, RefundTransaction,
};
use super::transport::{HttpTransport, Transport};
use super::{
    CancelRecurringRequest, CaptureRequest, Credentials, PaymentProvider, PaymentStatus, ProviderCapabilities,
    RefundRequest, TransactionOutcome, VoidRequest,
};
use crate::config::GatewaySettings;
use crate::error::Result;

pub struct PayPalProvider {
    credentials: Credentials,
    service_url: String,
    transport: Arc<dyn Transport>,
}

impl PayPalProvider {
    pub fn new(settings: &GatewaySettings) -> Result<Self> {
        let transport = HttpTransport::new(settings.request_timeout())?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: &GatewaySettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials: settings.credentials(),
            service_url: settings.service_url().to_string(),
            transport,
        }
    }

    /// Sends one operation over a binding scoped to this call. Declines become
    /// a failed outcome; `on_success` builds the outcome for an accepted call.
    async fn execute<Op, F>(&self, operation: &Op, on_success: F) -> Result<TransactionOutcome>
    where
        Op: NvpOperation + Sync,
        F: FnOnce(Op::Response) -> TransactionOutcome + Send,
    {
        let binding = ApiBinding::open(self.transport.as_ref(), &self.service_url, &self.credentials);
        let response = binding.call(operation).await?;

        match response.check_success() {
            Ok(()) => {
                info!(method = Op::METHOD, "gateway accepted the call");
                Ok(on_success(response))
            }
            Err(error) => {
                warn!(
                    method = Op::METHOD,
                    correlation_id = response.correlation_id().unwrap_or_default(),
                    %error,
                    "gateway declined the call"
                );
                Ok(TransactionOutcome::failed(error))
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn name(&self) -> &str {
        "PayPal"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_capture: true,
            supports_refund: true,
            supports_partial_refund: false,
            supports_void: true,
            supports_recurring_cancel: true,
        }
    }

    #[instrument(skip_all, fields(authorization_id = %request.authorization_id))]
    async fn capture(&self, request: &CaptureRequest) -> Result<TransactionOutcome> {
        let Some(currency) = Currency::from_code(&request.currency_code) else {
            warn!(currency_code = %request.currency_code, "unsupported currency, capture not sent");
            return Ok(TransactionOutcome::failed(format!(
                "Unsupported currency code '{}'",
                request.currency_code
            )));
        };

        let operation = DoCapture::new(&request.authorization_id, request.order_total, currency);
        self.execute(&operation, |response: CaptureResponse| {
            let ack = response.ack();
            TransactionOutcome {
                new_payment_status: Some(PaymentStatus::Paid),
                transaction_id: response.transaction_id,
                transaction_result: Some(ack.to_string()),
                errors: Vec::new(),
            }
        })
        .await
    }

    #[instrument(skip_all, fields(transaction_id = %request.capture_transaction_id))]
    async fn refund(&self, request: &RefundRequest) -> Result<TransactionOutcome> {
        if let Some(amount) = request.amount_to_refund {
            warn!(%amount, "partial refunds are not supported, refunding in full");
        }

        let operation = RefundTransaction::full(&request.capture_transaction_id);
        self.execute(&operation, |response: RefundResponse| TransactionOutcome {
            new_payment_status: Some(PaymentStatus::Refunded),
            transaction_id: response.refund_transaction_id,
            ..TransactionOutcome::default()
        })
        .await
    }

    #[instrument(skip_all)]
    async fn void(&self, request: &VoidRequest) -> Result<TransactionOutcome> {
        let Some(transaction_id) = request.transaction_id() else {
            warn!("void without an authorization or capture id, not sent");
            return Ok(TransactionOutcome::failed(
                "Void requires an authorization or capture transaction id",
            ));
        };

        let operation = DoVoid::new(transaction_id);
        self.execute(&operation, |_| TransactionOutcome {
            new_payment_status: Some(PaymentStatus::Voided),
            ..TransactionOutcome::default()
        })
        .await
    }

    #[instrument(skip_all, fields(profile_id = %request.subscription_transaction_id))]
    async fn cancel_recurring_payment(&self, request: &CancelRecurringRequest) -> Result<TransactionOutcome> {
        let operation = ManageRecurringPaymentsProfileStatus::cancel(&request.subscription_transaction_id);
        self.execute(&operation, |_| TransactionOutcome::default()).await
    }
}
