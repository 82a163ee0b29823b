//! Name-value-pair codec for the merchant API.
//!
//! Requests are flat form bodies: the credential header (`USER`, `PWD`,
//! `SIGNATURE`, `SUBJECT`), `METHOD`, `VERSION` and the operation's own
//! fields. Responses come back the same way, with `ACK` and a list of
//! indexed `L_*n` error fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, trace};

use super::currency::{format_amount, Currency};
use super::transport::Transport;
use super::Credentials;
use crate::config::API_VERSION;
use crate::error::{GatewayError, Result};

/// Decoded response body, in the order the gateway sent it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NvpFields(Vec<(String, String)>);

impl NvpFields {
    pub fn parse(body: &str) -> Result<Self> {
        Ok(Self(serde_urlencoded::from_str(body)?))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn owned(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum AckCode {
    Success,
    SuccessWithWarning,
    Failure,
    FailureWithWarning,
    Warning,
}

impl AckCode {
    pub fn is_success(self) -> bool {
        matches!(self, AckCode::Success | AckCode::SuccessWithWarning)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: Option<String>,
    pub short_message: Option<String>,
    pub long_message: Option<String>,
    pub severity: Option<String>,
}

impl ErrorDetail {
    pub fn message(&self) -> Option<&str> {
        self.long_message
            .as_deref()
            .or(self.short_message.as_deref())
            .or(self.code.as_deref())
    }
}

/// Fields every API response carries.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub ack: AckCode,
    pub correlation_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub errors: Vec<ErrorDetail>,
}

impl ResponseEnvelope {
    pub fn from_fields(fields: &NvpFields) -> Result<Self> {
        let ack = fields
            .get("ACK")
            .ok_or_else(|| GatewayError::Protocol("response has no ACK field".to_string()))?;
        let ack = ack
            .parse::<AckCode>()
            .map_err(|_| GatewayError::Protocol(format!("unknown ACK value `{ack}`")))?;

        let mut errors = Vec::new();
        for n in 0.. {
            let detail = ErrorDetail {
                code: fields.owned(&format!("L_ERRORCODE{n}")),
                short_message: fields.owned(&format!("L_SHORTMESSAGE{n}")),
                long_message: fields.owned(&format!("L_LONGMESSAGE{n}")),
                severity: fields.owned(&format!("L_SEVERITYCODE{n}")),
            };
            if detail == ErrorDetail::default() {
                break;
            }
            errors.push(detail);
        }

        Ok(Self {
            ack,
            correlation_id: fields.owned("CORRELATIONID"),
            timestamp: fields
                .get("TIMESTAMP")
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            version: fields.owned("VERSION"),
            errors,
        })
    }
}

/// Anything with an acknowledgment and error details, whatever operation it
/// answers.
pub trait Acknowledged {
    fn ack(&self) -> AckCode;
    fn error_details(&self) -> &[ErrorDetail];
    fn correlation_id(&self) -> Option<&str>;

    /// `Ok` when the gateway accepted the call, otherwise the gateway's error
    /// text.
    fn check_success(&self) -> std::result::Result<(), String> {
        if self.ack().is_success() {
            return Ok(());
        }
        let messages: Vec<&str> = self
            .error_details()
            .iter()
            .filter_map(ErrorDetail::message)
            .collect();
        if messages.is_empty() {
            Err(format!("Gateway returned {}", self.ack()))
        } else {
            Err(messages.join("; "))
        }
    }
}

pub trait NvpResponse: Acknowledged + Sized {
    fn from_fields(fields: &NvpFields) -> Result<Self>;
}

/// A single API method: its request fields and the response it yields.
pub trait NvpOperation: Serialize {
    const METHOD: &'static str;
    type Response: NvpResponse + Send;
}

macro_rules! impl_acknowledged {
    ($($response:ty),+ $(,)?) => {
        $(
            impl Acknowledged for $response {
                fn ack(&self) -> AckCode {
                    self.envelope.ack
                }

                fn error_details(&self) -> &[ErrorDetail] {
                    &self.envelope.errors
                }

                fn correlation_id(&self) -> Option<&str> {
                    self.envelope.correlation_id.as_deref()
                }
            }
        )+
    };
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum CompleteType {
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum RefundType {
    Full,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum StatusChangeAction {
    Cancel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct DoCapture {
    pub version: &'static str,
    #[serde(rename = "AUTHORIZATIONID")]
    pub authorization_id: String,
    pub amt: String,
    #[serde(rename = "CURRENCYCODE")]
    pub currency_code: Currency,
    #[serde(rename = "COMPLETETYPE")]
    pub complete_type: CompleteType,
}

impl DoCapture {
    pub fn new(authorization_id: &str, amount: Decimal, currency: Currency) -> Self {
        Self {
            version: API_VERSION,
            authorization_id: authorization_id.to_string(),
            amt: format_amount(amount),
            currency_code: currency,
            complete_type: CompleteType::Complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResponse {
    pub envelope: ResponseEnvelope,
    pub authorization_id: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_status: Option<String>,
}

impl NvpResponse for CaptureResponse {
    fn from_fields(fields: &NvpFields) -> Result<Self> {
        Ok(Self {
            envelope: ResponseEnvelope::from_fields(fields)?,
            authorization_id: fields.owned("AUTHORIZATIONID"),
            transaction_id: fields.owned("TRANSACTIONID"),
            payment_status: fields.owned("PAYMENTSTATUS"),
        })
    }
}

impl NvpOperation for DoCapture {
    const METHOD: &'static str = "DoCapture";
    type Response = CaptureResponse;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct RefundTransaction {
    pub version: &'static str,
    #[serde(rename = "TRANSACTIONID")]
    pub transaction_id: String,
    #[serde(rename = "REFUNDTYPE")]
    pub refund_type: RefundType,
}

impl RefundTransaction {
    pub fn full(transaction_id: &str) -> Self {
        Self {
            version: API_VERSION,
            transaction_id: transaction_id.to_string(),
            refund_type: RefundType::Full,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundResponse {
    pub envelope: ResponseEnvelope,
    pub refund_transaction_id: Option<String>,
}

impl NvpResponse for RefundResponse {
    fn from_fields(fields: &NvpFields) -> Result<Self> {
        Ok(Self {
            envelope: ResponseEnvelope::from_fields(fields)?,
            refund_transaction_id: fields.owned("REFUNDTRANSACTIONID"),
        })
    }
}

impl NvpOperation for RefundTransaction {
    const METHOD: &'static str = "RefundTransaction";
    type Response = RefundResponse;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct DoVoid {
    pub version: &'static str,
    #[serde(rename = "AUTHORIZATIONID")]
    pub authorization_id: String,
}

impl DoVoid {
    pub fn new(authorization_id: &str) -> Self {
        Self {
            version: API_VERSION,
            authorization_id: authorization_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoidResponse {
    pub envelope: ResponseEnvelope,
    pub authorization_id: Option<String>,
}

impl NvpResponse for VoidResponse {
    fn from_fields(fields: &NvpFields) -> Result<Self> {
        Ok(Self {
            envelope: ResponseEnvelope::from_fields(fields)?,
            authorization_id: fields.owned("AUTHORIZATIONID"),
        })
    }
}

impl NvpOperation for DoVoid {
    const METHOD: &'static str = "DoVoid";
    type Response = VoidResponse;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ManageRecurringPaymentsProfileStatus {
    pub version: &'static str,
    #[serde(rename = "PROFILEID")]
    pub profile_id: String,
    pub action: StatusChangeAction,
}

impl ManageRecurringPaymentsProfileStatus {
    pub fn cancel(profile_id: &str) -> Self {
        Self {
            version: API_VERSION,
            profile_id: profile_id.to_string(),
            action: StatusChangeAction::Cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileStatusResponse {
    pub envelope: ResponseEnvelope,
    pub profile_id: Option<String>,
}

impl NvpResponse for ProfileStatusResponse {
    fn from_fields(fields: &NvpFields) -> Result<Self> {
        Ok(Self {
            envelope: ResponseEnvelope::from_fields(fields)?,
            profile_id: fields.owned("PROFILEID"),
        })
    }
}

impl NvpOperation for ManageRecurringPaymentsProfileStatus {
    const METHOD: &'static str = "ManageRecurringPaymentsProfileStatus";
    type Response = ProfileStatusResponse;
}

impl_acknowledged!(CaptureResponse, RefundResponse, VoidResponse, ProfileStatusResponse);

#[derive(Serialize)]
struct SignedRequest<'a, Op> {
    #[serde(rename = "METHOD")]
    method: &'static str,
    #[serde(rename = "USER")]
    user: &'a str,
    #[serde(rename = "PWD")]
    password: &'a str,
    #[serde(rename = "SIGNATURE")]
    signature: &'a str,
    #[serde(rename = "SUBJECT")]
    subject: &'a str,
    #[serde(flatten)]
    operation: &'a Op,
}

/// A signed connection to the API endpoint, opened for one call and released
/// when it goes out of scope.
pub struct ApiBinding<'a> {
    transport: &'a dyn Transport,
    url: &'a str,
    credentials: &'a Credentials,
}

impl<'a> ApiBinding<'a> {
    pub fn open(transport: &'a dyn Transport, url: &'a str, credentials: &'a Credentials) -> Self {
        trace!(url, "opening API binding");
        Self {
            transport,
            url,
            credentials,
        }
    }

    pub async fn call<Op>(&self, operation: &Op) -> Result<Op::Response>
    where
        Op: NvpOperation + Sync,
    {
        let body = serde_urlencoded::to_string(SignedRequest {
            method: Op::METHOD,
            user: self.credentials.username(),
            password: self.credentials.password(),
            signature: self.credentials.signature(),
            subject: "",
            operation,
        })?;

        debug!(method = Op::METHOD, "calling gateway API");
        let raw = self.transport.post_form(self.url, body, None).await?;
        let response = <Op::Response as NvpResponse>::from_fields(&NvpFields::parse(&raw)?)?;
        debug!(method = Op::METHOD, ack = %response.ack(), "gateway API answered");
        Ok(response)
    }
}

impl Drop for ApiBinding<'_> {
    fn drop(&mut self) {
        trace!(url = self.url, "releasing API binding");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn envelope(body: &str) -> Result<ResponseEnvelope> {
        ResponseEnvelope::from_fields(&NvpFields::parse(body)?)
    }

    #[test]
    fn envelope_reads_ack_and_metadata() {
        let env = envelope("ACK=Success&CORRELATIONID=abc123&TIMESTAMP=2024-03-01T10%3A00%3A00Z&VERSION=109.0")
            .unwrap();
        assert_eq!(env.ack, AckCode::Success);
        assert_eq!(env.correlation_id.as_deref(), Some("abc123"));
        assert_eq!(env.version.as_deref(), Some("109.0"));
        assert!(env.timestamp.is_some());
        assert!(env.errors.is_empty());
    }

    #[test]
    fn envelope_collects_indexed_errors() {
        let env = envelope(
            "ACK=Failure&L_ERRORCODE0=10001&L_SHORTMESSAGE0=Internal%20Error&L_LONGMESSAGE0=Timeout%20processing%20request\
             &L_ERRORCODE1=10002&L_SHORTMESSAGE1=Security%20error",
        )
        .unwrap();
        assert_eq!(env.errors.len(), 2);
        assert_eq!(env.errors[0].message(), Some("Timeout processing request"));
        assert_eq!(env.errors[1].message(), Some("Security error"));
    }

    #[test]
    fn missing_or_unknown_ack_is_a_protocol_error() {
        assert!(matches!(envelope("CORRELATIONID=x"), Err(GatewayError::Protocol(_))));
        assert!(matches!(envelope("ACK=Maybe"), Err(GatewayError::Protocol(_))));
    }

    #[test]
    fn success_with_warning_counts_as_success() {
        assert!(AckCode::Success.is_success());
        assert!(AckCode::SuccessWithWarning.is_success());
        assert!(!AckCode::Warning.is_success());
        assert!(!AckCode::Failure.is_success());
        assert!(!AckCode::FailureWithWarning.is_success());
    }

    #[test]
    fn check_success_reports_gateway_text() {
        let fields = NvpFields::parse("ACK=Failure&L_LONGMESSAGE0=Insufficient%20funds").unwrap();
        let response = RefundResponse::from_fields(&fields).unwrap();
        assert_eq!(response.check_success(), Err("Insufficient funds".to_string()));

        let fields = NvpFields::parse("ACK=Warning").unwrap();
        let response = VoidResponse::from_fields(&fields).unwrap();
        assert_eq!(response.check_success(), Err("Gateway returned Warning".to_string()));
    }

    #[test]
    fn responses_expose_correlation_id() {
        let fields = NvpFields::parse("ACK=Failure&CORRELATIONID=8d1c2f&L_LONGMESSAGE0=Declined").unwrap();
        let response = CaptureResponse::from_fields(&fields).unwrap();
        assert_eq!(response.correlation_id(), Some("8d1c2f"));

        let fields = NvpFields::parse("ACK=Success").unwrap();
        let response = ProfileStatusResponse::from_fields(&fields).unwrap();
        assert_eq!(response.correlation_id(), None);
    }

    #[test]
    fn capture_request_encodes_operation_fields() {
        let operation = DoCapture::new("AUTH1", dec!(1234.5), Currency::EUR);
        let encoded = serde_urlencoded::to_string(&operation).unwrap();
        assert_eq!(
            encoded,
            "VERSION=109.0&AUTHORIZATIONID=AUTH1&AMT=1%2C234.50&CURRENCYCODE=EUR&COMPLETETYPE=Complete"
        );
    }

    #[test]
    fn profile_cancel_encodes_action() {
        let encoded =
            serde_urlencoded::to_string(ManageRecurringPaymentsProfileStatus::cancel("I-PROFILE")).unwrap();
        assert_eq!(encoded, "VERSION=109.0&PROFILEID=I-PROFILE&ACTION=Cancel");
    }
}
