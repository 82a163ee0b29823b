//! Instant Payment Notification verification.
//!
//! Notifications arrive as unauthenticated form posts. The only way to trust
//! one is to echo it back to the gateway with `cmd=_notify-validate` and get
//! `VERIFIED` in return.

use percent_encoding::percent_decode_str;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::GatewaySettings;
use crate::error::{GatewayError, Result};
use crate::psp::transport::{HttpTransport, Transport};

const VALIDATE_COMMAND: &str = "cmd=_notify-validate";

/// What to do when a notification names the same field twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    #[default]
    FirstWins,
    LastWins,
    Reject,
}

/// What to do when the validation round trip itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailurePolicy {
    /// Log the failure and report the notification as not verified.
    #[default]
    Unverified,
    /// Return the transport error to the caller.
    Propagate,
}

/// Notification fields in arrival order. Keys are unique and compared
/// ignoring ASCII case; the first spelling seen is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFields(Vec<(String, String)>);

impl NotificationFields {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.0[i].1.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    fn insert(&mut self, key: String, value: String, policy: DuplicateKeyPolicy) -> Result<()> {
        match (self.position(&key), policy) {
            (None, _) => self.0.push((key, value)),
            (Some(_), DuplicateKeyPolicy::FirstWins) => {}
            (Some(i), DuplicateKeyPolicy::LastWins) => self.0[i].1 = value,
            (Some(_), DuplicateKeyPolicy::Reject) => {
                return Err(GatewayError::DuplicateNotificationField(key));
            }
        }
        Ok(())
    }
}

impl Serialize for NotificationFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub verified: bool,
    pub fields: NotificationFields,
}

fn url_decode(text: &str) -> String {
    percent_decode_str(&text.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Splits a raw notification body into fields. Each `&`-separated segment is
/// decoded and trimmed, then split on its first `=`; segments without one
/// are dropped.
pub fn parse_notification(form: &str, policy: DuplicateKeyPolicy) -> Result<NotificationFields> {
    let mut fields = NotificationFields::default();
    for segment in form.split('&') {
        let line = url_decode(segment);
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        fields.insert(key.to_string(), value.to_string(), policy)?;
    }
    Ok(fields)
}

/// True when the gateway's echo, decoded and trimmed, reads `VERIFIED`.
pub fn is_verified(response: &str) -> bool {
    url_decode(response).trim().eq_ignore_ascii_case("VERIFIED")
}

/// The validation body goes out as ASCII; anything else becomes `?`.
fn to_ascii(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

pub struct IpnVerifier {
    transport: Arc<dyn Transport>,
    ipn_url: String,
    duplicate_key_policy: DuplicateKeyPolicy,
    failure_policy: VerificationFailurePolicy,
}

impl IpnVerifier {
    pub fn new(settings: &GatewaySettings) -> Result<Self> {
        let transport = HttpTransport::new(settings.request_timeout())?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: &GatewaySettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            ipn_url: settings.ipn_url().to_string(),
            duplicate_key_policy: settings.duplicate_key_policy,
            failure_policy: settings.verification_failure_policy,
        }
    }

    /// Parses the notification and asks the gateway whether it sent it.
    /// `user_agent` is the agent of the inbound notification request.
    #[instrument(skip_all)]
    pub async fn verify(&self, form: &str, user_agent: Option<&str>) -> Result<Notification> {
        let fields = parse_notification(form, self.duplicate_key_policy)?;

        let verified = match self.validate(form, user_agent).await {
            Ok(verified) => verified,
            Err(error) => match self.failure_policy {
                VerificationFailurePolicy::Unverified => {
                    warn!(%error, "notification validation failed, treating as unverified");
                    false
                }
                VerificationFailurePolicy::Propagate => return Err(error),
            },
        };

        debug!(verified, fields = fields.len(), "notification checked");
        Ok(Notification { verified, fields })
    }

    async fn validate(&self, form: &str, user_agent: Option<&str>) -> Result<bool> {
        let body = to_ascii(&format!("{form}&{VALIDATE_COMMAND}"));
        let response = self.transport.post_form(&self.ipn_url, body, user_agent).await?;
        Ok(is_verified(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psp::mock::MockTransport;

    fn verifier(transport: &Arc<MockTransport>, settings: GatewaySettings) -> IpnVerifier {
        IpnVerifier::with_transport(&settings, transport.clone())
    }

    #[test]
    fn parses_decoded_fields() {
        let fields = parse_notification("a=1&b=two%20words&c=", DuplicateKeyPolicy::FirstWins).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields.get("a"), Some("1"));
        assert_eq!(fields.get("b"), Some("two words"));
        assert_eq!(fields.get("c"), Some(""));
    }

    #[test]
    fn splits_on_first_equals_and_skips_bare_segments() {
        let fields = parse_notification(
            "custom=x%3Dy&flag&payer_email=buyer%40example.com&memo=hello+world",
            DuplicateKeyPolicy::FirstWins,
        )
        .unwrap();
        assert_eq!(fields.get("custom"), Some("x=y"));
        assert!(!fields.contains_key("flag"));
        assert_eq!(fields.get("payer_email"), Some("buyer@example.com"));
        assert_eq!(fields.get("memo"), Some("hello world"));
    }

    #[test]
    fn keys_compare_ignoring_case() {
        let fields = parse_notification("Txn_Id=61E67681CH3238416", DuplicateKeyPolicy::FirstWins).unwrap();
        assert_eq!(fields.get("txn_id"), Some("61E67681CH3238416"));
        assert_eq!(fields.iter().next(), Some(("Txn_Id", "61E67681CH3238416")));
    }

    #[test]
    fn duplicate_policy_decides_which_value_stays() {
        let form = "item=one&ITEM=two";

        let first = parse_notification(form, DuplicateKeyPolicy::FirstWins).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.get("item"), Some("one"));

        let last = parse_notification(form, DuplicateKeyPolicy::LastWins).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last.get("item"), Some("two"));
        assert_eq!(last.iter().next(), Some(("item", "two")));

        let rejected = parse_notification(form, DuplicateKeyPolicy::Reject);
        assert!(matches!(rejected, Err(GatewayError::DuplicateNotificationField(key)) if key == "ITEM"));
    }

    #[test]
    fn verified_only_for_verified_echo() {
        assert!(is_verified("VERIFIED"));
        assert!(is_verified("  verified\r\n"));
        assert!(is_verified("Verified"));
        assert!(!is_verified("INVALID"));
        assert!(!is_verified("VERIFIED EXTRA"));
        assert!(!is_verified(""));
    }

    #[test]
    fn non_ascii_becomes_question_mark() {
        assert_eq!(to_ascii("name=Jürgen"), "name=J?rgen");
    }

    #[tokio::test]
    async fn verify_posts_body_back_with_validate_command() {
        let transport = Arc::new(MockTransport::new().respond_with("VERIFIED"));
        let settings = GatewaySettings::default();
        let notification = verifier(&transport, settings.clone())
            .verify("txn_id=TX1&payment_status=Completed", Some("PayPal IPN ( https://www.paypal.com/ipn )"))
            .await
            .unwrap();

        assert!(notification.verified);
        assert_eq!(notification.fields.get("payment_status"), Some("Completed"));

        let request = transport.last_request().unwrap();
        assert_eq!(request.url, settings.ipn_url());
        assert_eq!(request.body, "txn_id=TX1&payment_status=Completed&cmd=_notify-validate");
        assert_eq!(request.user_agent.as_deref(), Some("PayPal IPN ( https://www.paypal.com/ipn )"));
    }

    #[tokio::test]
    async fn invalid_echo_is_not_verified() {
        let transport = Arc::new(MockTransport::new().respond_with("INVALID"));
        let notification = verifier(&transport, GatewaySettings::default())
            .verify("txn_id=TX1", None)
            .await
            .unwrap();

        assert!(!notification.verified);
        assert_eq!(notification.fields.get("txn_id"), Some("TX1"));
    }

    #[tokio::test]
    async fn transport_failure_is_unverified_by_default() {
        let transport = Arc::new(MockTransport::new().fail_with_status(500));
        let notification = verifier(&transport, GatewaySettings::default())
            .verify("txn_id=TX1", None)
            .await
            .unwrap();

        assert!(!notification.verified);
        assert_eq!(notification.fields.get("txn_id"), Some("TX1"));
    }

    #[tokio::test]
    async fn transport_failure_propagates_when_configured() {
        let transport = Arc::new(MockTransport::new().fail_with_status(500));
        let settings = GatewaySettings {
            verification_failure_policy: VerificationFailurePolicy::Propagate,
            ..GatewaySettings::default()
        };
        let result = verifier(&transport, settings).verify("txn_id=TX1", None).await;

        assert!(matches!(result, Err(GatewayError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn rejected_duplicates_skip_the_round_trip() {
        let transport = Arc::new(MockTransport::always("VERIFIED"));
        let settings = GatewaySettings {
            duplicate_key_policy: DuplicateKeyPolicy::Reject,
            ..GatewaySettings::default()
        };
        let result = verifier(&transport, settings).verify("a=1&a=2", None).await;

        assert!(result.is_err());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn fields_serialize_as_a_map() {
        let fields = parse_notification("b=2&a=1", DuplicateKeyPolicy::FirstWins).unwrap();
        assert_eq!(serde_json::to_string(&fields).unwrap(), r#"{"b":"2","a":"1"}"#);
    }
}
