use thiserror::Error;

/// Failures that are not ordinary gateway declines.
///
/// Declines come back as a failed [`TransactionOutcome`](crate::psp::TransactionOutcome);
/// everything here means the call itself could not be completed.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not encode request: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_urlencoded::de::Error),
    #[error("malformed gateway response: {0}")]
    Protocol(String),
    #[error("duplicate notification field `{0}`")]
    DuplicateNotificationField(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
