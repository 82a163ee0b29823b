use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::ipn::{DuplicateKeyPolicy, VerificationFailurePolicy};
use crate::psp::Credentials;

/// Protocol version sent with every API call.
pub const API_VERSION: &str = "109.0";

const LIVE_API_URL: &str = "https://api-3t.paypal.com/nvp";
const SANDBOX_API_URL: &str = "https://api-3t.sandbox.paypal.com/nvp";
const LIVE_IPN_URL: &str = "https://www.paypal.com/cgi-bin/webscr";
const SANDBOX_IPN_URL: &str = "https://www.sandbox.paypal.com/cgi-bin/webscr";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub api_account_name: String,
    pub api_account_password: String,
    pub signature: String,
    pub use_sandbox: bool,
    /// Overrides the NVP endpoint picked from `use_sandbox`.
    pub api_url: Option<String>,
    /// Overrides the IPN validation endpoint picked from `use_sandbox`.
    pub ipn_url: Option<String>,
    /// Primary store currency, used when a capture does not name one.
    pub currency_code: String,
    pub request_timeout_secs: u64,
    pub duplicate_key_policy: DuplicateKeyPolicy,
    pub verification_failure_policy: VerificationFailurePolicy,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_account_name: String::new(),
            api_account_password: String::new(),
            signature: String::new(),
            use_sandbox: true,
            api_url: None,
            ipn_url: None,
            currency_code: "USD".to_string(),
            request_timeout_secs: 100,
            duplicate_key_policy: DuplicateKeyPolicy::default(),
            verification_failure_policy: VerificationFailurePolicy::default(),
        }
    }
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("api_account_name", &self.api_account_name)
            .field("api_account_password", &"[REDACTED]")
            .field("signature", &"[REDACTED]")
            .field("use_sandbox", &self.use_sandbox)
            .field("api_url", &self.service_url())
            .field("ipn_url", &self.ipn_url())
            .field("currency_code", &self.currency_code)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("duplicate_key_policy", &self.duplicate_key_policy)
            .field("verification_failure_policy", &self.verification_failure_policy)
            .finish()
    }
}

impl GatewaySettings {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.api_account_name.clone(),
            self.api_account_password.clone(),
            self.signature.clone(),
        )
    }

    pub fn service_url(&self) -> &str {
        match &self.api_url {
            Some(url) => url,
            None if self.use_sandbox => SANDBOX_API_URL,
            None => LIVE_API_URL,
        }
    }

    pub fn ipn_url(&self) -> &str {
        match &self.ipn_url {
            Some(url) => url,
            None if self.use_sandbox => SANDBOX_IPN_URL,
            None => LIVE_IPN_URL,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn config_path() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("paypal-gateway");
    std::fs::create_dir_all(&dir).ok();
    dir.join("config.json")
}

/// Settings from the default location. `Ok(None)` only when there is no
/// settings file yet; an unreadable or malformed file is an error.
pub fn load_settings() -> Result<Option<GatewaySettings>> {
    load_settings_if_present(config_path())
}

pub fn load_settings_if_present(path: impl AsRef<Path>) -> Result<Option<GatewaySettings>> {
    match load_settings_from(path) {
        Ok(settings) => Ok(Some(settings)),
        Err(GatewayError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn load_settings_from(path: impl AsRef<Path>) -> Result<GatewaySettings> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

pub fn save_settings(settings: &GatewaySettings) -> Result<()> {
    save_settings_to(config_path(), settings)
}

pub fn save_settings_to(path: impl AsRef<Path>, settings: &GatewaySettings) -> Result<()> {
    let data = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, data)?;
    Ok(())
}
