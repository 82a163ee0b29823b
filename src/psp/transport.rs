use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use tracing::debug;

use crate::error::{GatewayError, Result};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Posts a form body and hands back the response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_form(&self, url: &str, body: String, user_agent: Option<&str>) -> Result<String>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_form(&self, url: &str, body: String, user_agent: Option<&str>) -> Result<String> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body);
        if let Some(agent) = user_agent {
            request = request.header(USER_AGENT, agent);
        }

        let resp = request.send().await?;
        let status = resp.status();
        debug!(url, status = status.as_u16(), "gateway responded");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.text().await?)
    }
}
