use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::transport::Transport;
use crate::error::{GatewayError, Result};

/// In-memory transport: records every request and answers from a queue of
/// canned replies, falling back to a fixed reply once the queue is empty.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: Option<String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

#[derive(Debug, Clone)]
enum MockReply {
    Body(String),
    Status(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: String,
    pub user_agent: Option<String>,
}

impl RecordedRequest {
    /// Decoded value of a form field in the request body.
    pub fn field(&self, key: &str) -> Option<String> {
        serde_urlencoded::from_str::<Vec<(String, String)>>(&self.body)
            .ok()?
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every call with `body`.
    pub fn always(body: impl Into<String>) -> Self {
        Self {
            fallback: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn respond_with(self, body: impl Into<String>) -> Self {
        lock(&self.replies).push_back(MockReply::Body(body.into()));
        self
    }

    pub fn fail_with_status(self, status: u16) -> Self {
        lock(&self.replies).push_back(MockReply::Status(status));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_form(&self, url: &str, body: String, user_agent: Option<&str>) -> Result<String> {
        lock(&self.requests).push(RecordedRequest {
            url: url.to_string(),
            body,
            user_agent: user_agent.map(str::to_string),
        });

        let reply = lock(&self.replies).pop_front();
        match reply {
            Some(MockReply::Body(body)) => Ok(body),
            Some(MockReply::Status(status)) => Err(GatewayError::Status {
                status,
                body: String::new(),
            }),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| GatewayError::Protocol("mock transport has no reply queued".to_string())),
        }
    }
}
