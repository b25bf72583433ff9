use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// An outbound webhook call, fully prepared
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// `None` for GET requests
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum WebhookError {
    InvalidMethod(String),
    ConnectionError(String),
    Timeout,
    Status(u16),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::InvalidMethod(m) => write!(f, "Invalid HTTP method: {}", m),
            WebhookError::ConnectionError(msg) => write!(f, "Webhook request failed: {}", msg),
            WebhookError::Timeout => write!(f, "Webhook request timeout"),
            WebhookError::Status(code) => write!(f, "Webhook responded with HTTP {}", code),
        }
    }
}

impl std::error::Error for WebhookError {}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Succeeds only on a 2xx response
    async fn send(&self, request: &WebhookRequest) -> Result<(), WebhookError>;
}

pub struct ReqwestWebhookSender {
    client: reqwest::Client,
}

impl ReqwestWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for ReqwestWebhookSender {
    async fn send(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| WebhookError::InvalidMethod(request.method.clone()))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout
            } else {
                WebhookError::ConnectionError(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status(status.as_u16()))
        }
    }
}
