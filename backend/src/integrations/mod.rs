use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod email;
pub mod http_dispatch;
pub mod mqtt;
pub mod mqtt_dispatch;
pub mod webhook;
pub mod workspace;

// Re-export collaborators
pub use email::{
    EmailError, EmailRenderer, EmailTransport, RenderedEmail, SmtpEmailTransport,
    TemplateEmailRenderer,
};
pub use http_dispatch::HttpDeviceDispatcher;
pub use mqtt_dispatch::MqttDeviceDispatcher;
pub use webhook::{ReqwestWebhookSender, WebhookError, WebhookRequest, WebhookSender};
pub use workspace::{PlanCatalog, PlanLimitsLookup, StoreWorkspaceDirectory, WorkspaceDirectory};

/// Where a device accepts commands (URL or topic, depending on transport)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub workspace_id: String,
    pub device_id: String,
    pub address: String,
}

/// Command delivered to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    pub field: String,
    pub value: Value,
    pub context: Value,
}

impl DeviceCommand {
    pub fn set_field(field: &str, value: Value, context: Value) -> Self {
        Self {
            command: "set_field".to_string(),
            field: field.to_string(),
            value,
            context,
        }
    }
}

/// Error types for device dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchError {
    DeviceNotFound(String),
    ConnectionError(String),
    Rejected(u16),
    DeviceError(String),
    Timeout,
    Unavailable,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::DeviceNotFound(id) => write!(f, "Device not found: {}", id),
            DispatchError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            DispatchError::Rejected(status) => {
                write!(f, "Device command rejected with HTTP {}", status)
            }
            DispatchError::DeviceError(msg) => write!(f, "Device reported error: {}", msg),
            DispatchError::Timeout => write!(f, "Device command timeout"),
            DispatchError::Unavailable => write!(f, "Device dispatch unavailable"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Delivers commands to devices
#[async_trait]
pub trait DeviceDispatcher: Send + Sync {
    /// Transport identifier (e.g., "http", "mqtt")
    fn transport_name(&self) -> &'static str;

    /// Resolves the addressable endpoint of a device
    async fn resolve(
        &self,
        workspace_id: &str,
        device_id: &str,
    ) -> Result<DeviceEndpoint, DispatchError>;

    /// Delivers a command; `Ok` only when the device side accepted it
    async fn deliver(
        &self,
        endpoint: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> Result<(), DispatchError>;
}
