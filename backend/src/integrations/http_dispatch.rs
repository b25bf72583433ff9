use super::{DeviceCommand, DeviceDispatcher, DeviceEndpoint, DispatchError};
use async_trait::async_trait;
use std::time::Duration;

/// Delivers device commands as JSON POSTs to a device gateway
pub struct HttpDeviceDispatcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDeviceDispatcher {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn command_url(&self, workspace_id: &str, device_id: &str) -> String {
        format!(
            "{}/workspaces/{}/devices/{}/commands",
            self.base_url,
            urlencoding::encode(workspace_id),
            urlencoding::encode(device_id)
        )
    }
}

#[async_trait]
impl DeviceDispatcher for HttpDeviceDispatcher {
    fn transport_name(&self) -> &'static str {
        "http"
    }

    async fn resolve(
        &self,
        workspace_id: &str,
        device_id: &str,
    ) -> Result<DeviceEndpoint, DispatchError> {
        if device_id.is_empty() {
            return Err(DispatchError::DeviceNotFound(device_id.to_string()));
        }
        Ok(DeviceEndpoint {
            workspace_id: workspace_id.to_string(),
            device_id: device_id.to_string(),
            address: self.command_url(workspace_id, device_id),
        })
    }

    async fn deliver(
        &self,
        endpoint: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&endpoint.address)
            .json(command)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout
                } else {
                    DispatchError::ConnectionError(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            log::debug!("Delivered {} to device {}", command.command, endpoint.device_id);
            Ok(())
        } else {
            Err(DispatchError::Rejected(status.as_u16()))
        }
    }
}
