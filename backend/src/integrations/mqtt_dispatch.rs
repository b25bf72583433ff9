use super::mqtt::{MqttConfig, MqttConnection, MqttError};
use super::{DeviceCommand, DeviceDispatcher, DeviceEndpoint, DispatchError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Reply a device publishes on its ack topic
#[derive(Debug, Deserialize)]
struct CommandAck {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Publishes commands to `{prefix}/{workspace}/{device}/commands` and waits
/// for the device's reply on `{prefix}/{workspace}/{device}/ack`
pub struct MqttDeviceDispatcher {
    connection: MqttConnection,
    topic_prefix: String,
    ack_timeout: Duration,
}

impl MqttDeviceDispatcher {
    pub async fn connect(
        config: MqttConfig,
        topic_prefix: String,
        ack_timeout: Duration,
    ) -> Result<Self, MqttError> {
        let connection = MqttConnection::connect(config).await?;
        Ok(Self {
            connection,
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
            ack_timeout,
        })
    }
}

fn device_topic(prefix: &str, workspace_id: &str, device_id: &str, leaf: &str) -> String {
    format!("{}/{}/{}/{}", prefix, workspace_id, device_id, leaf)
}

/// Topic segments must not be empty or contain separators or wildcards
fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(['/', '+', '#'])
}

fn map_mqtt_error(err: MqttError) -> DispatchError {
    match err {
        MqttError::Timeout => DispatchError::Timeout,
        other => DispatchError::ConnectionError(other.to_string()),
    }
}

#[async_trait]
impl DeviceDispatcher for MqttDeviceDispatcher {
    fn transport_name(&self) -> &'static str {
        "mqtt"
    }

    async fn resolve(
        &self,
        workspace_id: &str,
        device_id: &str,
    ) -> Result<DeviceEndpoint, DispatchError> {
        if !valid_segment(workspace_id) || !valid_segment(device_id) {
            return Err(DispatchError::DeviceNotFound(format!("{}/{}", workspace_id, device_id)));
        }
        Ok(DeviceEndpoint {
            workspace_id: workspace_id.to_string(),
            device_id: device_id.to_string(),
            address: device_topic(&self.topic_prefix, workspace_id, device_id, "commands"),
        })
    }

    async fn deliver(
        &self,
        endpoint: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> Result<(), DispatchError> {
        let reply_topic = device_topic(
            &self.topic_prefix,
            &endpoint.workspace_id,
            &endpoint.device_id,
            "ack",
        );

        let ack: CommandAck = self
            .connection
            .request_json(&endpoint.address, command, &reply_topic, self.ack_timeout)
            .await
            .map_err(map_mqtt_error)?;

        if ack.ok {
            Ok(())
        } else {
            Err(DispatchError::DeviceError(
                ack.error.unwrap_or_else(|| "command refused".to_string()),
            ))
        }
    }
}
