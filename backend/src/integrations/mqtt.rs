//! MQTT request/response plumbing for device command dispatch
//!
//! A single long-lived connection publishes commands and routes replies
//! arriving on per-device ack topics back to the waiting caller.

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tokio_rustls::rustls::ClientConfig;

/// Configuration for MQTT connection
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: format!("automation-core-{}", uuid::Uuid::new_v4()),
            username: None,
            password: None,
            use_tls: false,
            keep_alive_secs: 30,
        }
    }
}

/// Error types for MQTT operations
#[derive(Debug, Clone)]
pub enum MqttError {
    ConnectionFailed(String),
    SubscribeFailed(String),
    PublishFailed(String),
    Timeout,
    Disconnected,
    InvalidResponse(String),
}

impl std::fmt::Display for MqttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MqttError::ConnectionFailed(msg) => write!(f, "MQTT connection failed: {}", msg),
            MqttError::SubscribeFailed(msg) => write!(f, "MQTT subscribe failed: {}", msg),
            MqttError::PublishFailed(msg) => write!(f, "MQTT publish failed: {}", msg),
            MqttError::Timeout => write!(f, "MQTT operation timed out"),
            MqttError::Disconnected => write!(f, "MQTT client disconnected"),
            MqttError::InvalidResponse(msg) => write!(f, "Invalid MQTT response: {}", msg),
        }
    }
}

impl std::error::Error for MqttError {}

/// A message received from MQTT
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Try to parse the payload as JSON
    pub fn parse_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Callers waiting for a reply, keyed by the exact reply topic
type PendingReplies = Arc<Mutex<HashMap<String, Vec<oneshot::Sender<MqttMessage>>>>>;

/// A managed MQTT connection with request-response support
pub struct MqttConnection {
    client: AsyncClient,
    pending: PendingReplies,
    _event_handle: tokio::task::JoinHandle<()>,
}

impl MqttConnection {
    /// Connect and wait for the broker's ConnAck
    pub async fn connect(config: MqttConfig) -> Result<Self, MqttError> {
        let mut mqtt_options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);

        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        if config.use_tls {
            let mut root_cert_store = tokio_rustls::rustls::RootCertStore::empty();

            let cert_result = rustls_native_certs::load_native_certs();
            for err in &cert_result.errors {
                warn!("Error loading native cert: {}", err);
            }

            let (added, _ignored) = root_cert_store.add_parsable_certificates(cert_result.certs);
            debug!("Loaded {} native root certificates for TLS", added);

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            mqtt_options.set_transport(Transport::tls_with_config(client_config.into()));
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (connected_tx, connected_rx) = oneshot::channel();

        let pending_clone = pending.clone();
        let event_handle = tokio::spawn(async move {
            Self::run_event_loop(eventloop, pending_clone, connected_tx).await;
        });

        match timeout(Duration::from_secs(10), connected_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(MqttError::Disconnected),
            Err(_) => {
                event_handle.abort();
                return Err(MqttError::ConnectionFailed(format!(
                    "no ConnAck from {}:{}",
                    config.broker_host, config.broker_port
                )));
            }
        }

        info!("MQTT connected to {}:{}", config.broker_host, config.broker_port);

        Ok(Self {
            client,
            pending,
            _event_handle: event_handle,
        })
    }

    /// Poll the event loop forever. rumqttc reconnects on the next poll
    /// after an error, so errors only fail the requests in flight.
    async fn run_event_loop(
        mut eventloop: EventLoop,
        pending: PendingReplies,
        connected_tx: oneshot::Sender<()>,
    ) {
        let mut connected_tx = Some(connected_tx);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = publish.topic.clone();
                    debug!("MQTT received on {}: {} bytes", topic, publish.payload.len());

                    let waiter = {
                        let mut pending = pending.lock().await;
                        let waiter = pending.get_mut(&topic).and_then(|queue| {
                            if queue.is_empty() { None } else { Some(queue.remove(0)) }
                        });
                        if pending.get(&topic).is_some_and(|q| q.is_empty()) {
                            pending.remove(&topic);
                        }
                        waiter
                    };

                    if let Some(tx) = waiter {
                        let _ = tx.send(MqttMessage {
                            topic,
                            payload: publish.payload.to_vec(),
                        });
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connection acknowledged");
                    if let Some(tx) = connected_tx.take() {
                        let _ = tx.send(());
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    debug!("MQTT subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {}", e);
                    // Waiters see their sender dropped and report Disconnected
                    pending.lock().await.clear();
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Subscribe to a topic
    pub async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscribeFailed(e.to_string()))
    }

    /// Publish a message
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(e.to_string()))
    }

    /// Publish a JSON request and wait for the JSON reply on `reply_topic`
    pub async fn request_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        publish_topic: &str,
        payload: &Req,
        reply_topic: &str,
        wait: Duration,
    ) -> Result<Resp, MqttError> {
        let json =
            serde_json::to_vec(payload).map_err(|e| MqttError::PublishFailed(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .entry(reply_topic.to_string())
            .or_default()
            .push(tx);

        self.subscribe(reply_topic).await?;
        self.publish(publish_topic, &json).await?;

        let response = match timeout(wait, rx).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) => return Err(MqttError::Disconnected),
            Err(_) => {
                // Drop our closed sender so a late reply is not routed to it
                let mut pending = self.pending.lock().await;
                if let Some(queue) = pending.get_mut(reply_topic) {
                    queue.retain(|tx| !tx.is_closed());
                    if queue.is_empty() {
                        pending.remove(reply_topic);
                    }
                }
                return Err(MqttError::Timeout);
            }
        };

        response
            .parse_json()
            .map_err(|e| MqttError::InvalidResponse(e.to_string()))
    }
}
