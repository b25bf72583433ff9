//! Runtime configuration read from the environment (and `.env`)

use crate::integrations::email::SmtpConfig;
use crate::integrations::mqtt::MqttConfig;
use crate::integrations::PlanCatalog;
use std::env;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "devices";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid {
        key: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} must be set", key),
            ConfigError::Invalid { key, reason } => write!(f, "Invalid {}: {}", key, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// How `update_device` commands reach devices
#[derive(Debug, Clone)]
pub enum DispatchMode {
    None,
    Http { base_url: String },
    Mqtt {
        config: MqttConfig,
        topic_prefix: String,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub http_timeout: Duration,
    pub dispatch: DispatchMode,
    pub smtp: Option<SmtpConfig>,
    pub plans: PlanCatalog,
}

impl EngineConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let http_timeout = Duration::from_secs(parse_or(
            "HTTP_TIMEOUT_SECS",
            get("HTTP_TIMEOUT_SECS"),
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);

        let dispatch = match get("DEVICE_DISPATCH").as_deref().unwrap_or("none") {
            "none" => DispatchMode::None,
            "http" => DispatchMode::Http {
                base_url: get("DEVICE_DISPATCH_URL")
                    .ok_or(ConfigError::Missing("DEVICE_DISPATCH_URL"))?,
            },
            "mqtt" => {
                let defaults = MqttConfig::default();
                let config = MqttConfig {
                    broker_host: get("MQTT_HOST").ok_or(ConfigError::Missing("MQTT_HOST"))?,
                    broker_port: parse_or("MQTT_PORT", get("MQTT_PORT"), defaults.broker_port)?,
                    username: get("MQTT_USERNAME"),
                    password: get("MQTT_PASSWORD"),
                    use_tls: parse_bool("MQTT_TLS", get("MQTT_TLS"))?,
                    ..defaults
                };
                DispatchMode::Mqtt {
                    config,
                    topic_prefix: get("MQTT_TOPIC_PREFIX")
                        .unwrap_or_else(|| DEFAULT_MQTT_TOPIC_PREFIX.to_string()),
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: "DEVICE_DISPATCH",
                    reason: format!("expected http, mqtt or none, got '{}'", other),
                })
            }
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", get("SMTP_PORT"), 587)?,
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
                from: get("SMTP_FROM").ok_or(ConfigError::Missing("SMTP_FROM"))?,
            }),
            None => None,
        };

        let plans = PlanCatalog::parse(
            get("PLAN_RETENTION_DAYS")
                .as_deref()
                .unwrap_or(PlanCatalog::DEFAULT_RETENTION),
        )
        .map_err(|reason| ConfigError::Invalid {
            key: "PLAN_RETENTION_DAYS",
            reason,
        })?;

        Ok(Self {
            database_url: get("DATABASE_URL"),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            http_timeout,
            dispatch,
            smtp,
            plans,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("'{}' is not a valid number", raw),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            reason: format!("'{}' is not a boolean", other),
        }),
    }
}
