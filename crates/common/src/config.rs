use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default capacity of a push handler's input queue.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default deadline for one gateway request, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Configuration of the push gateway handler, in its JSON form:
/// `{"enabled": true, "address": "https://pushgw.example.com/push/"}`.
///
/// `enabled = false` or a missing address leaves the handler disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Gateway endpoint the batches are POSTed to.
    #[serde(default)]
    pub address: Option<String>,
    /// Input queue capacity (default: 1024).
    #[serde(default)]
    pub buffer_size: Option<usize>,
    /// Per-request deadline in milliseconds (default: 10000).
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl GatewayConfig {
    /// Parse the JSON configuration blob.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("failed to parse config: {}", e)))
    }

    /// The configured address, if any and non-blank.
    pub fn address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    /// Per-request deadline. Zero means unset.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(
            self.timeout_ms
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }
}

/// Configuration of the log-only push handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Push handlers to compose at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Redis connection string (device registry)
    pub redis_url: String,

    /// Socket address the intake server binds to
    pub listen_addr: String,

    /// How long shutdown waits for in-flight pushes, in milliseconds
    pub drain_timeout_ms: u64,

    pub push: PushConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// `PUSH_GATEWAY_CONFIG` holds the gateway settings as one JSON object and,
    /// when set, takes precedence over the individual `PUSH_*` gateway variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let gateway = match std::env::var("PUSH_GATEWAY_CONFIG") {
            Ok(raw) if !raw.trim().is_empty() => GatewayConfig::from_json(&raw)?,
            _ => gateway_from_vars()?,
        };

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            drain_timeout_ms: std::env::var("PUSH_DRAIN_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_DRAIN_TIMEOUT_MS must be a valid u64"))?,
            push: PushConfig {
                gateway,
                log: LogConfig {
                    enabled: parse_bool("PUSH_LOG_ENABLED")?,
                },
            },
        })
    }
}

/// Gateway settings from the individual `PUSH_*` variables.
fn gateway_from_vars() -> anyhow::Result<GatewayConfig> {
    Ok(GatewayConfig {
        enabled: parse_bool("PUSH_ENABLED")?,
        address: std::env::var("PUSH_GATEWAY_ADDRESS").ok(),
        buffer_size: std::env::var("PUSH_BUFFER_SIZE")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| anyhow::anyhow!("PUSH_BUFFER_SIZE must be a valid usize"))?,
        timeout_ms: std::env::var("PUSH_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| anyhow::anyhow!("PUSH_TIMEOUT_MS must be a valid u64"))?,
    })
}

fn parse_bool(key: &str) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(anyhow::anyhow!("{} must be a boolean", key)),
        },
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_from_json() {
        let config =
            GatewayConfig::from_json(r#"{"enabled": true, "address": "http://gw.local/push"}"#)
                .unwrap();
        assert!(config.enabled);
        assert_eq!(config.address(), Some("http://gw.local/push"));
        assert_eq!(config.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_gateway_config_missing_fields_disable() {
        let config = GatewayConfig::from_json("{}").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.address(), None);
    }

    #[test]
    fn test_blank_address_is_none() {
        let config = GatewayConfig::from_json(r#"{"enabled": true, "address": "  "}"#).unwrap();
        assert_eq!(config.address(), None);
    }

    #[test]
    fn test_zero_buffer_falls_back_to_default() {
        let config = GatewayConfig::from_json(r#"{"buffer_size": 0, "timeout_ms": 250}"#).unwrap();
        assert_eq!(config.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let config = GatewayConfig::from_json(r#"{"enabled": true, "timeout_ms": 0}"#).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(!config.timeout().is_zero());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = GatewayConfig::from_json("{enabled").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_push_config_sections() {
        let config: PushConfig = serde_json::from_str(
            r#"{"gateway": {"enabled": true, "address": "http://gw"}, "log": {"enabled": true}}"#,
        )
        .unwrap();
        assert!(config.gateway.enabled);
        assert!(config.log.enabled);
    }
}
