//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables. Every variable has a
//! default; values that are present but unparseable are rejected rather than
//! silently replaced.

use crate::actors::ConnectionSettings;
use common::config::{LogFormat, ObservabilityConfig};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health and metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default per-connection outbound queue bound.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default maximum inbound text frame size in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Default server ping interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

/// Default drain wait on shutdown in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "duet_signaling=debug,tower_http=info";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "duet";

/// Signaling service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket listener (default: "0.0.0.0:3000").
    pub signaling_bind_address: SocketAddr,

    /// Health and metrics listener (default: "0.0.0.0:8081").
    pub health_bind_address: SocketAddr,

    /// Identifier of this instance in logs.
    pub instance_id: String,

    /// Outbound mailbox bound per connection (default: 64).
    pub mailbox_capacity: usize,

    /// Largest inbound text frame in bytes (default: 65536).
    pub max_frame_bytes: usize,

    /// Server ping interval in seconds (default: 30).
    pub heartbeat_interval_seconds: u64,

    /// Time allowed for connections to drain on shutdown (default: 5).
    pub shutdown_grace_seconds: u64,

    /// Log filter and output format.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for any malformed variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for any malformed variable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_bind_address = parse_or(
            vars,
            "DUET_SIGNALING_BIND_ADDRESS",
            DEFAULT_SIGNALING_BIND_ADDRESS,
        )?;
        let health_bind_address =
            parse_or(vars, "DUET_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS)?;

        let mailbox_capacity =
            parse_positive(vars, "DUET_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        let max_frame_bytes =
            parse_positive(vars, "DUET_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?;
        let heartbeat_interval_seconds = parse_positive(
            vars,
            "DUET_HEARTBEAT_INTERVAL_SECONDS",
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
        )?;

        // Zero grace is allowed: shut down without waiting.
        let shutdown_grace_seconds = match vars.get("DUET_SHUTDOWN_GRACE_SECONDS") {
            Some(raw) => parse_value("DUET_SHUTDOWN_GRACE_SECONDS", raw)?,
            None => DEFAULT_SHUTDOWN_GRACE_SECONDS,
        };

        let log_format = match vars.get("DUET_LOG_FORMAT") {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|reason| ConfigError::InvalidValue {
                    name: "DUET_LOG_FORMAT".to_string(),
                    reason,
                })?,
            None => LogFormat::default(),
        };

        let instance_id = vars.get("DUET_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            signaling_bind_address,
            health_bind_address,
            instance_id,
            mailbox_capacity,
            max_frame_bytes,
            heartbeat_interval_seconds,
            shutdown_grace_seconds,
            observability: ObservabilityConfig {
                default_filter: DEFAULT_LOG_FILTER.to_string(),
                log_format,
            },
        })
    }

    /// Transport settings handed to every connection actor.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_seconds),
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("{raw:?}: {e}"),
        })
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(name, vars.get(name).map_or(default, String::as_str))
}

fn parse_positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };
    let value: T = parse_value(name, raw)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
