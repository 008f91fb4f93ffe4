//! Router configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Durations are expressed in milliseconds.
//!
//! ```toml
//! node_name = "edge-1"
//!
//! [broker]
//! address = "amqp://broker:5672"
//!
//! [broker.reconnect]
//! max_attempts = 10
//!
//! [heartbeat]
//! ping_interval_ms = 6000
//! pong_delay_ms = 20000
//! unhealthy_threshold = 2
//!
//! [invocation]
//! timeout_ms = 5000
//! precheck_existence = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DIAGNOSTICS_INTERVAL, DEFAULT_INVOCATION_TIMEOUT, DEFAULT_PING_INTERVAL,
    DEFAULT_PONG_DELAY, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_CAP,
    DEFAULT_RECONNECT_STEP, DEFAULT_UNHEALTHY_THRESHOLD,
};
use crate::error::ConfigError;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Complete configuration of one router node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Name used in log lines.
    pub node_name: String,

    /// Where the connection transport listens.
    pub transport: TransportOptions,

    /// How to reach the message broker.
    pub broker: BrokerOptions,

    /// How to reach the existence store.
    pub store: StoreOptions,

    /// Heartbeat tuning.
    pub heartbeat: HeartbeatConfig,

    /// Remote invocation tuning.
    pub invocation: InvocationConfig,

    /// Period of the registry size log line; 0 disables it.
    pub diagnostics_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            node_name: "tidepool".to_string(),
            transport: TransportOptions::default(),
            broker: BrokerOptions::default(),
            store: StoreOptions::default(),
            heartbeat: HeartbeatConfig::default(),
            invocation: InvocationConfig::default(),
            diagnostics_interval_ms: millis(DEFAULT_DIAGNOSTICS_INTERVAL),
        }
    }
}

impl RouterConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&document)
    }

    /// Reject values the router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.ping_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.ping_interval_ms must be positive".into(),
            ));
        }
        if self.heartbeat.pong_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.pong_delay_ms must be positive".into(),
            ));
        }
        if self.invocation.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "invocation.timeout_ms must be positive".into(),
            ));
        }
        if self.broker.reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "broker.reconnect.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Replace the heartbeat tuning.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Replace the invocation timeout.
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation.timeout_ms = millis(timeout);
        self
    }

    /// Enable or disable the existence pre-check on `send`/`close`.
    pub fn with_existence_precheck(mut self, enabled: bool) -> Self {
        self.invocation.precheck_existence = enabled;
        self
    }

    /// Replace the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.broker.reconnect = reconnect;
        self
    }

    /// Replace the node name.
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Period of the registry size log line, `None` when disabled.
    pub fn diagnostics_interval(&self) -> Option<Duration> {
        (self.diagnostics_interval_ms > 0)
            .then(|| Duration::from_millis(self.diagnostics_interval_ms))
    }
}

/// Listening address of the connection transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Interface to bind.
    pub listen_address: String,
    /// Port to bind.
    pub port: u16,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Message broker endpoint and reconnect behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    /// Broker URL.
    pub address: String,
    /// Login, if the broker requires one.
    pub username: Option<String>,
    /// Password, if the broker requires one.
    pub password: Option<String>,
    /// Reconnect schedule.
    pub reconnect: ReconnectPolicy,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            address: "amqp://localhost:5672".to_string(),
            username: None,
            password: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Linear reconnect backoff with a cap.
///
/// Attempt `n` (1-based) waits `min(n * step, cap)` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before the link is declared down.
    pub max_attempts: u32,
    /// Delay increment per attempt.
    pub step_ms: u64,
    /// Maximum delay.
    pub cap_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            step_ms: millis(DEFAULT_RECONNECT_STEP),
            cap_ms: millis(DEFAULT_RECONNECT_CAP),
        }
    }
}

impl ReconnectPolicy {
    /// Policy with explicit values.
    pub fn new(max_attempts: u32, step: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            step_ms: millis(step),
            cap_ms: millis(cap),
        }
    }

    /// Delay after the `attempt`-th failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.step_ms.saturating_mul(u64::from(attempt)).min(self.cap_ms);
        Duration::from_millis(delay)
    }
}

/// Existence store endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Store URL.
    pub address: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            address: "redis://localhost:6379".to_string(),
        }
    }
}

/// Heartbeat sweep tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between ping sweeps.
    pub ping_interval_ms: u64,
    /// Time between a sweep and its eviction check.
    pub pong_delay_ms: u64,
    /// Unanswered pings tolerated; one more gets the connection evicted.
    pub unhealthy_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: millis(DEFAULT_PING_INTERVAL),
            pong_delay_ms: millis(DEFAULT_PONG_DELAY),
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
        }
    }
}

impl HeartbeatConfig {
    /// Heartbeat with explicit values.
    pub fn new(ping_interval: Duration, pong_delay: Duration, unhealthy_threshold: u32) -> Self {
        Self {
            ping_interval_ms: millis(ping_interval),
            pong_delay_ms: millis(pong_delay),
            unhealthy_threshold,
        }
    }

    /// Time between ping sweeps.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Time between a sweep and its eviction check.
    pub fn pong_delay(&self) -> Duration {
        Duration::from_millis(self.pong_delay_ms)
    }
}

/// Remote invocation tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// How long a caller waits for the owning node's reply.
    pub timeout_ms: u64,
    /// Consult the existence index before invoking and fail fast with
    /// [`RouterError::Absent`](crate::RouterError::Absent) when it
    /// positively reports absence.
    pub precheck_existence: bool,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: millis(DEFAULT_INVOCATION_TIMEOUT),
            precheck_existence: false,
        }
    }
}

impl InvocationConfig {
    /// How long a caller waits for the owning node's reply.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
