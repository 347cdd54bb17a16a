//! Agent launch configuration and the per-instance key/value store.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::Transport;

/// Instance-configuration key selecting the handshake transport.
///
/// The value `"network"` selects [`Transport::Network`]; any other value
/// (or an absent key) selects [`Transport::InProcess`].
pub const LINK_TRANSPORT_KEY: &str = "link_transport";

fn default_timeout_seconds() -> i64 {
    120
}

/// Static launch configuration for one agent, supplied by the caller.
///
/// Read-only to the supervisor; owned by the instance configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Executable path template. May contain the `{APP_DIR}` placeholder
    /// and may be relative to the application base directory. An empty
    /// value disables the agent.
    #[serde(default)]
    pub executable: String,
    /// Argument templates, resolved the same way as `executable`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Optional stable identifier. When absent an 8-character random
    /// alphanumeric identifier is generated per startup.
    #[serde(default)]
    pub identifier: Option<String>,
    /// Handshake timeout in seconds. Negative values mean unbounded.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: String::new(),
            args: Vec::new(),
            identifier: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl AgentConfig {
    /// Whether this config names an executable at all.
    #[must_use]
    pub fn has_executable(&self) -> bool {
        !self.executable.trim().is_empty()
    }

    /// Handshake timeout as a duration; `None` for unbounded.
    #[must_use]
    pub fn link_timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout_seconds)
            .ok()
            .map(Duration::from_secs)
    }
}

/// Read-only per-instance key/value settings.
///
/// Mirrors the shell's instance configuration store; the supervisor only
/// consumes the transport-selection flag.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct InstanceConfig(HashMap<String, String>);

impl InstanceConfig {
    /// Wrap an existing key/value map.
    #[must_use]
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    /// Look up a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Handshake transport selected by [`LINK_TRANSPORT_KEY`].
    #[must_use]
    pub fn link_transport(&self) -> Transport {
        match self.get(LINK_TRANSPORT_KEY) {
            Some("network") => Transport::Network,
            _ => Transport::InProcess,
        }
    }
}
