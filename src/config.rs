//! Configuration for the SSDTP2 transport and the RMAP transaction engine.
//!
//! There are no environment variables in this crate's configuration
//! surface; callers either build an [`EngineConfig`] directly or load one
//! from a TOML file.

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "/etc/rmap-engine/config.toml";

/// Default TCP port used by SpaceWire-to-Ethernet bridge boxes.
pub const DEFAULT_PORT: u16 = 10030;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// TCP keepalive tuning, applied on `Interface::open` when `enabled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    /// Seconds of idleness before the first probe.
    pub idle_secs: u32,
    /// Seconds between probes.
    pub interval_secs: u32,
    /// Number of unacknowledged probes before the connection is considered dead.
    pub count: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_secs: 120,
            interval_secs: 2,
            count: 4,
        }
    }
}

/// Engine- and transport-level tunables.
///
/// Mirrors the parameter list of the source protocol's `Interface(...)` and
/// `Engine(...)` constructors: every field here has a default matching the
/// source's default keyword argument.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-transaction reply timeout, in seconds, before a socket retries.
    pub timeout_secs: f64,
    /// Whether `send`/`receive` auto-reconnect on broken pipe / connection reset.
    pub reconnect: bool,
    /// TCP keepalive tuning.
    pub keepalive: KeepaliveConfig,
    /// Grace period, in seconds, a timed-out TID spends quarantined before
    /// it is safe to hand out again.
    pub quarantine_grace_secs: u64,
    /// SpaceWire transmit clock divider applied at `Interface::open`, if
    /// set. The transmit clock is `125 MHz / (divider + 1)`.
    pub tx_divider: Option<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1.0,
            reconnect: true,
            keepalive: KeepaliveConfig::default(),
            quarantine_grace_secs: 10,
            tx_divider: None,
        }
    }
}

/// Loads an [`EngineConfig`] from a TOML file, falling back to defaults for
/// any field the file omits.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration from the default path
    /// (`/etc/rmap-engine/config.toml`).
    pub fn load_default() -> Result<EngineConfig, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads the configuration from the specified path.
    pub fn load_from_path(path: &str) -> Result<EngineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
