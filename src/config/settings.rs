//! Static controller settings (TOML)
//!
//! Every field has a default, so an absent settings file is equivalent to an
//! empty one.

use crate::error::{ConfluxError, Result};
use crate::transport::{Binding, DEFAULT_LOOPBACK_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::validation;

/// Top-level settings file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Anchor subprocess settings
    pub anchor: AnchorSettings,

    /// TUN device settings
    pub tun: TunSettings,

    /// Local control socket settings
    pub control: ControlSettings,

    /// Persisted config location
    pub store: StoreSettings,

    /// Logging settings
    pub logging: LoggingSettings,
}

/// `[anchor]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorSettings {
    /// How the controller reaches the anchor
    pub binding: Binding,

    /// Anchor executable to launch; the embedded payload is used when unset
    pub payload_path: Option<PathBuf>,

    /// Directory the payload is written to before launch
    pub scratch_dir: PathBuf,

    /// Port used by the loopback binding
    pub loopback_port: u16,

    /// Wait before the first connection attempt (loopback binding)
    pub readiness_delay_ms: u64,

    /// Connection attempts before giving up (loopback binding)
    pub connect_attempts: u32,

    /// How long to wait for the handshake line
    pub handshake_timeout_secs: u64,

    /// Bound for each graceful shutdown step and for reaping the process
    pub shutdown_timeout_secs: u64,
}

impl Default for AnchorSettings {
    fn default() -> Self {
        Self {
            binding: Binding::default(),
            payload_path: None,
            scratch_dir: std::env::temp_dir(),
            loopback_port: DEFAULT_LOOPBACK_PORT,
            readiness_delay_ms: 1000,
            connect_attempts: 5,
            handshake_timeout_secs: 10,
            shutdown_timeout_secs: 5,
        }
    }
}

impl AnchorSettings {
    /// Fixed readiness delay as a `Duration`
    pub fn readiness_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_delay_ms)
    }

    /// Handshake timeout as a `Duration`
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Shutdown step bound as a `Duration`
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// `[tun]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunSettings {
    /// Interface name
    pub interface: String,

    /// Maximum Transmission Unit
    pub mtu: u32,
}

impl Default for TunSettings {
    fn default() -> Self {
        Self {
            interface: "veilnet".to_string(),
            mtu: 1500,
        }
    }
}

/// `[control]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Whether the control socket is served while running
    pub enabled: bool,

    /// Socket path
    pub socket_path: PathBuf,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: PathBuf::from("/var/run/conflux.sock"),
        }
    }
}

/// `[store]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Directory of `conflux.json`; the OS default when unset
    pub config_dir: Option<PathBuf>,
}

/// `[logging]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log at debug level
    pub debug: bool,

    /// Optional plain-text log file
    pub file: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults if it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Settings file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            ConfluxError::Config(format!("Failed to read settings file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse settings from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(toml)
            .map_err(|e| ConfluxError::Config(format!("Failed to parse TOML: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        validation::validate_interface_name(&self.tun.interface)?;
        validation::validate_mtu(self.tun.mtu)?;
        validation::validate_port(self.anchor.loopback_port)?;

        if self.anchor.connect_attempts == 0 {
            return Err(ConfluxError::Config(
                "anchor.connect_attempts must be at least 1".to_string(),
            ));
        }

        if self.anchor.handshake_timeout_secs == 0 {
            return Err(ConfluxError::Config(
                "anchor.handshake_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
