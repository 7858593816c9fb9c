//! Configuration management
//!
//! Two kinds of configuration exist:
//!
//! - [`Settings`]: static controller settings from a TOML file.
//! - [`ConfluxConfig`]: registration and runtime values persisted as JSON by
//!   the CLI and read back by the service, managed through [`ConfigStore`].

mod settings;
mod store;
pub mod validation;

pub use settings::{
    AnchorSettings, ControlSettings, LoggingSettings, Settings, StoreSettings, TunSettings,
};
pub use store::{default_config_dir, ConfigStore, CONFIG_FILE_NAME};

use crate::anchor::{AnchorConfig, TaintSet};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Default Guardian (authentication server) URL
pub const DEFAULT_GUARDIAN_URL: &str = "https://guardian.veilnet.app";

/// Default tunnel coordinator host
pub const DEFAULT_VEIL_HOST: &str = "veil.veilnet.app";

/// Default tunnel coordinator port
pub const DEFAULT_VEIL_PORT: u16 = 443;

/// Persisted registration and runtime config
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfluxConfig {
    /// Identifier issued by the Guardian
    #[serde(default)]
    pub conflux_id: String,

    /// Anchor token issued by the Guardian
    #[serde(default, alias = "conflux_token")]
    pub token: String,

    /// Guardian URL
    #[serde(default = "default_guardian")]
    pub guardian: String,

    /// Tunnel coordinator host
    #[serde(default = "default_veil")]
    pub veil: String,

    /// Tunnel coordinator port
    #[serde(default = "default_veil_port")]
    pub veil_port: u16,

    /// Rift mode; the anchor runs in portal mode when this is off
    #[serde(default)]
    pub rift: bool,

    /// Requested overlay address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Free-form tag given at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Taints applied at startup
    #[serde(default)]
    pub taints: TaintSet,
}

impl Default for ConfluxConfig {
    fn default() -> Self {
        Self {
            conflux_id: String::new(),
            token: String::new(),
            guardian: default_guardian(),
            veil: default_veil(),
            veil_port: default_veil_port(),
            rift: false,
            ip: None,
            tag: None,
            taints: TaintSet::new(),
        }
    }
}

impl ConfluxConfig {
    /// Whether the anchor should run in portal mode
    pub fn portal(&self) -> bool {
        !self.rift
    }

    /// Build the `StartAnchor` parameters, validating them on the way
    pub fn to_anchor_config(&self) -> Result<AnchorConfig> {
        let config = AnchorConfig {
            guardian_url: self.guardian.clone(),
            tunnel_url: self.veil.clone(),
            tunnel_port: self.veil_port,
            auth_token: self.token.clone(),
            portal: self.portal(),
            ip: self.ip.clone().filter(|ip| !ip.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate everything that will be sent anywhere
    pub fn validate(&self) -> Result<()> {
        validation::validate_secret("conflux id", &self.conflux_id)?;
        self.to_anchor_config()?;
        for taint in self.taints.iter() {
            validation::validate_taint(taint)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConfluxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfluxConfig")
            .field("conflux_id", &self.conflux_id)
            .field("token", &"<redacted>")
            .field("guardian", &self.guardian)
            .field("veil", &self.veil)
            .field("veil_port", &self.veil_port)
            .field("rift", &self.rift)
            .field("ip", &self.ip)
            .field("tag", &self.tag)
            .field("taints", &self.taints)
            .finish()
    }
}

fn default_guardian() -> String {
    DEFAULT_GUARDIAN_URL.to_string()
}

fn default_veil() -> String {
    DEFAULT_VEIL_HOST.to_string()
}

fn default_veil_port() -> u16 {
    DEFAULT_VEIL_PORT
}
