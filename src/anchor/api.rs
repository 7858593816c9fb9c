//! Anchor control contract: request and response types
//!
//! Every call travels as one JSON object per line:
//! `{"id":1,"call":{"method":"create_tun","params":{"ifname":"veilnet","mtu":1500}}}`
//! and is answered by `{"id":1,"success":true}` or
//! `{"id":1,"success":false,"error":{"type":"device_exists","message":"..."}}`.

use crate::config::validation;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Capability name looked up during the handshake binding
pub const ANCHOR_CAPABILITY: &str = "anchor";

/// Parameters for `StartAnchor`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Guardian (authentication server) URL
    pub guardian_url: String,
    /// Tunnel coordinator host
    pub tunnel_url: String,
    /// Tunnel coordinator port
    pub tunnel_port: u16,
    /// Anchor token issued at registration
    pub auth_token: String,
    /// Portal topology mode, passed through untouched
    pub portal: bool,
    /// Requested overlay address, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl AnchorConfig {
    /// Check that every field is populated before the config is sent
    pub fn validate(&self) -> Result<()> {
        validation::validate_url(&self.guardian_url)?;
        validation::validate_host(&self.tunnel_url)?;
        validation::validate_port(self.tunnel_port)?;
        validation::validate_secret("auth token", &self.auth_token)?;
        if let Some(ip) = &self.ip {
            validation::validate_ip_address(ip)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AnchorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorConfig")
            .field("guardian_url", &self.guardian_url)
            .field("tunnel_url", &self.tunnel_url)
            .field("tunnel_port", &self.tunnel_port)
            .field("auth_token", &"<redacted>")
            .field("portal", &self.portal)
            .field("ip", &self.ip)
            .finish()
    }
}

/// Parameters for `CreateTUN`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunSpec {
    /// OS interface name
    #[serde(rename = "ifname")]
    pub interface_name: String,
    /// Maximum Transmission Unit
    pub mtu: u32,
}

impl TunSpec {
    /// Create a new TUN spec
    pub fn new(interface_name: impl Into<String>, mtu: u32) -> Self {
        Self {
            interface_name: interface_name.into(),
            mtu,
        }
    }

    /// Validate interface name and MTU
    pub fn validate(&self) -> Result<()> {
        validation::validate_interface_name(&self.interface_name)?;
        validation::validate_mtu(self.mtu)?;
        Ok(())
    }
}

/// One call of the anchor capability set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum AnchorCall {
    /// Look up a capability by name (handshake binding only)
    Dispense {
        /// Capability name
        capability: String,
    },
    /// Allocate anchor runtime state
    CreateAnchor,
    /// Release anchor runtime state
    DestroyAnchor,
    /// Open the control-plane connection to the tunnel coordinator
    StartAnchor(AnchorConfig),
    /// Close the control-plane connection
    StopAnchor,
    /// Allocate a virtual network interface
    CreateTun(TunSpec),
    /// Release the virtual network interface
    DestroyTun,
    /// Bind the data plane to the created interface
    LinkWithTun,
    /// Bind the data plane to a descriptor opened by a privileged helper
    LinkWithFileDescriptor {
        /// Raw descriptor number, valid in the anchor's process
        fd: i32,
    },
    /// Attach a taint label
    AddTaint {
        /// Taint label
        taint: String,
    },
    /// Detach a taint label
    RemoveTaint {
        /// Taint label
        taint: String,
    },
    /// Fetch the anchor's stable identifier
    GetId,
}

impl AnchorCall {
    /// Wire name of the call
    pub fn method(&self) -> &'static str {
        match self {
            Self::Dispense { .. } => "dispense",
            Self::CreateAnchor => "create_anchor",
            Self::DestroyAnchor => "destroy_anchor",
            Self::StartAnchor(_) => "start_anchor",
            Self::StopAnchor => "stop_anchor",
            Self::CreateTun(_) => "create_tun",
            Self::DestroyTun => "destroy_tun",
            Self::LinkWithTun => "link_with_tun",
            Self::LinkWithFileDescriptor { .. } => "link_with_file_descriptor",
            Self::AddTaint { .. } => "add_taint",
            Self::RemoveTaint { .. } => "remove_taint",
            Self::GetId => "get_id",
        }
    }
}

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorRequest {
    /// Request ID, echoed in the response
    pub id: u64,
    /// The call to perform
    pub call: AnchorCall,
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorResponse {
    /// Request ID this response corresponds to
    pub id: u64,

    /// Whether the call succeeded
    pub success: bool,

    /// Optional result data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Typed failure, present when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AnchorFault>,
}

impl AnchorResponse {
    /// Create a successful response
    pub fn success(id: u64, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Create a failure response
    pub fn failure(id: u64, fault: AnchorFault) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(fault),
        }
    }
}

/// Typed failures reported by the anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum AnchorFault {
    /// Resource already exists (anchor created twice, already started)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Anchor runtime state has not been created
    #[error("anchor not created: {0}")]
    NotCreated(String),

    /// Anchor has not been started
    #[error("anchor not started: {0}")]
    NotStarted(String),

    /// Data plane cannot be linked yet
    #[error("not ready: {0}")]
    NotReady(String),

    /// Control-plane connection could not be established
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Tunnel coordinator rejected the token
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// A TUN device already exists
    #[error("device exists: {0}")]
    DeviceExists(String),

    /// The anchor lacks the privilege for the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Descriptor is not usable
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Capability lookup failed
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> AnchorConfig {
        AnchorConfig {
            guardian_url: "https://guardian.veilnet.app".to_string(),
            tunnel_url: "veil.veilnet.app".to_string(),
            tunnel_port: 443,
            auth_token: "s3cret-token".to_string(),
            portal: true,
            ip: None,
        }
    }

    #[test]
    fn test_call_wire_format() {
        let request = AnchorRequest {
            id: 7,
            call: AnchorCall::CreateTun(TunSpec::new("veilnet", 1500)),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"id":7,"call":{"method":"create_tun","params":{"ifname":"veilnet","mtu":1500}}}"#
        );
    }

    #[test]
    fn test_unit_call_parses_without_params() {
        let request: AnchorRequest =
            serde_json::from_str(r#"{"id":1,"call":{"method":"stop_anchor"}}"#).unwrap();
        assert_eq!(request.call, AnchorCall::StopAnchor);
        assert_eq!(request.call.method(), "stop_anchor");
    }

    #[test]
    fn test_fault_wire_format() {
        let response = AnchorResponse::failure(3, AnchorFault::NotReady("no tun".to_string()));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""error":{"type":"not_ready","message":"no tun"}"#));
        assert!(!json.contains("data"));
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let rendered = format!("{:?}", sample_config());
        assert!(!rendered.contains("s3cret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_partial_config_rejected() {
        let mut config = sample_config();
        assert!(config.validate().is_ok());

        config.auth_token.clear();
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.tunnel_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tun_spec_validation() {
        assert!(TunSpec::new("veilnet", 1500).validate().is_ok());
        assert!(TunSpec::new("veilnet", 0).validate().is_err());
        assert!(TunSpec::new("", 1500).validate().is_err());
        assert!(TunSpec::new("a-very-long-interface", 1500).validate().is_err());
    }
}
