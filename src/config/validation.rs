//! Configuration validation functions
//!
//! This module validates the values that end up on the wire to the anchor or
//! in the persisted config: interface names, MTUs, URLs, ports, tokens, taints.

use crate::error::{ConfluxError, Result};
use std::net::IpAddr;

/// Smallest MTU accepted for the TUN device (IPv6 minimum link MTU)
pub const MIN_MTU: u32 = 1280;

/// Largest MTU accepted for the TUN device
pub const MAX_MTU: u32 = 9000;

/// Longest taint label accepted
pub const MAX_TAINT_LEN: usize = 256;

/// Validate interface name (alphanumeric, '_' or '-', max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConfluxError::Validation(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > 15 {
        return Err(ConfluxError::Validation(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ConfluxError::Validation(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate MTU value
pub fn validate_mtu(mtu: u32) -> Result<()> {
    if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
        return Err(ConfluxError::Validation(format!(
            "MTU value {} is out of valid range ({}-{})",
            mtu, MIN_MTU, MAX_MTU
        )));
    }
    Ok(())
}

/// Validate IP address
pub fn validate_ip_address(ip: &str) -> Result<()> {
    ip.parse::<IpAddr>()
        .map_err(|_| ConfluxError::Validation(format!("Invalid IP address: {}", ip)))?;
    Ok(())
}

/// Validate an http(s) URL with a non-empty host
pub fn validate_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            ConfluxError::Validation(format!("URL '{}' must start with http:// or https://", url))
        })?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    validate_host(host)
        .map_err(|_| ConfluxError::Validation(format!("URL '{}' has no valid host", url)))
}

/// Validate a host name or host:port
pub fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(ConfluxError::Validation("Host cannot be empty".to_string()));
    }

    if host.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
        return Err(ConfluxError::Validation(format!(
            "Host '{}' contains invalid characters",
            host
        )));
    }

    Ok(())
}

/// Validate port number
pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(ConfluxError::Validation(
            "Port number cannot be 0".to_string(),
        ));
    }
    Ok(())
}

/// Validate that a secret is present without echoing it
pub fn validate_secret(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfluxError::Validation(format!("{} cannot be empty", what)));
    }
    Ok(())
}

/// Validate a taint label (e.g. `team=infra`)
pub fn validate_taint(taint: &str) -> Result<()> {
    if taint.is_empty() {
        return Err(ConfluxError::Validation("Taint cannot be empty".to_string()));
    }

    if taint.len() > MAX_TAINT_LEN {
        return Err(ConfluxError::Validation(format!(
            "Taint exceeds maximum length of {} characters",
            MAX_TAINT_LEN
        )));
    }

    if taint.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfluxError::Validation(format!(
            "Taint '{}' contains whitespace or control characters",
            taint.escape_debug()
        )));
    }

    Ok(())
}
