//! Handshake negotiation for the subprocess binding
//!
//! The controller starts the anchor with a magic cookie and the protocol
//! version in its environment. Once the anchor is listening it prints a single
//! line on stdout:
//!
//! ```text
//! 1|1|tcp|127.0.0.1:40123|jsonl
//! ```
//!
//! (core version, protocol version, network, address, wire protocol). That
//! line is the readiness acknowledgment: nothing is sent to the anchor before it.

use crate::error::{ConfluxError, Result};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// Version of the handshake line format itself
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Wire protocol spoken after the handshake
pub const WIRE_PROTOCOL: &str = "jsonl";

/// Environment variable carrying the negotiated protocol version
pub const PROTOCOL_VERSION_ENV: &str = "CONFLUX_ANCHOR_PROTOCOL_VERSION";

/// Endpoint advertised by the anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP address (normally loopback)
    Tcp(SocketAddr),
    /// Unix domain socket path
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Parsed handshake line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Handshake format version
    pub core_version: u32,
    /// Application protocol version
    pub protocol_version: u32,
    /// Where the anchor is listening
    pub endpoint: Endpoint,
    /// Wire protocol name
    pub protocol: String,
}

impl Handshake {
    /// Build the handshake an anchor would print for `endpoint`
    pub fn new(protocol_version: u32, endpoint: Endpoint) -> Self {
        Self {
            core_version: CORE_PROTOCOL_VERSION,
            protocol_version,
            endpoint,
            protocol: WIRE_PROTOCOL.to_string(),
        }
    }

    /// Parse a handshake line
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() != 5 {
            return Err(ConfluxError::TransportUnavailable(format!(
                "Malformed handshake line: {:?}",
                line
            )));
        }

        let core_version = parse_version(parts[0], "core")?;
        let protocol_version = parse_version(parts[1], "protocol")?;

        let endpoint = match parts[2] {
            "tcp" => Endpoint::Tcp(parts[3].parse().map_err(|_| {
                ConfluxError::TransportUnavailable(format!(
                    "Invalid TCP address in handshake: {}",
                    parts[3]
                ))
            })?),
            "unix" => Endpoint::Unix(PathBuf::from(parts[3])),
            other => {
                return Err(ConfluxError::TransportUnavailable(format!(
                    "Unsupported network in handshake: {}",
                    other
                )))
            }
        };

        Ok(Self {
            core_version,
            protocol_version,
            endpoint,
            protocol: parts[4].to_string(),
        })
    }

    /// Render as a handshake line (without the trailing newline)
    pub fn to_line(&self) -> String {
        let (network, address) = match &self.endpoint {
            Endpoint::Tcp(addr) => ("tcp", addr.to_string()),
            Endpoint::Unix(path) => ("unix", path.display().to_string()),
        };
        format!(
            "{}|{}|{}|{}|{}",
            self.core_version, self.protocol_version, network, address, self.protocol
        )
    }
}

fn parse_version(field: &str, what: &str) -> Result<u32> {
    field.parse().map_err(|_| {
        ConfluxError::TransportUnavailable(format!("Invalid {} version in handshake: {}", what, field))
    })
}

/// Shared handshake configuration between controller and anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Application protocol version both sides must agree on
    pub protocol_version: u32,
    /// Environment variable name of the magic cookie
    pub cookie_key: String,
    /// Expected magic cookie value
    pub cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            cookie_key: "CONFLUX_ANCHOR_COOKIE".to_string(),
            cookie_value: "f3c1d2a4b6e8497a9c0e1d2f3a4b5c6d".to_string(),
        }
    }
}

impl HandshakeConfig {
    /// Environment handed to the spawned anchor
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            (self.cookie_key.clone(), self.cookie_value.clone()),
            (PROTOCOL_VERSION_ENV.to_string(), self.protocol_version.to_string()),
        ]
    }

    /// Anchor side: whether this process was started by a controller
    pub fn cookie_present(&self) -> bool {
        std::env::var(&self.cookie_key).is_ok_and(|v| v == self.cookie_value)
    }

    /// Controller side: check the anchor's handshake against ours
    pub fn verify(&self, handshake: &Handshake) -> Result<()> {
        if handshake.core_version != CORE_PROTOCOL_VERSION {
            return Err(ConfluxError::TransportUnavailable(format!(
                "Incompatible handshake core version {} (expected {})",
                handshake.core_version, CORE_PROTOCOL_VERSION
            )));
        }

        if handshake.protocol_version != self.protocol_version {
            return Err(ConfluxError::TransportUnavailable(format!(
                "Incompatible anchor protocol version {} (expected {})",
                handshake.protocol_version, self.protocol_version
            )));
        }

        if handshake.protocol != WIRE_PROTOCOL {
            return Err(ConfluxError::TransportUnavailable(format!(
                "Unsupported wire protocol '{}' (expected '{}')",
                handshake.protocol, WIRE_PROTOCOL
            )));
        }

        Ok(())
    }
}

/// Read stdout lines until the handshake arrives
///
/// Lines that do not look like a handshake are anchor log output and are
/// passed to `on_output`. End of stream before the handshake means the anchor
/// died during startup.
pub async fn read_handshake<R, F>(reader: &mut R, mut on_output: F) -> Result<Handshake>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&str),
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await.map_err(|e| {
            ConfluxError::SpawnFailed(format!("Failed to read anchor stdout: {}", e))
        })?;

        if read == 0 {
            return Err(ConfluxError::SpawnFailed(
                "anchor exited before completing the handshake".to_string(),
            ));
        }

        let trimmed = line.trim_end();
        if trimmed.matches('|').count() == 4 {
            debug!("Anchor handshake: {}", trimmed);
            return Handshake::parse(trimmed);
        }

        on_output(trimmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_handshake() {
        let hs = Handshake::parse("1|1|tcp|127.0.0.1:40123|jsonl\n").unwrap();
        assert_eq!(hs.core_version, 1);
        assert_eq!(hs.protocol_version, 1);
        assert_eq!(hs.endpoint, Endpoint::Tcp("127.0.0.1:40123".parse().unwrap()));
        assert_eq!(hs.protocol, "jsonl");
    }

    #[test]
    fn test_parse_unix_handshake_and_render() {
        let line = "1|2|unix|/tmp/anchor.sock|jsonl";
        let hs = Handshake::parse(line).unwrap();
        assert_eq!(hs.endpoint, Endpoint::Unix(PathBuf::from("/tmp/anchor.sock")));
        assert_eq!(hs.to_line(), line);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Handshake::parse("hello").is_err());
        assert!(Handshake::parse("x|1|tcp|127.0.0.1:1|jsonl").is_err());
        assert!(Handshake::parse("1|1|udp|127.0.0.1:1|jsonl").is_err());
        assert!(Handshake::parse("1|1|tcp|not-an-addr|jsonl").is_err());
    }

    #[test]
    fn test_verify_versions() {
        let config = HandshakeConfig::default();
        let endpoint = Endpoint::Tcp("127.0.0.1:1".parse().unwrap());

        assert!(config.verify(&Handshake::new(1, endpoint.clone())).is_ok());
        assert!(config.verify(&Handshake::new(2, endpoint.clone())).is_err());

        let mut hs = Handshake::new(1, endpoint);
        hs.protocol = "grpc".to_string();
        assert!(config.verify(&hs).is_err());
    }

    #[tokio::test]
    async fn test_read_handshake_skips_log_lines() {
        let stdout = b"starting anchor\nlistening\n1|1|tcp|127.0.0.1:5555|jsonl\nafter\n";
        let mut reader = tokio::io::BufReader::new(&stdout[..]);
        let mut seen = Vec::new();

        let hs = read_handshake(&mut reader, |l| seen.push(l.to_string()))
            .await
            .unwrap();

        assert_eq!(hs.endpoint, Endpoint::Tcp("127.0.0.1:5555".parse().unwrap()));
        assert_eq!(seen, vec!["starting anchor", "listening"]);
    }

    #[tokio::test]
    async fn test_read_handshake_eof_is_spawn_failure() {
        let mut reader = tokio::io::BufReader::new(&b"panic: no tun driver\n"[..]);
        let err = read_handshake(&mut reader, |_| {}).await.unwrap_err();
        assert!(matches!(err, ConfluxError::SpawnFailed(_)));
    }

    #[test]
    #[serial_test::serial]
    fn test_cookie_detection() {
        let config = HandshakeConfig::default();

        std::env::remove_var(&config.cookie_key);
        assert!(!config.cookie_present());

        std::env::set_var(&config.cookie_key, "not-the-cookie");
        assert!(!config.cookie_present());

        std::env::set_var(&config.cookie_key, &config.cookie_value);
        assert!(config.cookie_present());

        std::env::remove_var(&config.cookie_key);
    }
}
