//! Transport bindings to the anchor subprocess
//!
//! Two bindings are supported:
//!
//! - **Handshake**: the anchor advertises its endpoint on stdout after start
//!   (see [`handshake`]), then a capability is looked up by name.
//! - **Loopback**: the anchor listens on a fixed loopback port.
//!
//! Either way the result is a [`Transport`]: a sequential request/response
//! channel. Connecting never retries; callers own retry and backoff.

mod channel;
pub mod handshake;

pub use channel::LineChannel;
pub use handshake::{Endpoint, Handshake, HandshakeConfig};

use crate::error::{ConfluxError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Environment variable telling the anchor which loopback address to bind
pub const ANCHOR_ADDR_ENV: &str = "CONFLUX_ANCHOR_ADDR";

/// Well-known loopback port of the anchor
pub const DEFAULT_LOOPBACK_PORT: u16 = 1993;

/// How the controller reaches the anchor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    /// Handshake-negotiated endpoint with capability lookup
    #[default]
    Handshake,
    /// Fixed loopback address, readiness by delay
    Loopback,
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake => write!(f, "handshake"),
            Self::Loopback => write!(f, "loopback"),
        }
    }
}

/// Loopback address of the anchor for a given port
pub fn loopback_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Request/response channel to one anchor
pub struct Transport {
    channel: LineChannel,
    peer: String,
}

impl Transport {
    /// Build a transport over an already-connected stream pair
    pub fn from_io<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            channel: LineChannel::new(reader, writer),
            peer: peer.into(),
        }
    }

    /// Connect to an endpoint, failing fast if nothing is listening
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        debug!("Connecting to anchor at {}", endpoint);

        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(|e| {
                    ConfluxError::TransportUnavailable(format!("{}: {}", endpoint, e))
                })?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok(Self::from_io(reader, writer, endpoint.to_string()))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await.map_err(|e| {
                    ConfluxError::TransportUnavailable(format!("{}: {}", endpoint, e))
                })?;
                let (reader, writer) = stream.into_split();
                Ok(Self::from_io(reader, writer, endpoint.to_string()))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(ConfluxError::TransportUnavailable(format!(
                "{}: unix sockets are not supported on this platform",
                endpoint
            ))),
        }
    }

    /// Connect to the anchor's loopback port
    pub async fn connect_loopback(port: u16) -> Result<Self> {
        Self::connect(&Endpoint::Tcp(loopback_addr(port))).await
    }

    /// Human-readable peer description
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether the transport has been closed
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Send one request and wait for its response
    pub async fn request<Req, Resp>(&mut self, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.channel.request(request).await
    }

    /// Close the transport; closing twice is fine
    pub async fn close(&mut self) {
        if !self.channel.is_closed() {
            debug!("Closing transport to {}", self.peer);
        }
        self.channel.close().await;
    }
}
