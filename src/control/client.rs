//! Client side of the control socket, used by the CLI

use crate::control::{ApiRequest, ApiResponse};
use crate::error::{ConfluxError, Result};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tracing::debug;

/// One-request-per-connection client for the control socket
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    /// Client for the socket at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and wait for its response
    ///
    /// Connection failures are `TransportUnavailable` so callers can tell a
    /// stopped controller apart from a rejected request.
    #[cfg(unix)]
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            ConfluxError::TransportUnavailable(format!(
                "control socket {:?}: {}",
                self.socket_path, e
            ))
        })?;
        let (reader, mut writer) = stream.into_split();

        let mut line = request
            .to_json()
            .map_err(|e| ConfluxError::Control(e.to_string()))?;
        debug!("Sending control request: {}", line);
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut response = String::new();
        if reader.read_line(&mut response).await? == 0 {
            return Err(ConfluxError::Control(
                "control socket closed without a response".to_string(),
            ));
        }

        let response =
            ApiResponse::from_json(response.trim()).map_err(|e| ConfluxError::Control(e.to_string()))?;
        if response.id != request.id {
            return Err(ConfluxError::Control(format!(
                "response id {} does not match request {}",
                response.id, request.id
            )));
        }
        Ok(response)
    }

    /// Control socket is not available on this platform
    #[cfg(not(unix))]
    pub async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse> {
        Err(ConfluxError::TransportUnavailable(
            "control socket is not supported on this platform".to_string(),
        ))
    }

    /// Send a request and turn an error response into `ConfluxError::Control`
    pub async fn call(&self, request: &ApiRequest) -> Result<Option<serde_json::Value>> {
        let response = self.send(request).await?;
        match (response.success, response.error) {
            (true, _) => Ok(response.data),
            (false, Some(e)) => Err(ConfluxError::Control(e.to_string())),
            (false, None) => Err(ConfluxError::Control("request failed".to_string())),
        }
    }
}
