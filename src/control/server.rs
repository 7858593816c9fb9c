//! Control server for Unix sockets
//!
//! This module implements the server that listens for incoming control
//! connections and dispatches commands to the handler.

use crate::control::{ApiError, CommandHandler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[cfg(unix)]
use crate::control::{ApiRequest, ApiResponse};
#[cfg(unix)]
use crate::security::{self, SecureFileMode};
#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::UnixListener;
#[cfg(unix)]
use tracing::{debug, error};

/// Default socket path for Unix systems
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/conflux.sock";

/// Control server manages the control API socket
pub struct ControlServer {
    /// Path to Unix socket
    socket_path: PathBuf,
    /// Command handler
    handler: Arc<CommandHandler>,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(socket_path: PathBuf, handler: Arc<CommandHandler>) -> Self {
        Self {
            socket_path,
            handler,
        }
    }

    /// Socket path this server binds
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one
    #[cfg(unix)]
    pub fn bind(&self) -> Result<UnixListener, ApiError> {
        // Remove existing socket if present
        if self.socket_path.exists() {
            info!("Removing existing socket at {:?}", self.socket_path);
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                ApiError::InternalError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::InternalError(format!("Failed to create socket directory: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            ApiError::InternalError(format!("Failed to bind Unix socket: {}", e))
        })?;

        security::set_secure_permissions(&self.socket_path, SecureFileMode::Socket)?;

        info!("Control server listening at {:?}", self.socket_path);
        Ok(listener)
    }

    /// Accept connections until the task is dropped
    #[cfg(unix)]
    pub async fn serve(&self, listener: UnixListener) -> Result<(), ApiError> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Bind and serve
    #[cfg(unix)]
    pub async fn start(&self) -> Result<(), ApiError> {
        info!("Starting control server at {:?}", self.socket_path);
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Start the control server (Windows)
    #[cfg(not(unix))]
    pub async fn start(&self) -> Result<(), ApiError> {
        Err(ApiError::InternalError(
            "Control socket is not supported on this platform".to_string(),
        ))
    }

    /// Shutdown the server and clean up
    pub async fn shutdown(&self) -> Result<(), ApiError> {
        info!("Shutting down control server");

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                ApiError::InternalError(format!("Failed to remove socket: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Handle a single client connection
#[cfg(unix)]
async fn handle_connection(
    stream: tokio::net::UnixStream,
    handler: Arc<CommandHandler>,
) -> Result<(), ApiError> {
    debug!("New client connection");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Client disconnected");
                break;
            }
            Ok(_) => {
                let request_str = line.trim();
                if request_str.is_empty() {
                    continue;
                }

                debug!("Received request: {}", request_str);

                let response = match ApiRequest::from_json(request_str) {
                    Ok(request) => handler.handle_request(request).await,
                    Err(e) => {
                        error!("Failed to parse request: {}", e);
                        ApiResponse::error(
                            "unknown".to_string(),
                            ApiError::ParseError(format!("Invalid JSON: {}", e)),
                        )
                    }
                };

                let mut response_str = response.to_json()?;
                response_str.push('\n');

                writer
                    .write_all(response_str.as_bytes())
                    .await
                    .map_err(|e| {
                        ApiError::InternalError(format!("Failed to write response: {}", e))
                    })?;

                writer.flush().await.map_err(|e| {
                    ApiError::InternalError(format!("Failed to flush response: {}", e))
                })?;
            }
            Err(e) => {
                error!("Failed to read from socket: {}", e);
                break;
            }
        }
    }

    Ok(())
}
