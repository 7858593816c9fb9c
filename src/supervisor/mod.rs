//! Anchor subprocess supervisor
//!
//! Writes the anchor payload to disk, spawns it, waits until it is ready,
//! and hands back an [`AnchorHandle`] owning the process and a connected
//! [`AnchorSession`]. There is exactly one anchor per controller and it is
//! never respawned; the OS service manager restarts the whole controller.

mod payload;
mod process;

pub use payload::{Payload, PAYLOAD_FILE_NAME};
pub use process::AnchorProcess;

use crate::anchor::{AnchorClient, AnchorSession, ANCHOR_CAPABILITY};
use crate::config::AnchorSettings;
use crate::error::{ConfluxError, Result};
use crate::transport::handshake::{self, HandshakeConfig};
use crate::transport::{loopback_addr, Binding, Transport, ANCHOR_ADDR_ENV};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Base delay between loopback connection attempts
const CONNECT_BACKOFF: Duration = Duration::from_millis(200);

/// Launches anchors according to the `[anchor]` settings
#[derive(Debug, Clone)]
pub struct Supervisor {
    settings: AnchorSettings,
    handshake: HandshakeConfig,
}

impl Supervisor {
    /// Create a supervisor
    pub fn new(settings: AnchorSettings) -> Self {
        Self {
            settings,
            handshake: HandshakeConfig::default(),
        }
    }

    /// Override the handshake parameters
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Materialize the payload, spawn it and connect
    pub async fn launch(&self) -> Result<AnchorHandle> {
        let payload = Payload::from_settings(&self.settings)?;
        let path = payload.materialize(&self.settings.scratch_dir)?;

        info!(
            "Launching anchor from {:?} ({} binding)",
            path, self.settings.binding
        );

        match self.settings.binding {
            Binding::Handshake => self.launch_handshake(path).await,
            Binding::Loopback => self.launch_loopback(path).await,
        }
    }

    fn command(&self, path: &Path) -> Command {
        let mut command = Command::new(path);
        command
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }

    async fn launch_handshake(&self, path: PathBuf) -> Result<AnchorHandle> {
        let mut command = self.command(&path);
        command.stdout(Stdio::piped()).envs(self.handshake.env());

        let mut child = command
            .spawn()
            .map_err(|e| ConfluxError::SpawnFailed(format!("{:?}: {}", path, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConfluxError::SpawnFailed("anchor stdout was not captured".to_string()))?;

        let mut process = AnchorProcess::new(child);
        let mut reader = BufReader::new(stdout);

        match self.negotiate(&mut reader).await {
            Ok(client) => {
                process.forward_stdout(reader);
                Ok(AnchorHandle::new(client, Some(process), Some(path), self.grace()))
            }
            Err(e) => {
                process.kill(self.grace()).await;
                Err(e)
            }
        }
    }

    async fn negotiate<R>(&self, reader: &mut R) -> Result<AnchorClient>
    where
        R: AsyncBufRead + Unpin,
    {
        let timeout = self.settings.handshake_timeout();
        let handshake = tokio::time::timeout(
            timeout,
            handshake::read_handshake(reader, |line| info!(target: "anchor", "{}", line)),
        )
        .await
        .map_err(|_| {
            ConfluxError::TransportUnavailable(format!("no handshake from anchor within {:?}", timeout))
        })??;

        self.handshake.verify(&handshake)?;

        let transport = Transport::connect(&handshake.endpoint).await?;
        let mut client = AnchorClient::new(transport);
        client.dispense(ANCHOR_CAPABILITY).await?;

        info!("Connected to anchor at {}", handshake.endpoint);
        Ok(client)
    }

    async fn launch_loopback(&self, path: PathBuf) -> Result<AnchorHandle> {
        let addr = loopback_addr(self.settings.loopback_port);
        let mut command = self.command(&path);
        command
            .stdout(Stdio::inherit())
            .env(ANCHOR_ADDR_ENV, addr.to_string());

        let child = command
            .spawn()
            .map_err(|e| ConfluxError::SpawnFailed(format!("{:?}: {}", path, e)))?;
        let mut process = AnchorProcess::new(child);

        tokio::time::sleep(self.settings.readiness_delay()).await;

        match self.connect_with_retry(&mut process).await {
            Ok(transport) => {
                info!("Connected to anchor at {}", addr);
                let client = AnchorClient::new(transport);
                Ok(AnchorHandle::new(client, Some(process), Some(path), self.grace()))
            }
            Err(e) => {
                process.kill(self.grace()).await;
                Err(e)
            }
        }
    }

    async fn connect_with_retry(&self, process: &mut AnchorProcess) -> Result<Transport> {
        let attempts = self.settings.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            if let Some(status) = process.exit_status()? {
                return Err(ConfluxError::SpawnFailed(format!(
                    "anchor exited during startup: {}",
                    status
                )));
            }

            match Transport::connect_loopback(self.settings.loopback_port).await {
                Ok(transport) => return Ok(transport),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(attempt, attempts, "Anchor not reachable yet: {}", e);
                    tokio::time::sleep(CONNECT_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn grace(&self) -> Duration {
        self.settings.shutdown_timeout()
    }
}

/// A live anchor: the process plus the session talking to it
///
/// Consumed by [`shutdown`](Self::shutdown), so the unwind runs once.
pub struct AnchorHandle {
    session: Arc<Mutex<AnchorSession>>,
    process: Option<AnchorProcess>,
    payload_path: Option<PathBuf>,
    shutdown_timeout: Duration,
}

impl AnchorHandle {
    fn new(
        client: AnchorClient,
        process: Option<AnchorProcess>,
        payload_path: Option<PathBuf>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(AnchorSession::new(client))),
            process,
            payload_path,
            shutdown_timeout,
        }
    }

    /// Wrap a client to an anchor this controller did not spawn
    pub fn attach(client: AnchorClient, shutdown_timeout: Duration) -> Self {
        Self::new(client, None, None, shutdown_timeout)
    }

    /// Shared session; all anchor calls go through its mutex
    pub fn session(&self) -> Arc<Mutex<AnchorSession>> {
        self.session.clone()
    }

    /// OS process id of the anchor, if spawned by us
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(AnchorProcess::pid)
    }

    /// Where the payload was written
    pub fn payload_path(&self) -> Option<&Path> {
        self.payload_path.as_deref()
    }

    /// Whether the spawned process has exited; always false when attached
    pub fn has_exited(&mut self) -> Result<bool> {
        match self.process.as_mut() {
            Some(process) => Ok(process.exit_status()?.is_some()),
            None => Ok(false),
        }
    }

    /// Best-effort unwind: stop, destroy TUN, close, kill
    ///
    /// Failures are logged and never returned.
    pub async fn shutdown(self) {
        info!("Shutting down anchor");

        {
            let mut session = self.session.lock().await;
            if session.is_connected() {
                let failures = session.teardown(self.shutdown_timeout).await;
                if !failures.is_empty() {
                    warn!("Anchor unwind finished with {} failure(s)", failures.len());
                }
            } else {
                debug!("Anchor transport already closed, skipping graceful unwind");
            }
            session.close().await;
        }

        if let Some(process) = self.process {
            process.kill(self.shutdown_timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::emulator::{serve_connection, ReferenceAnchor};
    use crate::anchor::AnchorState;

    #[tokio::test]
    async fn test_missing_payload_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AnchorSettings {
            payload_path: Some(dir.path().join("absent")),
            scratch_dir: dir.path().join("scratch"),
            ..AnchorSettings::default()
        };

        let err = Supervisor::new(settings).launch().await.err().unwrap();
        assert!(matches!(err, ConfluxError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_attached_handle_unwinds_in_order() {
        let anchor = Arc::new(std::sync::Mutex::new(ReferenceAnchor::new()));
        let (a, b) = tokio::io::duplex(8192);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        tokio::spawn(serve_connection(br, bw, anchor.clone()));

        let handle = AnchorHandle::attach(
            AnchorClient::new(Transport::from_io(ar, aw, "duplex")),
            Duration::from_secs(1),
        );
        assert!(handle.pid().is_none());

        let session = handle.session();
        session.lock().await.create().await.unwrap();
        handle.shutdown().await;

        let session = session.lock().await;
        assert!(!session.is_connected());
        assert_eq!(session.state(), AnchorState::Created);
        assert_eq!(
            anchor.lock().unwrap().journal().to_vec(),
            vec!["create_anchor", "stop_anchor", "destroy_tun"]
        );
    }
}
