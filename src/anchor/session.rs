//! Lifecycle discipline over the anchor client
//!
//! The session tracks where the anchor is in its lifecycle and refuses
//! out-of-order calls before they reach the transport:
//!
//! ```text
//! Uninitialized -> Created -> Started -> TunBound -> Stopped -> Destroyed
//!                                ^          |
//!                                +----------+  (destroy_tun)
//! ```

use super::api::{AnchorConfig, TunSpec};
use super::client::AnchorClient;
use super::taint::TaintSet;
use crate::config::validation;
use crate::error::{ConfluxError, Result};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle state of the anchor as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorState {
    /// Nothing created yet
    Uninitialized,
    /// Runtime state allocated
    Created,
    /// Control plane connected
    Started,
    /// Data plane bound to the TUN device
    TunBound,
    /// Control plane disconnected
    Stopped,
    /// Runtime state released
    Destroyed,
}

impl fmt::Display for AnchorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Created => "created",
            Self::Started => "started",
            Self::TunBound => "tun_bound",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Anchor client plus the state it is known to be in
pub struct AnchorSession {
    client: AnchorClient,
    state: AnchorState,
    tun: Option<TunSpec>,
    taints: TaintSet,
}

impl AnchorSession {
    /// Start tracking a freshly connected anchor
    pub fn new(client: AnchorClient) -> Self {
        Self {
            client,
            state: AnchorState::Uninitialized,
            tun: None,
            taints: TaintSet::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> AnchorState {
        self.state
    }

    /// TUN device currently held, if any
    pub fn tun(&self) -> Option<&TunSpec> {
        self.tun.as_ref()
    }

    /// Taints applied through this session
    pub fn taints(&self) -> &TaintSet {
        &self.taints
    }

    /// Peer description of the underlying transport
    pub fn peer(&self) -> &str {
        self.client.peer()
    }

    /// Whether the transport is still open
    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    fn require(&self, operation: &str, allowed: &[AnchorState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(ConfluxError::InvalidState(format!(
            "cannot {} while anchor is {}",
            operation, self.state
        )))
    }

    /// Allocate anchor runtime state
    pub async fn create(&mut self) -> Result<()> {
        self.require(
            "create anchor",
            &[AnchorState::Uninitialized, AnchorState::Destroyed],
        )?;
        self.client.create_anchor().await?;
        self.state = AnchorState::Created;
        Ok(())
    }

    /// Connect the control plane
    pub async fn start(&mut self, config: &AnchorConfig) -> Result<()> {
        self.require("start anchor", &[AnchorState::Created, AnchorState::Stopped])?;
        self.client.start_anchor(config).await?;
        self.state = AnchorState::Started;
        info!(tunnel = %config.tunnel_url, port = config.tunnel_port, "Anchor started");
        Ok(())
    }

    /// Disconnect the control plane
    ///
    /// Always forwarded, since the anchor treats it as a no-op when not started.
    pub async fn stop(&mut self) -> Result<()> {
        self.client.stop_anchor().await?;
        if matches!(self.state, AnchorState::Started | AnchorState::TunBound) {
            self.state = AnchorState::Stopped;
        }
        Ok(())
    }

    /// Create the TUN device
    ///
    /// Forwarded while bound too, so the anchor can answer `DeviceExists`
    /// and the bound interface stays untouched.
    pub async fn create_tun(&mut self, spec: &TunSpec) -> Result<()> {
        self.require("create TUN", &[AnchorState::Started, AnchorState::TunBound])?;
        self.client.create_tun(spec).await?;
        info!(interface = %spec.interface_name, mtu = spec.mtu, "TUN device created");
        self.tun = Some(spec.clone());
        Ok(())
    }

    /// Release the TUN device; a no-op at the anchor if none exists
    pub async fn destroy_tun(&mut self) -> Result<()> {
        self.client.destroy_tun().await?;
        self.tun = None;
        if self.state == AnchorState::TunBound {
            self.state = AnchorState::Started;
        }
        Ok(())
    }

    /// Bind the data plane to the TUN device created earlier
    pub async fn link_with_tun(&mut self) -> Result<()> {
        self.require("link TUN", &[AnchorState::Started])?;
        if self.tun.is_none() {
            return Err(ConfluxError::InvalidState(
                "cannot link TUN before one is created".to_string(),
            ));
        }
        self.client.link_with_tun().await?;
        self.state = AnchorState::TunBound;
        Ok(())
    }

    /// Bind the data plane to a descriptor opened elsewhere
    pub async fn link_with_file_descriptor(&mut self, fd: i32) -> Result<()> {
        self.require("link descriptor", &[AnchorState::Started])?;
        self.client.link_with_file_descriptor(fd).await?;
        self.state = AnchorState::TunBound;
        Ok(())
    }

    /// Attach a taint
    pub async fn add_taint(&mut self, taint: &str) -> Result<()> {
        validation::validate_taint(taint)?;
        self.client.add_taint(taint).await?;
        self.taints.add(taint);
        Ok(())
    }

    /// Detach a taint
    pub async fn remove_taint(&mut self, taint: &str) -> Result<()> {
        self.client.remove_taint(taint).await?;
        self.taints.remove(taint);
        Ok(())
    }

    /// Stable identifier of the anchor
    pub async fn get_id(&mut self) -> Result<String> {
        self.client.get_id().await
    }

    /// Release anchor runtime state
    pub async fn destroy(&mut self) -> Result<()> {
        self.require(
            "destroy anchor",
            &[
                AnchorState::Uninitialized,
                AnchorState::Created,
                AnchorState::Stopped,
                AnchorState::Destroyed,
            ],
        )?;
        self.client.destroy_anchor().await?;
        self.state = AnchorState::Destroyed;
        self.tun = None;
        Ok(())
    }

    /// Best-effort unwind: stop the anchor, then destroy the TUN device
    ///
    /// Each step is bounded by `grace`. Both steps always run; failures are
    /// logged and returned, never propagated.
    pub async fn teardown(&mut self, grace: Duration) -> Vec<ConfluxError> {
        let mut failures = Vec::new();

        if let Err(e) = bounded(grace, "stop anchor", self.stop()).await {
            warn!("Failed to stop anchor during shutdown: {}", e);
            failures.push(e);
        }

        if let Err(e) = bounded(grace, "destroy TUN", self.destroy_tun()).await {
            warn!("Failed to destroy TUN during shutdown: {}", e);
            failures.push(e);
        }

        failures
    }

    /// Close the transport (idempotent)
    pub async fn close(&mut self) {
        self.client.close().await;
    }
}

async fn bounded<F>(grace: Duration, what: &str, step: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::time::timeout(grace, step)
        .await
        .map_err(|_| ConfluxError::Timeout(format!("{} exceeded {:?}", what, grace)))?
}
