//! Reference anchor
//!
//! An in-process implementation of the anchor side of the contract. It keeps
//! the lifecycle state machine and typed rejections but touches no network
//! or device. It backs the `anchor-emulator` binary and the contract tests.

use super::api::{
    AnchorCall, AnchorConfig, AnchorFault, AnchorRequest, AnchorResponse, TunSpec,
    ANCHOR_CAPABILITY,
};
use super::taint::TaintSet;
use crate::config::validation;
use crate::error::{ConfluxError, Result};
use crate::transport::LineChannel;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Contract-faithful anchor state machine
#[derive(Debug)]
pub struct ReferenceAnchor {
    id: String,
    created: bool,
    started: Option<AnchorConfig>,
    tun: Option<TunSpec>,
    linked: bool,
    taints: TaintSet,
    journal: Vec<String>,
    faults: HashMap<String, AnchorFault>,
}

impl Default for ReferenceAnchor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceAnchor {
    /// Create an anchor with a fresh identifier
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self::with_id(format!("anchor-{:x}-{:x}", std::process::id(), nanos))
    }

    /// Create an anchor with a fixed identifier
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created: false,
            started: None,
            tun: None,
            linked: false,
            taints: TaintSet::new(),
            journal: Vec::new(),
            faults: HashMap::new(),
        }
    }

    /// Identifier returned by `get_id`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Method names of every call received, in order
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    /// Taints currently applied
    pub fn taints(&self) -> &TaintSet {
        &self.taints
    }

    /// TUN device currently held
    pub fn tun(&self) -> Option<&TunSpec> {
        self.tun.as_ref()
    }

    /// Whether the control plane is connected
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Whether the data plane is bound
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Fail the next call to `method` with `fault`
    pub fn inject_fault(&mut self, method: &str, fault: AnchorFault) {
        self.faults.insert(method.to_string(), fault);
    }

    /// Answer one request
    pub fn respond(&mut self, request: AnchorRequest) -> AnchorResponse {
        match self.handle(request.call) {
            Ok(data) => AnchorResponse::success(request.id, data),
            Err(fault) => AnchorResponse::failure(request.id, fault),
        }
    }

    /// Apply one call to the state machine
    pub fn handle(&mut self, call: AnchorCall) -> std::result::Result<Option<Value>, AnchorFault> {
        let method = call.method();
        self.journal.push(method.to_string());

        if let Some(fault) = self.faults.remove(method) {
            return Err(fault);
        }

        match call {
            AnchorCall::Dispense { capability } => {
                if capability != ANCHOR_CAPABILITY {
                    return Err(AnchorFault::UnknownCapability(capability));
                }
            }
            AnchorCall::CreateAnchor => {
                if self.created {
                    return Err(AnchorFault::AlreadyExists("anchor already created".to_string()));
                }
                self.created = true;
            }
            AnchorCall::DestroyAnchor => {
                self.created = false;
                self.started = None;
                self.linked = false;
            }
            AnchorCall::StartAnchor(config) => {
                if !self.created {
                    return Err(AnchorFault::NotCreated("create the anchor first".to_string()));
                }
                if self.started.is_some() {
                    return Err(AnchorFault::AlreadyExists("anchor already started".to_string()));
                }
                if config.auth_token.trim().is_empty() {
                    return Err(AnchorFault::AuthRejected("empty token".to_string()));
                }
                if validation::validate_url(&config.guardian_url).is_err()
                    || validation::validate_host(&config.tunnel_url).is_err()
                    || config.tunnel_port == 0
                {
                    return Err(AnchorFault::ConnectFailed(format!(
                        "cannot reach {}:{}",
                        config.tunnel_url, config.tunnel_port
                    )));
                }
                self.started = Some(config);
            }
            AnchorCall::StopAnchor => {
                self.started = None;
                self.linked = false;
            }
            AnchorCall::CreateTun(spec) => {
                if self.started.is_none() {
                    return Err(AnchorFault::NotStarted("start the anchor first".to_string()));
                }
                if let Some(existing) = &self.tun {
                    return Err(AnchorFault::DeviceExists(existing.interface_name.clone()));
                }
                if let Err(e) = spec.validate() {
                    return Err(AnchorFault::Internal(e.to_string()));
                }
                self.tun = Some(spec);
            }
            AnchorCall::DestroyTun => {
                self.tun = None;
                self.linked = false;
            }
            AnchorCall::LinkWithTun => {
                if self.tun.is_none() {
                    return Err(AnchorFault::NotReady("no TUN device".to_string()));
                }
                if self.started.is_none() {
                    return Err(AnchorFault::NotReady("anchor not started".to_string()));
                }
                self.linked = true;
            }
            AnchorCall::LinkWithFileDescriptor { fd } => {
                if fd < 0 {
                    return Err(AnchorFault::InvalidDescriptor(format!("fd {}", fd)));
                }
                if self.started.is_none() {
                    return Err(AnchorFault::NotReady("anchor not started".to_string()));
                }
                self.linked = true;
            }
            AnchorCall::AddTaint { taint } => {
                self.taints.add(&taint);
            }
            AnchorCall::RemoveTaint { taint } => {
                self.taints.remove(&taint);
            }
            AnchorCall::GetId => {
                if !self.created {
                    return Err(AnchorFault::NotCreated("create the anchor first".to_string()));
                }
                return Ok(Some(Value::String(self.id.clone())));
            }
        }

        Ok(None)
    }
}

/// Serve one connection until the peer hangs up
pub async fn serve_connection<R, W>(reader: R, writer: W, anchor: Arc<Mutex<ReferenceAnchor>>) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut channel = LineChannel::new(reader, writer);

    loop {
        let request = match channel.recv::<AnchorRequest>().await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(ConfluxError::Serialization(e)) => {
                warn!("Rejecting malformed request: {}", e);
                channel
                    .send(&AnchorResponse::failure(0, AnchorFault::Internal(e)))
                    .await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        debug!(id = request.id, method = request.call.method(), "Anchor call");
        let response = anchor
            .lock()
            .map_err(|_| ConfluxError::InvalidState("anchor state poisoned".to_string()))?
            .respond(request);
        channel.send(&response).await?;
    }

    debug!("Controller disconnected");
    Ok(())
}

/// Accept connections and serve each on its own task
pub async fn serve(listener: TcpListener, anchor: Arc<Mutex<ReferenceAnchor>>) -> Result<()> {
    info!("Reference anchor listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Accepted controller connection from {}", peer);

        let anchor = anchor.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            if let Err(e) = serve_connection(reader, writer, anchor).await {
                warn!("Connection from {} ended with error: {}", peer, e);
            }
        });
    }
}
