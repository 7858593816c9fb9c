//! Typed client stub for the anchor capability set
//!
//! One async method per call. The stub has no lifecycle discipline of its
//! own; ordering is enforced by [`AnchorSession`](super::AnchorSession) and,
//! failing that, by the anchor's typed rejections.

use super::api::{
    AnchorCall, AnchorConfig, AnchorFault, AnchorRequest, AnchorResponse, TunSpec,
};
use crate::error::{ConfluxError, Result};
use crate::transport::Transport;
use serde_json::Value;
use tracing::{debug, warn};

/// Client for one anchor over one transport
pub struct AnchorClient {
    transport: Transport,
    next_id: u64,
}

impl AnchorClient {
    /// Wrap a connected transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            next_id: 1,
        }
    }

    /// Description of the peer this client talks to
    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    /// Whether the underlying transport has been closed
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    async fn invoke(&mut self, call: AnchorCall) -> Result<Option<Value>> {
        let id = self.next_id;
        self.next_id += 1;
        let method = call.method();

        debug!(id, method, "Calling anchor");
        let response: AnchorResponse = self.transport.request(&AnchorRequest { id, call }).await?;

        if response.id != id {
            warn!(
                expected = id,
                received = response.id,
                "Anchor response id mismatch, dropping transport"
            );
            self.transport.close().await;
            return Err(ConfluxError::TransportUnavailable(format!(
                "response id {} does not match request id {}",
                response.id, id
            )));
        }

        if response.success {
            return Ok(response.data);
        }

        let fault = response.error.unwrap_or_else(|| {
            AnchorFault::Internal(format!("{} failed without an error payload", method))
        });
        debug!(id, method, error = %fault, "Anchor rejected call");
        Err(fault.into())
    }

    /// Look up a capability by name
    pub async fn dispense(&mut self, capability: &str) -> Result<()> {
        self.invoke(AnchorCall::Dispense {
            capability: capability.to_string(),
        })
        .await
        .map(drop)
    }

    /// Allocate anchor runtime state
    pub async fn create_anchor(&mut self) -> Result<()> {
        self.invoke(AnchorCall::CreateAnchor).await.map(drop)
    }

    /// Release anchor runtime state
    pub async fn destroy_anchor(&mut self) -> Result<()> {
        self.invoke(AnchorCall::DestroyAnchor).await.map(drop)
    }

    /// Open the control-plane connection
    ///
    /// The config is validated locally first; a partial config never reaches
    /// the anchor.
    pub async fn start_anchor(&mut self, config: &AnchorConfig) -> Result<()> {
        config.validate()?;
        self.invoke(AnchorCall::StartAnchor(config.clone()))
            .await
            .map(drop)
    }

    /// Close the control-plane connection
    pub async fn stop_anchor(&mut self) -> Result<()> {
        self.invoke(AnchorCall::StopAnchor).await.map(drop)
    }

    /// Allocate the virtual network interface
    pub async fn create_tun(&mut self, spec: &TunSpec) -> Result<()> {
        spec.validate()?;
        self.invoke(AnchorCall::CreateTun(spec.clone()))
            .await
            .map(drop)
    }

    /// Release the virtual network interface
    pub async fn destroy_tun(&mut self) -> Result<()> {
        self.invoke(AnchorCall::DestroyTun).await.map(drop)
    }

    /// Bind the data plane to the created interface
    pub async fn link_with_tun(&mut self) -> Result<()> {
        self.invoke(AnchorCall::LinkWithTun).await.map(drop)
    }

    /// Bind the data plane to a pre-opened descriptor
    pub async fn link_with_file_descriptor(&mut self, fd: i32) -> Result<()> {
        self.invoke(AnchorCall::LinkWithFileDescriptor { fd })
            .await
            .map(drop)
    }

    /// Attach a taint
    pub async fn add_taint(&mut self, taint: &str) -> Result<()> {
        self.invoke(AnchorCall::AddTaint {
            taint: taint.to_string(),
        })
        .await
        .map(drop)
    }

    /// Detach a taint
    pub async fn remove_taint(&mut self, taint: &str) -> Result<()> {
        self.invoke(AnchorCall::RemoveTaint {
            taint: taint.to_string(),
        })
        .await
        .map(drop)
    }

    /// Fetch the anchor's stable identifier
    pub async fn get_id(&mut self) -> Result<String> {
        match self.invoke(AnchorCall::GetId).await? {
            Some(Value::String(id)) => Ok(id),
            other => Err(ConfluxError::Serialization(format!(
                "get_id returned unexpected data: {:?}",
                other
            ))),
        }
    }

    /// Close the transport (idempotent)
    pub async fn close(&mut self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LineChannel;
    use serde_json::json;

    fn client_with_peer() -> (AnchorClient, LineChannel) {
        let (a, b) = tokio::io::duplex(4096);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            AnchorClient::new(Transport::from_io(ar, aw, "duplex")),
            LineChannel::new(br, bw),
        )
    }

    #[tokio::test]
    async fn test_response_id_mismatch_rejected() {
        let (mut client, mut peer) = client_with_peer();

        let server = tokio::spawn(async move {
            let req: AnchorRequest = peer.recv().await.unwrap().unwrap();
            peer.send(&AnchorResponse::success(req.id + 41, None))
                .await
                .unwrap();
            peer
        });

        let err = client.create_anchor().await.unwrap_err();
        assert!(matches!(err, ConfluxError::TransportUnavailable(_)));
        assert!(client.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_typed_fault_surfaces() {
        let (mut client, mut peer) = client_with_peer();

        tokio::spawn(async move {
            let req: AnchorRequest = peer.recv().await.unwrap().unwrap();
            assert_eq!(req.call.method(), "link_with_tun");
            peer.send(&AnchorResponse::failure(
                req.id,
                AnchorFault::NotReady("no tun".to_string()),
            ))
            .await
            .unwrap();
        });

        let err = client.link_with_tun().await.unwrap_err();
        assert!(matches!(
            err,
            ConfluxError::CapabilityRejected(AnchorFault::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_get_id_returns_string() {
        let (mut client, mut peer) = client_with_peer();

        tokio::spawn(async move {
            let req: AnchorRequest = peer.recv().await.unwrap().unwrap();
            peer.send(&AnchorResponse::success(req.id, Some(json!("anchor-123"))))
                .await
                .unwrap();
        });

        assert_eq!(client.get_id().await.unwrap(), "anchor-123");
    }

    #[tokio::test]
    async fn test_invalid_tun_spec_never_sent() {
        let (mut client, _peer) = client_with_peer();
        let err = client
            .create_tun(&TunSpec::new("veilnet", 100))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfluxError::Validation(_)));
        assert!(!client.is_closed());
    }
}
