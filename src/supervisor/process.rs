//! The running anchor process

use crate::error::{ConfluxError, Result};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A spawned anchor child; killed when dropped
pub struct AnchorProcess {
    child: Child,
    pid: Option<u32>,
    forwarder: Option<JoinHandle<()>>,
}

impl AnchorProcess {
    pub(super) fn new(child: Child) -> Self {
        let pid = child.id();
        debug!(?pid, "Anchor process spawned");
        Self {
            child,
            pid,
            forwarder: None,
        }
    }

    /// OS process id
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Copy the rest of the anchor's stdout to ours
    pub(super) fn forward_stdout<R>(&mut self, mut reader: R)
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        self.forwarder = Some(tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            if let Err(e) = tokio::io::copy_buf(&mut reader, &mut stdout).await {
                debug!("Stopped forwarding anchor stdout: {}", e);
            }
        }));
    }

    /// Exit status if the process has already exited
    pub(super) fn exit_status(&mut self) -> Result<Option<ExitStatus>> {
        self.child
            .try_wait()
            .map_err(|e| ConfluxError::SpawnFailed(format!("Failed to poll anchor process: {}", e)))
    }

    /// Kill the process and reap it, waiting at most `grace`
    pub async fn kill(mut self, grace: Duration) {
        if let Err(e) = self.child.start_kill() {
            debug!("Anchor process already gone: {}", e);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!(pid = ?self.pid, "Anchor process exited: {}", status),
            Ok(Err(e)) => warn!(pid = ?self.pid, "Failed to reap anchor process: {}", e),
            Err(_) => warn!(pid = ?self.pid, "Anchor process not reaped within {:?}", grace),
        }

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
