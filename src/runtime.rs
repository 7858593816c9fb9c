//! Foreground run path shared by the service entry point and `up --debug`
//!
//! Launch the anchor, bring it up, serve the control socket, wait for a
//! termination signal, then unwind. The unwind runs exactly once and also
//! runs when bring-up fails part way.

use crate::anchor::{AnchorConfig, AnchorSession, TunSpec};
use crate::config::{ConfigStore, ConfluxConfig, Settings, TunSettings};
use crate::control::{CommandHandler, ControlServer};
use crate::error::Result;
use crate::supervisor::{AnchorHandle, Supervisor};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Completes on SIGINT or SIGTERM (Ctrl-C elsewhere)
///
/// If no listener can be installed the error is logged and the future never
/// completes, leaving termination to the OS.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}

/// Launch the anchor and run until `shutdown` completes
pub async fn run<F>(
    settings: &Settings,
    config: &ConfluxConfig,
    store: Option<ConfigStore>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    // Reject an incomplete config before anything is spawned
    config.validate()?;

    let handle = Supervisor::new(settings.anchor.clone()).launch().await?;
    info!("Anchor launched (pid {:?})", handle.pid());

    run_with_handle(handle, settings, config, store, shutdown).await
}

/// Bring up an already launched anchor and run until `shutdown` completes
///
/// The handle is always shut down before returning.
pub async fn run_with_handle<F>(
    handle: AnchorHandle,
    settings: &Settings,
    config: &ConfluxConfig,
    store: Option<ConfigStore>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let session = handle.session();

    let brought_up = match config.to_anchor_config() {
        Ok(anchor_config) => {
            let mut session = session.lock().await;
            bring_up(&mut session, &anchor_config, config, &settings.tun).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = brought_up {
        error!("Anchor bring-up failed: {}", e);
        handle.shutdown().await;
        return Err(e);
    }

    let control = start_control(settings, session, store);

    info!("Conflux {} is up", config.conflux_id);
    shutdown.await;
    info!("Shutting down conflux");

    if let Some((server, task)) = control {
        task.abort();
        if let Err(e) = server.shutdown().await {
            warn!("Failed to clean up control socket: {}", e);
        }
    }

    handle.shutdown().await;
    info!("Conflux stopped");
    Ok(())
}

/// Create, start, apply taints, create and link the TUN device
///
/// Taint failures are logged and skipped; anything else aborts.
pub async fn bring_up(
    session: &mut AnchorSession,
    anchor_config: &AnchorConfig,
    config: &ConfluxConfig,
    tun: &TunSettings,
) -> Result<()> {
    session.create().await?;
    session.start(anchor_config).await?;

    for taint in config.taints.iter() {
        if let Err(e) = session.add_taint(taint).await {
            warn!("Failed to add taint {}: {}", taint, e);
        }
    }

    session
        .create_tun(&TunSpec::new(tun.interface.clone(), tun.mtu))
        .await?;
    session.link_with_tun().await?;

    debug!("Anchor state after bring-up: {}", session.state());
    Ok(())
}

#[cfg(unix)]
fn start_control(
    settings: &Settings,
    session: Arc<tokio::sync::Mutex<AnchorSession>>,
    store: Option<ConfigStore>,
) -> Option<(Arc<ControlServer>, JoinHandle<()>)> {
    if !settings.control.enabled {
        debug!("Control socket disabled");
        return None;
    }

    let handler = Arc::new(CommandHandler::new(session, store));
    let server = Arc::new(ControlServer::new(
        settings.control.socket_path.clone(),
        handler,
    ));

    let listener = match server.bind() {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Control socket unavailable: {}", e);
            return None;
        }
    };

    let serving = server.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = serving.serve(listener).await {
            error!("Control server stopped: {}", e);
        }
    });
    Some((server, task))
}

#[cfg(not(unix))]
fn start_control(
    settings: &Settings,
    _session: Arc<tokio::sync::Mutex<AnchorSession>>,
    _store: Option<ConfigStore>,
) -> Option<(Arc<ControlServer>, JoinHandle<()>)> {
    if settings.control.enabled {
        debug!("Control socket is not supported on this platform");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::emulator::{serve_connection, ReferenceAnchor};
    use crate::anchor::{AnchorClient, AnchorFault, AnchorState};
    use crate::error::ConfluxError;
    use crate::transport::Transport;
    use std::time::Duration;

    fn config() -> ConfluxConfig {
        ConfluxConfig {
            conflux_id: "cfx-1".to_string(),
            token: "anchor-token".to_string(),
            taints: ["team=infra", "env=dev"].into_iter().collect(),
            ..ConfluxConfig::default()
        }
    }

    fn attached() -> (AnchorHandle, Arc<std::sync::Mutex<ReferenceAnchor>>) {
        let anchor = Arc::new(std::sync::Mutex::new(ReferenceAnchor::new()));
        let (a, b) = tokio::io::duplex(8192);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        tokio::spawn(serve_connection(br, bw, anchor.clone()));
        let client = AnchorClient::new(Transport::from_io(ar, aw, "duplex"));
        (AnchorHandle::attach(client, Duration::from_secs(1)), anchor)
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.control.enabled = false;
        settings
    }

    #[tokio::test]
    async fn test_bring_up_order() {
        let (handle, anchor) = attached();
        let session = handle.session();
        let config = config();

        {
            let mut session = session.lock().await;
            bring_up(
                &mut session,
                &config.to_anchor_config().unwrap(),
                &config,
                &TunSettings::default(),
            )
            .await
            .unwrap();
            assert_eq!(session.state(), AnchorState::TunBound);
        }

        assert_eq!(
            anchor.lock().unwrap().journal().to_vec(),
            vec![
                "create_anchor",
                "start_anchor",
                "add_taint",
                "add_taint",
                "create_tun",
                "link_with_tun"
            ]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_unwinds_on_shutdown() {
        let (handle, anchor) = attached();
        run_with_handle(handle, &settings(), &config(), None, async {})
            .await
            .unwrap();

        let journal = anchor.lock().unwrap().journal().to_vec();
        assert_eq!(&journal[journal.len() - 2..], &["stop_anchor", "destroy_tun"]);
        assert!(!anchor.lock().unwrap().is_started());
        assert!(anchor.lock().unwrap().tun().is_none());
    }

    #[tokio::test]
    async fn test_bring_up_failure_still_unwinds() {
        let (handle, anchor) = attached();
        anchor.lock().unwrap().inject_fault(
            "create_tun",
            AnchorFault::PermissionDenied("not root".to_string()),
        );

        let err = run_with_handle(handle, &settings(), &config(), None, async {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConfluxError::CapabilityRejected(AnchorFault::PermissionDenied(_))
        ));

        let journal = anchor.lock().unwrap().journal().to_vec();
        assert_eq!(&journal[journal.len() - 2..], &["stop_anchor", "destroy_tun"]);
    }

    #[tokio::test]
    async fn test_taint_failure_is_not_fatal() {
        let (handle, anchor) = attached();
        anchor
            .lock()
            .unwrap()
            .inject_fault("add_taint", AnchorFault::Internal("flaky".to_string()));

        run_with_handle(handle, &settings(), &config(), None, async {})
            .await
            .unwrap();
        assert!(anchor.lock().unwrap().taints().contains("env=dev"));
    }

    #[tokio::test]
    async fn test_incomplete_config_rejected_before_launch() {
        let err = run(&settings(), &ConfluxConfig::default(), None, async {})
            .await
            .unwrap_err();
        assert!(matches!(err, ConfluxError::Validation(_)));
    }
}
