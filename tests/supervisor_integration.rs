//! Supervisor tests against the real `anchor-emulator` binary
#![cfg(unix)]

use conflux::anchor::{AnchorConfig, AnchorState, TunSpec};
use conflux::config::AnchorSettings;
use conflux::supervisor::{Supervisor, PAYLOAD_FILE_NAME};
use conflux::transport::Binding;
use conflux::ConfluxError;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn emulator() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_anchor-emulator"))
}

fn settings(scratch: &Path, payload: PathBuf) -> AnchorSettings {
    AnchorSettings {
        payload_path: Some(payload),
        scratch_dir: scratch.to_path_buf(),
        readiness_delay_ms: 50,
        handshake_timeout_secs: 5,
        shutdown_timeout_secs: 2,
        ..AnchorSettings::default()
    }
}

fn config() -> AnchorConfig {
    AnchorConfig {
        guardian_url: "https://guardian.veilnet.app".to_string(),
        tunnel_url: "veil.veilnet.app".to_string(),
        tunnel_port: 443,
        auth_token: "anchor-token".to_string(),
        portal: true,
        ip: None,
    }
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn process_alive(pid: u32) -> bool {
    // Signal 0 only checks for existence
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[tokio::test]
async fn test_handshake_launch_and_shutdown() {
    let scratch = TempDir::new().unwrap();
    let supervisor = Supervisor::new(settings(scratch.path(), emulator()));

    let handle = supervisor.launch().await.unwrap();
    let pid = handle.pid().unwrap();
    assert!(process_alive(pid));
    assert_eq!(
        handle.payload_path().unwrap(),
        scratch.path().join(PAYLOAD_FILE_NAME)
    );

    {
        let session = handle.session();
        let mut session = session.lock().await;
        session.create().await.unwrap();
        session.start(&config()).await.unwrap();
        session.create_tun(&TunSpec::new("veilnet", 1500)).await.unwrap();
        session.link_with_tun().await.unwrap();
        assert_eq!(session.state(), AnchorState::TunBound);
        assert!(session.get_id().await.unwrap().starts_with("anchor-"));
    }

    handle.shutdown().await;
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_loopback_launch() {
    let scratch = TempDir::new().unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let settings = AnchorSettings {
        binding: Binding::Loopback,
        loopback_port: port,
        connect_attempts: 10,
        ..settings(scratch.path(), emulator())
    };

    let handle = Supervisor::new(settings).launch().await.unwrap();
    {
        let session = handle.session();
        let mut session = session.lock().await;
        session.create().await.unwrap();
        assert_eq!(session.state(), AnchorState::Created);
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn test_stale_payload_is_replaced() {
    let scratch = TempDir::new().unwrap();
    let stale = scratch.path().join(PAYLOAD_FILE_NAME);
    std::fs::write(&stale, b"stale").unwrap();

    let handle = Supervisor::new(settings(scratch.path(), emulator()))
        .launch()
        .await
        .unwrap();

    let mode = std::fs::metadata(&stale).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    assert_ne!(std::fs::read(&stale).unwrap(), b"stale");
    handle.shutdown().await;
}

#[tokio::test]
async fn test_relaunch_over_running_payload() {
    let scratch = TempDir::new().unwrap();
    let supervisor = Supervisor::new(settings(scratch.path(), emulator()));

    let mut first = supervisor.launch().await.unwrap();
    {
        let session = first.session();
        session.lock().await.create().await.unwrap();
    }

    // Same payload path while the first process still runs from it
    let mut second = supervisor.launch().await.unwrap();
    assert_eq!(first.payload_path(), second.payload_path());
    assert_ne!(first.pid(), second.pid());

    assert!(!first.has_exited().unwrap());
    assert!(!second.has_exited().unwrap());
    {
        let session = first.session();
        let mut session = session.lock().await;
        assert!(session.get_id().await.unwrap().starts_with("anchor-"));
    }
    {
        let session = second.session();
        let mut session = session.lock().await;
        session.create().await.unwrap();
        assert_eq!(session.state(), AnchorState::Created);
    }

    let (first_pid, second_pid) = (first.pid().unwrap(), second.pid().unwrap());
    first.shutdown().await;
    second.shutdown().await;
    assert!(!process_alive(first_pid));
    assert!(!process_alive(second_pid));
}

#[tokio::test]
async fn test_early_exit_is_spawn_failure() {
    let scratch = TempDir::new().unwrap();
    let payloads = TempDir::new().unwrap();
    let payload = script(payloads.path(), "dies", "echo starting; exit 3");

    let err = Supervisor::new(settings(scratch.path(), payload))
        .launch()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConfluxError::SpawnFailed(_)));
}

#[tokio::test]
async fn test_wrong_protocol_version_rejected() {
    let scratch = TempDir::new().unwrap();
    let payloads = TempDir::new().unwrap();
    let payload = script(
        payloads.path(),
        "wrong-version",
        "echo '1|9|tcp|127.0.0.1:1|jsonl'; sleep 30",
    );

    let err = Supervisor::new(settings(scratch.path(), payload))
        .launch()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConfluxError::TransportUnavailable(_)));
}

#[tokio::test]
async fn test_loopback_gives_up_after_attempts() {
    let scratch = TempDir::new().unwrap();
    let payloads = TempDir::new().unwrap();
    let payload = script(payloads.path(), "silent", "sleep 30");
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let settings = AnchorSettings {
        binding: Binding::Loopback,
        loopback_port: port,
        connect_attempts: 2,
        ..settings(scratch.path(), payload)
    };

    let err = Supervisor::new(settings).launch().await.err().unwrap();
    assert!(matches!(err, ConfluxError::TransportUnavailable(_)));
}
