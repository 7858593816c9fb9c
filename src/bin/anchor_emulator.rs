//! anchor-emulator: reference anchor for development and tests
//!
//! Speaks the anchor command contract without a data plane. When started by
//! the controller with the handshake cookie it binds an ephemeral loopback
//! port and advertises it on stdout; otherwise it listens on the loopback
//! address from `CONFLUX_ANCHOR_ADDR` (default `127.0.0.1:1993`).

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{error, info};

use conflux::{
    anchor::{emulator, ReferenceAnchor},
    runtime,
    transport::{
        handshake::PROTOCOL_VERSION_ENV, loopback_addr, Endpoint, Handshake, HandshakeConfig,
        ANCHOR_ADDR_ENV, DEFAULT_LOOPBACK_PORT,
    },
};

#[tokio::main]
async fn main() {
    // stdout carries the handshake; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let handshake = HandshakeConfig::default();
    let anchor = ReferenceAnchor::new();
    let id = anchor.id().to_string();
    let anchor = Arc::new(Mutex::new(anchor));

    let listener = if handshake.cookie_present() {
        let listener = TcpListener::bind(loopback_addr(0)).await?;
        let protocol_version = std::env::var(PROTOCOL_VERSION_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(handshake.protocol_version);

        let line = Handshake::new(protocol_version, Endpoint::Tcp(listener.local_addr()?)).to_line();
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        listener
    } else {
        let addr: SocketAddr = match std::env::var(ANCHOR_ADDR_ENV) {
            Ok(addr) => addr.parse()?,
            Err(_) => loopback_addr(DEFAULT_LOOPBACK_PORT),
        };
        TcpListener::bind(addr).await?
    };

    info!("Reference anchor {} ready", id);

    tokio::select! {
        result = emulator::serve(listener, anchor) => result?,
        _ = runtime::shutdown_signal() => info!("Reference anchor exiting"),
    }
    Ok(())
}
