//! conflux: host-side controller for the VeilNet anchor
//!
//! The controller supervises a privileged tunneling subprocess (the anchor),
//! drives it through a typed command contract, and manages its own presence
//! as an OS background service.
//!
//! # Architecture
//!
//! The anchor owns the data plane. The controller only launches it, commands
//! it over a newline-delimited JSON channel, and tears it down again. All
//! anchor calls go through one [`AnchorSession`](anchor::AnchorSession) that
//! enforces the lifecycle order.
//!
//! # Modules
//!
//! - `anchor`: command contract, typed client, session state machine, reference anchor
//! - `transport`: handshake and loopback bindings to the anchor
//! - `supervisor`: payload materialization, spawn, readiness and shutdown
//! - `runtime`: bring-up, signal wait and unwind
//! - `service`: systemd, launchd and Windows service backends
//! - `control`: local control socket
//! - `config`: settings file and persisted config store
//! - `registration`: Guardian registration client
//! - `security`: privilege checks and file permissions
//! - `logging`: tracing subscriber setup
//! - `error`: error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod anchor;
pub mod config;
pub mod conflux;
pub mod control;
pub mod error;
pub mod logging;
pub mod registration;
pub mod runtime;
pub mod security;
pub mod service;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types
pub use conflux::Conflux;
pub use error::{ConfluxError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
