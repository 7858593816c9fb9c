//! Anchor control interface
//!
//! The anchor is the tunneling engine running in its own process. This module
//! holds the typed contract ([`api`]), the client stub, the lifecycle session
//! that enforces call ordering, and a reference anchor used by the emulator
//! binary and the tests.

pub mod api;
mod client;
pub mod emulator;
mod session;
mod taint;

pub use api::{
    AnchorCall, AnchorConfig, AnchorFault, AnchorRequest, AnchorResponse, TunSpec,
    ANCHOR_CAPABILITY,
};
pub use client::AnchorClient;
pub use emulator::ReferenceAnchor;
pub use session::{AnchorSession, AnchorState};
pub use taint::TaintSet;
