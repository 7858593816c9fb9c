//! Local control API
//!
//! While the controller runs, other invocations of the CLI reach the anchor
//! session through a Unix socket speaking JSON lines.

mod api;
mod client;
mod handler;
mod server;

pub use api::{ApiError, ApiRequest, ApiResponse, ControlAction};
pub use client::ControlClient;
pub use handler::CommandHandler;
pub use server::{ControlServer, DEFAULT_SOCKET_PATH};
