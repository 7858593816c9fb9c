//! Lifecycle facade used by the CLI
//!
//! Wraps the platform service backend and the foreground run path behind
//! the operations the CLI exposes.

use crate::config::{ConfigStore, Settings};
use crate::error::Result;
use crate::runtime;
use crate::security;
use crate::service::{self, ExecutablePath, RemoveOutcome, Service, ServiceMode, ServiceState};
use tracing::info;

/// The controller as an installable service
pub struct Conflux {
    service: Box<dyn Service>,
}

impl Conflux {
    /// Controller using the backend for this platform
    pub fn new() -> Self {
        Self::with_service(service::create_service())
    }

    /// Controller using a specific backend
    pub fn with_service(service: Box<dyn Service>) -> Self {
        Self { service }
    }

    /// Install this executable as the service; needs elevation
    pub fn install(&self) -> Result<()> {
        security::require_elevated("Installing the service")?;
        let exec = ExecutablePath::current()?;
        self.install_executable(&exec)
    }

    /// Install `exec` as the service, replacing an existing installation
    pub fn install_executable(&self, exec: &ExecutablePath) -> Result<()> {
        self.service.install(exec)
    }

    /// Start the installed service
    pub fn start(&self) -> Result<()> {
        self.service.start()
    }

    /// Stop the installed service
    pub fn stop(&self) -> Result<()> {
        self.service.stop()
    }

    /// Remove the service; absent is fine
    pub fn remove(&self) -> Result<RemoveOutcome> {
        self.service.remove()
    }

    /// Live service state
    pub fn status(&self) -> Result<ServiceState> {
        self.service.status()
    }

    /// Service label for display
    pub fn label(&self) -> &str {
        self.service.label()
    }

    /// Run in the foreground with the persisted config until signalled
    pub async fn run(&self, settings: &Settings, store: &ConfigStore) -> Result<()> {
        let config = store.load()?;
        info!(
            "Running conflux {} ({} mode)",
            config.conflux_id,
            ServiceMode::detect()
        );
        runtime::run(
            settings,
            &config,
            Some(store.clone()),
            runtime::shutdown_signal(),
        )
        .await
    }
}

impl Default for Conflux {
    fn default() -> Self {
        Self::new()
    }
}
