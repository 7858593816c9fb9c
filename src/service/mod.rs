//! OS service lifecycle management
//!
//! This module installs, starts, stops and removes the controller as a system
//! service under systemd (Linux), launchd (macOS) or the Service Control
//! Manager (Windows). Every backend compiles on every platform; the one used
//! at runtime is picked by `target_os` in [`create_service`].
//!
//! All OS shell-outs go through a [`CommandRunner`] so backends can be
//! exercised without touching the host.

mod command;
pub mod descriptor;
mod launchd;
mod systemd;
mod windows_service;

pub use command::{run_checked, CommandOutput, CommandRunner, SystemCommandRunner};
pub use descriptor::ExecutablePath;
pub use launchd::{LaunchdService, LAUNCHD_LABEL, LAUNCHD_PLIST_PATH};
pub use systemd::{SystemdService, SYSTEMD_UNIT_NAME, SYSTEMD_UNIT_PATH};
pub use windows_service::{WindowsService, WINDOWS_SERVICE_NAME};

#[cfg(test)]
pub use command::MockCommandRunner;

use crate::error::Result;
use std::path::Path;
use tracing::{debug, info};

/// Live state of the installed service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// No service registered
    NotInstalled,
    /// Registered but not running
    Stopped,
    /// Registered and running
    Running,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "not installed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Result of [`Service::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The service was registered and has been removed
    Removed,
    /// Nothing was registered
    AlreadyAbsent,
}

/// Service lifecycle trait
///
/// Backends implement the primitive operations; `install` and `remove`
/// layer the reinstall and tolerate-absent rules on top.
pub trait Service: Send + Sync {
    /// Service name as known to the OS service manager
    fn label(&self) -> &str;

    /// Where the descriptor is written
    fn descriptor_path(&self) -> &Path;

    /// Render the descriptor for `exec`
    fn render_descriptor(&self, exec: &ExecutablePath) -> Result<String>;

    /// Write the descriptor, register, enable and start
    fn register(&self, exec: &ExecutablePath) -> Result<()>;

    /// Start the registered service
    fn start(&self) -> Result<()>;

    /// Stop the registered service
    fn stop(&self) -> Result<()>;

    /// Stop if needed, unregister and delete the descriptor
    fn deregister(&self, state: ServiceState) -> Result<()>;

    /// Query the OS service manager
    fn status(&self) -> Result<ServiceState>;

    /// Install the service, replacing any existing installation
    fn install(&self, exec: &ExecutablePath) -> Result<()> {
        let state = self.status()?;
        if state != ServiceState::NotInstalled {
            info!("Service {} already installed ({}), reinstalling", self.label(), state);
            self.deregister(state)?;
        }

        self.register(exec)?;
        info!(
            "Service {} installed for {}",
            self.label(),
            exec.real_path.display()
        );
        Ok(())
    }

    /// Remove the service; an absent service is not an error
    fn remove(&self) -> Result<RemoveOutcome> {
        let state = self.status()?;
        if state == ServiceState::NotInstalled {
            if descriptor::remove_descriptor(self.descriptor_path())? {
                debug!("Removed orphaned descriptor {:?}", self.descriptor_path());
            }
            info!("Service {} is not installed", self.label());
            return Ok(RemoveOutcome::AlreadyAbsent);
        }

        self.deregister(state)?;
        info!("Service {} removed", self.label());
        Ok(RemoveOutcome::Removed)
    }
}

/// How the controller process is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Started by the OS service manager
    Daemon,
    /// Running inside a container
    Container,
    /// Started by hand in the foreground
    Foreground,
}

impl ServiceMode {
    /// Detect service mode from environment
    pub fn detect() -> Self {
        if is_container() {
            debug!("Detected container environment");
            return Self::Container;
        }

        // systemd sets INVOCATION_ID for every unit it starts
        if std::env::var_os("INVOCATION_ID").is_some() || std::env::var_os("NOTIFY_SOCKET").is_some() {
            debug!("Detected systemd service");
            return Self::Daemon;
        }

        // launchd sets XPC_SERVICE_NAME to the job label
        if std::env::var("XPC_SERVICE_NAME").is_ok_and(|name| name == LAUNCHD_LABEL) {
            debug!("Detected LaunchDaemon");
            return Self::Daemon;
        }

        debug!("Defaulting to foreground mode");
        Self::Foreground
    }
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daemon => write!(f, "daemon"),
            Self::Container => write!(f, "container"),
            Self::Foreground => write!(f, "foreground"),
        }
    }
}

fn is_container() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }

    if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
        return true;
    }

    #[cfg(target_os = "linux")]
    if let Ok(contents) = std::fs::read_to_string("/proc/1/cgroup") {
        if contents.contains("docker")
            || contents.contains("kubepods")
            || contents.contains("containerd")
        {
            return true;
        }
    }

    false
}

/// Service backend for the platform this was built for
pub fn create_service() -> Box<dyn Service> {
    #[cfg(target_os = "macos")]
    {
        Box::new(LaunchdService::new())
    }

    #[cfg(windows)]
    {
        Box::new(WindowsService::new())
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    {
        Box::new(SystemdService::new())
    }
}
