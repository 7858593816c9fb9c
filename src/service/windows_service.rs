//! Windows Service Control Manager integration
//!
//! Registration goes through `sc.exe`. A descriptor record with the same
//! settings is kept under `%ProgramData%\conflux` so installs can be inspected
//! and compared like the unit and plist on the other platforms.

use super::command::{run_checked, CommandRunner, SystemCommandRunner};
use super::descriptor::{self, ExecutablePath};
use super::{Service, ServiceState};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Service name registered with the SCM
pub const WINDOWS_SERVICE_NAME: &str = "VeilNetConflux";

const DISPLAY_NAME: &str = "VeilNet Conflux";

/// `sc.exe` exit code for ERROR_SERVICE_DOES_NOT_EXIST
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

/// Restart after 5 s on each of the first three failures, reset daily
const FAILURE_ACTIONS: &str = "restart/5000/restart/5000/restart/5000";
const FAILURE_RESET_SECS: &str = "86400";

const RECORD_TEMPLATE: &str = "\
name=VeilNetConflux
display_name=VeilNet Conflux
binary_path={{exec_path}}
start=auto
failure_actions=restart/5000/restart/5000/restart/5000
failure_reset_secs=86400
";

fn default_record_path() -> PathBuf {
    std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
        .join("conflux")
        .join("service.conf")
}

/// Windows Service implementation
pub struct WindowsService {
    runner: Arc<dyn CommandRunner>,
    record_path: PathBuf,
}

impl WindowsService {
    /// Service using `sc.exe` and the standard record path
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner), default_record_path())
    }

    /// Service with a custom command runner and record path
    pub fn with_runner(runner: Arc<dyn CommandRunner>, record_path: PathBuf) -> Self {
        Self {
            runner,
            record_path,
        }
    }

    fn sc(&self, args: &[&str]) -> Result<()> {
        run_checked(self.runner.as_ref(), "sc.exe", args).map(drop)
    }
}

impl Default for WindowsService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for WindowsService {
    fn label(&self) -> &str {
        WINDOWS_SERVICE_NAME
    }

    fn descriptor_path(&self) -> &Path {
        &self.record_path
    }

    fn render_descriptor(&self, exec: &ExecutablePath) -> Result<String> {
        descriptor::render(RECORD_TEMPLATE, exec.as_str()?)
    }

    fn register(&self, exec: &ExecutablePath) -> Result<()> {
        let record = self.render_descriptor(exec)?;
        descriptor::write_descriptor(&self.record_path, &record)?;

        let bin_path = format!("\"{}\"", exec.as_str()?);
        self.sc(&[
            "create",
            WINDOWS_SERVICE_NAME,
            "binPath=",
            &bin_path,
            "start=",
            "auto",
            "DisplayName=",
            DISPLAY_NAME,
        ])?;
        self.sc(&[
            "failure",
            WINDOWS_SERVICE_NAME,
            "reset=",
            FAILURE_RESET_SECS,
            "actions=",
            FAILURE_ACTIONS,
        ])?;
        self.sc(&["start", WINDOWS_SERVICE_NAME])?;
        info!("Started {}", WINDOWS_SERVICE_NAME);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.sc(&["start", WINDOWS_SERVICE_NAME])?;
        info!("Started {}", WINDOWS_SERVICE_NAME);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.sc(&["stop", WINDOWS_SERVICE_NAME])?;
        info!("Stopped {}", WINDOWS_SERVICE_NAME);
        Ok(())
    }

    fn deregister(&self, state: ServiceState) -> Result<()> {
        if state == ServiceState::Running {
            if let Err(e) = self.stop() {
                warn!("Failed to stop {} before delete: {}", WINDOWS_SERVICE_NAME, e);
            }
        }
        self.sc(&["delete", WINDOWS_SERVICE_NAME])?;
        descriptor::remove_descriptor(&self.record_path)?;
        Ok(())
    }

    fn status(&self) -> Result<ServiceState> {
        let args = vec!["query".to_string(), WINDOWS_SERVICE_NAME.to_string()];
        let output = self.runner.run("sc.exe", &args)?;

        if output.code == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
            return Ok(ServiceState::NotInstalled);
        }

        let output = output.check("sc.exe", &args)?;
        let state = if output.stdout.contains("RUNNING") {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        };
        debug!("{} state: {}", WINDOWS_SERVICE_NAME, state);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{CommandOutput, MockCommandRunner, RemoveOutcome};

    const QUERY_RUNNING: &str = "SERVICE_NAME: VeilNetConflux\r\n        TYPE               : 10  WIN32_OWN_PROCESS\r\n        STATE              : 4  RUNNING\r\n";

    #[test]
    fn test_status_mapping() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(CommandOutput::failed(1060, "The specified service does not exist")));
        let service = WindowsService::with_runner(Arc::new(runner), PathBuf::from("record"));
        assert_eq!(service.status().unwrap(), ServiceState::NotInstalled);

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok(QUERY_RUNNING)));
        let service = WindowsService::with_runner(Arc::new(runner), PathBuf::from("record"));
        assert_eq!(service.status().unwrap(), ServiceState::Running);

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(CommandOutput::failed(5, "Access is denied.")));
        let service = WindowsService::with_runner(Arc::new(runner), PathBuf::from("record"));
        assert!(service.status().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_record_contents() {
        let exec = ExecutablePath::from_paths("/opt/conflux".into(), "/opt/conflux".into()).unwrap();
        let record = WindowsService::new().render_descriptor(&exec).unwrap();
        assert!(record.contains("binary_path=/opt/conflux\n"));
        assert!(record.contains("start=auto"));
    }

    #[test]
    fn test_remove_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(CommandOutput::failed(1060, "")));

        let service = WindowsService::with_runner(Arc::new(runner), dir.path().join("service.conf"));
        assert_eq!(service.remove().unwrap(), RemoveOutcome::AlreadyAbsent);
    }
}
