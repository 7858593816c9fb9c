//! Systemd service integration for Linux

use super::command::{run_checked, CommandRunner, SystemCommandRunner};
use super::descriptor::{self, ExecutablePath};
use super::{Service, ServiceState};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Unit name
pub const SYSTEMD_UNIT_NAME: &str = "veilnet.service";

/// Unit file location
pub const SYSTEMD_UNIT_PATH: &str = "/etc/systemd/system/veilnet.service";

const UNIT_TEMPLATE: &str = "\
[Unit]
Description=VeilNet Conflux Service
After=network.target
Wants=network.target
Before=multi-user.target

[Service]
Type=simple
ExecStart={{exec_path}}
Restart=always
RestartSec=5
User=root
Group=root
TimeoutStopSec=30
KillMode=mixed
KillSignal=SIGTERM

[Install]
WantedBy=multi-user.target
";

/// Systemd service implementation
pub struct SystemdService {
    runner: Arc<dyn CommandRunner>,
    unit_path: PathBuf,
}

impl SystemdService {
    /// Service using `systemctl` and the standard unit path
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner), PathBuf::from(SYSTEMD_UNIT_PATH))
    }

    /// Service with a custom command runner and unit path
    pub fn with_runner(runner: Arc<dyn CommandRunner>, unit_path: PathBuf) -> Self {
        Self { runner, unit_path }
    }

    fn systemctl(&self, args: &[&str]) -> Result<()> {
        run_checked(self.runner.as_ref(), "systemctl", args).map(drop)
    }
}

impl Default for SystemdService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for SystemdService {
    fn label(&self) -> &str {
        SYSTEMD_UNIT_NAME
    }

    fn descriptor_path(&self) -> &Path {
        &self.unit_path
    }

    fn render_descriptor(&self, exec: &ExecutablePath) -> Result<String> {
        let path = exec.as_str()?;
        let value = if path.contains(char::is_whitespace) {
            format!("\"{}\"", path)
        } else {
            path.to_string()
        };
        descriptor::render(UNIT_TEMPLATE, &value)
    }

    fn register(&self, exec: &ExecutablePath) -> Result<()> {
        let unit = self.render_descriptor(exec)?;
        descriptor::write_descriptor(&self.unit_path, &unit)?;

        self.systemctl(&["daemon-reload"])?;
        self.systemctl(&["enable", SYSTEMD_UNIT_NAME])?;
        self.systemctl(&["start", SYSTEMD_UNIT_NAME])?;
        info!("Started {}", SYSTEMD_UNIT_NAME);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.systemctl(&["start", SYSTEMD_UNIT_NAME])?;
        info!("Started {}", SYSTEMD_UNIT_NAME);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.systemctl(&["stop", SYSTEMD_UNIT_NAME])?;
        info!("Stopped {}", SYSTEMD_UNIT_NAME);
        Ok(())
    }

    fn deregister(&self, state: ServiceState) -> Result<()> {
        if state == ServiceState::Running {
            self.stop()?;
        }

        if let Err(e) = self.systemctl(&["disable", SYSTEMD_UNIT_NAME]) {
            warn!("Failed to disable {}: {}", SYSTEMD_UNIT_NAME, e);
        }

        descriptor::remove_descriptor(&self.unit_path)?;
        self.systemctl(&["daemon-reload"])?;
        Ok(())
    }

    fn status(&self) -> Result<ServiceState> {
        let output = run_checked(
            self.runner.as_ref(),
            "systemctl",
            &["show", SYSTEMD_UNIT_NAME, "--property=LoadState,ActiveState"],
        )?;
        let state = parse_show_output(&output.stdout);
        debug!("{} state: {}", SYSTEMD_UNIT_NAME, state);
        Ok(state)
    }
}

fn parse_show_output(stdout: &str) -> ServiceState {
    let mut load_state = "";
    let mut active_state = "";

    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "LoadState" => load_state = value.trim(),
                "ActiveState" => active_state = value.trim(),
                _ => {}
            }
        }
    }

    match (load_state, active_state) {
        ("not-found", _) | ("", _) => ServiceState::NotInstalled,
        (_, "active" | "activating" | "reloading") => ServiceState::Running,
        _ => ServiceState::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfluxError;
    use crate::service::{CommandOutput, MockCommandRunner, RemoveOutcome};
    use mockall::Sequence;

    fn exec() -> ExecutablePath {
        ExecutablePath::from_paths("/usr/bin/conflux".into(), "/opt/conflux/conflux".into()).unwrap()
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_show_output() {
        assert_eq!(
            parse_show_output("LoadState=loaded\nActiveState=active\n"),
            ServiceState::Running
        );
        assert_eq!(
            parse_show_output("LoadState=loaded\nActiveState=inactive\n"),
            ServiceState::Stopped
        );
        assert_eq!(
            parse_show_output("LoadState=not-found\nActiveState=inactive\n"),
            ServiceState::NotInstalled
        );
    }

    #[test]
    fn test_unit_contents() {
        let service = SystemdService::new();
        let unit = service.render_descriptor(&exec()).unwrap();
        assert!(unit.contains("ExecStart=/opt/conflux/conflux\n"));
        assert!(unit.contains("Type=simple"));
        assert!(unit.contains("Restart=always"));
        assert!(unit.contains("WantedBy=multi-user.target"));
        assert!(unit.contains("Wants=network.target\n"));
        assert!(unit.contains("Group=root\n"));
        assert!(unit.contains("KillSignal=SIGTERM\n"));
        assert_eq!(unit.matches("/opt/conflux/conflux").count(), 1);
    }

    #[test]
    fn test_unit_quotes_paths_with_spaces() {
        let exec =
            ExecutablePath::from_paths("/opt/my apps/conflux".into(), "/opt/my apps/conflux".into())
                .unwrap();
        let unit = SystemdService::new().render_descriptor(&exec).unwrap();
        assert!(unit.contains("ExecStart=\"/opt/my apps/conflux\"\n"));
    }

    #[test]
    fn test_install_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let unit_path = dir.path().join("veilnet.service");
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();

        runner
            .expect_run()
            .withf(|p, a| p == "systemctl" && a.first().map(String::as_str) == Some("show"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(CommandOutput::ok("LoadState=not-found\nActiveState=inactive\n")));
        for expected in [
            args(&["daemon-reload"]),
            args(&["enable", SYSTEMD_UNIT_NAME]),
            args(&["start", SYSTEMD_UNIT_NAME]),
        ] {
            runner
                .expect_run()
                .withf(move |p, a| p == "systemctl" && a == expected.as_slice())
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(CommandOutput::ok("")));
        }

        let service = SystemdService::with_runner(Arc::new(runner), unit_path.clone());
        service.install(&exec()).unwrap();

        let unit = std::fs::read_to_string(unit_path).unwrap();
        assert!(unit.contains("ExecStart=/opt/conflux/conflux"));
    }

    #[test]
    fn test_remove_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("LoadState=not-found\nActiveState=inactive\n")));

        let service = SystemdService::with_runner(Arc::new(runner), dir.path().join("veilnet.service"));
        assert_eq!(service.remove().unwrap(), RemoveOutcome::AlreadyAbsent);
    }

    #[test]
    fn test_start_failure_surfaces_output() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(CommandOutput::failed(5, "Unit veilnet.service not found.")));

        let service = SystemdService::with_runner(Arc::new(runner), PathBuf::from("/nonexistent"));
        match service.start().unwrap_err() {
            ConfluxError::ServiceManagerFailure { command, output, .. } => {
                assert_eq!(command, "systemctl start veilnet.service");
                assert!(output.contains("not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
