//! LaunchDaemon service integration for macOS

use super::command::{run_checked, CommandRunner, SystemCommandRunner};
use super::descriptor::{self, ExecutablePath};
use super::{Service, ServiceState};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Job label
pub const LAUNCHD_LABEL: &str = "org.veilnet.conflux";

/// Plist location
pub const LAUNCHD_PLIST_PATH: &str = "/Library/LaunchDaemons/org.veilnet.conflux.plist";

// `launchctl` exits with ESRCH or "could not find service" for unknown jobs
const JOB_NOT_LOADED: [i32; 2] = [3, 113];

const PLIST_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>Label</key>
	<string>org.veilnet.conflux</string>
	<key>ProgramArguments</key>
	<array>
		<string>{{exec_path}}</string>
	</array>
	<key>RunAtLoad</key>
	<true/>
	<key>KeepAlive</key>
	<true/>
	<key>StandardOutPath</key>
	<string>/var/log/veilnet-conflux.log</string>
	<key>StandardErrorPath</key>
	<string>/var/log/veilnet-conflux.error.log</string>
</dict>
</plist>
"#;

/// LaunchDaemon service implementation
///
/// launchd has no separate enable step: `bootstrap` loads and, with
/// `RunAtLoad`, starts the job; `bootout` stops and unloads it.
pub struct LaunchdService {
    runner: Arc<dyn CommandRunner>,
    plist_path: PathBuf,
}

impl LaunchdService {
    /// Service using `launchctl` and the standard plist path
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner), PathBuf::from(LAUNCHD_PLIST_PATH))
    }

    /// Service with a custom command runner and plist path
    pub fn with_runner(runner: Arc<dyn CommandRunner>, plist_path: PathBuf) -> Self {
        Self { runner, plist_path }
    }

    fn plist(&self) -> Result<&str> {
        self.plist_path.to_str().ok_or_else(|| {
            crate::error::ConfluxError::Config(format!(
                "Plist path {:?} is not valid UTF-8",
                self.plist_path
            ))
        })
    }

    fn launchctl(&self, args: &[&str]) -> Result<()> {
        run_checked(self.runner.as_ref(), "launchctl", args).map(drop)
    }

    /// Unload the job whether or not it is running; a job that is not
    /// loaded is fine
    fn bootout(&self) -> Result<()> {
        let args = vec![
            "bootout".to_string(),
            "system".to_string(),
            self.plist()?.to_string(),
        ];
        let output = self.runner.run("launchctl", &args)?;
        if !output.success && output.code.is_some_and(|c| JOB_NOT_LOADED.contains(&c)) {
            debug!("{} was not loaded", LAUNCHD_LABEL);
            return Ok(());
        }
        output.check("launchctl", &args)?;
        info!("Booted out {}", LAUNCHD_LABEL);
        Ok(())
    }
}

impl Default for LaunchdService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for LaunchdService {
    fn label(&self) -> &str {
        LAUNCHD_LABEL
    }

    fn descriptor_path(&self) -> &Path {
        &self.plist_path
    }

    fn render_descriptor(&self, exec: &ExecutablePath) -> Result<String> {
        descriptor::render(PLIST_TEMPLATE, exec.as_str()?)
    }

    fn register(&self, exec: &ExecutablePath) -> Result<()> {
        let plist = self.render_descriptor(exec)?;
        descriptor::write_descriptor(&self.plist_path, &plist)?;
        self.launchctl(&["bootstrap", "system", self.plist()?])?;
        info!("Bootstrapped {}", LAUNCHD_LABEL);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.launchctl(&["bootstrap", "system", self.plist()?])?;
        info!("Started {}", LAUNCHD_LABEL);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.launchctl(&["bootout", "system", self.plist()?])?;
        info!("Stopped {}", LAUNCHD_LABEL);
        Ok(())
    }

    fn deregister(&self, _state: ServiceState) -> Result<()> {
        // A loaded job that is not running still holds the label
        self.bootout()?;
        descriptor::remove_descriptor(&self.plist_path)?;
        Ok(())
    }

    fn status(&self) -> Result<ServiceState> {
        if !self.plist_path.exists() {
            return Ok(ServiceState::NotInstalled);
        }

        let target = format!("system/{}", LAUNCHD_LABEL);
        let output = self
            .runner
            .run("launchctl", &["print".to_string(), target])?;

        // `launchctl print` fails once the job has been booted out
        let state = if output.success && output.stdout.contains("state = running") {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        };
        debug!("{} state: {}", LAUNCHD_LABEL, state);
        Ok(state)
    }
}
