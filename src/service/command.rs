//! Shell-outs to the OS service manager

use crate::error::{ConfluxError, Result};
use std::process::Command;
use tracing::debug;

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Whether the exit status was success
    pub success: bool,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Turn a non-zero exit into `ServiceManagerFailure`
    pub fn check(self, program: &str, args: &[String]) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(ConfluxError::ServiceManagerFailure {
            command: command_line(program, args),
            status: self.status_text(),
            output: self.diagnostics(),
        })
    }

    fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status: {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{}\n{}", stderr, stdout),
            (false, true) => stderr.to_string(),
            (true, _) => stdout.to_string(),
        }
    }
}

/// Runs external commands
///
/// A non-zero exit is not an error at this level; callers decide through
/// [`run_checked`] or by inspecting the output.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands with `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("Running {} {}", program, args.join(" "));

        let output = Command::new(program).args(args).output().map_err(|e| {
            ConfluxError::ServiceManagerFailure {
                command: command_line(program, args),
                status: "failed to start".to_string(),
                output: e.to_string(),
            }
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command and turn a non-zero exit into `ServiceManagerFailure`
pub fn run_checked(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> Result<CommandOutput> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    runner.run(program, &args)?.check(program, &args)
}

fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
