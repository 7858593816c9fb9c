//! Service descriptor rendering
//!
//! Every backend's descriptor (systemd unit, launchd plist, Windows record)
//! is a fixed template with one substitution: the controller's own
//! executable path. Descriptors are derived state, regenerated on each install.

use crate::error::{ConfluxError, Result};
use crate::security::{self, SecureFileMode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The only substitution variable in descriptor templates
pub const EXEC_PATH_VAR: &str = "{{exec_path}}";

/// Path of the executable the service manager should run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutablePath {
    /// Path as reported by the OS
    pub path: PathBuf,
    /// Path with symlinks resolved
    pub real_path: PathBuf,
}

impl ExecutablePath {
    /// Resolve the currently running executable
    pub fn current() -> Result<Self> {
        let path = std::env::current_exe().map_err(|e| {
            ConfluxError::Config(format!("Failed to resolve own executable: {}", e))
        })?;
        Self::resolve(path)
    }

    /// Resolve symlinks of `path`, keeping it as-is if it cannot be resolved
    pub fn resolve(path: PathBuf) -> Result<Self> {
        let real_path = fs::canonicalize(&path).unwrap_or_else(|e| {
            debug!("Could not resolve {:?}, using it unresolved: {}", path, e);
            path.clone()
        });
        Self::from_paths(path, real_path)
    }

    /// Build from already-resolved paths
    pub fn from_paths(path: PathBuf, real_path: PathBuf) -> Result<Self> {
        validate_exec_path(&real_path)?;
        Ok(Self { path, real_path })
    }

    /// The path written into descriptors
    pub fn as_str(&self) -> Result<&str> {
        self.real_path.to_str().ok_or_else(|| {
            ConfluxError::Validation(format!("Executable path {:?} is not valid UTF-8", self.real_path))
        })
    }
}

fn validate_exec_path(path: &Path) -> Result<()> {
    let text = path.to_str().ok_or_else(|| {
        ConfluxError::Validation(format!("Executable path {:?} is not valid UTF-8", path))
    })?;

    if !path.is_absolute() {
        return Err(ConfluxError::Validation(format!(
            "Executable path '{}' must be absolute",
            text
        )));
    }

    // These would break out of the unit, plist or sc.exe quoting
    if let Some(c) = text
        .chars()
        .find(|c| c.is_control() || matches!(c, '"' | '<' | '>' | '&' | '%' | '\''))
    {
        return Err(ConfluxError::Validation(format!(
            "Executable path '{}' contains unsupported character {:?}",
            text.escape_debug(),
            c
        )));
    }

    Ok(())
}

/// Substitute `value` for the single `{{exec_path}}` in `template`
pub fn render(template: &str, value: &str) -> Result<String> {
    if template.matches(EXEC_PATH_VAR).count() != 1 {
        return Err(ConfluxError::Config(format!(
            "Descriptor template must contain {} exactly once",
            EXEC_PATH_VAR
        )));
    }

    let rendered = template.replacen(EXEC_PATH_VAR, value, 1);
    if template.replacen(EXEC_PATH_VAR, "", 1).contains("{{") {
        return Err(ConfluxError::Config(
            "Descriptor template has unknown substitution variables".to_string(),
        ));
    }

    Ok(rendered)
}

/// Write a descriptor file, creating its directory
pub fn write_descriptor(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    security::set_secure_permissions(path, SecureFileMode::Descriptor)?;
    debug!("Wrote service descriptor {:?}", path);
    Ok(())
}

/// Delete a descriptor file; an absent file is fine
pub fn remove_descriptor(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed service descriptor {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
