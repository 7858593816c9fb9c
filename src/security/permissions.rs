//! File permission validation and enforcement
//!
//! The persisted config carries the conflux token, service descriptors are
//! read by the service manager, and the control socket is shared with the
//! admin group. Each gets its own mode.

use crate::error::{ConfluxError, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Secure file mode requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureFileMode {
    /// File holding credentials (0600)
    Secret,
    /// Service descriptor read by the OS service manager (0644)
    Descriptor,
    /// Control socket (0660)
    Socket,
    /// Executable payload (0755)
    Executable,
}

impl SecureFileMode {
    /// Mode applied to new files of this kind, also the loosest accepted
    pub fn mode(&self) -> u32 {
        match self {
            Self::Secret => 0o600,
            Self::Descriptor => 0o644,
            Self::Socket => 0o660,
            Self::Executable => 0o755,
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Secret => "0600 (owner read/write only)",
            Self::Descriptor => "0644 (owner read/write, others read)",
            Self::Socket => "0660 (owner/group read/write)",
            Self::Executable => "0755 (owner full, others read/execute)",
        }
    }
}

/// Check that a file is not more permissive than `mode` allows
#[cfg(unix)]
pub fn validate_file_permissions(path: &Path, mode: SecureFileMode) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    debug!("Validating permissions for {:?}", path);

    let metadata = std::fs::metadata(path).map_err(|e| {
        ConfluxError::Permission(format!("Failed to read metadata for {:?}: {}", path, e))
    })?;

    let file_mode = metadata.permissions().mode() & 0o777;
    let allowed = mode.mode();

    if file_mode & !allowed != 0 {
        warn!(
            "File {:?} has insecure permissions: {:o} (max: {:o})",
            path, file_mode, allowed
        );
        return Err(ConfluxError::Permission(format!(
            "File {:?} has insecure permissions: {:o}, expected {}",
            path,
            file_mode,
            mode.description()
        )));
    }

    debug!("Permissions valid for {:?}: {:o}", path, file_mode);
    Ok(())
}

/// Check file permissions (non-Unix stub)
#[cfg(not(unix))]
pub fn validate_file_permissions(path: &Path, _mode: SecureFileMode) -> Result<()> {
    debug!("Permission validation not implemented for this platform: {:?}", path);
    Ok(())
}

/// Apply `mode` to a file
#[cfg(unix)]
pub fn set_secure_permissions(path: &Path, mode: SecureFileMode) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(mode.mode());
    std::fs::set_permissions(path, perms).map_err(|e| {
        ConfluxError::Permission(format!("Failed to set permissions on {:?}: {}", path, e))
    })?;

    debug!("Set permissions on {:?}: {:o}", path, mode.mode());
    Ok(())
}

/// Apply file permissions (non-Unix stub)
#[cfg(not(unix))]
pub fn set_secure_permissions(path: &Path, _mode: SecureFileMode) -> Result<()> {
    debug!("Permission setting not implemented for this platform: {:?}", path);
    Ok(())
}
