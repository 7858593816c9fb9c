//! Privilege detection
//!
//! Installing the service and creating the TUN device both need root
//! (or Administrator on Windows).

use crate::error::{ConfluxError, Result};
use tracing::debug;

/// Privilege level of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    /// Running as root (Unix)
    Root,
    /// Running as Administrator (Windows)
    Administrator,
    /// Running as regular user
    User,
    /// Unknown privilege level
    Unknown,
}

impl PrivilegeLevel {
    /// Detect current privilege level
    pub fn detect() -> Self {
        #[cfg(unix)]
        {
            let uid = unsafe { libc::getuid() };
            let euid = unsafe { libc::geteuid() };

            if uid == 0 || euid == 0 {
                return Self::Root;
            }
            Self::User
        }

        #[cfg(windows)]
        {
            // `net session` only succeeds from an elevated prompt
            let elevated = std::process::Command::new("net")
                .arg("session")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);

            if elevated {
                Self::Administrator
            } else {
                Self::User
            }
        }

        #[cfg(not(any(unix, windows)))]
        {
            Self::Unknown
        }
    }

    /// Check if elevated
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Root | Self::Administrator)
    }
}

impl std::fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Administrator => write!(f, "administrator"),
            Self::User => write!(f, "user"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Fail with `Permission` unless running elevated
pub fn require_elevated(operation: &str) -> Result<()> {
    let level = PrivilegeLevel::detect();
    debug!("Privilege level for {}: {}", operation, level);

    if !level.is_elevated() {
        return Err(ConfluxError::Permission(format!(
            "{} requires root or Administrator privileges (running as {})",
            operation, level
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_level_display() {
        assert_eq!(PrivilegeLevel::Root.to_string(), "root");
        assert_eq!(PrivilegeLevel::User.to_string(), "user");
    }

    #[test]
    fn test_is_elevated() {
        assert!(PrivilegeLevel::Root.is_elevated());
        assert!(PrivilegeLevel::Administrator.is_elevated());
        assert!(!PrivilegeLevel::User.is_elevated());
        assert!(!PrivilegeLevel::Unknown.is_elevated());
    }

    #[cfg(unix)]
    #[test]
    fn test_require_elevated_matches_detection() {
        let elevated = PrivilegeLevel::detect().is_elevated();
        assert_eq!(require_elevated("install").is_ok(), elevated);
    }
}
