//! Anchor payload materialization

use crate::config::AnchorSettings;
use crate::error::{ConfluxError, Result};
use crate::security::{self, SecureFileMode};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name the payload is written under
#[cfg(windows)]
pub const PAYLOAD_FILE_NAME: &str = "anchor.exe";

/// File name the payload is written under
#[cfg(not(windows))]
pub const PAYLOAD_FILE_NAME: &str = "anchor";

#[cfg(feature = "embedded-anchor")]
static EMBEDDED_ANCHOR: &[u8] = include_bytes!(env!("CONFLUX_ANCHOR_PAYLOAD"));

/// Where the anchor executable comes from
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bytes compiled into the controller
    Embedded(&'static [u8]),
    /// An executable on disk
    File(PathBuf),
}

impl Payload {
    /// Pick the payload named by the settings, else the embedded one
    pub fn from_settings(settings: &AnchorSettings) -> Result<Self> {
        if let Some(path) = &settings.payload_path {
            return Ok(Self::File(path.clone()));
        }

        #[cfg(feature = "embedded-anchor")]
        {
            Ok(Self::Embedded(EMBEDDED_ANCHOR))
        }

        #[cfg(not(feature = "embedded-anchor"))]
        {
            Err(ConfluxError::SpawnFailed(
                "no anchor payload: set anchor.payload_path or build with the embedded-anchor feature"
                    .to_string(),
            ))
        }
    }

    fn bytes(&self) -> Result<std::borrow::Cow<'static, [u8]>> {
        match self {
            Self::Embedded(bytes) => Ok(std::borrow::Cow::Borrowed(*bytes)),
            Self::File(path) => fs::read(path).map(std::borrow::Cow::Owned).map_err(|e| {
                ConfluxError::SpawnFailed(format!("Failed to read anchor payload {:?}: {}", path, e))
            }),
        }
    }

    /// Write the payload to `<scratch_dir>/anchor` and mark it executable
    ///
    /// Any previous file is unlinked first. Overwriting in place fails with
    /// "text file busy" while an older anchor still runs from that path.
    pub fn materialize(&self, scratch_dir: &Path) -> Result<PathBuf> {
        let bytes = self.bytes()?;

        fs::create_dir_all(scratch_dir).map_err(|e| {
            ConfluxError::SpawnFailed(format!(
                "Failed to create scratch directory {:?}: {}",
                scratch_dir, e
            ))
        })?;

        let target = scratch_dir.join(PAYLOAD_FILE_NAME);
        match fs::remove_file(&target) {
            Ok(()) => debug!("Removed stale payload {:?}", target),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfluxError::SpawnFailed(format!(
                    "Failed to remove stale payload {:?}: {}",
                    target, e
                )))
            }
        }

        fs::write(&target, &bytes).map_err(|e| {
            ConfluxError::SpawnFailed(format!("Failed to write anchor payload {:?}: {}", target, e))
        })?;
        security::set_secure_permissions(&target, SecureFileMode::Executable)
            .map_err(|e| ConfluxError::SpawnFailed(e.to_string()))?;

        debug!("Wrote {} byte anchor payload to {:?}", bytes.len(), target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materialize_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(PAYLOAD_FILE_NAME);
        fs::write(&target, b"old").unwrap();

        let path = Payload::Embedded(b"#!/bin/sh\nexit 0\n")
            .materialize(dir.path())
            .unwrap();

        assert_eq!(path, target);
        assert_eq!(fs::read(&path).unwrap(), b"#!/bin/sh\nexit 0\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_materialize_marks_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = Payload::Embedded(b"x").materialize(dir.path()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_materialize_from_file_in_place() {
        // Source and target may be the same path
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(PAYLOAD_FILE_NAME);
        fs::write(&source, b"payload").unwrap();

        let path = Payload::File(source.clone()).materialize(dir.path()).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"payload");
    }

    #[test]
    fn test_missing_source_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = Payload::File(dir.path().join("nope"))
            .materialize(dir.path())
            .unwrap_err();
        assert!(matches!(err, ConfluxError::SpawnFailed(_)));
    }

    #[test]
    fn test_payload_path_from_settings() {
        let settings = AnchorSettings {
            payload_path: Some(PathBuf::from("/opt/conflux/anchor")),
            ..AnchorSettings::default()
        };
        assert!(matches!(
            Payload::from_settings(&settings).unwrap(),
            Payload::File(p) if p == Path::new("/opt/conflux/anchor")
        ));
    }
}
