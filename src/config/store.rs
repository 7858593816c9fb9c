//! Persisted registration config (`conflux.json`)

use super::ConfluxConfig;
use crate::error::{ConfluxError, Result};
use crate::security::{self, SecureFileMode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the persisted config
pub const CONFIG_FILE_NAME: &str = "conflux.json";

/// Default config directory for this OS
pub fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/var/root/Library/Application Support/conflux")
    }

    #[cfg(windows)]
    {
        std::env::var_os("ProgramData")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
            .join("conflux")
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    {
        PathBuf::from("/root/.config/conflux")
    }
}

/// Reads and writes the persisted config
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store at the OS default location
    pub fn default_location() -> Self {
        Self::new(default_config_dir())
    }

    /// Store at `dir`, or the OS default when `None`
    pub fn from_dir(dir: Option<&Path>) -> Self {
        dir.map(Self::new).unwrap_or_else(Self::default_location)
    }

    /// Full path of the config file
    pub fn path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    /// Whether a config has been saved
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Load the config
    pub fn load(&self) -> Result<ConfluxConfig> {
        let path = self.path();

        let contents = fs::read_to_string(&path).map_err(|e| {
            ConfluxError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        if let Err(e) = security::validate_file_permissions(&path, SecureFileMode::Secret) {
            warn!("{}", e);
        }

        let config: ConfluxConfig = serde_json::from_str(&contents)?;
        debug!("Loaded config for conflux {}", config.conflux_id);
        Ok(config)
    }

    /// Save the config atomically with owner-only permissions
    pub fn save(&self, config: &ConfluxConfig) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            ConfluxError::Config(format!("Failed to create config directory {:?}: {}", self.dir, e))
        })?;

        let path = self.path();
        let tmp = self.dir.join(format!("{}.tmp", CONFIG_FILE_NAME));

        let contents = serde_json::to_vec_pretty(config)?;
        fs::write(&tmp, contents)?;
        security::set_secure_permissions(&tmp, SecureFileMode::Secret)?;
        fs::rename(&tmp, &path)?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Delete the config; an absent file is fine
    pub fn delete(&self) -> Result<()> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted config {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config {:?} already absent", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load, apply `f`, save; returns what `f` returned
    pub fn update<T>(&self, f: impl FnOnce(&mut ConfluxConfig) -> T) -> Result<T> {
        let mut config = self.load()?;
        let out = f(&mut config);
        self.save(&config)?;
        Ok(out)
    }
}
