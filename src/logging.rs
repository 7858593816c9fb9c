//! Structured logging setup
//!
//! Logging is installed once by the binary. The returned [`LogHandle`] is
//! passed down to whoever needs to change verbosity at runtime, instead of
//! reaching for ambient global state.

use crate::error::{ConfluxError, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Handle to the installed log filter
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replace the active filter with the given directive (e.g. `info`, `conflux=debug`)
    pub fn set_level(&self, directive: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| ConfluxError::Config(format!("Invalid log directive '{}': {}", directive, e)))?;
        self.filter
            .reload(filter)
            .map_err(|e| ConfluxError::Config(format!("Failed to reload log filter: {}", e)))
    }

    /// Raise the minimum level to `info`, filtering out debug and trace output
    pub fn disable_debug(&self) -> Result<()> {
        self.set_level("info")
    }
}

/// `RUST_LOG` wins over the verbosity flag
fn default_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Build the reloadable filter layer and its handle
fn filter_layer(filter: EnvFilter) -> (reload::Layer<EnvFilter, Registry>, LogHandle) {
    let (layer, filter) = reload::Layer::new(filter);
    (layer, LogHandle { filter })
}

/// Initialize structured logging with tracing
///
/// Console output is always enabled. When `file` is given, a second plain-text
/// layer appends to that file; if it cannot be opened we fall back to console only.
pub fn init_logging(verbose: bool, file: Option<&Path>) -> Result<LogHandle> {
    let (filter, handle) = filter_layer(default_filter(verbose));

    let mut open_error = None;
    let file_layer = file.and_then(|path| match open_log_file(path) {
        Ok(f) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(f))),
        Err(e) => {
            open_error = Some((path.to_path_buf(), e));
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfluxError::Config(format!("Failed to install logger: {}", e)))?;

    if let Some((path, e)) = open_error {
        warn!("Failed to open log file {:?}, logging to console only: {}", path, e);
    }

    Ok(handle)
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_debug_raises_level() {
        let (layer, handle) = filter_layer(EnvFilter::new("debug"));
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(tracing::Level::DEBUG));
            handle.disable_debug().unwrap();
            assert!(!tracing::enabled!(tracing::Level::DEBUG));
            assert!(tracing::enabled!(tracing::Level::INFO));
        });
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("conflux.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
