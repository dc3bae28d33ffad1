// src/lib.rs

pub mod config;
pub mod errors;
pub mod logging;
pub mod types;
pub mod watch;

use std::path::Path;
use std::time::Duration;

use crate::errors::{Result, TreewatchError};
pub use crate::types::{BackendKind, EventKind, EventMask};
pub use crate::watch::{Event, EventHandler, Monitor, MonitorConfig};

/// High-level entry point for embedding callers.
///
/// Validates the arguments into a [`MonitorConfig`] and constructs the
/// backend. The returned monitor is not watching yet; call
/// [`Monitor::start`] with a handler.
///
/// Fails with `InvalidPath` if `root` is not an existing directory,
/// `PathTooLong` past [`watch::MAX_PATH_LEN`] and `BackendUnsupported` when
/// the requested backend does not exist on this platform.
pub fn create_monitor<S: AsRef<str>>(
    root: impl AsRef<Path>,
    excludes: &[S],
    events: EventMask,
    delay: Duration,
    backend: Option<BackendKind>,
) -> Result<Monitor> {
    let config = MonitorConfig::new(root, excludes, events, delay, backend)?;
    Monitor::new(config)
}

/// Resolve a backend by name (`"inotify"`, `"fsevents"`, `"fse"`).
pub fn backend_by_name(name: &str) -> Result<BackendKind> {
    name.parse::<BackendKind>()
        .map_err(TreewatchError::UnknownBackend)
}
