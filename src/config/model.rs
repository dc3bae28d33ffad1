// src/config/model.rs

use serde::Deserialize;

use crate::types::{BackendKind, EventKind};

/// Monitor configuration as read from a TOML file.
///
/// ```toml
/// root = "/srv/project"
/// exclude = ["target/**", "/srv/project/.git/**"]
/// events = ["created", "deleted", "renamed", "modified"]
/// delay = 0.25
/// backend = "inotify"
/// ```
///
/// Only `root` is required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMonitorConfig {
    /// Directory to watch. Relative paths resolve against the process's
    /// working directory.
    pub root: String,

    /// Glob patterns; relative ones are taken relative to `root`.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Kinds to deliver. All of them when omitted.
    #[serde(default = "default_events")]
    pub events: Vec<EventKind>,

    /// Coalescing delay in seconds.
    #[serde(default)]
    pub delay: f64,

    /// Native backend; the platform default when omitted.
    #[serde(default)]
    pub backend: Option<BackendKind>,
}

fn default_events() -> Vec<EventKind> {
    vec![
        EventKind::Created,
        EventKind::Deleted,
        EventKind::Renamed,
        EventKind::Modified,
    ]
}
