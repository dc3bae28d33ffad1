// src/types.rs

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Normalized kind of a filesystem change.
///
/// Every backend translates its own low-level flags into exactly one of
/// these before anything reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Deleted,
    #[serde(alias = "moved")]
    Renamed,
    Modified,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Deleted => "deleted",
            EventKind::Renamed => "renamed",
            EventKind::Modified => "modified",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "created" => Ok(EventKind::Created),
            "deleted" => Ok(EventKind::Deleted),
            "renamed" | "moved" => Ok(EventKind::Renamed),
            "modified" => Ok(EventKind::Modified),
            other => Err(format!(
                "invalid event kind: {other} (expected \"created\", \"deleted\", \"renamed\" or \"modified\")"
            )),
        }
    }
}

bitflags! {
    /// Set of event kinds a monitor is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        const CREATED = 0x1;
        const DELETED = 0x2;
        const RENAMED = 0x4;
        const MODIFIED = 0x8;
    }
}

impl EventMask {
    /// Whether events of `kind` should be delivered.
    pub fn allows(self, kind: EventKind) -> bool {
        self.contains(EventMask::from(kind))
    }

    pub fn from_kinds<I: IntoIterator<Item = EventKind>>(kinds: I) -> Self {
        kinds
            .into_iter()
            .fold(EventMask::empty(), |mask, kind| mask | EventMask::from(kind))
    }
}

impl Default for EventMask {
    fn default() -> Self {
        EventMask::all()
    }
}

impl From<EventKind> for EventMask {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Created => EventMask::CREATED,
            EventKind::Deleted => EventMask::DELETED,
            EventKind::Renamed => EventMask::RENAMED,
            EventKind::Modified => EventMask::MODIFIED,
        }
    }
}

/// Which native notification facility a monitor runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Per-directory watches (Linux inotify).
    Inotify,
    /// One whole-subtree stream (macOS FSEvents).
    #[serde(alias = "fse")]
    FsEvents,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Inotify => "inotify",
            BackendKind::FsEvents => "fsevents",
        }
    }

    pub fn is_supported(self) -> bool {
        match self {
            BackendKind::Inotify => cfg!(target_os = "linux"),
            BackendKind::FsEvents => cfg!(target_os = "macos"),
        }
    }

    /// The backend used when the caller does not pick one.
    pub fn platform_default() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(BackendKind::Inotify)
        } else if cfg!(target_os = "macos") {
            Some(BackendKind::FsEvents)
        } else {
            None
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inotify" => Ok(BackendKind::Inotify),
            "fsevents" | "fse" => Ok(BackendKind::FsEvents),
            other => Err(other.to_string()),
        }
    }
}
