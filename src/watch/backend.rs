// src/watch/backend.rs

//! Pluggable watch backend abstraction.
//!
//! The [`Monitor`](crate::watch::Monitor) talks to a `Backend` instead of a
//! concrete OS facility:
//!
//! - [`InotifyBackend`](crate::watch::inotify::InotifyBackend) keeps one
//!   watch per directory (Linux).
//! - [`FsEventsBackend`](crate::watch::fsevents::FsEventsBackend) registers
//!   one stream for the whole subtree (macOS).
//!
//! Tests can provide their own implementation that emits synthetic events.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::errors::{Result, TreewatchError};
use crate::types::{BackendKind, EventKind, EventMask};
use crate::watch::event::{Event, EventHandler};
use crate::watch::exclude::ExcludeSet;

/// Handler shared between the monitor and a backend thread.
pub type SharedHandler = Arc<Mutex<Box<dyn EventHandler>>>;

/// Everything a backend needs for one watch session.
///
/// Built by the monitor on every `start`; the backend keeps it until
/// `teardown`.
#[derive(Clone)]
pub struct WatchContext {
    pub root: PathBuf,
    pub excludes: Arc<ExcludeSet>,
    pub events: EventMask,
    pub delay: Duration,
    handler: SharedHandler,
}

impl fmt::Debug for WatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchContext")
            .field("root", &self.root)
            .field("excludes", &self.excludes)
            .field("events", &self.events)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl WatchContext {
    pub fn new(
        root: PathBuf,
        excludes: Arc<ExcludeSet>,
        events: EventMask,
        delay: Duration,
        handler: Box<dyn EventHandler>,
    ) -> Self {
        Self {
            root,
            excludes,
            events,
            delay,
            handler: Arc::new(Mutex::new(handler)),
        }
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.is_excluded(path)
    }

    /// Apply excludes and the event mask to a decoded event.
    ///
    /// A rename whose new path is excluded becomes a deletion of the old
    /// path; one whose old path is excluded becomes a creation of the new
    /// path. The mask is checked against the resulting kind.
    pub fn admit(&self, event: Event) -> Option<Event> {
        let event = match event.previous_path.as_deref() {
            Some(old) if event.kind == EventKind::Renamed => {
                match (self.is_excluded(old), self.is_excluded(&event.path)) {
                    (true, true) => return None,
                    (false, true) => Event {
                        kind: EventKind::Deleted,
                        path: old.to_path_buf(),
                        previous_path: None,
                        time: event.time,
                    },
                    (true, false) => Event {
                        kind: EventKind::Created,
                        previous_path: None,
                        ..event
                    },
                    (false, false) => event,
                }
            }
            _ if self.is_excluded(&event.path) => return None,
            _ => event,
        };

        self.events.allows(event.kind).then_some(event)
    }

    /// Hand one event to the caller's handler.
    pub fn deliver(&self, event: Event) {
        tracing::debug!(kind = %event.kind, path = ?event.path, previous = ?event.previous_path, "delivering event");
        let mut handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        handler.handle_event(event);
    }
}

/// Contract every platform backend implements.
///
/// `setup` and `teardown` come in pairs: calling `setup` twice without a
/// `teardown` in between, or `teardown` without `setup`, is a caller error
/// and is reported as one.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Acquire OS resources and start the background thread.
    ///
    /// Must not return `Ok` before the thread is capturing events, and must
    /// release everything it acquired before returning an error.
    fn setup(&mut self, ctx: WatchContext) -> Result<()>;

    /// Stop the background thread, wait for it, release OS resources.
    fn teardown(&mut self) -> Result<()>;
}

/// Construct the backend for `kind`, failing if this platform lacks it.
pub fn backend_for(kind: BackendKind) -> Result<Box<dyn Backend>> {
    match kind {
        #[cfg(target_os = "linux")]
        BackendKind::Inotify => Ok(Box::new(crate::watch::inotify::InotifyBackend::new())),
        #[cfg(target_os = "macos")]
        BackendKind::FsEvents => Ok(Box::new(crate::watch::fsevents::FsEventsBackend::new())),
        #[allow(unreachable_patterns)]
        other => Err(TreewatchError::BackendUnsupported(other.name())),
    }
}

pub(crate) fn already_running(kind: BackendKind) -> TreewatchError {
    TreewatchError::Setup(format!("{kind} backend is already running"))
}

pub(crate) fn not_running(kind: BackendKind) -> TreewatchError {
    TreewatchError::Teardown(format!("{kind} backend is not running"))
}
