// src/watch/event.rs

//! The normalized event handed to callers, and the handler contract.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::SystemTime;

use serde::Serialize;

use crate::types::{EventKind, EventMask};

/// One decoded, filtered filesystem change.
///
/// Events are built on the backend thread, passed by value to the handler
/// and never retained by the engine afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    /// Absolute path of the affected entry (the new path for a rename).
    pub path: PathBuf,
    /// Previous path; only set for a paired rename.
    pub previous_path: Option<PathBuf>,
    pub time: SystemTime,
}

impl Event {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            previous_path: None,
            time: SystemTime::now(),
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Renamed,
            path: to.into(),
            previous_path: Some(from.into()),
            time: SystemTime::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn previous_path(&self) -> Option<&Path> {
        self.previous_path.as_deref()
    }

    /// The event kind as a mask, for callers that work with kind sets.
    pub fn kinds(&self) -> EventMask {
        EventMask::from(self.kind)
    }
}

/// Receives events on the backend's delivery thread.
///
/// Handlers run synchronously on that thread: a slow handler delays every
/// event behind it. Forward to a channel when the work is not trivial.
pub trait EventHandler: Send + 'static {
    fn handle_event(&mut self, event: Event);
}

impl<F> EventHandler for F
where
    F: FnMut(Event) + Send + 'static,
{
    fn handle_event(&mut self, event: Event) {
        (self)(event);
    }
}

impl EventHandler for mpsc::Sender<Event> {
    fn handle_event(&mut self, event: Event) {
        if let Err(err) = self.send(event) {
            tracing::debug!("event receiver dropped: {err}");
        }
    }
}

impl EventHandler for tokio::sync::mpsc::UnboundedSender<Event> {
    fn handle_event(&mut self, event: Event) {
        if let Err(err) = self.send(event) {
            tracing::debug!("async event receiver dropped: {err}");
        }
    }
}
