#![allow(dead_code)]

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use treewatch::types::EventKind;
use treewatch::watch::Event;

use crate::EVENT_TIMEOUT;

/// Channel-backed event sink for tests.
///
/// Hand `collector.handler()` to `Monitor::start`, then pull events out
/// on the test thread.
pub struct EventCollector {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl EventCollector {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn handler(&self) -> Sender<Event> {
        self.tx.clone()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wait for the first event matching `pred`, skipping others.
    pub fn wait_for<F>(&self, mut pred: F) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let event = self.recv_timeout(deadline - now)?;
            if pred(&event) {
                return Some(event);
            }
        }
    }

    /// Wait for an event of `kind` whose path is `path`.
    pub fn wait_for_kind(&self, kind: EventKind, path: &Path) -> Option<Event> {
        self.wait_for(|e| e.kind == kind && same_path(&e.path, path))
    }

    /// Collect everything that arrives within `window`.
    pub fn drain_for(&self, window: Duration) -> Vec<Event> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return events;
            }
            match self.recv_timeout(deadline - now) {
                Some(event) => events.push(event),
                None => return events,
            }
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Path equality that ignores a trailing separator.
pub fn same_path(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}
