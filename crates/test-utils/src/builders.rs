#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use treewatch::types::{BackendKind, EventMask};
use treewatch::watch::MonitorConfig;

/// Builder for `MonitorConfig` to simplify test setup.
pub struct MonitorConfigBuilder {
    root: PathBuf,
    excludes: Vec<String>,
    events: EventMask,
    delay: Duration,
    backend: Option<BackendKind>,
}

impl MonitorConfigBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            excludes: Vec::new(),
            events: EventMask::all(),
            delay: Duration::ZERO,
            backend: None,
        }
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.excludes.push(pattern.to_string());
        self
    }

    pub fn events(mut self, events: EventMask) -> Self {
        self.events = events;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn try_build(self) -> treewatch::errors::Result<MonitorConfig> {
        MonitorConfig::new(
            &self.root,
            &self.excludes,
            self.events,
            self.delay,
            self.backend,
        )
    }

    pub fn build(self) -> MonitorConfig {
        self.try_build()
            .expect("Failed to build valid monitor config from builder")
    }
}
