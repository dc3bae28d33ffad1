// src/watch/monitor.rs

//! Monitor lifecycle: validated configuration plus one backend.
//!
//! States are Created -> Watching -> Stopped, and a stopped monitor can be
//! started again. `start` on a watching monitor is a no-op; `stop` on a
//! monitor that is not watching is a no-op. Dropping a watching monitor
//! stops it first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{Result, TreewatchError};
use crate::types::{BackendKind, EventMask};
use crate::watch::backend::{Backend, WatchContext, backend_for};
use crate::watch::event::EventHandler;
use crate::watch::exclude::ExcludeSet;
use crate::watch::path_utils::as_dir_path;

/// Longest accepted root, in bytes, trailing separator included.
pub const MAX_PATH_LEN: usize = 1024;

/// Validated monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    root: PathBuf,
    excludes: Arc<ExcludeSet>,
    events: EventMask,
    delay: Duration,
    backend: BackendKind,
}

impl MonitorConfig {
    /// Validate and build a configuration.
    ///
    /// `root` must be an existing directory; it is canonicalised. Relative
    /// exclude patterns are resolved against the canonical root. `backend`
    /// defaults to the platform's native backend.
    pub fn new<S: AsRef<str>>(
        root: impl AsRef<Path>,
        excludes: &[S],
        events: EventMask,
        delay: Duration,
        backend: Option<BackendKind>,
    ) -> Result<Self> {
        let root = canonical_root(root.as_ref())?;

        if events.is_empty() {
            return Err(TreewatchError::ConfigError(
                "event mask must select at least one event kind".to_string(),
            ));
        }

        let backend = match backend {
            Some(kind) if kind.is_supported() => kind,
            Some(kind) => return Err(TreewatchError::BackendUnsupported(kind.name())),
            None => BackendKind::platform_default().ok_or(TreewatchError::BackendUnsupported(
                std::env::consts::OS,
            ))?,
        };

        let excludes = Arc::new(ExcludeSet::new(&root, excludes)?);

        Ok(Self {
            root,
            excludes,
            events,
            delay,
            backend,
        })
    }

    /// Canonical root, without trailing separator.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn excludes(&self) -> &ExcludeSet {
        &self.excludes
    }

    pub fn events(&self) -> EventMask {
        self.events
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    fn context(&self, handler: Box<dyn EventHandler>) -> WatchContext {
        WatchContext::new(
            self.root.clone(),
            Arc::clone(&self.excludes),
            self.events,
            self.delay,
            handler,
        )
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    let canonical = root
        .canonicalize()
        .map_err(|e| TreewatchError::InvalidPath(format!("{}: {e}", root.display())))?;

    if !canonical.is_dir() {
        return Err(TreewatchError::InvalidPath(format!(
            "{} is not a directory",
            canonical.display()
        )));
    }

    let len = as_dir_path(&canonical).as_os_str().len();
    if len > MAX_PATH_LEN {
        return Err(TreewatchError::PathTooLong {
            len,
            max: MAX_PATH_LEN,
        });
    }

    Ok(canonical)
}

/// A directory-subtree watch.
pub struct Monitor {
    config: MonitorConfig,
    backend: Box<dyn Backend>,
    watching: bool,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("backend", &self.backend.kind())
            .field("watching", &self.watching)
            .finish()
    }
}

impl Monitor {
    /// Create a monitor using the backend named in `config`.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let backend = backend_for(config.backend)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Create a monitor around a caller-supplied backend.
    pub fn with_backend(config: MonitorConfig, backend: Box<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            watching: false,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_watching(&self) -> bool {
        self.watching
    }

    /// Begin delivering events to `handler`.
    ///
    /// Returns once capture is active. On a monitor that is already
    /// watching this does nothing and `handler` is dropped.
    pub fn start<H: EventHandler>(&mut self, handler: H) -> Result<()> {
        if self.watching {
            debug!(root = ?self.config.root, "start on a watching monitor ignored");
            return Ok(());
        }

        let ctx = self.config.context(Box::new(handler));
        self.backend.setup(ctx)?;
        self.watching = true;

        info!(
            root = ?self.config.root,
            backend = %self.backend.kind(),
            events = ?self.config.events,
            "monitor started"
        );
        Ok(())
    }

    /// Stop delivering events.
    ///
    /// The monitor is not watching afterwards even if teardown reported an
    /// error.
    pub fn stop(&mut self) -> Result<()> {
        if !self.watching {
            return Ok(());
        }

        self.watching = false;
        let result = self.backend.teardown();

        match &result {
            Ok(()) => info!(root = ?self.config.root, "monitor stopped"),
            Err(err) => warn!(root = ?self.config.root, error = %err, "monitor stopped with errors"),
        }
        result
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "failed to stop monitor on drop");
        }
    }
}
