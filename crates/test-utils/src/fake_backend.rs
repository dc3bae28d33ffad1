#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use treewatch::errors::{Result, TreewatchError};
use treewatch::types::BackendKind;
use treewatch::watch::{Backend, Event, WatchContext};

/// What the fake backend has been asked to do so far.
#[derive(Debug, Default)]
pub struct FakeBackendState {
    pub setup_calls: usize,
    pub teardown_calls: usize,
    pub fail_next_setup: bool,
    pub fail_next_teardown: bool,
    ctx: Option<WatchContext>,
}

/// In-memory backend for exercising the monitor lifecycle.
///
/// Clone the handle before boxing the backend to inspect calls and to push
/// synthetic events through the registered handler.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeBackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup_calls(&self) -> usize {
        self.state.lock().unwrap().setup_calls
    }

    pub fn teardown_calls(&self) -> usize {
        self.state.lock().unwrap().teardown_calls
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().ctx.is_some()
    }

    pub fn fail_next_setup(&self) {
        self.state.lock().unwrap().fail_next_setup = true;
    }

    pub fn fail_next_teardown(&self) {
        self.state.lock().unwrap().fail_next_teardown = true;
    }

    /// Run `event` through the active context's filters and handler.
    /// Returns whether it was delivered.
    pub fn emit(&self, event: Event) -> bool {
        let ctx = self.state.lock().unwrap().ctx.clone();
        match ctx.and_then(|ctx| ctx.admit(event).map(|e| (ctx, e))) {
            Some((ctx, event)) => {
                ctx.deliver(event);
                true
            }
            None => false,
        }
    }
}

impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::platform_default().unwrap_or(BackendKind::Inotify)
    }

    fn setup(&mut self, ctx: WatchContext) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.setup_calls += 1;
        if std::mem::take(&mut state.fail_next_setup) {
            return Err(TreewatchError::Setup("fake setup failure".to_string()));
        }
        if state.ctx.is_some() {
            return Err(TreewatchError::Setup("fake backend already running".to_string()));
        }
        state.ctx = Some(ctx);
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.teardown_calls += 1;
        let was_running = state.ctx.take().is_some();
        if std::mem::take(&mut state.fail_next_teardown) {
            return Err(TreewatchError::Teardown("fake teardown failure".to_string()));
        }
        if !was_running {
            return Err(TreewatchError::Teardown("fake backend not running".to_string()));
        }
        Ok(())
    }
}
