// src/watch/sync.rs

//! Startup handshake between a caller thread and a backend thread.
//!
//! The caller creates a [`StartupLatch`], hands a clone to the thread it
//! spawns and blocks in [`StartupLatch::wait`]. The backend thread calls
//! [`StartupLatch::ready`] once its notification source is live (or
//! [`StartupLatch::fail`] if it could not get there). Every monitor owns its
//! own latch, so concurrent monitors never share handshake state.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LatchState {
    Waiting,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct StartupLatch {
    inner: Arc<(Mutex<LatchState>, Condvar)>,
}

impl Default for StartupLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupLatch {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(LatchState::Waiting), Condvar::new())),
        }
    }

    /// Signal that capture is active.
    pub fn ready(&self) {
        self.set(LatchState::Ready);
    }

    /// Signal that the thread gave up before capture became active.
    pub fn fail(&self, reason: impl Into<String>) {
        self.set(LatchState::Failed(reason.into()));
    }

    fn set(&self, state: LatchState) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        // First transition wins.
        if *guard == LatchState::Waiting {
            *guard = state;
        }
        cvar.notify_all();
    }

    /// Block until the backend thread reports readiness or failure.
    pub fn wait(&self) -> Result<(), String> {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while *guard == LatchState::Waiting {
            guard = cvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
        match &*guard {
            LatchState::Failed(reason) => Err(reason.clone()),
            _ => Ok(()),
        }
    }
}

/// Opens the latch with a failure if the owning thread exits (or panics)
/// before signalling, so the waiting caller can never hang.
#[derive(Debug)]
pub struct LatchGuard {
    latch: StartupLatch,
}

impl LatchGuard {
    pub fn new(latch: StartupLatch) -> Self {
        Self { latch }
    }

    pub fn ready(&self) {
        self.latch.ready();
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.latch.fail(reason);
    }
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.latch.fail("backend thread exited during startup");
    }
}

/// Whether the current thread is the one behind `handle`.
///
/// Teardown may be requested from inside the event callback, which runs on
/// the backend thread; that thread must not join itself.
pub fn is_current_thread<T>(handle: &JoinHandle<T>) -> bool {
    handle.thread().id() == std::thread::current().id()
}
