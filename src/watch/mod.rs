// src/watch/mod.rs

//! Directory-subtree watching.
//!
//! This module is responsible for:
//! - Compiling exclude globs and matching candidate paths against them.
//! - Normalizing native notifications into [`Event`]s.
//! - Running one backend per [`Monitor`] on a dedicated background thread
//!   (inotify on Linux, FSEvents on macOS).
//!
//! Events reach the caller through an [`EventHandler`], invoked on the
//! backend's thread.

pub mod backend;
pub mod event;
pub mod exclude;
pub mod fsevents;
#[cfg(target_os = "linux")]
pub mod inotify;
pub mod monitor;
pub mod path_utils;
pub mod sync;

pub use backend::{Backend, WatchContext, backend_for};
pub use event::{Event, EventHandler};
pub use exclude::{ExcludeSet, is_excluded};
#[cfg(target_os = "macos")]
pub use fsevents::FsEventsBackend;
#[cfg(target_os = "linux")]
pub use inotify::InotifyBackend;
pub use monitor::{MAX_PATH_LEN, Monitor, MonitorConfig};
pub use path_utils::{is_directory, make_path};
