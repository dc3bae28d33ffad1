// src/watch/fsevents.rs

//! Push-notification backend built on macOS FSEvents.
//!
//! One stream covers the whole subtree. FSEvents reports coalesced records
//! of `(path, flags)`, where the flags of one record can carry several
//! changes at once (and, for recently touched paths, stale ones). The
//! [`Decoder`] turns those records into single-kind [`Event`]s:
//!
//! - kind precedence is Created > Deleted > Renamed > Modified
//! - a Created bit is ignored when the item's birth time shows it predates
//!   the watch (or a creation already reported), so pre-existing files do
//!   not show up as new
//! - the two halves of a rename arrive as separate Renamed records; the half
//!   whose path is gone is held, across callback batches, until the half
//!   that exists shows up or an unrelated record gives up on it
//!
//! The decoder is plain Rust and builds on every platform. The stream and
//! its run-loop thread only exist on macOS.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bitflags::bitflags;
use tracing::{trace, warn};

use crate::types::EventKind;
use crate::watch::event::Event;
use crate::watch::path_utils::as_dir_path;

#[cfg(target_os = "macos")]
pub use self::stream::FsEventsBackend;

bitflags! {
    /// Per-record flags, values as in `FSEvents.h`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamFlags: u32 {
        const MUST_SCAN_SUBDIRS = 0x0000_0001;
        const USER_DROPPED = 0x0000_0002;
        const KERNEL_DROPPED = 0x0000_0004;
        const IDS_WRAPPED = 0x0000_0008;
        const HISTORY_DONE = 0x0000_0010;
        const ROOT_CHANGED = 0x0000_0020;
        const MOUNT = 0x0000_0040;
        const UNMOUNT = 0x0000_0080;
        const ITEM_CREATED = 0x0000_0100;
        const ITEM_REMOVED = 0x0000_0200;
        const INODE_META_MOD = 0x0000_0400;
        const ITEM_RENAMED = 0x0000_0800;
        const ITEM_MODIFIED = 0x0000_1000;
        const FINDER_INFO_MOD = 0x0000_2000;
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        const ITEM_XATTR_MOD = 0x0000_8000;
        const IS_FILE = 0x0001_0000;
        const IS_DIR = 0x0002_0000;
        const IS_SYMLINK = 0x0004_0000;
        const OWN_EVENT = 0x0008_0000;
        const IS_HARDLINK = 0x0010_0000;
        const IS_LAST_HARDLINK = 0x0020_0000;
        const ITEM_CLONED = 0x0040_0000;
    }
}

impl StreamFlags {
    /// Records that describe the stream itself rather than an item.
    pub const BOOKKEEPING: Self = Self::HISTORY_DONE
        .union(Self::ROOT_CHANGED)
        .union(Self::MOUNT)
        .union(Self::UNMOUNT);

    /// Bits that count as a modification.
    pub const MODIFICATION: Self = Self::ITEM_MODIFIED
        .union(Self::ITEM_XATTR_MOD)
        .union(Self::INODE_META_MOD);
}

/// Pick the single kind a record stands for.
///
/// `created_is_historical` removes Created from consideration so the record
/// falls through to the next kind it carries.
pub fn resolve_kind(flags: StreamFlags, created_is_historical: bool) -> Option<EventKind> {
    if flags.contains(StreamFlags::ITEM_CREATED) && !created_is_historical {
        Some(EventKind::Created)
    } else if flags.contains(StreamFlags::ITEM_REMOVED) {
        Some(EventKind::Deleted)
    } else if flags.contains(StreamFlags::ITEM_RENAMED) {
        Some(EventKind::Renamed)
    } else if flags.intersects(StreamFlags::MODIFICATION) {
        Some(EventKind::Modified)
    } else {
        None
    }
}

/// Filesystem queries the decoder needs; swapped out in tests.
pub trait PathProbe {
    fn exists(&self, path: &Path) -> bool;
    fn birth_time(&self, path: &Path) -> Option<SystemTime>;
}

/// [`PathProbe`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveFs;

impl PathProbe for LiveFs {
    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn birth_time(&self, path: &Path) -> Option<SystemTime> {
        std::fs::symlink_metadata(path)
            .and_then(|m| m.created())
            .ok()
    }
}

/// Stateful record decoder for one watch session.
#[derive(Debug)]
pub struct Decoder {
    start_time: SystemTime,
    /// Birth time of the last creation reported per path.
    watermark: HashMap<PathBuf, SystemTime>,
    /// Old half of a rename waiting for its new half.
    held_rename: Option<PathBuf>,
}

impl Decoder {
    pub fn new(start_time: SystemTime) -> Self {
        Self {
            start_time,
            watermark: HashMap::new(),
            held_rename: None,
        }
    }

    pub fn watermark_len(&self) -> usize {
        self.watermark.len()
    }

    /// Decode one record. Usually yields zero or one event; two when a held
    /// rename half is given up on by an unrelated record.
    pub fn decode<P: PathProbe>(&mut self, path: PathBuf, flags: StreamFlags, probe: &P) -> Vec<Event> {
        trace!(?path, ?flags, "raw fsevents record");

        if flags.intersects(StreamFlags::BOOKKEEPING) {
            return Vec::new();
        }
        if flags.contains(StreamFlags::MUST_SCAN_SUBDIRS) {
            warn!(?path, ?flags, "fsevents dropped events below this path");
            return Vec::new();
        }

        let path = if flags.contains(StreamFlags::IS_DIR) {
            as_dir_path(&path)
        } else {
            path
        };

        let historical =
            flags.contains(StreamFlags::ITEM_CREATED) && self.is_historical(&path, flags, probe);
        if historical {
            trace!(?path, "historical creation suppressed");
        }

        let Some(kind) = resolve_kind(flags, historical) else {
            return Vec::new();
        };

        let mut out = Vec::new();

        if kind == EventKind::Renamed {
            if !probe.exists(&path) {
                if let Some(stale) = self.held_rename.replace(path) {
                    out.push(Event::new(EventKind::Deleted, stale));
                }
                return out;
            }
            match self.held_rename.take() {
                Some(old) => out.push(Event::renamed(old, path)),
                // New half with no old half: moved in from outside.
                None => out.push(Event::new(EventKind::Created, path)),
            }
            return out;
        }

        if let Some(stale) = self.held_rename.take() {
            out.push(Event::new(EventKind::Deleted, stale));
        }
        out.push(Event::new(kind, path));
        out
    }

    /// Old rename half still waiting for its new half, if any.
    pub fn held_rename(&self) -> Option<&Path> {
        self.held_rename.as_deref()
    }

    pub fn clear(&mut self) {
        self.watermark.clear();
        self.held_rename = None;
    }

    /// Whether a Created bit describes a creation already seen or older than
    /// the watch. The birth time is recorded either way.
    fn is_historical<P: PathProbe>(&mut self, path: &Path, flags: StreamFlags, probe: &P) -> bool {
        let Some(birth) = probe.birth_time(path) else {
            return true;
        };

        let historical = flags.intersects(StreamFlags::ITEM_REMOVED | StreamFlags::ITEM_RENAMED)
            || birth <= self.start_time
            || self.watermark.get(path).is_some_and(|seen| birth <= *seen);

        let seen = self.watermark.entry(path.to_path_buf()).or_insert(birth);
        if birth > *seen {
            *seen = birth;
        }
        historical
    }
}

#[cfg(target_os = "macos")]
mod stream {
    use std::ffi::CStr;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::path::PathBuf;
    use std::sync::{Mutex, PoisonError, mpsc};
    use std::thread::{self, JoinHandle};
    use std::time::SystemTime;
    use std::ptr;

    use fsevent_sys as fs;
    use fsevent_sys::core_foundation as cf;
    use tracing::{debug, info, warn};

    use super::{Decoder, LiveFs, StreamFlags};
    use crate::errors::{Result, TreewatchError};
    use crate::types::BackendKind;
    use crate::watch::backend::{Backend, WatchContext, already_running, not_running};
    use crate::watch::sync::{LatchGuard, StartupLatch, is_current_thread};

    const _: () = {
        assert!(StreamFlags::ITEM_CREATED.bits() == fs::kFSEventStreamEventFlagItemCreated);
        assert!(StreamFlags::ITEM_REMOVED.bits() == fs::kFSEventStreamEventFlagItemRemoved);
        assert!(StreamFlags::ITEM_RENAMED.bits() == fs::kFSEventStreamEventFlagItemRenamed);
        assert!(StreamFlags::ITEM_MODIFIED.bits() == fs::kFSEventStreamEventFlagItemModified);
        assert!(StreamFlags::IS_DIR.bits() == fs::kFSEventStreamEventFlagItemIsDir);
        assert!(StreamFlags::HISTORY_DONE.bits() == fs::kFSEventStreamEventFlagHistoryDone);
    };

    const FALSE: cf::Boolean = 0x0;

    unsafe extern "C" {
        safe fn CFRunLoopIsWaiting(runloop: cf::CFRunLoopRef) -> cf::Boolean;
    }

    // CF objects may move between threads; the stream is only driven from
    // its run loop, plus the flush in teardown.
    struct CFSendWrapper(cf::CFRef);

    unsafe impl Send for CFSendWrapper {}

    struct StreamContextInfo {
        ctx: WatchContext,
        decoder: Mutex<Decoder>,
    }

    // Runs when the stream is released; dropping the decoder clears the
    // birth-time watermark.
    extern "C" fn release_context(info: *const libc::c_void) {
        // Safety: `info` is the box leaked in `setup`; the stream calls this
        // exactly once, on release.
        unsafe {
            drop(Box::from_raw(info as *mut StreamContextInfo));
        }
    }

    struct Running {
        runloop: CFSendWrapper,
        stream: CFSendWrapper,
        thread: JoinHandle<()>,
    }

    /// macOS backend: one FSEvents stream for the whole subtree.
    #[derive(Default)]
    pub struct FsEventsBackend {
        running: Option<Running>,
    }

    impl std::fmt::Debug for FsEventsBackend {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FsEventsBackend")
                .field("running", &self.running.is_some())
                .finish()
        }
    }

    impl FsEventsBackend {
        pub fn new() -> Self {
            Self { running: None }
        }

        pub fn is_running(&self) -> bool {
            self.running.is_some()
        }
    }

    impl Backend for FsEventsBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::FsEvents
        }

        fn setup(&mut self, ctx: WatchContext) -> Result<()> {
            if self.running.is_some() {
                return Err(already_running(self.kind()));
            }

            let root = ctx
                .root
                .to_str()
                .ok_or_else(|| TreewatchError::InvalidPath(ctx.root.display().to_string()))?
                .to_string();
            let latency = ctx.delay.as_secs_f64();

            let paths = unsafe {
                let paths =
                    cf::CFArrayCreateMutable(cf::kCFAllocatorDefault, 0, &cf::kCFTypeArrayCallBacks);
                let mut err: cf::CFErrorRef = ptr::null_mut();
                let cf_path = cf::str_path_to_cfstring_ref(&root, &mut err);
                if cf_path.is_null() {
                    if !err.is_null() {
                        cf::CFRelease(err as cf::CFRef);
                    }
                    cf::CFRelease(paths);
                    return Err(TreewatchError::Setup(format!("cannot register path {root}")));
                }
                cf::CFArrayAppendValue(paths, cf_path);
                cf::CFRelease(cf_path);
                paths
            };

            let info = Box::into_raw(Box::new(StreamContextInfo {
                ctx,
                decoder: Mutex::new(Decoder::new(SystemTime::now())),
            }));

            let stream_context = fs::FSEventStreamContext {
                version: 0,
                info: info as *mut libc::c_void,
                retain: None,
                release: Some(release_context),
                copy_description: None,
            };

            let stream = unsafe {
                fs::FSEventStreamCreate(
                    cf::kCFAllocatorDefault,
                    callback,
                    &stream_context,
                    paths,
                    fs::kFSEventStreamEventIdSinceNow,
                    latency,
                    fs::kFSEventStreamCreateFlagFileEvents | fs::kFSEventStreamCreateFlagWatchRoot,
                )
            };
            unsafe { cf::CFRelease(paths) };

            if stream.is_null() {
                // No stream, so nobody will call the release callback.
                unsafe { drop(Box::from_raw(info)) };
                return Err(TreewatchError::Setup("cannot create fsevents stream".to_string()));
            }

            let latch = StartupLatch::new();
            let thread_latch = LatchGuard::new(latch.clone());
            let (rl_tx, rl_rx) = mpsc::channel();
            let thread_stream = CFSendWrapper(stream);

            let spawned = thread::Builder::new()
                .name("treewatch-fsevents".to_string())
                .spawn(move || {
                    // Capture the wrapper, not its non-Send field.
                    let _ = &thread_stream;
                    let stream = thread_stream.0;

                    unsafe {
                        let runloop = cf::CFRunLoopGetCurrent();
                        fs::FSEventStreamScheduleWithRunLoop(stream, runloop, cf::kCFRunLoopDefaultMode);

                        if fs::FSEventStreamStart(stream) == FALSE {
                            fs::FSEventStreamInvalidate(stream);
                            fs::FSEventStreamRelease(stream);
                            thread_latch.fail("fsevents stream failed to start");
                            return;
                        }

                        if rl_tx.send(CFSendWrapper(runloop)).is_err() {
                            thread_latch.fail("setup caller went away");
                        } else {
                            thread_latch.ready();
                        }
                        drop(thread_latch);

                        // Returns once teardown stops the run loop.
                        cf::CFRunLoopRun();

                        fs::FSEventStreamStop(stream);
                        fs::FSEventStreamInvalidate(stream);
                        fs::FSEventStreamRelease(stream);
                    }
                    debug!("fsevents run loop exited");
                });

            let thread = match spawned {
                Ok(thread) => thread,
                Err(err) => {
                    // The closure (and its stream pointer) is gone; release here.
                    unsafe {
                        fs::FSEventStreamInvalidate(stream);
                        fs::FSEventStreamRelease(stream);
                    }
                    return Err(TreewatchError::Setup(format!("cannot spawn fsevents thread: {err}")));
                }
            };

            if let Err(reason) = latch.wait() {
                let _ = thread.join();
                return Err(TreewatchError::Setup(reason));
            }

            let runloop = rl_rx
                .recv()
                .map_err(|_| TreewatchError::Setup("fsevents run loop not reported".to_string()))?;

            info!("fsevents stream started");
            self.running = Some(Running {
                runloop,
                stream: CFSendWrapper(stream),
                thread,
            });
            Ok(())
        }

        fn teardown(&mut self) -> Result<()> {
            let running = self.running.take().ok_or_else(|| not_running(self.kind()))?;
            let own_thread = is_current_thread(&running.thread);
            let runloop = running.runloop.0 as cf::CFRunLoopRef;

            unsafe {
                if !own_thread {
                    // Deliver whatever is buffered before shutting down.
                    fs::FSEventStreamFlushSync(running.stream.0);

                    // A stop issued before the loop starts waiting is lost.
                    while CFRunLoopIsWaiting(runloop) == FALSE {
                        thread::yield_now();
                    }
                }
                cf::CFRunLoopStop(runloop);
            }

            if own_thread {
                debug!("fsevents teardown requested from the run-loop thread; not joining");
                return Ok(());
            }

            running
                .thread
                .join()
                .map_err(|_| TreewatchError::Teardown("fsevents thread panicked".to_string()))?;
            info!("fsevents stream stopped");
            Ok(())
        }
    }

    impl Drop for FsEventsBackend {
        fn drop(&mut self) {
            if self.running.is_some() {
                if let Err(err) = self.teardown() {
                    warn!(error = %err, "fsevents backend dropped while running; teardown failed");
                }
            }
        }
    }

    extern "C" fn callback(
        stream_ref: fs::FSEventStreamRef,
        info: *mut libc::c_void,
        num_events: libc::size_t,
        event_paths: *mut libc::c_void,
        event_flags: *const fs::FSEventStreamEventFlags,
        event_ids: *const fs::FSEventStreamEventId,
    ) {
        // Unwinding out of an extern "C" fn aborts the process.
        let outcome = catch_unwind(AssertUnwindSafe(|| unsafe {
            callback_impl(stream_ref, info, num_events, event_paths, event_flags, event_ids)
        }));
        if outcome.is_err() {
            warn!("panic inside fsevents callback; batch abandoned");
        }
    }

    /// # Safety
    ///
    /// `info` must point at the `StreamContextInfo` registered with the
    /// stream and the arrays must hold `num_events` entries.
    unsafe fn callback_impl(
        _stream_ref: fs::FSEventStreamRef,
        info: *mut libc::c_void,
        num_events: libc::size_t,
        event_paths: *mut libc::c_void,
        event_flags: *const fs::FSEventStreamEventFlags,
        _event_ids: *const fs::FSEventStreamEventId,
    ) {
        let event_paths = event_paths as *const *const libc::c_char;
        let info = unsafe { &*(info as *const StreamContextInfo) };

        let mut decoded = Vec::new();
        {
            let mut decoder = info.decoder.lock().unwrap_or_else(PoisonError::into_inner);
            for i in 0..num_events {
                let raw = match unsafe { CStr::from_ptr(*event_paths.add(i)) }.to_str() {
                    Ok(raw) => raw,
                    Err(_) => {
                        debug!("skipping fsevents record with non-UTF-8 path");
                        continue;
                    }
                };
                let flags = StreamFlags::from_bits_truncate(unsafe { *event_flags.add(i) });
                decoded.extend(decoder.decode(PathBuf::from(raw), flags, &LiveFs));
            }
        }

        // Decoder unlocked: the handler may tear the stream down.
        for event in decoded {
            if let Some(event) = info.ctx.admit(event) {
                info.ctx.deliver(event);
            }
        }
    }
}
