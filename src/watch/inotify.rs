// src/watch/inotify.rs

//! Recursive-watch backend built on Linux inotify.
//!
//! inotify only reports changes for the directories it was told about, so
//! this backend keeps one watch per directory in the tree (the root plus
//! every non-excluded subdirectory) and grows/shrinks that table as
//! directories come and go.
//!
//! Threading: the table is populated on the caller's thread during `setup`,
//! then moved into the `treewatch-inotify` thread, which is the only owner
//! until it exits. Cancellation sets a shared flag and fires a `mio::Waker`
//! registered on the same `Poll` as the inotify descriptor. The loop holds
//! its own handle on both, so a teardown issued from the event callback
//! still reaches it, and it checks the flag before every record.
//!
//! Known gap: entries created inside a new directory between the parent's
//! CREATE notification and the moment its own watch is added are not
//! reported. The new directory is scanned and its subdirectories watched,
//! but no events are synthesized for what the scan finds.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use inotify::{EventMask as RawMask, Inotify, WatchDescriptor, WatchMask, Watches};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, info, trace, warn};

use crate::errors::{Result, TreewatchError};
use crate::types::{BackendKind, EventKind, EventMask};
use crate::watch::backend::{Backend, WatchContext, already_running, not_running};
use crate::watch::event::Event;
use crate::watch::path_utils::{as_dir_path, is_directory, make_path, rebase};
use crate::watch::sync::{LatchGuard, StartupLatch, is_current_thread};

const INOTIFY_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// How long an unpaired MOVED_FROM waits for its MOVED_TO.
pub const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(10);

const READ_BUFFER_LEN: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Watch table
// ---------------------------------------------------------------------------

/// One watched directory.
#[derive(Debug, Clone)]
pub struct WatchEntry {
    pub wd: WatchDescriptor,
    /// Absolute directory path, with trailing separator.
    pub path: PathBuf,
}

/// Live watches keyed by descriptor.
///
/// Invariant: one entry per watched directory, never two entries with the
/// same descriptor.
#[derive(Debug, Default)]
pub struct WatchTable {
    entries: HashMap<WatchDescriptor, WatchEntry>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, wd: &WatchDescriptor) -> Option<&WatchEntry> {
        self.entries.get(wd)
    }

    /// Record `wd` for `path`. Adding a watch for an inode that is already
    /// watched hands back the same descriptor; that case only refreshes the
    /// recorded path.
    pub fn insert(&mut self, wd: WatchDescriptor, path: PathBuf) {
        match self.entries.get_mut(&wd) {
            Some(entry) => {
                debug!(old = ?entry.path, new = ?path, "watch descriptor reused; updating path");
                entry.path = path;
            }
            None => {
                self.entries.insert(wd.clone(), WatchEntry { wd, path });
            }
        }
    }

    pub fn remove(&mut self, wd: &WatchDescriptor) -> Option<WatchEntry> {
        self.entries.remove(wd)
    }

    /// Remove and return every entry at or below directory `dir`.
    pub fn remove_under(&mut self, dir: &Path) -> Vec<WatchEntry> {
        let doomed: Vec<WatchDescriptor> = self
            .entries
            .values()
            .filter(|e| e.path.starts_with(dir))
            .map(|e| e.wd.clone())
            .collect();
        doomed
            .iter()
            .filter_map(|wd| self.entries.remove(wd))
            .collect()
    }

    /// Rewrite the path of every entry at or below `from` to live under `to`.
    pub fn rebase(&mut self, from: &Path, to: &Path) -> usize {
        let mut moved = 0;
        for entry in self.entries.values_mut() {
            if let Some(new_path) = rebase(&entry.path, from, to) {
                entry.path = new_path;
                moved += 1;
            }
        }
        moved
    }

    fn drain(&mut self) -> Vec<WatchEntry> {
        self.entries.drain().map(|(_, e)| e).collect()
    }
}

/// inotify subscription used for every directory.
///
/// Structural notifications are always on so the table can follow the
/// tree; content notifications only when the caller wants them.
pub fn watch_mask_for(events: EventMask) -> WatchMask {
    let mut mask = WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::DELETE_SELF
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::MOVE_SELF
        | WatchMask::ONLYDIR;
    if events.contains(EventMask::MODIFIED) {
        mask |= WatchMask::MODIFY | WatchMask::ATTRIB;
    }
    mask
}

/// Watch `dir` and every non-excluded directory below it, breadth first.
///
/// With `strict` set (initial setup) the first failing `add` aborts the
/// walk. Otherwise failures are logged and that directory is skipped: at
/// runtime a directory vanishing mid-scan is ordinary.
pub fn add_tree(
    watches: &mut Watches,
    table: &mut WatchTable,
    ctx: &WatchContext,
    dir: &Path,
    strict: bool,
) -> Result<usize> {
    let mask = watch_mask_for(ctx.events);
    let mut added = 0;
    let mut worklist = vec![as_dir_path(dir)];
    let mut next = 0;

    while next < worklist.len() {
        let current = worklist[next].clone();
        next += 1;

        match watches.add(&current, mask) {
            Ok(wd) => {
                trace!(path = ?current, "watch added");
                table.insert(wd, current.clone());
                added += 1;
            }
            Err(err) if strict => {
                return Err(TreewatchError::Setup(format!(
                    "cannot watch {}: {err}",
                    current.display()
                )));
            }
            Err(err) => {
                debug!(path = ?current, error = %err, "skipping directory that could not be watched");
                continue;
            }
        }

        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = ?current, error = %err, "cannot list directory; children not watched");
                continue;
            }
        };

        for entry in entries.flatten() {
            // Symlinked directories are not followed.
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let child = make_path(entry.file_name(), &current, true);
            if ctx.is_excluded(&child) {
                debug!(path = ?child, "excluded directory; not watching");
                continue;
            }
            worklist.push(child);
        }
    }

    Ok(added)
}

/// Remove the kernel watch for every entry; errors are collected, not fatal.
fn release_entries(watches: &mut Watches, entries: Vec<WatchEntry>) -> Vec<String> {
    let mut failures = Vec::new();
    for entry in entries {
        if let Err(err) = watches.remove(entry.wd) {
            // EINVAL: the kernel already dropped it (directory deleted).
            if err.raw_os_error() != Some(libc::EINVAL) {
                failures.push(format!("{}: {err}", entry.path.display()));
            }
        }
    }
    failures
}

// ---------------------------------------------------------------------------
// Raw record decoding
// ---------------------------------------------------------------------------

/// What a single inotify record means, before paths and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Deleted,
    DeletedSelf,
    MovedFrom,
    MovedTo,
    MovedSelf,
    Modified,
    Ignored,
    Overflow,
}

/// Classify a raw mask. Returns `None` for records carrying nothing we use.
pub fn classify(mask: RawMask) -> Option<Change> {
    if mask.contains(RawMask::Q_OVERFLOW) {
        Some(Change::Overflow)
    } else if mask.contains(RawMask::IGNORED) {
        Some(Change::Ignored)
    } else if mask.contains(RawMask::CREATE) {
        Some(Change::Created)
    } else if mask.contains(RawMask::DELETE) {
        Some(Change::Deleted)
    } else if mask.contains(RawMask::DELETE_SELF) {
        Some(Change::DeletedSelf)
    } else if mask.contains(RawMask::MOVED_FROM) {
        Some(Change::MovedFrom)
    } else if mask.contains(RawMask::MOVED_TO) {
        Some(Change::MovedTo)
    } else if mask.contains(RawMask::MOVE_SELF) {
        Some(Change::MovedSelf)
    } else if mask.intersects(RawMask::MODIFY | RawMask::ATTRIB) {
        Some(Change::Modified)
    } else {
        None
    }
}

/// Owned copy of one inotify record; the read buffer is reused.
#[derive(Debug, Clone)]
struct RawRecord {
    wd: WatchDescriptor,
    mask: RawMask,
    cookie: u32,
    name: Option<OsString>,
}

#[derive(Debug)]
struct PendingMove {
    cookie: u32,
    path: PathBuf,
    is_dir: bool,
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

enum Wake {
    Cancelled,
    Readable,
    TimedOut,
}

fn wait(poll: &mut Poll, events: &mut Events, timeout: Option<Duration>) -> io::Result<Wake> {
    loop {
        match poll.poll(events, timeout) {
            Ok(()) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    let mut readable = false;
    for event in events.iter() {
        match event.token() {
            WAKE_TOKEN => return Ok(Wake::Cancelled),
            INOTIFY_TOKEN => readable = true,
            _ => {}
        }
    }

    Ok(if readable { Wake::Readable } else { Wake::TimedOut })
}

/// Stop request shared by the backend handle and the event loop.
#[derive(Debug, Clone)]
struct Cancel {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Cancel {
    fn request(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        self.waker.wake()
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

struct EventLoop {
    inotify: Inotify,
    cancel: Cancel,
    watches: Watches,
    poll: Poll,
    events: Events,
    table: WatchTable,
    ctx: WatchContext,
    buffer: Vec<u8>,
    pending: Vec<PendingMove>,
    /// Path of the last delivered Modified event in the current batch.
    last_modified: Option<PathBuf>,
}

impl EventLoop {
    fn run(mut self, latch: LatchGuard) -> Result<()> {
        let fd = self.inotify.as_raw_fd();
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut SourceFd(&fd), INOTIFY_TOKEN, Interest::READABLE)
        {
            latch.fail(format!("cannot register inotify descriptor: {err}"));
            return self.shutdown();
        }

        latch.ready();
        info!(root = ?self.ctx.root, watches = self.table.len(), "inotify event loop started");

        let outcome = self.pump();
        if let Err(ref err) = outcome {
            warn!(error = %err, "inotify event loop stopped on error");
        }

        let released = self.shutdown();
        outcome.and(released)
    }

    fn pump(&mut self) -> Result<()> {
        loop {
            match wait(&mut self.poll, &mut self.events, None)? {
                Wake::Cancelled => return Ok(()),
                Wake::TimedOut => continue,
                Wake::Readable => {}
            }

            if !self.ctx.delay.is_zero() && self.linger(self.ctx.delay)? {
                return Ok(());
            }

            if self.drain_and_dispatch()? || self.cancel.is_requested() {
                return Ok(());
            }
        }
    }

    /// Sit out the coalescing window. Returns true if cancelled meanwhile.
    fn linger(&mut self, window: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + window;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            if let Wake::Cancelled = wait(&mut self.poll, &mut self.events, Some(deadline - now))? {
                return Ok(true);
            }
        }
    }

    /// Read everything queued, dispatch it, then give unpaired moves a short
    /// window to find their other half. Returns true if cancelled.
    fn drain_and_dispatch(&mut self) -> Result<bool> {
        loop {
            let records = self.read_records()?;
            self.dispatch(records);

            if self.cancel.is_requested() {
                return Ok(true);
            }
            if self.pending.is_empty() {
                return Ok(false);
            }

            match wait(&mut self.poll, &mut self.events, Some(RENAME_PAIR_WINDOW))? {
                Wake::Cancelled => return Ok(true),
                Wake::Readable => continue,
                Wake::TimedOut => {
                    self.flush_pending();
                    return Ok(false);
                }
            }
        }
    }

    fn read_records(&mut self) -> io::Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        loop {
            match self.inotify.read_events(&mut self.buffer) {
                Ok(events) => {
                    let before = records.len();
                    records.extend(events.map(|e| RawRecord {
                        wd: e.wd,
                        mask: e.mask,
                        cookie: e.cookie,
                        name: e.name.map(|n| n.to_os_string()),
                    }));
                    if records.len() == before {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        trace!(count = records.len(), "read inotify records");
        Ok(records)
    }

    fn dispatch(&mut self, records: Vec<RawRecord>) {
        self.last_modified = None;
        for record in records {
            // The handler may have stopped the monitor mid-batch.
            if self.cancel.is_requested() {
                trace!("cancelled; dropping rest of batch");
                return;
            }
            self.handle_record(record);
        }
    }

    fn handle_record(&mut self, record: RawRecord) {
        trace!(mask = ?record.mask, cookie = record.cookie, name = ?record.name, "raw record");

        let Some(change) = classify(record.mask) else {
            return;
        };

        if change == Change::Overflow {
            warn!("inotify queue overflowed; some events were dropped by the kernel");
            return;
        }

        // 1. Resolve the watch; unknown descriptors belong to removed watches.
        let Some(entry) = self.table.get(&record.wd).cloned() else {
            debug!(?change, "record for unknown watch descriptor; skipping");
            return;
        };

        let is_dir = record.mask.contains(RawMask::ISDIR);
        let path = match &record.name {
            Some(name) => make_path(name, &entry.path, is_dir),
            None => entry.path.clone(),
        };

        match change {
            Change::Created => {
                if is_dir && !self.ctx.is_excluded(&path) {
                    self.extend_tree(&path);
                }
                self.emit(Event::new(EventKind::Created, path));
            }
            Change::Deleted => {
                if is_dir {
                    // The kernel drops these watches itself.
                    self.table.remove_under(&path);
                }
                self.emit(Event::new(EventKind::Deleted, path));
            }
            Change::DeletedSelf => {
                self.table.remove(&record.wd);
                // Subdirectories are reported by their parent's DELETE.
                if entry.path == as_dir_path(&self.ctx.root) {
                    self.emit(Event::new(EventKind::Deleted, path));
                }
            }
            Change::Ignored => {
                self.table.remove(&record.wd);
            }
            Change::MovedSelf => {
                if entry.path == as_dir_path(&self.ctx.root) {
                    warn!(root = ?self.ctx.root, "watched root was moved; paths may be stale");
                }
            }
            Change::MovedFrom => {
                self.pending.push(PendingMove {
                    cookie: record.cookie,
                    path,
                    is_dir,
                });
            }
            Change::MovedTo => {
                let paired = self
                    .pending
                    .iter()
                    .position(|p| p.cookie == record.cookie && record.cookie != 0)
                    .map(|idx| self.pending.remove(idx));
                match paired {
                    Some(from) => self.handle_rename(from, path, is_dir),
                    None => {
                        // Moved in from outside the tree.
                        if is_dir && !self.ctx.is_excluded(&path) {
                            self.extend_tree(&path);
                        }
                        self.emit(Event::new(EventKind::Created, path));
                    }
                }
            }
            Change::Modified => {
                self.emit(Event::new(EventKind::Modified, path));
            }
            Change::Overflow => {}
        }
    }

    fn handle_rename(&mut self, from: PendingMove, to: PathBuf, is_dir: bool) {
        if is_dir || from.is_dir {
            let old_excluded = self.ctx.is_excluded(&from.path);
            match (old_excluded, self.ctx.is_excluded(&to)) {
                (_, true) => self.release_under(&from.path),
                (true, false) => self.extend_tree(&to),
                (false, false) => {
                    let moved = self.table.rebase(&from.path, &to);
                    debug!(from = ?from.path, to = ?to, moved, "rebased watches after directory rename");
                }
            }
        }

        self.emit(Event::renamed(from.path, to));
    }

    /// Unpaired MOVED_FROM records: the entry left the tree.
    fn flush_pending(&mut self) {
        for moved in std::mem::take(&mut self.pending) {
            if moved.is_dir {
                self.release_under(&moved.path);
            }
            self.emit(Event::new(EventKind::Deleted, moved.path));
        }
    }

    fn extend_tree(&mut self, dir: &Path) {
        if !is_directory(dir) {
            debug!(path = ?dir, "directory vanished before it could be watched");
            return;
        }
        match add_tree(&mut self.watches, &mut self.table, &self.ctx, dir, false) {
            Ok(added) => debug!(path = ?dir, added, "extended watch tree"),
            Err(err) => warn!(path = ?dir, error = %err, "failed to extend watch tree"),
        }
    }

    fn release_under(&mut self, dir: &Path) {
        let entries = self.table.remove_under(dir);
        for failure in release_entries(&mut self.watches, entries) {
            debug!(%failure, "failed to release watch");
        }
    }

    /// Filter by mask and excludes, collapse repeated modifications, deliver.
    fn emit(&mut self, event: Event) {
        if self.cancel.is_requested() {
            return;
        }
        let Some(event) = self.ctx.admit(event) else {
            return;
        };

        if event.kind == EventKind::Modified {
            if self.last_modified.as_deref() == Some(event.path.as_path()) {
                trace!(path = ?event.path, "collapsing repeated modification");
                return;
            }
            self.last_modified = Some(event.path.clone());
        } else {
            self.last_modified = None;
        }

        self.ctx.deliver(event);
    }

    /// Release every watch and close the descriptor.
    fn shutdown(mut self) -> Result<()> {
        let entries = self.table.drain();
        let count = entries.len();
        let mut failures = release_entries(&mut self.watches, entries);

        if let Err(err) = self.inotify.close() {
            failures.push(format!("closing inotify descriptor: {err}"));
        }

        debug!(released = count, "inotify resources released");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TreewatchError::Teardown(failures.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

struct Running {
    cancel: Cancel,
    thread: JoinHandle<Result<()>>,
}

/// Linux backend: a table of per-directory inotify watches.
#[derive(Default)]
pub struct InotifyBackend {
    running: Option<Running>,
}

impl std::fmt::Debug for InotifyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InotifyBackend")
            .field("running", &self.running.is_some())
            .finish()
    }
}

impl InotifyBackend {
    pub fn new() -> Self {
        Self { running: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Backend for InotifyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Inotify
    }

    fn setup(&mut self, ctx: WatchContext) -> Result<()> {
        if self.running.is_some() {
            return Err(already_running(self.kind()));
        }

        let inotify = Inotify::init()
            .map_err(|e| TreewatchError::Setup(format!("cannot initialise inotify: {e}")))?;
        let mut watches = inotify.watches();
        let mut table = WatchTable::new();

        // All-or-nothing: on failure, drop what was added and close the fd.
        if let Err(err) = add_tree(&mut watches, &mut table, &ctx, &ctx.root, true) {
            release_entries(&mut watches, table.drain());
            let _ = inotify.close();
            return Err(err);
        }

        let poll = match Poll::new() {
            Ok(poll) => poll,
            Err(err) => {
                release_entries(&mut watches, table.drain());
                let _ = inotify.close();
                return Err(TreewatchError::Setup(format!("cannot create poller: {err}")));
            }
        };
        let cancel = match Waker::new(poll.registry(), WAKE_TOKEN) {
            Ok(waker) => Cancel {
                requested: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
            Err(err) => {
                release_entries(&mut watches, table.drain());
                let _ = inotify.close();
                return Err(TreewatchError::Setup(format!("cannot create waker: {err}")));
            }
        };

        debug!(root = ?ctx.root, watches = table.len(), "initial watch tree built");

        let event_loop = EventLoop {
            inotify,
            cancel: cancel.clone(),
            watches,
            poll,
            events: Events::with_capacity(64),
            table,
            ctx,
            buffer: vec![0; READ_BUFFER_LEN],
            pending: Vec::new(),
            last_modified: None,
        };

        let latch = StartupLatch::new();
        let thread_latch = LatchGuard::new(latch.clone());

        // A failed spawn drops the closure, which closes the descriptor.
        let thread = thread::Builder::new()
            .name("treewatch-inotify".to_string())
            .spawn(move || event_loop.run(thread_latch))?;

        if let Err(reason) = latch.wait() {
            let joined = thread.join();
            debug!(?joined, "inotify thread exited during startup");
            return Err(TreewatchError::Setup(reason));
        }

        self.running = Some(Running { cancel, thread });
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        let running = self.running.take().ok_or_else(|| not_running(self.kind()))?;

        running
            .cancel
            .request()
            .map_err(|e| TreewatchError::Teardown(format!("cannot wake inotify thread: {e}")))?;

        if is_current_thread(&running.thread) {
            // Called from the event callback: the loop sees the flag once
            // the callback returns, then exits and cleans up.
            debug!("inotify teardown requested from the event thread; not joining");
            return Ok(());
        }

        match running.thread.join() {
            Ok(result) => {
                info!("inotify event loop stopped");
                result
            }
            Err(_) => Err(TreewatchError::Teardown(
                "inotify thread panicked".to_string(),
            )),
        }
    }
}

impl Drop for InotifyBackend {
    fn drop(&mut self) {
        if self.running.is_some() {
            if let Err(err) = self.teardown() {
                warn!(error = %err, "inotify backend dropped while running; teardown failed");
            }
        }
    }
}
