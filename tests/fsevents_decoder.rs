// tests/fsevents_decoder.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use treewatch::types::EventKind;
use treewatch::watch::fsevents::{Decoder, PathProbe, StreamFlags, resolve_kind};

/// Scripted filesystem: existing paths and their birth times.
#[derive(Default)]
struct FakeFs {
    births: HashMap<PathBuf, SystemTime>,
}

impl FakeFs {
    fn with(mut self, path: &str, birth: SystemTime) -> Self {
        self.births.insert(PathBuf::from(path), birth);
        self
    }
}

impl PathProbe for FakeFs {
    fn exists(&self, path: &Path) -> bool {
        self.births.keys().any(|p| p.components().eq(path.components()))
    }

    fn birth_time(&self, path: &Path) -> Option<SystemTime> {
        self.births
            .iter()
            .find(|(p, _)| p.components().eq(path.components()))
            .map(|(_, t)| *t)
    }
}

fn start() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)
}

fn after(secs: u64) -> SystemTime {
    start() + Duration::from_secs(secs)
}

#[test]
fn precedence_is_created_deleted_renamed_modified() {
    let all = StreamFlags::ITEM_CREATED
        | StreamFlags::ITEM_REMOVED
        | StreamFlags::ITEM_RENAMED
        | StreamFlags::ITEM_MODIFIED;

    assert_eq!(resolve_kind(all, false), Some(EventKind::Created));
    assert_eq!(resolve_kind(all, true), Some(EventKind::Deleted));
    assert_eq!(
        resolve_kind(StreamFlags::ITEM_RENAMED | StreamFlags::ITEM_REMOVED, false),
        Some(EventKind::Deleted)
    );
    assert_eq!(
        resolve_kind(StreamFlags::ITEM_RENAMED | StreamFlags::ITEM_MODIFIED, false),
        Some(EventKind::Renamed)
    );
    assert_eq!(
        resolve_kind(StreamFlags::INODE_META_MOD, false),
        Some(EventKind::Modified)
    );
    assert_eq!(
        resolve_kind(StreamFlags::ITEM_XATTR_MOD, false),
        Some(EventKind::Modified)
    );
    assert_eq!(resolve_kind(StreamFlags::IS_FILE, false), None);
}

#[test]
fn new_file_is_created() {
    let fs = FakeFs::default().with("/w/a.txt", after(1));
    let mut decoder = Decoder::new(start());

    let events = decoder.decode(
        PathBuf::from("/w/a.txt"),
        StreamFlags::ITEM_CREATED | StreamFlags::IS_FILE,
        &fs,
    );

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Created);
    assert_eq!(events[0].path, PathBuf::from("/w/a.txt"));
    assert_eq!(decoder.watermark_len(), 1);
}

#[test]
fn file_born_before_start_is_not_created() {
    let fs = FakeFs::default().with("/w/old.txt", start() - Duration::from_secs(5));
    let mut decoder = Decoder::new(start());

    let events = decoder.decode(
        PathBuf::from("/w/old.txt"),
        StreamFlags::ITEM_CREATED | StreamFlags::IS_FILE,
        &fs,
    );
    assert!(events.is_empty());

    // Stale Created bit on a later write falls through to Modified.
    let events = decoder.decode(
        PathBuf::from("/w/old.txt"),
        StreamFlags::ITEM_CREATED | StreamFlags::ITEM_MODIFIED | StreamFlags::IS_FILE,
        &fs,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Modified);
}

#[test]
fn redelivered_creation_is_suppressed_by_watermark() {
    let fs = FakeFs::default().with("/w/a.txt", after(1));
    let mut decoder = Decoder::new(start());
    let flags = StreamFlags::ITEM_CREATED | StreamFlags::IS_FILE;

    assert_eq!(decoder.decode(PathBuf::from("/w/a.txt"), flags, &fs).len(), 1);

    let again = decoder.decode(
        PathBuf::from("/w/a.txt"),
        flags | StreamFlags::ITEM_MODIFIED,
        &fs,
    );
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].kind, EventKind::Modified);
}

#[test]
fn recreated_path_is_created_again() {
    let mut decoder = Decoder::new(start());
    let flags = StreamFlags::ITEM_CREATED | StreamFlags::IS_FILE;

    let first = FakeFs::default().with("/w/a.txt", after(1));
    assert_eq!(decoder.decode(PathBuf::from("/w/a.txt"), flags, &first)[0].kind, EventKind::Created);

    let second = FakeFs::default().with("/w/a.txt", after(2));
    assert_eq!(decoder.decode(PathBuf::from("/w/a.txt"), flags, &second)[0].kind, EventKind::Created);
}

#[test]
fn created_and_removed_in_one_record_is_deleted() {
    let fs = FakeFs::default();
    let mut decoder = Decoder::new(start());

    let events = decoder.decode(
        PathBuf::from("/w/tmp.txt"),
        StreamFlags::ITEM_CREATED | StreamFlags::ITEM_REMOVED | StreamFlags::IS_FILE,
        &fs,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Deleted);
    assert_eq!(decoder.watermark_len(), 0);
}

#[test]
fn rename_halves_are_paired() {
    let fs = FakeFs::default().with("/w/c.txt", after(1));
    let mut decoder = Decoder::new(start());
    let flags = StreamFlags::ITEM_RENAMED | StreamFlags::IS_FILE;

    assert!(decoder.decode(PathBuf::from("/w/a.txt"), flags, &fs).is_empty());
    let events = decoder.decode(PathBuf::from("/w/c.txt"), flags, &fs);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Renamed);
    assert_eq!(events[0].path, PathBuf::from("/w/c.txt"));
    assert_eq!(events[0].previous_path, Some(PathBuf::from("/w/a.txt")));
    assert!(decoder.held_rename().is_none());
}

#[test]
fn rename_split_across_batches_is_still_paired() {
    let fs = FakeFs::default().with("/w/new.txt", after(1));
    let mut decoder = Decoder::new(start());
    let flags = StreamFlags::ITEM_RENAMED | StreamFlags::IS_FILE;

    // First callback ends right after the old half.
    assert!(decoder.decode(PathBuf::from("/w/old.txt"), flags, &fs).is_empty());
    assert_eq!(decoder.held_rename(), Some(Path::new("/w/old.txt")));

    // Next callback opens with the new half.
    let events = decoder.decode(PathBuf::from("/w/new.txt"), flags, &fs);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Renamed);
    assert_eq!(events[0].path, PathBuf::from("/w/new.txt"));
    assert_eq!(events[0].previous_path, Some(PathBuf::from("/w/old.txt")));
}

#[test]
fn unpaired_old_half_becomes_deleted() {
    let fs = FakeFs::default().with("/w/b.txt", after(1));
    let mut decoder = Decoder::new(start());
    let renamed = StreamFlags::ITEM_RENAMED | StreamFlags::IS_FILE;

    assert!(decoder.decode(PathBuf::from("/w/a.txt"), renamed, &fs).is_empty());

    // An unrelated record gives up on the pairing.
    let events = decoder.decode(
        PathBuf::from("/w/b.txt"),
        StreamFlags::ITEM_MODIFIED | StreamFlags::IS_FILE,
        &fs,
    );
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::Deleted);
    assert_eq!(events[0].path, PathBuf::from("/w/a.txt"));
    assert_eq!(events[0].previous_path, None);
    assert_eq!(events[1].kind, EventKind::Modified);

    // So does a second old half arriving before any new half.
    assert!(decoder.decode(PathBuf::from("/w/x.txt"), renamed, &fs).is_empty());
    let events = decoder.decode(PathBuf::from("/w/y.txt"), renamed, &fs);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Deleted);
    assert_eq!(events[0].path, PathBuf::from("/w/x.txt"));
    assert_eq!(decoder.held_rename(), Some(Path::new("/w/y.txt")));
}

#[test]
fn lone_new_half_is_created() {
    let fs = FakeFs::default().with("/w/in.txt", after(1));
    let mut decoder = Decoder::new(start());

    let events = decoder.decode(
        PathBuf::from("/w/in.txt"),
        StreamFlags::ITEM_RENAMED | StreamFlags::IS_FILE,
        &fs,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Created);
}

#[test]
fn directories_get_trailing_separator() {
    let fs = FakeFs::default().with("/w/sub", after(1));
    let mut decoder = Decoder::new(start());

    let events = decoder.decode(
        PathBuf::from("/w/sub"),
        StreamFlags::ITEM_CREATED | StreamFlags::IS_DIR,
        &fs,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path.as_os_str(), "/w/sub/");
}

#[test]
fn bookkeeping_records_are_ignored() {
    let fs = FakeFs::default().with("/w", after(1));
    let mut decoder = Decoder::new(start());

    for flags in [
        StreamFlags::HISTORY_DONE,
        StreamFlags::ROOT_CHANGED,
        StreamFlags::MOUNT | StreamFlags::ITEM_CREATED,
        StreamFlags::UNMOUNT,
        StreamFlags::MUST_SCAN_SUBDIRS | StreamFlags::USER_DROPPED,
    ] {
        assert!(decoder.decode(PathBuf::from("/w"), flags, &fs).is_empty());
    }
}

#[test]
fn clear_resets_watermark_and_pending_rename() {
    let fs = FakeFs::default().with("/w/a.txt", after(1));
    let mut decoder = Decoder::new(start());

    decoder.decode(PathBuf::from("/w/a.txt"), StreamFlags::ITEM_CREATED, &fs);
    decoder.decode(PathBuf::from("/w/gone.txt"), StreamFlags::ITEM_RENAMED, &fs);
    decoder.clear();

    assert_eq!(decoder.watermark_len(), 0);
    assert!(decoder.held_rename().is_none());

    // With nothing held, an existing new half reads as a creation.
    let events = decoder.decode(PathBuf::from("/w/a.txt"), StreamFlags::ITEM_RENAMED, &fs);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Created);
}

#[test]
fn suppressed_creation_still_advances_watermark() {
    let fs = FakeFs::default().with("/w/a.txt", after(1));
    let mut decoder = Decoder::new(start());

    // Created and removed in one record: the Created bit is stale.
    let events = decoder.decode(
        PathBuf::from("/w/a.txt"),
        StreamFlags::ITEM_CREATED | StreamFlags::ITEM_REMOVED | StreamFlags::IS_FILE,
        &fs,
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Deleted);
    assert_eq!(decoder.watermark_len(), 1);

    // The same birth time is not reported as new later on.
    let events = decoder.decode(
        PathBuf::from("/w/a.txt"),
        StreamFlags::ITEM_CREATED | StreamFlags::IS_FILE,
        &fs,
    );
    assert!(events.is_empty());
}

#[test]
fn creation_before_start_is_recorded() {
    let fs = FakeFs::default().with("/w/old.txt", start() - Duration::from_secs(5));
    let mut decoder = Decoder::new(start());

    let events = decoder.decode(PathBuf::from("/w/old.txt"), StreamFlags::ITEM_CREATED, &fs);
    assert!(events.is_empty());
    assert_eq!(decoder.watermark_len(), 1);
}
