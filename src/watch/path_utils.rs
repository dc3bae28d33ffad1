// src/watch/path_utils.rs

//! Utility functions for building and inspecting watched paths.
//!
//! Directory paths handed out by the engine always carry a trailing
//! separator (`/tmp/w/sub/`), file paths never do. `Path` equality ignores
//! the trailing separator, so callers comparing `Path`s are unaffected.

use std::ffi::{OsStr, OsString};
use std::path::{MAIN_SEPARATOR, MAIN_SEPARATOR_STR, Path, PathBuf};

/// Join `prefix` and `name` with exactly one separator.
///
/// A trailing separator is appended when `is_dir` is set and `name` does not
/// already end in one. An empty `prefix` returns `name` unchanged apart from
/// the directory suffix.
pub fn make_path(name: impl AsRef<OsStr>, prefix: impl AsRef<Path>, is_dir: bool) -> PathBuf {
    let name = Path::new(name.as_ref());
    let prefix = prefix.as_ref();

    let joined = if prefix.as_os_str().is_empty() {
        name.to_path_buf()
    } else {
        // `join` would replace the prefix entirely for an absolute name.
        let rel = name.strip_prefix(MAIN_SEPARATOR_STR).unwrap_or(name);
        prefix.join(rel)
    };

    let mut out: OsString = joined.into_os_string();
    if is_dir && !out.to_string_lossy().ends_with(MAIN_SEPARATOR) {
        out.push(MAIN_SEPARATOR_STR);
    }

    PathBuf::from(out)
}

/// Same path, formatted as a directory (trailing separator).
pub fn as_dir_path(path: &Path) -> PathBuf {
    make_path(path.as_os_str(), "", true)
}

/// Stat `path` and report whether it is a directory.
///
/// A failed stat (typically: the entry vanished between the notification
/// and this check) is reported as `false`.
pub fn is_directory(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Whether the textual form of `path` ends in a separator.
pub fn has_trailing_separator(path: &Path) -> bool {
    path.as_os_str()
        .to_string_lossy()
        .ends_with(MAIN_SEPARATOR_STR)
}

/// `path` as a string without any trailing separator (the root stays `/`).
pub fn trimmed_str(path: &Path) -> String {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches(MAIN_SEPARATOR);
    if trimmed.is_empty() && !s.is_empty() {
        MAIN_SEPARATOR_STR.to_string()
    } else {
        trimmed.to_string()
    }
}

/// If `path` lives under directory `old_dir`, re-root it under `new_dir`.
///
/// Used to keep recorded paths valid after a directory rename.
pub fn rebase(path: &Path, old_dir: &Path, new_dir: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(old_dir).ok()?;
    let is_dir = has_trailing_separator(path);
    if rel.as_os_str().is_empty() {
        return Some(make_path(new_dir.as_os_str(), "", is_dir));
    }
    Some(make_path(rel.as_os_str(), new_dir, is_dir))
}
