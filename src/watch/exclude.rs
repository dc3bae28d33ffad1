// src/watch/exclude.rs

use std::fmt;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::errors::{Result, TreewatchError};
use crate::watch::path_utils::{make_path, trimmed_str};

/// Compiled exclude patterns for one monitor.
///
/// Patterns are absolute globs. `*` matches within a single path segment,
/// `**` matches across segments:
///
/// - `/w/*/c` excludes `/w/a/c` but not `/w/a/b/c`
/// - `/w/**/c` excludes both
///
/// Paths are tested with and without their trailing directory separator,
/// so `/w/a/*` also excludes the directory `/w/a/b/`. An excluded directory
/// excludes everything below it: with `/w/a/*`, `/w/a/b/c` is excluded
/// because `/w/a/b` is. Only ancestors below the root are considered.
#[derive(Clone)]
pub struct ExcludeSet {
    root: PathBuf,
    patterns: Vec<String>,
    set: GlobSet,
}

impl fmt::Debug for ExcludeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExcludeSet")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }
}

impl ExcludeSet {
    /// Compile `patterns`, prefixing every relative one with `root`.
    pub fn new<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut absolute = Vec::with_capacity(patterns.len());

        for pat in patterns {
            let pat = absolutize_pattern(root, pat.as_ref());
            let glob = GlobBuilder::new(&pat)
                .literal_separator(true)
                .build()
                .map_err(|source| TreewatchError::InvalidPattern {
                    pattern: pat.clone(),
                    source,
                })?;
            builder.add(glob);
            absolute.push(pat);
        }

        let set = builder.build().map_err(|source| TreewatchError::InvalidPattern {
            pattern: absolute.join(", "),
            source,
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            patterns: absolute,
            set,
        })
    }

    /// The absolutized patterns, in the order they were given.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if any pattern matches `path` or one of its ancestor
    /// directories below the root.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        if self.matches(path) {
            return true;
        }

        path.ancestors()
            .skip(1)
            .take_while(|dir| dir.starts_with(&self.root) && *dir != self.root)
            .any(|dir| self.matches(dir))
    }

    fn matches(&self, path: &Path) -> bool {
        let full = path.to_string_lossy();
        if self.set.is_match(full.as_ref()) {
            return true;
        }

        let trimmed = trimmed_str(path);
        trimmed != full && self.set.is_match(trimmed.as_str())
    }
}

/// Free-function form of [`ExcludeSet::is_excluded`].
pub fn is_excluded(path: &Path, excludes: &ExcludeSet) -> bool {
    excludes.is_excluded(path)
}

fn absolutize_pattern(root: &Path, pattern: &str) -> String {
    if pattern.starts_with(MAIN_SEPARATOR) {
        return pattern.to_string();
    }
    let rel = pattern.strip_prefix("./").unwrap_or(pattern);
    make_path(rel, root, false).to_string_lossy().into_owned()
}
