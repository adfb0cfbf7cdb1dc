//! A `Scanner` turns root paths into the ordered list of [`Item`]s
//! for a [`crate::WindowedCache`].  It walks directories recursively,
//! in lexical order, and remembers every file it has listed: scanning
//! the same tree again only returns new files.
//!
//! Scans never fail.  Files that disappear mid-scan are skipped
//! quietly, and other I/O errors are logged and skipped.
use derivative::Derivative;
use filetime::FileTime;
use std::collections::HashSet;
use std::io::Error;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use tracing::debug;
use tracing::warn;

use crate::decode::Decoder;
use crate::item::Item;

/// How to order scanned items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Keep the walk's order: roots in the order given, then
    /// lexical order within each directory.
    #[default]
    Unsorted,
    /// Oldest modification time first.
    Modified,
    /// Newest modification time first.
    ModifiedReverse,
}

#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct Scanner {
    // Every file returned, or filtered out, so far.
    seen: HashSet<PathBuf>,
    modified_within: Option<Duration>,
    order: SortOrder,
    #[derivative(Debug = "ignore")]
    probe: Option<Arc<dyn Decoder>>,
}

impl Scanner {
    /// Returns a scanner that lists every file, in walk order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only lists files modified less than `age` ago.
    pub fn modified_within(mut self, age: Duration) -> Self {
        self.modified_within = Some(age);
        self
    }

    pub fn sort(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Only lists files that `decoder` can [`Decoder::probe`], and
    /// records their dimensions.
    pub fn probe(mut self, decoder: impl Decoder + 'static) -> Self {
        self.probe = Some(Arc::new(decoder));
        self
    }

    /// Returns whether `path` was already listed (or filtered out) by
    /// this scanner.
    pub fn seen(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    /// Walks each of `roots`, and returns an item for every regular
    /// file not seen in a previous scan.
    pub fn scan<P: AsRef<Path>>(&mut self, roots: impl IntoIterator<Item = P>) -> Vec<Item> {
        let threshold = self
            .modified_within
            .and_then(|age| SystemTime::now().checked_sub(age))
            .map(FileTime::from_system_time);
        let mut items = Vec::new();

        for root in roots {
            self.visit(root.as_ref(), threshold, &mut items);
        }

        match self.order {
            SortOrder::Unsorted => {}
            SortOrder::Modified => items.sort_by_key(|item| item.modified()),
            SortOrder::ModifiedReverse => {
                items.sort_by_key(|item| std::cmp::Reverse(item.modified()))
            }
        }

        debug!(count = items.len(), order = ?self.order, "scanned items");
        items
    }

    fn visit(&mut self, path: &Path, threshold: Option<FileTime>, items: &mut Vec<Item>) {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if is_absent_file_error(&e) => {
                debug!(path = %path.display(), "vanished during scan");
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat");
                return;
            }
        };

        if metadata.is_dir() {
            let mut children: Vec<PathBuf> = match std::fs::read_dir(path) {
                Ok(entries) => entries.flatten().map(|entry| entry.path()).collect(),
                Err(e) if is_absent_file_error(&e) => return,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to list directory");
                    return;
                }
            };

            children.sort();
            for child in children {
                self.visit(&child, threshold, items);
            }

            return;
        }

        // Follow links to files, but never into directories: that could
        // loop.
        let metadata = if metadata.file_type().is_symlink() {
            match std::fs::metadata(path) {
                Ok(target) if target.is_file() => target,
                _ => {
                    debug!(path = %path.display(), "skipping link to a non-file");
                    return;
                }
            }
        } else {
            metadata
        };

        if !metadata.is_file() {
            debug!(path = %path.display(), "skipping special file");
            return;
        }

        if !self.seen.insert(path.to_owned()) {
            return;
        }

        let modified = FileTime::from_last_modification_time(&metadata);
        if threshold.map_or(false, |threshold| modified < threshold) {
            return;
        }

        let dimensions = match &self.probe {
            Some(decoder) => match decoder.probe(path) {
                Ok(dimensions) => Some(dimensions),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping undecodable file");
                    return;
                }
            },
            None => None,
        };

        items.push(Item::with_metadata(
            path,
            modified,
            metadata.len(),
            dimensions,
        ));
    }
}

/// Checks whether the error is for a missing file: NotFound, or stale
/// handle.  Files come and go while we scan, and a stale (NFS) handle
/// is just another way for a file to be gone.
fn is_absent_file_error(error: &Error) -> bool {
    if error.kind() == ErrorKind::NotFound {
        true
    } else if let Some(errno) = error.raw_os_error() {
        errno == libc::ESTALE
    } else {
        false
    }
}

#[test]
fn test_is_absent_file_error() {
    assert!(is_absent_file_error(&Error::new(
        ErrorKind::NotFound,
        "not found"
    )));
    assert!(!is_absent_file_error(&Error::new(
        ErrorKind::PermissionDenied,
        "bad"
    )));

    assert!(is_absent_file_error(&Error::from_raw_os_error(libc::ENOENT)));
    assert!(is_absent_file_error(&Error::from_raw_os_error(libc::ESTALE)));
    assert!(!is_absent_file_error(&Error::from_raw_os_error(libc::EIO)));
}
