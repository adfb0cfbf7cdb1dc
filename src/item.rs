//! An `Item` is one position in the parent set: the name of the
//! resource to decode, what we know about it from the directory
//! listing, and the decode error, if any, recorded the first time a
//! load failed.
use filetime::FileTime;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use crate::error::DecodeError;

/// Pixel dimensions of a decoded item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    /// Returns the size of a tightly packed RGBA frame with these
    /// dimensions.
    pub fn bytes(&self) -> usize {
        4 * self.width as usize * self.height as usize
    }
}

/// Items are cheap to clone; clones share the recorded decode error.
#[derive(Clone, Debug)]
pub struct Item {
    name: PathBuf,
    modified: FileTime,
    size: u64,
    dimensions: Option<Dimensions>,
    // Set at most once, by whichever load fails first.
    error: Arc<OnceLock<DecodeError>>,
}

impl Item {
    /// Returns an item for `name`, without any metadata.
    pub fn new(name: impl Into<PathBuf>) -> Item {
        Item::with_metadata(name, FileTime::zero(), 0, None)
    }

    pub fn with_metadata(
        name: impl Into<PathBuf>,
        modified: FileTime,
        size: u64,
        dimensions: Option<Dimensions>,
    ) -> Item {
        Item {
            name: name.into(),
            modified,
            size,
            dimensions,
            error: Arc::new(OnceLock::new()),
        }
    }

    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Returns the item's modification time, or [`FileTime::zero`] if
    /// unknown.
    pub fn modified(&self) -> FileTime {
        self.modified
    }

    /// Returns the item's size in bytes, as listed.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the item's dimensions, if they were probed while
    /// scanning.
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    /// Returns the error recorded when this item failed to decode.
    pub fn error(&self) -> Option<&DecodeError> {
        self.error.get()
    }

    /// Records `error` for this item, unless another error is already
    /// recorded.  Returns whether `error` was recorded.
    pub(crate) fn record_error(&self, error: DecodeError) -> bool {
        self.error.set(error).is_ok()
    }
}

#[test]
fn test_dimensions_bytes() {
    assert_eq!(Dimensions::new(0, 10).bytes(), 0);
    assert_eq!(Dimensions::new(3, 2).bytes(), 24);
}

/// Only the first error sticks, and clones see it.
#[test]
fn test_record_error_once() {
    let item = Item::new("a.png");
    let clone = item.clone();

    assert!(item.error().is_none());
    assert!(clone.record_error(DecodeError::Format("first".into())));
    assert!(!item.record_error(DecodeError::Format("second".into())));

    match item.error() {
        Some(DecodeError::Format(msg)) => assert_eq!(msg, "first"),
        other => panic!("unexpected error {:?}", other),
    }
}
