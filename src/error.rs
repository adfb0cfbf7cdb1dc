//! Errors come in three flavours.  [`InvariantViolation`]s mean the
//! window arithmetic itself is wrong; [`Error`] is what the cache's
//! mutating operations return; [`DecodeError`]s are recorded on the
//! item that failed to decode, and never propagate further.
use thiserror::Error;

/// A [`crate::CyclicRelation`] refuses to enter a state where its
/// cursor and window do not form a total cyclic order.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The window or parent set sizes are out of range: we need
    /// `1 <= subset <= parent`.
    #[error("subset length {subset} must be in 1..={parent}")]
    Size { subset: usize, parent: usize },

    /// The cursor fell in the gap between the window's right and left
    /// bounds.
    #[error("{}", describe_order(.left, .index, .right))]
    Order {
        left: usize,
        index: usize,
        right: usize,
    },
}

fn describe_order(left: &usize, index: &usize, right: &usize) -> String {
    if left < right {
        format!(
            "l < r expects l <= i <= r but {} <= {} <= {}",
            left, index, right
        )
    } else {
        format!("r < l expects i ≷ l,r but {} ≹ {},{}", index, left, right)
    }
}

/// Failures reported by [`crate::WindowedCache`] operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The window arithmetic broke the cyclic order.
    #[error("cyclic order violated: {0}")]
    Invariant(#[from] InvariantViolation),

    /// The background loader did not acknowledge cancellation.  Nothing
    /// was mutated; the caller may try again.
    #[error("cache is busy: loader did not acknowledge cancellation")]
    Busy,

    /// There is nothing (left) to cache.
    #[error("no items to display")]
    NoItems,

    /// We could not start a loader thread.
    #[error("failed to spawn loader: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why an item has no payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read item: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode item: {0}")]
    Format(String),

    /// The decoder panicked; the payload's message, if it had one.
    #[error("decoder panicked: {0}")]
    Panicked(String),

    /// The decoder filled a frame that is not tightly packed RGBA.
    #[error("unsupported stride: expected {expected} bytes, found {actual}")]
    Stride { expected: usize, actual: usize },
}

#[test]
fn test_order_messages() {
    let wrapped = InvariantViolation::Order {
        left: 20,
        index: 15,
        right: 10,
    };
    assert!(wrapped.to_string().starts_with("r < l"));

    let linear = InvariantViolation::Order {
        left: 10,
        index: 25,
        right: 20,
    };
    assert!(linear.to_string().starts_with("l < r"));
}

#[test]
fn test_invariant_converts() {
    let err: Error = InvariantViolation::Size {
        subset: 0,
        parent: 3,
    }
    .into();

    assert!(matches!(
        err,
        Error::Invariant(InvariantViolation::Size { subset: 0, .. })
    ));
    assert!(err.to_string().contains("1..=3"));
}
