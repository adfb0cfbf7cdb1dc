//! Cycle cache keeps a bounded window of decoded items around a
//! cursor that moves cyclically over a large ordered list, e.g., the
//! images in a directory tree, and prefetches the window's items in a
//! background thread.  Moving the cursor to a neighbour is the common
//! case, and should almost always hit a frame that is already
//! decoded; jumping far away is allowed, but pays for a full reload.
//!
//! The index arithmetic lives in [`CyclicRelation`], a total cyclic
//! order over `0..N` with a window of `n <= N` consecutive positions
//! (that may wrap around past zero) and a cursor.  The relation maps
//! each position in the window to one of `n` slots, in a way that is
//! stable when the window shifts: positions that stay in the window
//! keep their slot, and positions that enter the window take over the
//! slots of those that left.  That's what lets [`WindowedCache`]
//! recycle a fixed pool of frame buffers without ever moving one.
//!
//! The [`WindowedCache`] owns one slot per window position.  Each
//! slot pairs a mutex with a condition variable, so readers block on
//! exactly the slot they want while the loader fills others.  The
//! window only moves when the cursor gets too far from its middle:
//! once half the distance to the far edge exceeds the distance to the
//! near edge, the window shifts by that half distance.  A shift
//! cancels the background loader (cooperatively, after its in-flight
//! decode), evicts the slots that left the window, and starts a new
//! loader session that walks outward from the cursor.
//!
//! Decoding is delegated to a [`Decoder`], which fills reusable RGBA
//! [`Frame`]s.  Decode failures are recorded once on the [`Item`], and
//! never retried: reading such an item returns `None` rather than
//! blocking.
//!
//! Items usually come from a [`Scanner`], which walks directory trees
//! in lexical order, remembers the files it already listed, and can
//! filter by modification time, sort by modification time, or only
//! keep files that the decoder can probe.
//!
//! The crate logs with [`tracing`], and never installs a subscriber.
//!
//! # Sample usage
//!
//! ```no_run
//! use cycle_cache::{CacheBuilder, DecodeError, Frame, Scanner, SortOrder};
//! use std::path::Path;
//!
//! // A real decoder would parse an image format.
//! fn decode(name: &Path, frame: &mut Frame) -> Result<(), DecodeError> {
//!     let bytes = std::fs::read(name)?;
//!     frame.resize(1, 1).copy_from_slice(&[bytes.len() as u8, 0, 0, 255]);
//!     Ok(())
//! }
//!
//! # fn main() -> Result<(), cycle_cache::Error> {
//! let items = Scanner::new()
//!     .sort(SortOrder::Modified)
//!     .scan(["/tmp/pictures"]);
//!
//! let mut cache = CacheBuilder::new(decode)
//!     .capacity(20)
//!     .repaint(|| println!("new frames ready"))
//!     .build();
//! cache.walk(0, items)?;
//!
//! // Blocks until the current item is decoded.
//! if let Some(pixels) = cache.pix() {
//!     println!("{}: {}x{}", cache, pixels.width(), pixels.height());
//! }
//!
//! // Next item; the window follows when needed.
//! let next = cache.cycle(1)?;
//! println!("now at {}", next.name().display());
//! # Ok(())
//! # }
//! ```
mod cache;
mod decode;
mod error;
mod item;
mod loader;
pub mod relation;
mod scan;
mod slot;

pub use cache::CacheBuilder;
pub use cache::Pixels;
pub use cache::WindowedCache;
pub use decode::Decoder;
pub use decode::Frame;
pub use error::DecodeError;
pub use error::Error;
pub use error::InvariantViolation;
pub use item::Dimensions;
pub use item::Item;
pub use relation::CyclicRelation;
pub use scan::Scanner;
pub use scan::SortOrder;

/// Default number of frames a [`WindowedCache`] keeps in memory.
pub const DEFAULT_CAPACITY: usize = 20;
