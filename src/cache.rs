//! The `WindowedCache` keeps decoded frames for a window of items
//! around a cursor.  Moving the cursor within the window is free;
//! once the cursor strays more than about half a window from the
//! middle, the window shifts toward it, evicts the frames that fell
//! out, and restarts the background loader to fill the slots that
//! entered.
//!
//! All mutation goes through `&mut self`.  Readers get a frame with
//! [`WindowedCache::pix`], which blocks until the background loader
//! (or a synchronous load) makes the cursor's frame available.
use derivative::Derivative;
use parking_lot::MappedMutexGuard;
use parking_lot::MutexGuard;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;
use tracing::error;

use crate::decode::Decoder;
use crate::decode::Frame;
use crate::error::Error;
use crate::item::Item;
use crate::loader::Loader;
use crate::loader::Repaint;
use crate::loader::Shared;
use crate::loader::Window;
use crate::relation::CyclicRelation;
use crate::slot::Pool;
use crate::DEFAULT_CAPACITY;

/// Construct a [`WindowedCache`] with this builder.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CacheBuilder {
    #[derivative(Debug = "ignore")]
    decoder: Arc<dyn Decoder>,
    capacity: usize,
    #[derivative(Debug = "ignore")]
    repaint: Option<Repaint>,
}

impl CacheBuilder {
    /// Returns a builder for a cache that decodes items with `decoder`,
    /// and holds up to [`DEFAULT_CAPACITY`] frames.
    pub fn new(decoder: impl Decoder + 'static) -> Self {
        CacheBuilder {
            decoder: Arc::new(decoder),
            capacity: DEFAULT_CAPACITY,
            repaint: None,
        }
    }

    /// Sets the maximum number of frames to keep in memory.  The
    /// window is smaller when there are fewer items.
    ///
    /// A capacity of zero is treated as one.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Sets a hook to call whenever new frames may be ready for
    /// display.  The hook runs on whichever thread completed the
    /// load, and must not call back into the cache.
    pub fn repaint(mut self, repaint: impl Fn() + Send + Sync + 'static) -> Self {
        self.repaint = Some(Arc::new(repaint));
        self
    }

    /// Returns an empty cache; call [`WindowedCache::walk`] to give it
    /// items.
    pub fn build(self) -> WindowedCache {
        WindowedCache {
            capacity: self.capacity,
            shared: Arc::new(Shared::new(self.decoder, self.repaint)),
            window: None,
            loader: Loader::default(),
        }
    }
}

/// The decoded frame for the cursor, borrowed from its slot.  The
/// slot stays locked while the `Pixels` is alive.
#[derive(Debug)]
pub struct Pixels<'a> {
    guard: MappedMutexGuard<'a, Frame>,
}

impl Deref for Pixels<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.guard
    }
}

#[derive(Debug)]
pub struct WindowedCache {
    capacity: usize,
    shared: Arc<Shared>,
    // `None` until the first successful walk.
    window: Option<Window>,
    loader: Loader,
}

impl WindowedCache {
    /// Returns the maximum number of frames this cache holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Returns the cursor's position, or 0 for an empty cache.
    pub fn index(&self) -> usize {
        self.window.as_ref().map_or(0, |window| window.relation.index())
    }

    /// Returns the item under the cursor.
    pub fn current(&self) -> Option<&Item> {
        self.window
            .as_ref()
            .map(|window| &window.items[window.relation.index()])
    }

    pub fn items(&self) -> &[Item] {
        match &self.window {
            Some(window) => &window.items,
            None => &[],
        }
    }

    /// Returns the relation between the window and the items.
    pub fn relation(&self) -> Option<&CyclicRelation> {
        self.window.as_ref().map(|window| &window.relation)
    }

    /// Returns whether the background loader is still walking the
    /// window, or any load is in flight.
    pub fn is_loading(&self) -> bool {
        self.loader.is_running() || self.shared.in_flight() > 0
    }

    /// Stops the background loader, after its in-flight load.
    pub fn cancel(&mut self) -> Result<(), Error> {
        self.loader.cancel()
    }

    /// Replaces the cache's items with `items`, and moves the cursor to
    /// `index` (clamped to the last item).  Frames already decoded for
    /// items that remain in the window are kept.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoItems`] if `items` is empty, and with
    /// [`Error::Busy`] if the loader could not be stopped.  The cache is
    /// unchanged in both cases.
    pub fn walk(&mut self, index: usize, items: Vec<Item>) -> Result<(), Error> {
        if items.is_empty() {
            return Err(Error::NoItems);
        }

        self.loader.cancel()?;
        self.init(index, Arc::new(items))
    }

    /// Removes the item under the cursor.  The cursor stays at the same
    /// position, so it moves to the next item (or to the new last item).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoItems`] if this is the last item, and with
    /// [`Error::Busy`] if the loader could not be stopped.  The cache is
    /// unchanged in both cases.
    pub fn remove_current(&mut self) -> Result<(), Error> {
        let (index, mut items) = match &self.window {
            Some(window) if window.items.len() > 1 => {
                (window.relation.index(), window.items.clone())
            }
            _ => return Err(Error::NoItems),
        };

        self.loader.cancel()?;
        let removed = Arc::make_mut(&mut items).remove(index);
        debug!(index, name = %removed.name().display(), "removed item");
        self.init(index, items)
    }

    /// Rebuilds the window over `items`, with the cursor at `index`,
    /// and starts loading it.  The loader must be idle.
    fn init(&mut self, index: usize, items: Arc<Vec<Item>>) -> Result<(), Error> {
        let len = items.len();
        let index = index.min(len - 1);
        let subset_len = self.capacity.min(len);
        let relation = CyclicRelation::new(
            index as isize - (subset_len / 2) as isize,
            index as isize,
            subset_len,
            len,
        )?;

        let pool = match &self.window {
            Some(window) => window.pool.rehome(&relation, &items),
            None => Pool::new(subset_len),
        };

        debug!(
            len,
            index,
            slots = pool.len(),
            left = relation.left(),
            right = relation.right(),
            "initialised window"
        );
        let window = Window {
            relation,
            items,
            pool: Arc::new(pool),
        };
        self.window = Some(window.clone());
        self.loader.start(window, self.shared.clone())
    }

    /// Loads the item at `index` in the foreground.  Returns false if
    /// `index` is not in the window.
    pub fn load(&self, index: usize) -> bool {
        match &self.window {
            Some(window)
                if index < window.items.len() && window.relation.contains(index as isize) =>
            {
                window.load(&self.shared, index);
                true
            }
            _ => false,
        }
    }

    /// Returns the cursor's frame, blocking until it is decoded.
    /// Returns `None` if the cache is empty, or if the item under the
    /// cursor failed to decode.
    pub fn pix(&self) -> Option<Pixels<'_>> {
        let window = self.window.as_ref()?;
        let index = window.relation.index();
        let item = &window.items[index];

        // Nobody else will load the cursor.
        if !self.loader.is_running() {
            window.load(&self.shared, index);
        }

        let slot = window.slot(index);
        let mut guard = slot.lock();
        loop {
            if item.error().is_some() {
                return None;
            }

            if guard.holds(item.name()) {
                break;
            }

            slot.wait(&mut guard);
        }

        Some(Pixels {
            guard: MutexGuard::map(guard, |state| &mut state.frame),
        })
    }

    /// Moves the cursor by `stride` items, cyclically, and returns the
    /// new current item.  The window follows the cursor when it gets
    /// too close to either edge; a zero stride instead reloads the
    /// current item.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoItems`] on an empty cache, and with
    /// [`Error::Busy`] (without moving anything) if the window must
    /// shift but the loader could not be stopped.
    pub fn cycle(&mut self, stride: isize) -> Result<&Item, Error> {
        let window = self.window.as_mut().ok_or(Error::NoItems)?;

        if stride == 0 {
            let index = window.relation.index();

            window.slot(index).lock().frame.clear();
            window.load(&self.shared, index);
            return Ok(&window.items[index]);
        }

        let shift = window_shift(&window.relation, stride);
        if shift != 0 {
            self.loader.cancel()?;

            let relation = &window.relation;
            debug!(
                shift,
                left = relation.left(),
                right = relation.right(),
                "shifting window"
            );
            if shift.unsigned_abs() >= relation.subset_len() {
                window.pool.evict_all();
            } else if shift > 0 {
                relation.for_each(relation.left() as isize + shift - 1, -1, |i| {
                    window.slot(i).evict()
                });
            } else {
                relation.for_each(relation.right() as isize + shift, 1, |i| {
                    window.slot(i).evict()
                });
            }
        }

        if let Err(e) = window.relation.cycle(shift, stride) {
            error!(shift, stride, error = %e, "window lost track of the cursor");
            panic!("window lost track of the cursor: {}", e);
        }

        if shift != 0 {
            self.loader.start(window.clone(), self.shared.clone())?;
        } else if !self.loader.is_running() {
            // Same window, but the cursor's slot may have never been
            // loaded.  Does nothing if it was.
            window.load(&self.shared, window.relation.index());
        }

        self.shared.repaint();
        Ok(&window.items[window.relation.index()])
    }
}

impl fmt::Display for WindowedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.window {
            Some(window) => write!(f, "{}/{}", window.relation.index() + 1, window.items.len())?,
            None => write!(f, "0/0")?,
        }

        if self.is_loading() {
            write!(f, " (loading)")?;
        }

        Ok(())
    }
}

/// Returns how far to shift `relation`'s window before moving its
/// cursor by `stride`, so that the cursor stays in the window.
///
/// The window moves by half the distance to the cursor's farther
/// edge once that half exceeds the distance to the nearer edge.  A
/// cursor that would land outside the window re-centres it.
pub(crate) fn window_shift(relation: &CyclicRelation, stride: isize) -> isize {
    if relation.covers_parent() {
        return 0;
    }

    let subset_len = relation.subset_len();
    let stride = stride.rem_euclid(relation.parent_len() as isize);
    let (from_left, to_right) = relation.diff(relation.index() as isize + stride);
    let shift = if from_left / 2 > to_right {
        (from_left / 2) as isize
    } else if to_right / 2 > from_left {
        -((to_right / 2) as isize)
    } else {
        0
    };

    if from_left < subset_len || (from_left == subset_len && shift != 0) {
        return shift;
    }

    let forward = from_left - subset_len / 2;
    let backward = relation.parent_len() - forward;
    if backward < forward {
        -(backward as isize)
    } else {
        forward as isize
    }
}
