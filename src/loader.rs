//! Loading happens off the foreground path, in one background thread
//! per window.  A loader session walks its window outward from the
//! cursor (forward to the right bound, then backward to the left
//! bound), and decodes every item whose slot does not already hold
//! it.
//!
//! Cancellation is cooperative: the session checks a flag before
//! each item, so cancelling waits for at most one in-flight decode.
//! There is no timeout; a decoder that hangs will hang cancellation.
use derivative::Derivative;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::decode::Decoder;
use crate::error::DecodeError;
use crate::error::Error;
use crate::item::Item;
use crate::relation::CyclicRelation;
use crate::slot::Pool;
use crate::slot::Slot;

/// Invoked whenever new pixels may be ready for display.
pub(crate) type Repaint = Arc<dyn Fn() + Send + Sync>;

/// State shared between the foreground and every loader session.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct Shared {
    #[derivative(Debug = "ignore")]
    decoder: Arc<dyn Decoder>,

    #[derivative(Debug = "ignore")]
    repaint: Option<Repaint>,

    // Number of decodes currently running, across all threads.
    in_flight: AtomicU64,
}

impl Shared {
    pub fn new(decoder: Arc<dyn Decoder>, repaint: Option<Repaint>) -> Shared {
        Shared {
            decoder,
            repaint,
            in_flight: AtomicU64::new(0),
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn repaint(&self) {
        if let Some(repaint) = &self.repaint {
            repaint();
        }
    }
}

/// A snapshot of the cache's window: the relation, the full list of
/// items, and the pool.  Loader sessions work on their own snapshot;
/// the foreground only replaces `items` and `pool` while no session
/// runs.
#[derive(Clone, Debug)]
pub(crate) struct Window {
    pub relation: CyclicRelation,
    pub items: Arc<Vec<Item>>,
    pub pool: Arc<Pool>,
}

impl Window {
    pub fn slot(&self, index: usize) -> &Slot {
        self.pool.slot(&self.relation, index)
    }

    /// Loads `items[index]` into its slot, unless the slot already
    /// holds it or the item previously failed to decode.
    ///
    /// `index` must be in the window.
    pub fn load(&self, shared: &Shared, index: usize) {
        let item = &self.items[index];
        if item.error().is_some() {
            return;
        }

        let slot = self.slot(index);
        let mut state = slot.lock();
        if state.holds(item.name()) {
            return;
        }

        state.name = Some(item.name().to_owned());
        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        trace!(index, name = %item.name().display(), "loading");

        // A panicking decoder is just another decode failure: it must
        // not leave half-written pixels or a stuck in-flight count.
        let decoded = std::panic::catch_unwind(AssertUnwindSafe(|| {
            shared.decoder.decode(item.name(), &mut state.frame)
        }));
        let result = match decoded {
            Ok(Ok(())) => state.frame.check(),
            Ok(Err(e)) => Err(e),
            Err(payload) => Err(DecodeError::Panicked(panic_message(payload))),
        };

        if let Err(error) = result {
            warn!(name = %item.name().display(), %error, "failed to decode");
            state.name = None;
            state.frame.clear();
            item.record_error(error);
        }

        // Readers wait on the slot for either pixels or an error:
        // wake them up on every path.
        drop(state);
        slot.notify();

        if shared.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            shared.repaint();
        }
    }

    /// Loads the whole window, starting at the cursor, until `cancel`
    /// is set.
    fn populate(&self, shared: &Shared, cancel: &AtomicBool) {
        let index = self.relation.index();
        let mut visit = |i: usize| {
            if !cancel.load(Ordering::Acquire) {
                self.load(shared, i);
            }
        };

        self.relation.for_each(index as isize, 1, &mut visit);
        // From the left bound, the forward pass already covered
        // everything.
        if index != self.relation.left() {
            self.relation.for_each(index as isize - 1, -1, &mut visit);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => "unknown panic".to_owned(),
        },
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The `Loader` owns at most one background session at a time.
#[derive(Debug, Default)]
pub(crate) struct Loader {
    // Number of sessions started so far; the latest is the session id.
    sessions: u64,
    active: Option<Session>,
}

impl Loader {
    /// Starts a new session for `window`, after cancelling the previous
    /// one, if any.
    pub fn start(&mut self, window: Window, shared: Arc<Shared>) -> Result<(), Error> {
        self.cancel()?;

        self.sessions += 1;
        let id = self.sessions;
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();

        let handle = std::thread::Builder::new()
            .name(format!("cycle-loader-{}", id))
            .spawn(move || {
                debug!(
                    session = id,
                    left = window.relation.left(),
                    right = window.relation.right(),
                    index = window.relation.index(),
                    "loader started"
                );
                window.populate(&shared, &flag);
                debug!(
                    session = id,
                    cancelled = flag.load(Ordering::Acquire),
                    "loader stopped"
                );
            })
            .map_err(Error::Spawn)?;

        self.active = Some(Session { id, cancel, handle });
        Ok(())
    }

    /// Stops the current session, if any, and waits for it to finish
    /// its in-flight load.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if the session did not stop cleanly.  The
    /// session is discarded either way.
    pub fn cancel(&mut self) -> Result<(), Error> {
        let session = match self.active.take() {
            Some(session) => session,
            None => return Ok(()),
        };

        session.cancel.store(true, Ordering::Release);
        match session.handle.join() {
            Ok(()) => {
                debug!(session = session.id, "loader cancelled");
                Ok(())
            }
            Err(_) => {
                warn!(
                    session = session.id,
                    "loader did not acknowledge cancellation"
                );
                Err(Error::Busy)
            }
        }
    }

    /// Returns whether a session thread is still walking its window.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |session| !session.handle.is_finished())
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        let _ = self.cancel();
    }
}

#[cfg(test)]
mod test {
    use crate::decode::Frame;
    use crate::error::DecodeError;
    use crate::loader::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Decodes `n` into a 1x1 frame of value `n`, slowly.
    struct Slow {
        loads: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl Decoder for Slow {
        fn decode(&self, name: &Path, frame: &mut Frame) -> Result<(), DecodeError> {
            std::thread::sleep(self.delay);
            self.loads.fetch_add(1, Ordering::Relaxed);

            let value: u8 = name
                .to_str()
                .and_then(|name| name.parse().ok())
                .ok_or_else(|| DecodeError::Format(name.display().to_string()))?;
            frame.resize(1, 1).fill(value);
            Ok(())
        }
    }

    fn window(subset_len: usize, parent_len: usize) -> Window {
        Window {
            relation: CyclicRelation::new(-1, 0, subset_len, parent_len).expect("valid"),
            items: Arc::new(
                (0..parent_len)
                    .map(|i| Item::new(format!("{}", i)))
                    .collect(),
            ),
            pool: Arc::new(Pool::new(subset_len)),
        }
    }

    fn shared(delay: Duration) -> (Arc<Shared>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let decoder = Slow {
            loads: loads.clone(),
            delay,
        };

        (Arc::new(Shared::new(Arc::new(decoder), None)), loads)
    }

    /// A session that runs to completion fills every slot.
    #[test]
    fn test_populate() {
        let (shared, loads) = shared(Duration::ZERO);
        let window = window(4, 10);
        let mut loader = Loader::default();

        loader
            .start(window.clone(), shared.clone())
            .expect("spawn must succeed");
        while loader.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        loader.cancel().expect("cancel must succeed");

        assert_eq!(loads.load(Ordering::Relaxed), 4);
        for i in [9, 0, 1, 2] {
            assert!(window.slot(i).lock().holds(Path::new(&format!("{}", i))));
        }
        assert!(!loader.is_running());
        assert_eq!(loader.sessions, 1);
        assert_eq!(shared.in_flight(), 0);
    }

    /// Loading twice doesn't decode twice.
    #[test]
    fn test_load_once() {
        let (shared, loads) = shared(Duration::ZERO);
        let window = window(3, 5);

        window.load(&shared, 0);
        window.load(&shared, 0);
        assert_eq!(loads.load(Ordering::Relaxed), 1);
        assert_eq!(window.slot(0).lock().frame.pixels(), &[0, 0, 0, 0]);
    }

    /// Cancelling a slow session stops it before it gets through the
    /// window.
    #[test]
    fn test_cancel() {
        let (shared, loads) = shared(Duration::from_millis(50));
        let mut loader = Loader::default();

        loader
            .start(window(20, 40), shared)
            .expect("spawn must succeed");
        std::thread::sleep(Duration::from_millis(10));
        loader.cancel().expect("cancel must succeed");

        let loaded = loads.load(Ordering::Relaxed);
        assert!(loaded < 20, "loaded {} items", loaded);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(loads.load(Ordering::Relaxed), loaded);

        // Cancelling an idle loader is fine.
        loader.cancel().expect("cancel must succeed");
    }

    /// Decode failures are recorded on the item, and not retried.
    #[test]
    fn test_load_error() {
        let (shared, loads) = shared(Duration::ZERO);
        let window = Window {
            items: Arc::new(vec![Item::new("zero"), Item::new("1")]),
            ..window(2, 2)
        };

        window.load(&shared, 0);
        window.load(&shared, 0);
        assert_eq!(loads.load(Ordering::Relaxed), 1);
        assert!(matches!(
            window.items[0].error(),
            Some(DecodeError::Format(_))
        ));
        assert!(window.slot(0).lock().frame.is_empty());
        assert_eq!(shared.in_flight(), 0);
    }

    /// A decoder that panics halfway through a frame fails that item,
    /// and leaves the slot and the in-flight count clean.
    #[test]
    fn test_load_panic() {
        let decoder = |name: &Path, frame: &mut Frame| -> Result<(), DecodeError> {
            frame.resize(1, 1).fill(9);
            if name == Path::new("0") {
                panic!("corrupt input");
            }
            Ok(())
        };
        let shared = Shared::new(Arc::new(decoder), None);
        let window = window(2, 2);

        window.load(&shared, 0);
        match window.items[0].error() {
            Some(DecodeError::Panicked(message)) => assert_eq!(message, "corrupt input"),
            other => panic!("unexpected error {:?}", other),
        }
        {
            let state = window.slot(0).lock();
            assert!(state.name.is_none());
            assert!(state.frame.is_empty());
        }
        assert_eq!(shared.in_flight(), 0);

        // The other slot is unaffected.
        window.load(&shared, 1);
        assert!(window.slot(1).lock().holds(Path::new("1")));
        assert!(window.items[1].error().is_none());
    }

    /// Starting a session cancels the previous one.
    #[test]
    fn test_restart() {
        let (shared, loads) = shared(Duration::ZERO);
        let window = window(4, 10);
        let mut loader = Loader::default();

        loader
            .start(window.clone(), shared.clone())
            .expect("spawn must succeed");
        loader.start(window, shared).expect("spawn must succeed");
        loader.cancel().expect("cancel must succeed");

        assert_eq!(loader.sessions, 2);
        assert!(loads.load(Ordering::Relaxed) <= 4);
    }

    /// A decoder that lies about its frame size gets a stride error.
    #[test]
    fn test_load_bad_stride() {
        let decoder = |_: &Path, frame: &mut Frame| -> Result<(), DecodeError> {
            frame.resize(2, 2);
            frame.pixels_mut().truncate(3);
            Ok(())
        };
        let shared = Shared::new(Arc::new(decoder), None);
        let window = window(1, 1);

        window.load(&shared, 0);
        assert!(matches!(
            window.items[0].error(),
            Some(DecodeError::Stride {
                expected: 16,
                actual: 3
            })
        ));
    }
}
