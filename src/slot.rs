//! The pool holds one slot per window position.  Each slot has its
//! own lock and condition variable, so loads of different slots
//! proceed in parallel, and readers block on exactly the slot they
//! want.  Slots are never reallocated while the window cycles: they
//! change hands as positions enter and leave the window, and their
//! frame buffers are reused by the next load.
use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use crate::decode::Frame;
use crate::item::Item;
use crate::relation::CyclicRelation;

/// What a slot caches: the name of the item last loaded in the slot,
/// and its frame.  An empty frame means "not loaded (yet)."
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub name: Option<PathBuf>,
    pub frame: Frame,
}

impl SlotState {
    /// Returns whether the slot holds a loaded frame for `name`.
    pub fn holds(&self, name: &Path) -> bool {
        !self.frame.is_empty() && self.name.as_deref() == Some(name)
    }

    fn evict(&mut self) {
        self.name = None;
        self.frame.clear();
    }
}

#[derive(Debug, Default)]
pub(crate) struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn with_state(state: SlotState) -> Slot {
        Slot {
            state: Mutex::new(state),
            ready: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }

    /// Releases `guard` until the next [`Slot::notify`], and reacquires
    /// it.  Wakeups may be spurious: callers must re-check their
    /// predicate.
    pub fn wait(&self, guard: &mut MutexGuard<'_, SlotState>) {
        self.ready.wait(guard);
    }

    /// Wakes up every reader waiting on this slot.
    pub fn notify(&self) {
        self.ready.notify_all();
    }

    /// Forgets the slot's item, but keeps the frame's allocation.
    pub fn evict(&self) {
        self.lock().evict();
    }
}

#[derive(Debug, Default)]
pub(crate) struct Pool {
    slots: Vec<Slot>,
}

impl Pool {
    /// Returns a pool of `len` empty slots.
    pub fn new(len: usize) -> Pool {
        Pool {
            slots: (0..len).map(|_| Slot::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot for position `index` in `relation`'s window.
    pub fn slot(&self, relation: &CyclicRelation, index: usize) -> &Slot {
        &self.slots[relation.map(index as isize)]
    }

    pub fn evict_all(&self) {
        for slot in &self.slots {
            slot.evict();
        }
    }

    /// Returns a pool with one slot per position in `relation`'s window
    /// over `items`.  Frames cached for items that are still in the
    /// window move to their item's new slot; every other frame is
    /// evicted, and its allocation recycled as an empty slot.
    ///
    /// Empties `self`; the caller must make sure no load is in flight.
    pub fn rehome(&self, relation: &CyclicRelation, items: &[Item]) -> Pool {
        let mut cached: HashMap<PathBuf, Frame> = HashMap::new();
        let mut spare: Vec<Frame> = Vec::new();

        for slot in &self.slots {
            let SlotState { name, frame } = std::mem::take(&mut *slot.lock());

            match name {
                Some(name) if !frame.is_empty() => {
                    if let Some(duplicate) = cached.insert(name, frame) {
                        spare.push(duplicate);
                    }
                }
                _ => spare.push(frame),
            }
        }

        let mut states: Vec<Option<SlotState>> =
            (0..relation.subset_len()).map(|_| None).collect();
        relation.for_each(relation.left() as isize, 1, |i| {
            let name = items[i].name();

            if let Some(frame) = cached.remove(name) {
                states[relation.map(i as isize)] = Some(SlotState {
                    name: Some(name.to_owned()),
                    frame,
                });
            }
        });

        // Whatever is left fell out of the window.
        spare.extend(cached.into_values());

        let slots = states
            .into_iter()
            .map(|state| {
                Slot::with_state(state.unwrap_or_else(|| {
                    let mut frame = spare.pop().unwrap_or_default();

                    frame.clear();
                    SlotState { name: None, frame }
                }))
            })
            .collect();
        Pool { slots }
    }
}

#[cfg(test)]
fn loaded(name: &str, value: u8) -> SlotState {
    let mut frame = Frame::new();

    frame.resize(1, 1).fill(value);
    SlotState {
        name: Some(PathBuf::from(name)),
        frame,
    }
}

#[test]
fn test_holds() {
    let mut state = loaded("a", 1);

    assert!(state.holds(Path::new("a")));
    assert!(!state.holds(Path::new("b")));

    state.frame.clear();
    assert!(!state.holds(Path::new("a")));

    let mut state = loaded("a", 1);
    state.evict();
    assert!(state.name.is_none());
    assert!(state.frame.is_empty());
    assert!(state.frame.capacity() >= 4);
}

/// Frames follow their items when the window changes, and buffers
/// for items that left the window are recycled.
#[test]
fn test_rehome() {
    let items: Vec<Item> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|name| Item::new(*name))
        .collect();
    let old = CyclicRelation::new(0, 0, 3, 5).expect("valid");
    let pool = Pool::new(3);

    for i in 0..3 {
        *pool.slot(&old, i).lock() = loaded(["a", "b", "c"][i], i as u8);
    }

    // Drop "a": the new window over [b, c, d, e] starts at "b".
    let remaining = &items[1..];
    let new = CyclicRelation::new(0, 0, 3, 4).expect("valid");
    let rehomed = pool.rehome(&new, remaining);

    assert_eq!(rehomed.len(), 3);
    assert!(rehomed.slot(&new, 0).lock().holds(Path::new("b")));
    assert!(rehomed.slot(&new, 1).lock().holds(Path::new("c")));
    assert_eq!(rehomed.slot(&new, 0).lock().frame.pixels(), &[1, 1, 1, 1]);

    // "d" is new, and gets the buffer that used to hold "a".
    let state = rehomed.slot(&new, 2).lock();
    assert!(state.name.is_none());
    assert!(state.frame.is_empty());
    assert!(state.frame.capacity() >= 4);

    // The old pool is empty.
    assert!(pool.slots.iter().all(|slot| slot.lock().name.is_none()));
}

/// Growing the pool adds fresh slots.
#[test]
fn test_rehome_grow() {
    let items: Vec<Item> = (0..10).map(|i| Item::new(format!("{}", i))).collect();
    let old = CyclicRelation::new(0, 0, 2, 10).expect("valid");
    let pool = Pool::new(2);
    *pool.slot(&old, 1).lock() = loaded("1", 7);

    let new = CyclicRelation::new(-2, 0, 5, 10).expect("valid");
    let rehomed = pool.rehome(&new, &items);

    assert_eq!(rehomed.len(), 5);
    assert!(rehomed.slot(&new, 1).lock().holds(Path::new("1")));
    for i in [8, 9, 0, 2] {
        assert!(rehomed.slot(&new, i).lock().name.is_none());
    }
}
