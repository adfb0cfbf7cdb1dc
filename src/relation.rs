//! A `CyclicRelation` is a total cyclic order over the linear order
//! `0..N`.  Beyond what a plain modulo provides, it tracks a window
//! (a projection of `n <= N` consecutive positions, possibly wrapping
//! past zero) and a cursor, and lets both cycle independently.
//!
//! The window is described by its `left` bound and its exclusive
//! `right` bound, so `right = left + n (mod N)`; `left > right`
//! simply means the window wraps past zero.  Consumers that want to
//! enumerate the window should go through [`CyclicRelation::for_each`]
//! rather than subtracting bounds, and never have to special-case
//! wraparound.
//!
//! The relation also maps each position in the window to a slot in
//! `0..n`, e.g., an index in a pool of `n` cached values.  The
//! mapping is stable: when the window cycles by less than its length,
//! positions that remain in the window keep their slot, and positions
//! that enter the window take over the slots of those that left.
use crate::error::InvariantViolation;

/// Positive modulo: always in `[0, n)`, for `n > 0`.
#[inline(always)]
fn pmod(x: isize, n: usize) -> usize {
    x.rem_euclid(n as isize) as usize
}

/// The set projection: window bounds and cursor, all in `[0, len)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Projection {
    left: usize,
    index: usize,
    right: usize,
    len: usize,
}

impl Projection {
    /// Checks non-strict totality: the cursor may sit on either bound,
    /// but never in the gap between `right` and `left`.
    fn verify(self) -> Result<Projection, InvariantViolation> {
        let Projection {
            left, index, right, ..
        } = self;

        let total = if left < right {
            left <= index && index <= right
        } else if right < left {
            index <= right || index >= left
        } else {
            // The window covers the whole parent set.
            true
        };

        if total {
            Ok(self)
        } else {
            Err(InvariantViolation::Order { left, index, right })
        }
    }
}

/// A total cyclic order relation, maintaining a `left, right`
/// projection and a tracked index, both of which may cycle
/// independently of each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CyclicRelation {
    projection: Projection,
    // Length of the window, and number of slots for `map`.
    subset_len: usize,
    // Zero index displacement, kept modulo `subset_len`: if
    // `left == i - zero_displacement`, `i` maps to slot zero.
    zero_displacement: usize,
}

impl CyclicRelation {
    /// Returns a relation for a parent set of `parent_len` positions,
    /// with a window of `subset_len` positions starting at
    /// `z mod parent_len`, and the cursor at `i mod parent_len`.
    ///
    /// # Errors
    ///
    /// Returns `Err` unless `1 <= subset_len <= parent_len`, or if the
    /// cursor falls outside the window.
    pub fn new(
        z: isize,
        i: isize,
        subset_len: usize,
        parent_len: usize,
    ) -> Result<CyclicRelation, InvariantViolation> {
        if parent_len == 0 || subset_len == 0 || subset_len > parent_len {
            return Err(InvariantViolation::Size {
                subset: subset_len,
                parent: parent_len,
            });
        }

        let left = pmod(z, parent_len);
        let projection = Projection {
            left,
            index: pmod(i, parent_len),
            right: (left + subset_len) % parent_len,
            len: parent_len,
        }
        .verify()?;

        Ok(CyclicRelation {
            projection,
            subset_len,
            // `-z` may overflow; negate after reducing.
            zero_displacement: (subset_len - pmod(z, subset_len)) % subset_len,
        })
    }

    /// Returns the cursor's position in the parent set.
    #[inline]
    pub fn index(&self) -> usize {
        self.projection.index
    }

    /// Returns the window's left bound.  Due to totality, `left() >
    /// right()` is possible.
    #[inline]
    pub fn left(&self) -> usize {
        self.projection.left
    }

    /// Returns the window's (exclusive) right bound.  Due to totality,
    /// `right() < left()` is possible.
    #[inline]
    pub fn right(&self) -> usize {
        self.projection.right
    }

    #[inline]
    pub fn subset_len(&self) -> usize {
        self.subset_len
    }

    #[inline]
    pub fn parent_len(&self) -> usize {
        self.projection.len
    }

    /// Returns whether the window spans the whole parent set.  In that
    /// case, `left() == right()` and the window never needs to move.
    #[inline]
    pub fn covers_parent(&self) -> bool {
        self.subset_len == self.projection.len
    }

    /// Returns the forward distance from `left()` to `i`, and from `i`
    /// to `right()`, modulo the parent set's length.
    ///
    /// When the window covers the whole parent set, the two distances
    /// always add up to the parent set's length.
    pub fn diff(&self, i: isize) -> (usize, usize) {
        let Projection {
            left, right, len, ..
        } = self.projection;
        let i = pmod(i, len) as isize;
        let from_left = pmod(i - left as isize, len);
        let to_right = if self.covers_parent() {
            len - from_left
        } else {
            pmod(right as isize - i, len)
        };

        (from_left, to_right)
    }

    /// Returns whether position `i` is one of the `subset_len()`
    /// positions in the window.
    #[inline]
    pub fn contains(&self, i: isize) -> bool {
        self.diff(i).0 < self.subset_len
    }

    /// Maps position `i` in the parent set to a slot in
    /// `0..subset_len()`.
    ///
    /// Only positions in the window map to distinct slots.
    pub fn map(&self, i: isize) -> usize {
        let (from_left, _) = self.diff(i);

        (from_left + self.subset_len - self.zero_displacement) % self.subset_len
    }

    /// Cycles the window by `window_stride` and the cursor by
    /// `cursor_stride`.
    ///
    /// On success, returns the first position that entered the window
    /// and the direction in which to walk the entering positions with
    /// [`CyclicRelation::for_each`], or `None` if the window did not
    /// move.
    ///
    /// # Errors
    ///
    /// Returns `Err` and leaves `self` unchanged if the cursor would end
    /// up outside the window.
    pub fn cycle(
        &mut self,
        window_stride: isize,
        cursor_stride: isize,
    ) -> Result<Option<(usize, isize)>, InvariantViolation> {
        let old = self.projection;
        let len = old.len;
        let shift = pmod(window_stride, len);

        let next = Projection {
            left: (old.left + shift) % len,
            index: (old.index + pmod(cursor_stride, len)) % len,
            right: (old.right + shift) % len,
            len,
        }
        .verify()?;

        let entering = match window_stride.signum() {
            1 => Some((old.right, 1)),
            -1 => Some((old.left, -1)),
            _ => None,
        };

        self.projection = next;
        self.zero_displacement = (self.zero_displacement + self.subset_len
            - pmod(window_stride, self.subset_len))
            % self.subset_len;
        Ok(entering)
    }

    /// Calls `f` for each position from `start` to the end of the
    /// window in the direction of `stride`: up to `right()` (excluded)
    /// for a positive stride, down to `left()` (included) for a negative
    /// one.  Only the sign of `stride` matters.
    ///
    /// If `stride` is zero, calls `f(start)` once.
    pub fn for_each(&self, start: isize, stride: isize, mut f: impl FnMut(usize)) {
        let len = self.projection.len;
        let mut i = pmod(start, len);

        if stride == 0 {
            f(i);
            return;
        }

        let (from_left, to_right) = self.diff(i as isize);
        let count = if stride > 0 { to_right } else { from_left + 1 };

        for _ in 0..count {
            f(i);
            i = if stride > 0 {
                (i + 1) % len
            } else {
                (i + len - 1) % len
            };
        }
    }
}

#[cfg(test)]
mod test {
    use crate::relation::*;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use proptest_derive::Arbitrary;

    /// A pool of values for the parent set `0..N`, of which only
    /// `subset_len` are held at once.
    struct Pool {
        relation: CyclicRelation,
        values: Vec<Option<usize>>,
    }

    impl Pool {
        fn new(z: isize, i: isize, subset_len: usize, parent_len: usize) -> Pool {
            Pool {
                relation: CyclicRelation::new(z, i, subset_len, parent_len)
                    .expect("relation must be valid"),
                values: vec![None; subset_len],
            }
        }

        fn get(&self, i: usize) -> Option<usize> {
            self.values[self.relation.map(i as isize)]
        }

        /// Stores `i + 1`, so that we can tell slot values apart from
        /// the slot index.
        fn load(&mut self, i: usize) {
            let slot = self.relation.map(i as isize);
            self.values[slot] = Some(i + 1);
        }

        fn load_along(&mut self, start: isize, stride: isize) {
            let mut indices = Vec::new();
            self.relation
                .for_each(start, stride, |i| indices.push(i));
            for i in indices {
                self.load(i);
            }
        }

        /// Returns the window's values, from left to right.
        fn read(&self) -> Vec<Option<usize>> {
            let mut ret = Vec::new();
            self.relation
                .for_each(self.relation.left() as isize, 1, |i| ret.push(self.get(i)));
            ret
        }
    }

    /// Five items, keep one to the left and one to the right of the
    /// cursor, then cycle both by one.
    #[test]
    fn smoke_test_small_window() {
        let mut pool = Pool::new(-1, 0, 3, 5);

        assert_eq!(pool.relation.left(), 4);
        assert_eq!(pool.relation.right(), 2);
        assert_eq!(pool.relation.index(), 0);

        pool.load_along(pool.relation.left() as isize, 1);
        assert_eq!(pool.read(), vec![Some(5), Some(1), Some(2)]);

        // Loading outward from the cursor fills the same slots.
        let index = pool.relation.index() as isize;
        pool.load_along(index, 1);
        pool.load_along(index - 1, -1);
        assert_eq!(pool.read(), vec![Some(5), Some(1), Some(2)]);

        let (start, stride) = pool
            .relation
            .cycle(1, 1)
            .expect("cycle must succeed")
            .expect("window moved");
        assert_eq!((start, stride), (2, 1));

        pool.load_along(start as isize, stride);
        assert_eq!(pool.relation.index(), 1);
        assert_eq!(pool.read(), vec![Some(1), Some(2), Some(3)]);
    }

    /// Fill a 7-slot window over 15 items outward from the cursor, and
    /// make sure the slots keep their values when the window cycles.
    #[test]
    fn test_cycle_keeps_slots() {
        const N: usize = 15;

        let mut pool = Pool::new(-(N as isize) / 4, 0, N / 2, N);

        pool.load_along(0, 1);
        assert_eq!(
            pool.values,
            vec![Some(1), Some(2), Some(3), Some(4), None, None, None]
        );

        pool.load_along(-1, -1);
        assert_eq!(
            pool.values,
            vec![Some(1), Some(2), Some(3), Some(4), Some(13), Some(14), Some(15)]
        );
        assert_eq!(
            pool.read(),
            vec![Some(13), Some(14), Some(15), Some(1), Some(2), Some(3), Some(4)]
        );
        assert_eq!(pool.get(0), Some(1));
        assert_eq!(pool.relation.map(0), 0);

        let (start, stride) = pool
            .relation
            .cycle(1, 1)
            .expect("shift must succeed")
            .expect("window moved");
        pool.load_along(start as isize, stride);

        assert_eq!(
            pool.values,
            vec![Some(1), Some(2), Some(3), Some(4), Some(5), Some(14), Some(15)]
        );
        assert_eq!(pool.get(0), Some(1));
        assert_eq!(pool.relation.map(0), 0);
        assert_eq!(pool.relation.index(), 1);
    }

    /// Shifting the window to the left reports the previous left bound,
    /// and walking back from it covers the entering positions.
    #[test]
    fn test_cycle_left() {
        let mut relation = CyclicRelation::new(4, 5, 3, 10).expect("valid");

        let (start, stride) = relation
            .cycle(-2, -1)
            .expect("cycle must succeed")
            .expect("window moved");
        assert_eq!((start, stride), (4, -1));
        assert_eq!(relation.left(), 2);
        assert_eq!(relation.right(), 5);
        assert_eq!(relation.index(), 4);

        let mut entering = Vec::new();
        relation.for_each(start as isize - 1, stride, |i| entering.push(i));
        assert_eq!(entering, vec![3, 2]);
    }

    #[test]
    fn test_verify() {
        // l < r errors
        for projection in [
            Projection {
                left: 10,
                index: 5,
                right: 20,
                len: 30,
            },
            Projection {
                left: 10,
                index: 25,
                right: 20,
                len: 30,
            },
        ] {
            match projection.verify() {
                Err(e) => assert!(e.to_string().starts_with("l < r"), "{}", e),
                Ok(_) => panic!("verify must fail for {:?}", projection),
            }
        }

        // r < l errors
        let projection = Projection {
            left: 20,
            index: 15,
            right: 10,
            len: 30,
        };
        match projection.verify() {
            Err(e) => assert!(e.to_string().starts_with("r < l"), "{}", e),
            Ok(_) => panic!("verify must fail for {:?}", projection),
        }

        // No error.
        for (left, index, right) in [(0, 1, 2), (10, 15, 20), (20, 25, 10), (20, 5, 10)] {
            let projection = Projection {
                left,
                index,
                right,
                len: 30,
            };
            assert_eq!(projection.verify(), Ok(projection));
        }
    }

    #[test]
    fn test_new_rejects_sizes() {
        assert!(matches!(
            CyclicRelation::new(0, 0, 1, 0),
            Err(InvariantViolation::Size { .. })
        ));
        assert!(matches!(
            CyclicRelation::new(0, 0, 0, 4),
            Err(InvariantViolation::Size { .. })
        ));
        assert!(matches!(
            CyclicRelation::new(0, 0, 5, 4),
            Err(InvariantViolation::Size { .. })
        ));
    }

    #[test]
    fn test_new_rejects_cursor_in_gap() {
        assert!(matches!(
            CyclicRelation::new(2, 7, 3, 10),
            Err(InvariantViolation::Order {
                left: 2,
                index: 7,
                right: 5
            })
        ));

        // Wrapped window, cursor in the gap.
        assert!(matches!(
            CyclicRelation::new(-2, 4, 3, 10),
            Err(InvariantViolation::Order { .. })
        ));
    }

    /// A failed cycle must not change anything.
    #[test]
    fn test_failed_cycle_is_noop() {
        let mut relation = CyclicRelation::new(0, 1, 3, 10).expect("valid");
        let before = relation;

        assert!(relation.cycle(0, 5).is_err());
        assert_eq!(relation, before);
        assert!(relation.cycle(4, 0).is_err());
        assert_eq!(relation, before);
    }

    /// Arguments are normalised modulo the parent set's length.
    #[test]
    fn test_normalise() {
        let relation = CyclicRelation::new(-23, 19, 4, 10).expect("valid");

        assert_eq!(relation.left(), 7);
        assert_eq!(relation.right(), 1);
        assert_eq!(relation.index(), 9);
        assert_eq!(relation.diff(-1), (2, 2));
        assert_eq!(relation.diff(19), (2, 2));
        assert!(relation.contains(-3));
        assert!(!relation.contains(1));
    }

    /// A window over the whole parent set is valid, never wraps in
    /// `map`, and `diff` measures distance from both ends.
    #[test]
    fn test_degenerate_window() {
        const N: usize = 6;
        let mut relation = CyclicRelation::new(0, 2, N, N).expect("valid");

        assert!(relation.covers_parent());
        assert_eq!(relation.left(), relation.right());
        for i in 0..N {
            assert_eq!(relation.diff(i as isize), (i, N - i));
            assert_eq!(relation.map(i as isize), i);
            assert!(relation.contains(i as isize));
        }

        let mut all = Vec::new();
        relation.for_each(0, 1, |i| all.push(i));
        assert_eq!(all, (0..N).collect::<Vec<_>>());

        // Any cursor move is fine, and shifting doesn't change slots.
        relation.cycle(2, 3).expect("cycle must succeed");
        for i in 0..N {
            assert_eq!(relation.map(i as isize), i);
        }
    }

    /// One item in a one-slot window: everything is the identity.
    #[test]
    fn test_single_item() {
        let mut relation = CyclicRelation::new(7, -3, 1, 1).expect("valid");

        assert_eq!(relation.index(), 0);
        assert_eq!(relation.left(), 0);
        assert_eq!(relation.right(), 0);
        assert_eq!(relation.diff(0), (0, 1));
        assert_eq!(relation.map(5), 0);

        relation.cycle(1, -1).expect("cycle must succeed");
        assert_eq!(relation.index(), 0);
        assert_eq!(relation.map(0), 0);

        let mut calls = Vec::new();
        relation.for_each(0, 1, |i| calls.push(i));
        relation.for_each(0, -1, |i| calls.push(i));
        relation.for_each(3, 0, |i| calls.push(i));
        assert_eq!(calls, vec![0, 0, 0]);
    }

    /// Extreme arguments are reduced before any arithmetic.
    #[test]
    fn test_extreme_arguments() {
        let mut relation = CyclicRelation::new(isize::MIN, isize::MIN, 3, 10).expect("valid");

        assert_eq!(relation.left(), pmod(isize::MIN, 10));
        assert_eq!(relation.index(), relation.left());
        assert_eq!(relation.diff(isize::MIN), (0, 3));
        assert_eq!(relation.diff(isize::MAX), relation.diff(pmod(isize::MAX, 10) as isize));
        assert_eq!(relation.map(isize::MIN), relation.map(relation.left() as isize));

        relation
            .cycle(isize::MAX, isize::MAX)
            .expect("cycle must succeed");
        relation
            .cycle(isize::MIN, isize::MIN)
            .expect("cycle must succeed");
        assert_eq!(
            relation.index(),
            (pmod(isize::MIN, 10) + pmod(isize::MAX, 10) + pmod(isize::MIN, 10)) % 10
        );
    }

    /// A zero stride visits the start position exactly once, even
    /// outside the window.
    #[test]
    fn test_for_each_zero_stride() {
        let relation = CyclicRelation::new(0, 0, 3, 10).expect("valid");
        let mut calls = Vec::new();

        relation.for_each(17, 0, |i| calls.push(i));
        assert_eq!(calls, vec![7]);
    }

    /// Generates valid relations for small parent sets, with the cursor
    /// anywhere in (or on the bounds of) the window.
    fn relation() -> impl Strategy<Value = CyclicRelation> {
        (1..24usize)
            .prop_flat_map(|parent| (Just(parent), 1..=parent))
            .prop_flat_map(|(parent, subset)| {
                (Just(parent), Just(subset), -64..64isize, 0..=subset)
            })
            .prop_map(|(parent, subset, z, offset)| {
                CyclicRelation::new(z, z + offset as isize, subset, parent)
                    .expect("the cursor starts in the window")
            })
    }

    #[derive(Arbitrary, Clone, Copy, Debug)]
    struct Step {
        #[proptest(strategy = "-30..30isize")]
        window: isize,
        #[proptest(strategy = "-30..30isize")]
        cursor: isize,
    }

    proptest! {
        /// Whatever we throw at `cycle`, it either succeeds and
        /// maintains totality, or fails and changes nothing.
        #[test]
        fn test_invariant_preservation(mut relation in relation(),
                                       steps in vec(any::<Step>(), 0..32usize)) {
            for step in steps {
                let before = relation;

                match relation.cycle(step.window, step.cursor) {
                    Ok(_) => {
                        assert!(relation.projection.verify().is_ok());
                        assert_eq!(
                            (relation.right() + relation.parent_len() - relation.left())
                                % relation.parent_len(),
                            relation.subset_len() % relation.parent_len()
                        );
                    }
                    Err(_) => assert_eq!(relation, before),
                }
            }
        }

        /// Positions that stay in the window when it shifts by less than
        /// its length keep their slot.
        #[test]
        fn test_map_stability(mut relation in relation(), shift in -30..30isize) {
            let n = relation.subset_len() as isize;
            prop_assume!(shift.abs() < n);

            let before = relation;
            // Moving the cursor with the window always succeeds.
            relation.cycle(shift, shift).expect("cycle must succeed");

            for i in 0..relation.parent_len() as isize {
                let (from_left, _) = before.diff(i);
                let from_left = from_left as isize;
                let stays = from_left < n
                    && from_left >= shift
                    && from_left - shift < n;

                if stays {
                    assert!(relation.contains(i));
                    assert_eq!(before.map(i), relation.map(i), "position {}", i);
                }
            }
        }

        /// Shifting the window there and back restores everything.
        #[test]
        fn test_round_trip(relation in relation(), shift in -30..30isize) {
            let mut shifted = relation;

            if shifted.cycle(shift, 0).is_ok() {
                shifted.cycle(-shift, 0).expect("shifting back must succeed");
                assert_eq!(shifted, relation);
                for i in 0..relation.parent_len() as isize {
                    assert_eq!(shifted.map(i), relation.map(i));
                }
            }
        }

        /// Walking from the left bound visits each position in the
        /// window exactly once, in cyclic order, and each maps to a
        /// different slot.
        #[test]
        fn test_for_each_exhaustive(relation in relation()) {
            let mut visited = Vec::new();
            relation.for_each(relation.left() as isize, 1, |i| visited.push(i));

            let expected: Vec<usize> = (0..relation.subset_len())
                .map(|k| (relation.left() + k) % relation.parent_len())
                .collect();
            assert_eq!(visited, expected);

            let mut slots: Vec<usize> = visited.iter().map(|&i| relation.map(i as isize)).collect();
            slots.sort_unstable();
            assert_eq!(slots, (0..relation.subset_len()).collect::<Vec<_>>());
        }

        /// Walking back from the last position in the window visits the
        /// same positions as walking forward from the left bound.
        #[test]
        fn test_for_each_backward(relation in relation()) {
            let last = relation.left() as isize + relation.subset_len() as isize - 1;
            let mut visited = Vec::new();
            relation.for_each(last, -1, |i| visited.push(i));
            visited.reverse();

            let mut forward = Vec::new();
            relation.for_each(relation.left() as isize, 1, |i| forward.push(i));
            assert_eq!(visited, forward);
        }
    }
}
