use crate::backtrack::{Backtrack, BacktrackWith};
use std::marker::PhantomData;
use std::num::NonZeroU32;

/// A decision level.
///
/// `ROOT` is the level at which no decision has been made; each decision
/// increases the level by one.
///
/// The internal representation disallows the value 0 so that an
/// `Option<DecLvl>` fits in 32 bits.
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Hash)]
pub struct DecLvl(NonZeroU32);

impl DecLvl {
    /// The root level, at which no decision has been taken yet.
    pub const ROOT: DecLvl = Self::new(0);

    pub const fn new(num_saved: u32) -> Self {
        unsafe { DecLvl(NonZeroU32::new_unchecked(num_saved + 1)) }
    }

    /// Integer representation of the level; 0 is the root.
    pub const fn to_int(self) -> u32 {
        self.0.get() - 1
    }
}

impl Default for DecLvl {
    fn default() -> Self {
        Self::ROOT
    }
}

impl std::ops::Add<i32> for DecLvl {
    type Output = DecLvl;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Self::new(((self.to_int() as i32) + rhs) as u32)
    }
}
impl std::ops::Sub<i32> for DecLvl {
    type Output = DecLvl;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        self + (-rhs)
    }
}

impl From<u32> for DecLvl {
    fn from(u: u32) -> Self {
        DecLvl::new(u)
    }
}
impl From<usize> for DecLvl {
    fn from(u: usize) -> Self {
        DecLvl::new(u as u32)
    }
}
impl From<DecLvl> for usize {
    fn from(dl: DecLvl) -> Self {
        dl.to_int() as usize
    }
}

impl std::fmt::Debug for DecLvl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dl({})", self.to_int())
    }
}

/// Index of an event in an [`ObsTrail`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct EventIndex(NonZeroU32);

impl EventIndex {
    pub fn new(index: usize) -> Self {
        unsafe { EventIndex(NonZeroU32::new_unchecked(index as u32 + 1)) }
    }
}
impl From<EventIndex> for usize {
    fn from(ei: EventIndex) -> Self {
        (ei.0.get() - 1) as usize
    }
}
impl From<usize> for EventIndex {
    fn from(u: usize) -> Self {
        Self::new(u)
    }
}
impl From<EventIndex> for u32 {
    fn from(ei: EventIndex) -> Self {
        ei.0.get() - 1
    }
}
impl From<u32> for EventIndex {
    fn from(u: u32) -> Self {
        unsafe { EventIndex(NonZeroU32::new_unchecked(u + 1)) }
    }
}

impl<T> std::ops::Index<EventIndex> for Vec<T> {
    type Output = T;

    fn index(&self, index: EventIndex) -> &Self::Output {
        &self[usize::from(index)]
    }
}

#[derive(Copy, Clone)]
struct LastBacktrack {
    next_read: EventIndex,
    id: u64,
}

/// An observable, backtrackable journal of events.
///
/// Unlike [`Trail`](crate::backtrack::Trail), the journal retains all events,
/// including those recorded at the root level, and supports forward iteration
/// as well as [`ObsTrailCursor`] readers that stay coherent across
/// backtracking: a cursor never yields an event that has since been undone.
///
/// [`save_state`](Backtrack::save_state) marks the first event of a new
/// decision level; [`restore_last`](Backtrack::restore_last) drops every
/// event of the current level.
#[derive(Clone)]
pub struct ObsTrail<V> {
    events: Vec<V>,
    /// Maps each decision level to the index of its first event.
    backtrack_points: Vec<EventIndex>,
    last_backtrack: Option<LastBacktrack>,
}

impl<V> Default for ObsTrail<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ObsTrail<V> {
    pub fn new() -> Self {
        ObsTrail {
            events: Default::default(),
            backtrack_points: Default::default(),
            last_backtrack: None,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn num_events(&self) -> u32 {
        self.len() as u32
    }

    /// Index that the next pushed event will occupy.
    pub fn next_slot(&self) -> EventIndex {
        EventIndex::new(self.events.len())
    }

    pub fn push(&mut self, value: V) -> EventIndex {
        let id = self.next_slot();
        self.events.push(value);
        id
    }

    pub fn peek(&self) -> Option<&V> {
        self.events.last()
    }

    pub fn get_event(&self, id: EventIndex) -> &V {
        &self.events[id]
    }

    /// All events, in chronological order.
    pub fn events(&self) -> &[V] {
        &self.events
    }

    /// Creates a new cursor positioned before the first event.
    pub fn reader(&self) -> ObsTrailCursor<V> {
        ObsTrailCursor::new()
    }

    pub fn current_decision_level(&self) -> DecLvl {
        DecLvl::new(self.backtrack_points.len() as u32)
    }

    /// Decision level at which the event at `id` was recorded.
    pub fn decision_level(&self, id: EventIndex) -> DecLvl {
        let idx = self.backtrack_points.partition_point(|ev| *ev <= id);
        DecLvl::new(idx as u32)
    }

    fn backtrack_with_callback(&mut self, mut f: impl FnMut(&V)) {
        let after_last = self.backtrack_points.pop().expect("No save-point left");
        let first_undone = usize::from(after_last);
        for ev in self.events[first_undone..].iter().rev() {
            f(ev);
        }
        self.events.truncate(first_undone);
        self.note_backtrack(after_last);
    }

    /// Undoes every event at index `mark` or later, leaving save-points
    /// untouched. All save-points must lie at or below `mark`. Cursors are
    /// resynchronized so they never observe the undone events.
    pub fn rewind_to(&mut self, mark: usize, mut f: impl FnMut(&V)) {
        debug_assert!(self.backtrack_points.iter().all(|p| usize::from(*p) <= mark));
        for ev in self.events[mark..].iter().rev() {
            f(ev);
        }
        self.events.truncate(mark);
        self.note_backtrack(EventIndex::new(mark));
    }

    fn note_backtrack(&mut self, next_read: EventIndex) {
        let bt_id = self.last_backtrack.as_ref().map_or(0, |bt| bt.id + 1);
        self.last_backtrack = Some(LastBacktrack { next_read, id: bt_id });
    }
}

impl<V> Backtrack for ObsTrail<V> {
    fn save_state(&mut self) -> DecLvl {
        self.backtrack_points.push(self.next_slot());
        self.current_decision_level()
    }

    fn num_saved(&self) -> u32 {
        self.backtrack_points.len() as u32
    }

    fn restore_last(&mut self) {
        self.backtrack_with_callback(|_| ());
    }
}

impl<V> BacktrackWith for ObsTrail<V> {
    type Event = V;

    fn restore_last_with<F: FnMut(&Self::Event)>(&mut self, callback: F) {
        self.backtrack_with_callback(callback)
    }
}

/// A reader over an [`ObsTrail`].
///
/// A cursor should only ever read from the single journal it was created
/// from. Reads after a backtrack first discard any position beyond the
/// rewound point, so undone events are never handed out.
#[derive(Clone)]
pub struct ObsTrailCursor<V> {
    next_read: EventIndex,
    last_backtrack: Option<u64>,
    _phantom: PhantomData<V>,
}

impl<V> Default for ObsTrailCursor<V> {
    fn default() -> Self {
        ObsTrailCursor::new()
    }
}

impl<V> ObsTrailCursor<V> {
    pub fn new() -> Self {
        ObsTrailCursor {
            next_read: EventIndex::from(0u32),
            last_backtrack: None,
            _phantom: PhantomData,
        }
    }

    fn sync_backtrack(&mut self, queue: &ObsTrail<V>) {
        if let Some(x) = &queue.last_backtrack {
            if self.last_backtrack != Some(x.id) {
                if self.next_read > x.next_read {
                    self.next_read = x.next_read;
                }
                self.last_backtrack = Some(x.id);
            }
        }
        debug_assert!(self.next_read <= queue.next_slot());
    }

    pub fn num_pending(&mut self, queue: &ObsTrail<V>) -> usize {
        self.sync_backtrack(queue);
        queue.events.len() - usize::from(self.next_read)
    }

    pub fn pop<'q>(&mut self, queue: &'q ObsTrail<V>) -> Option<&'q V> {
        self.sync_backtrack(queue);
        let next = self.next_read;
        if next < queue.next_slot() {
            self.next_read = next + 1;
            Some(&queue.events[next])
        } else {
            None
        }
    }

    pub fn move_to_end(&mut self, queue: &ObsTrail<V>) {
        self.sync_backtrack(queue);
        self.next_read = queue.next_slot();
    }
}

impl std::ops::Add<i32> for EventIndex {
    type Output = EventIndex;

    fn add(self, rhs: i32) -> Self::Output {
        let base = u32::from(self) as i32;
        EventIndex::from((base + rhs) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads() {
        let mut q = ObsTrail::new();
        q.push(0);
        q.push(1);
        q.push(5);

        let mut r1 = q.reader();
        assert_eq!(r1.num_pending(&q), 3);
        assert_eq!(r1.pop(&q), Some(&0));
        assert_eq!(r1.pop(&q), Some(&1));
        assert_eq!(r1.pop(&q), Some(&5));
        assert_eq!(r1.pop(&q), None);
        assert_eq!(r1.num_pending(&q), 0);

        q.push(2);
        assert_eq!(r1.pop(&q), Some(&2));
        assert_eq!(r1.pop(&q), None);
    }

    #[test]
    fn test_cursor_syncs_on_backtrack() {
        let mut q = ObsTrail::new();
        q.push(1);
        q.push(2);
        q.save_state();
        q.push(3);

        let mut ahead = q.reader();
        let mut behind = q.reader();
        assert_eq!(ahead.pop(&q), Some(&1));
        assert_eq!(ahead.pop(&q), Some(&2));
        assert_eq!(ahead.pop(&q), Some(&3));
        assert_eq!(behind.pop(&q), Some(&1));

        q.restore_last();
        // the cursor that had read the undone event rewinds past it
        assert_eq!(ahead.pop(&q), None);
        assert_eq!(behind.pop(&q), Some(&2));
        assert_eq!(behind.pop(&q), None);

        q.push(4);
        assert_eq!(ahead.pop(&q), Some(&4));
        assert_eq!(behind.pop(&q), Some(&4));
    }

    #[test]
    fn test_rewind_to() {
        let mut q = ObsTrail::new();
        q.push(1);
        q.push(2);
        let mark = q.len();
        q.push(3);
        q.push(4);

        let mut r = q.reader();
        r.move_to_end(&q);

        let mut undone = Vec::new();
        q.rewind_to(mark, |ev| undone.push(*ev));
        assert_eq!(undone, vec![4, 3]);
        assert_eq!(q.len(), 2);

        // the cursor does not re-read surviving events and sees new ones
        q.push(5);
        assert_eq!(r.pop(&q), Some(&5));
        assert_eq!(r.pop(&q), None);
    }

    #[test]
    fn test_decision_levels() {
        let mut trail = ObsTrail::new();
        assert_eq!(trail.current_decision_level(), DecLvl::ROOT);
        let ia = trail.push("a");
        let ib = trail.push("b");
        trail.save_state();
        let ic = trail.push("c");
        trail.save_state();
        trail.save_state();
        let ie = trail.push("e");

        assert_eq!(trail.decision_level(ia), DecLvl::ROOT);
        assert_eq!(trail.decision_level(ib), DecLvl::ROOT);
        assert_eq!(trail.decision_level(ic), DecLvl::new(1));
        assert_eq!(trail.decision_level(ie), DecLvl::new(3));
    }
}
