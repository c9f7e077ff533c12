use crate::backtrack::{Backtrack, DecLvl};

/// A plain undo journal: a sequence of events recording the changes made to
/// some data structure, partitioned by save-points.
///
/// Events recorded while no save-point is outstanding are discarded, as they
/// can never be undone: changes at the root level are permanent.
#[derive(Clone)]
pub struct Trail<Event> {
    trail: Vec<Event>,
    saved_states: Vec<usize>,
}

impl<Event> Trail<Event> {
    pub fn new() -> Self {
        Trail {
            trail: Vec::new(),
            saved_states: Vec::new(),
        }
    }

    /// Records an event. A no-op at the root level.
    pub fn push(&mut self, e: Event) {
        if !self.saved_states.is_empty() {
            self.trail.push(e);
        }
    }

    /// Undoes the events of the current level in reverse order, handing each
    /// one to `f`, and discards the level's save-point.
    pub fn restore_last_with(&mut self, mut f: impl FnMut(Event)) {
        let last_index = self.saved_states.pop().expect("No saved state");
        while self.trail.len() > last_index {
            let last = self.trail.pop().expect("No event left");
            f(last);
        }
    }
}

impl<Event> Default for Trail<Event> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Event> Backtrack for Trail<Event> {
    fn save_state(&mut self) -> DecLvl {
        self.saved_states.push(self.trail.len());
        self.current_decision_level()
    }

    fn num_saved(&self) -> u32 {
        self.saved_states.len() as u32
    }

    fn restore_last(&mut self) {
        self.restore_last_with(|_| ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_events_are_dropped() {
        let mut t: Trail<i32> = Trail::new();
        t.push(1);
        t.save_state();
        t.push(2);
        t.push(3);

        let mut undone = Vec::new();
        t.restore_last_with(|e| undone.push(e));
        assert_eq!(undone, vec![3, 2]);
        assert_eq!(t.num_saved(), 0);
    }
}
