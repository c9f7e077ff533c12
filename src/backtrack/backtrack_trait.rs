use crate::backtrack::DecLvl;

/// Common interface of all backtrackable components.
///
/// A component implementing this trait maintains a stack of save-points.
/// `save_state` opens one, `restore_last` rewinds the component to the state
/// it had when the matching save-point was opened. Save-points are opened and
/// closed in lock-step across all components of a solver, so `num_saved` of
/// every component always equals the current decision level.
pub trait Backtrack {
    /// Opens a new save-point and returns the resulting decision level.
    fn save_state(&mut self) -> DecLvl;

    /// Number of save-points currently outstanding.
    fn num_saved(&self) -> u32;

    /// Rewinds to the latest save-point, discarding it.
    fn restore_last(&mut self);

    /// Current decision level: `ROOT` when no save-point is outstanding.
    fn current_decision_level(&self) -> DecLvl {
        DecLvl::new(self.num_saved())
    }

    /// Rewinds until the given decision level is the current one.
    fn restore(&mut self, saved_id: DecLvl) {
        while self.num_saved() > saved_id.to_int() {
            self.restore_last();
        }
    }

    /// Rewinds all outstanding save-points.
    fn reset(&mut self) {
        self.restore(DecLvl::ROOT);
    }
}

/// A backtrackable component whose rewinds can be observed event by event.
pub trait BacktrackWith: Backtrack {
    type Event;

    /// Like `restore_last`, invoking `callback` on each undone event, most
    /// recent first.
    fn restore_last_with<F: FnMut(&Self::Event)>(&mut self, callback: F);

    fn restore_with<F: FnMut(&Self::Event)>(&mut self, saved_id: DecLvl, mut callback: F) {
        while self.num_saved() > saved_id.to_int() {
            self.restore_last_with(&mut callback);
        }
    }
}
