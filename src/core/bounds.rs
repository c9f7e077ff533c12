//! Context-dependent variable bounds.
//!
//! The [`BoundManager`] is the single source of truth for each variable's
//! `[lower, upper]` pair. Every accepted update is journaled on an event
//! trail; backtracking replays the journal in reverse, so the bounds rewind
//! in lock-step with the search. The same trail doubles as the
//! pending-tightenings queue: a cursor drains the updates recorded since the
//! last call, and never hands out an update that has since been undone.

use hashbrown::HashMap;

use crate::backtrack::{Backtrack, BacktrackWith, DecLvl, ObsTrail, ObsTrailCursor};
use crate::collections::RefVec;
use crate::core::{float, BoundKind, Tableau, Tightening, TighteningSource, VarRef};

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct BoundPair {
    pub lower: f64,
    pub upper: f64,
}

impl BoundPair {
    const UNBOUNDED: BoundPair = BoundPair {
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    };
}

/// One accepted bound update, with everything needed to undo it.
#[derive(Copy, Clone, Debug)]
pub struct BoundEvent {
    pub var: VarRef,
    pub kind: BoundKind,
    pub previous: f64,
    pub new: f64,
    pub source: TighteningSource,
    /// True iff this update made `lower > upper` for its variable.
    made_inconsistent: bool,
}

/// Record of a bound pair that was observed violating `lower <= upper`.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Inconsistency {
    pub var: VarRef,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Default)]
pub struct BoundManager {
    bounds: RefVec<VarRef, BoundPair>,
    /// Journal of accepted updates; rewound on backtrack.
    events: ObsTrail<BoundEvent>,
    /// Reader position of [`get_tightenings`](BoundManager::get_tightenings).
    pending: ObsTrailCursor<BoundEvent>,
    /// Stack of outstanding `lower > upper` observations, oldest first.
    /// Pushed by the offending update and popped when that update is undone.
    inconsistencies: Vec<Inconsistency>,
    /// Snapshot taken by [`store_local_bounds`](BoundManager::store_local_bounds).
    local_bounds: HashMap<VarRef, BoundPair>,
    /// Event position and save-point count at snapshot time.
    local_mark: Option<(usize, u32)>,
}

impl BoundManager {
    pub fn new() -> BoundManager {
        BoundManager::default()
    }

    /// Grows storage by one variable, initialized to `(-inf, +inf)`.
    pub fn register_new_variable(&mut self) -> VarRef {
        self.bounds.push(BoundPair::UNBOUNDED)
    }

    /// Registers `n` fresh variables.
    pub fn initialize(&mut self, n: usize) {
        for _ in 0..n {
            self.register_new_variable();
        }
    }

    pub fn num_variables(&self) -> usize {
        self.bounds.len()
    }

    pub fn lower_bound(&self, var: VarRef) -> f64 {
        self.bounds[var].lower
    }

    pub fn upper_bound(&self, var: VarRef) -> f64 {
        self.bounds[var].upper
    }

    pub fn bound_pair(&self, var: VarRef) -> BoundPair {
        self.bounds[var]
    }

    /// Updates the lower bound if `value` is strictly tighter. Ties and NaN
    /// are rejected. The tableau is not notified.
    pub fn set_lower_bound(&mut self, var: VarRef, value: f64) -> bool {
        self.write(var, BoundKind::Lower, value, TighteningSource::ComputedByEngine, None)
    }

    /// Updates the upper bound if `value` is strictly tighter. Ties and NaN
    /// are rejected. The tableau is not notified.
    pub fn set_upper_bound(&mut self, var: VarRef, value: f64) -> bool {
        self.write(var, BoundKind::Upper, value, TighteningSource::ComputedByEngine, None)
    }

    /// Like [`set_lower_bound`](BoundManager::set_lower_bound), additionally
    /// notifying the tableau on acceptance so it can adjust the assignment.
    pub fn tighten_lower_bound(&mut self, var: VarRef, value: f64, tableau: &mut dyn Tableau) -> bool {
        self.write(
            var,
            BoundKind::Lower,
            value,
            TighteningSource::ComputedByEngine,
            Some(tableau),
        )
    }

    /// Like [`set_upper_bound`](BoundManager::set_upper_bound), additionally
    /// notifying the tableau on acceptance so it can adjust the assignment.
    pub fn tighten_upper_bound(&mut self, var: VarRef, value: f64, tableau: &mut dyn Tableau) -> bool {
        self.write(
            var,
            BoundKind::Upper,
            value,
            TighteningSource::ComputedByEngine,
            Some(tableau),
        )
    }

    /// Applies a tightening, preserving its provenance. The tableau is not
    /// notified.
    pub fn apply_tightening(&mut self, t: &Tightening) -> bool {
        self.write(t.var, t.kind, t.value, t.source, None)
    }

    fn write(
        &mut self,
        var: VarRef,
        kind: BoundKind,
        value: f64,
        source: TighteningSource,
        tableau: Option<&mut dyn Tableau>,
    ) -> bool {
        if value.is_nan() {
            return false;
        }
        let current = match kind {
            BoundKind::Lower => self.bounds[var].lower,
            BoundKind::Upper => self.bounds[var].upper,
        };
        let tighter = match kind {
            BoundKind::Lower => float::total_gt(value, current),
            BoundKind::Upper => float::total_lt(value, current),
        };
        if !tighter {
            return false;
        }
        match kind {
            BoundKind::Lower => self.bounds[var].lower = value,
            BoundKind::Upper => self.bounds[var].upper = value,
        }
        let pair = self.bounds[var];
        let made_inconsistent = float::total_gt(pair.lower, pair.upper);
        if made_inconsistent {
            self.inconsistencies.push(Inconsistency {
                var,
                lower: pair.lower,
                upper: pair.upper,
            });
        }
        self.events.push(BoundEvent {
            var,
            kind,
            previous: current,
            new: value,
            source,
            made_inconsistent,
        });
        if let Some(tab) = tableau {
            match kind {
                BoundKind::Lower => tab.notify_lower_bound(var, value),
                BoundKind::Upper => tab.notify_upper_bound(var, value),
            }
        }
        true
    }

    /// False iff some variable currently has `lower > upper`.
    pub fn consistent_bounds(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    pub fn consistent_bounds_for(&self, var: VarRef) -> bool {
        let pair = self.bounds[var];
        !float::total_gt(pair.lower, pair.upper)
    }

    /// The earliest outstanding inconsistency, for diagnostics.
    pub fn first_inconsistency(&self) -> Option<Inconsistency> {
        self.inconsistencies.first().copied()
    }

    /// Drains the bound updates accepted since the last call. Updates undone
    /// by backtracking in the meantime are not reported.
    pub fn get_tightenings(&mut self, out: &mut Vec<Tightening>) {
        while let Some(ev) = self.pending.pop(&self.events) {
            out.push(Tightening {
                var: ev.var,
                value: ev.new,
                kind: ev.kind,
                source: ev.source,
            });
        }
    }

    /// Snapshots the current bounds, to be rewound by
    /// [`restore_local_bounds`](BoundManager::restore_local_bounds) after a
    /// speculative propagation pass. The pass must stay within the current
    /// decision level.
    pub fn store_local_bounds(&mut self) {
        self.local_bounds.clear();
        for (var, pair) in self.bounds.entries() {
            self.local_bounds.insert(var, *pair);
        }
        self.local_mark = Some((self.events.len(), self.num_saved()));
    }

    /// Rewinds every update accepted since the matching
    /// [`store_local_bounds`](BoundManager::store_local_bounds).
    pub fn restore_local_bounds(&mut self) {
        let (mark, saved) = self.local_mark.expect("no local bounds stored");
        debug_assert_eq!(
            saved,
            self.num_saved(),
            "speculative pass crossed a decision level"
        );
        let bounds = &mut self.bounds;
        let inconsistencies = &mut self.inconsistencies;
        self.events
            .rewind_to(mark, |ev| Self::undo_event(bounds, inconsistencies, ev));
        debug_assert!(self
            .local_bounds
            .iter()
            .all(|(var, pair)| self.bounds[*var] == *pair));
    }

    /// Drops the stored snapshot, keeping any updates made since.
    pub fn clear_local_bounds(&mut self) {
        self.local_bounds.clear();
        self.local_mark = None;
    }

    fn undo_event(
        bounds: &mut RefVec<VarRef, BoundPair>,
        inconsistencies: &mut Vec<Inconsistency>,
        ev: &BoundEvent,
    ) {
        match ev.kind {
            BoundKind::Lower => bounds[ev.var].lower = ev.previous,
            BoundKind::Upper => bounds[ev.var].upper = ev.previous,
        }
        if ev.made_inconsistent {
            inconsistencies.pop();
        }
    }
}

impl Backtrack for BoundManager {
    fn save_state(&mut self) -> DecLvl {
        self.events.save_state()
    }

    fn num_saved(&self) -> u32 {
        self.events.num_saved()
    }

    fn restore_last(&mut self) {
        let bounds = &mut self.bounds;
        let inconsistencies = &mut self.inconsistencies;
        self.events
            .restore_last_with(|ev| Self::undo_event(bounds, inconsistencies, ev));
    }
}
