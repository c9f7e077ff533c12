//! Piecewise-linear constraint families and their shared, context-dependent
//! state.
//!
//! The search core only sees the [`PiecewiseLinearConstraint`] trait;
//! concrete families (ReLU, absolute value, max, disjunction) implement it.
//! Constraints live in a [`ConstraintStore`] arena and are referred to by
//! [`ConstraintId`] handles everywhere else: the trail records handles, never
//! references, since constraints are mutated through variable-watcher
//! callbacks while the search runs.

pub mod absolute_value;
pub mod disjunction;
pub mod max;
pub mod relu;

use hashbrown::HashMap;

use crate::collections::RefVec;
use crate::context::{CdBool, CdPhase, CdPhaseList, Context};
use crate::core::{CaseSplit, Fix, PhaseStatus, Tableau, Tightening, VarRef};
use crate::create_ref_type;

pub use absolute_value::AbsoluteValueConstraint;
pub use disjunction::DisjunctionConstraint;
pub use max::MaxConstraint;
pub use relu::ReluConstraint;

create_ref_type!(ConstraintId);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ConstraintKind {
    Relu,
    AbsoluteValue,
    Max,
    Disjunction,
}

/// Handles of the context-dependent cells of one constraint.
#[derive(Copy, Clone, Debug)]
struct CdoHandles {
    active: CdBool,
    phase: CdPhase,
    infeasible: CdPhaseList,
}

/// State shared by every piecewise-linear constraint family: the
/// context-dependent flags plus the per-constraint caches of variable values
/// and bounds maintained through the watcher callbacks.
///
/// The context-dependent cells are allocated lazily by
/// [`initialize_cdos`](ConstraintCore::initialize_cdos); reading or writing
/// them beforehand is a programming error and panics.
#[derive(Clone, Debug)]
pub struct ConstraintCore {
    cells: Option<CdoHandles>,
    num_cases: u32,
    /// Splitting priority; negative means not eligible for splitting.
    score: f64,
    assignment: HashMap<VarRef, f64>,
    lower_bounds: HashMap<VarRef, f64>,
    upper_bounds: HashMap<VarRef, f64>,
}

impl ConstraintCore {
    pub fn new(num_cases: u32) -> ConstraintCore {
        ConstraintCore {
            cells: None,
            num_cases,
            score: -1.0,
            assignment: HashMap::new(),
            lower_bounds: HashMap::new(),
            upper_bounds: HashMap::new(),
        }
    }

    /// Allocates the context-dependent cells: active, not phase-fixed, no
    /// infeasible cases. Must be called exactly once.
    pub fn initialize_cdos(&mut self, ctx: &mut Context) {
        assert!(self.cells.is_none(), "constraint CDOs already initialized");
        self.bind(ctx, true, PhaseStatus::NOT_FIXED);
    }

    /// Re-binds the cells into a fresh context, preserving the values they
    /// hold in `old`. The set of infeasible cases starts empty in the new
    /// context.
    pub fn reinitialize_cdos(&mut self, old: &Context, new_ctx: &mut Context) {
        match self.cells {
            Some(_) => {
                let active = self.is_active(old);
                let phase = self.phase(old);
                self.bind(new_ctx, active, phase);
            }
            None => self.initialize_cdos(new_ctx),
        }
    }

    fn bind(&mut self, ctx: &mut Context, active: bool, phase: PhaseStatus) {
        self.cells = Some(CdoHandles {
            active: ctx.alloc_bool(active),
            phase: ctx.alloc_phase(phase),
            infeasible: ctx.alloc_phase_list(),
        });
    }

    /// Releases the cell handles. Idempotent.
    pub fn cdo_cleanup(&mut self) {
        self.cells = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.cells.is_some()
    }

    fn handles(&self) -> CdoHandles {
        self.cells
            .expect("piecewise-linear constraint not properly initialized: CDOs not allocated")
    }

    pub fn is_active(&self, ctx: &Context) -> bool {
        ctx.get_bool(self.handles().active)
    }

    pub fn set_active(&self, ctx: &mut Context, active: bool) {
        ctx.set_bool(self.handles().active, active);
    }

    pub fn phase(&self, ctx: &Context) -> PhaseStatus {
        ctx.get_phase(self.handles().phase)
    }

    pub fn set_phase(&self, ctx: &mut Context, phase: PhaseStatus) {
        ctx.set_phase(self.handles().phase, phase);
    }

    /// Rules out `phase` in the current subtree.
    pub fn mark_infeasible(&self, ctx: &mut Context, phase: PhaseStatus) {
        ctx.list_push(self.handles().infeasible, phase);
    }

    pub fn infeasible_cases<'a>(&self, ctx: &'a Context) -> &'a [PhaseStatus] {
        ctx.list(self.handles().infeasible)
    }

    pub fn is_case_infeasible(&self, ctx: &Context, phase: PhaseStatus) -> bool {
        ctx.list_contains(self.handles().infeasible, phase)
    }

    pub fn num_cases(&self) -> u32 {
        self.num_cases
    }

    pub(crate) fn set_num_cases(&mut self, num_cases: u32) {
        self.num_cases = num_cases;
    }

    pub fn num_feasible_cases(&self, ctx: &Context) -> u32 {
        self.num_cases - ctx.list_len(self.handles().infeasible) as u32
    }

    pub fn is_feasible(&self, ctx: &Context) -> bool {
        self.num_feasible_cases(ctx) > 0
    }

    /// True iff exactly one case remains feasible.
    pub fn is_implication(&self, ctx: &Context) -> bool {
        self.num_feasible_cases(ctx) == 1
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn set_score(&mut self, score: f64) {
        self.score = score;
    }

    // ===== watcher caches =====

    pub(crate) fn note_value(&mut self, var: VarRef, value: f64) {
        self.assignment.insert(var, value);
    }

    pub(crate) fn note_lower_bound(&mut self, var: VarRef, bound: f64) {
        self.lower_bounds.insert(var, bound);
    }

    pub(crate) fn note_upper_bound(&mut self, var: VarRef, bound: f64) {
        self.upper_bounds.insert(var, bound);
    }

    pub(crate) fn value_of(&self, var: VarRef) -> Option<f64> {
        self.assignment.get(&var).copied()
    }

    pub(crate) fn lower_bound_of(&self, var: VarRef) -> Option<f64> {
        self.lower_bounds.get(&var).copied()
    }

    pub(crate) fn upper_bound_of(&self, var: VarRef) -> Option<f64> {
        self.upper_bounds.get(&var).copied()
    }

    pub(crate) fn rename_variable(&mut self, old: VarRef, new: VarRef) {
        if let Some(v) = self.assignment.remove(&old) {
            self.assignment.insert(new, v);
        }
        if let Some(v) = self.lower_bounds.remove(&old) {
            self.lower_bounds.insert(new, v);
        }
        if let Some(v) = self.upper_bounds.remove(&old) {
            self.upper_bounds.insert(new, v);
        }
    }
}

/// Contract satisfied by every piecewise-linear constraint family.
///
/// Context-dependent reads and writes go through the `ctx` parameter; the
/// context itself is owned by the search core, so there is exactly one
/// writer.
pub trait PiecewiseLinearConstraint {
    fn kind(&self) -> ConstraintKind;

    fn core(&self) -> &ConstraintCore;
    fn core_mut(&mut self) -> &mut ConstraintCore;

    fn participating_variables(&self) -> Vec<VarRef>;

    fn participates(&self, var: VarRef) -> bool {
        self.participating_variables().contains(&var)
    }

    /// The ordered set of cases this constraint splits into.
    fn all_cases(&self) -> Vec<PhaseStatus>;

    /// The split realising `phase`. Deterministic: the same phase always
    /// yields an equal split.
    fn case_split(&self, phase: PhaseStatus) -> CaseSplit;

    /// Whether the current assignment (as seen through the watcher
    /// callbacks) satisfies the constraint.
    fn satisfied(&self) -> bool;

    /// Whether the bounds alone pin exactly one case.
    fn phase_fixed(&self, ctx: &Context) -> bool {
        self.core().phase(ctx).is_fixed()
    }

    /// The split of the pinned case. Precondition: `phase_fixed()`.
    fn valid_case_split(&self, ctx: &Context) -> CaseSplit {
        debug_assert!(self.phase_fixed(ctx));
        self.case_split(self.core().phase(ctx))
    }

    fn possible_fixes(&self) -> Vec<Fix>;

    /// Fixes informed by the live tableau assignment.
    fn smart_fixes(&self, tableau: &dyn Tableau) -> Vec<Fix>;

    /// Appends the bounds entailed by the current bounds of the
    /// participating variables.
    fn entailed_tightenings(&self, out: &mut Vec<Tightening>);

    // ===== preprocessing hooks =====

    fn eliminate_variable(&mut self, var: VarRef, fixed_value: f64);
    fn update_variable_index(&mut self, old: VarRef, new: VarRef);
    fn obsolete(&self) -> bool;

    // ===== variable-watcher callbacks =====

    fn notify_variable_value(&mut self, var: VarRef, value: f64) {
        self.core_mut().note_value(var, value);
    }

    fn notify_lower_bound(&mut self, ctx: &mut Context, var: VarRef, bound: f64);
    fn notify_upper_bound(&mut self, ctx: &mut Context, var: VarRef, bound: f64);

    /// Contribution to a convex cost objective; empty when the constraint is
    /// satisfied or inactive.
    fn cost_component(&self, _ctx: &Context, _cost: &mut HashMap<VarRef, f64>) {}

    /// Deep copy with fresh context-dependent cells allocated in `new_ctx`.
    /// The active flag and phase are carried over; the set of infeasible
    /// cases is not: the clone starts fresh in its own search subtree.
    fn duplicate(&self, old_ctx: &Context, new_ctx: &mut Context) -> Box<dyn PiecewiseLinearConstraint>;

    // ===== context-dependent exploration state =====

    fn num_cases(&self) -> u32 {
        self.core().num_cases()
    }

    fn is_active(&self, ctx: &Context) -> bool {
        self.core().is_active(ctx)
    }

    fn set_active(&self, ctx: &mut Context, active: bool) {
        self.core().set_active(ctx, active);
    }

    fn mark_infeasible(&self, ctx: &mut Context, phase: PhaseStatus) {
        self.core().mark_infeasible(ctx, phase);
    }

    fn num_feasible_cases(&self, ctx: &Context) -> u32 {
        self.core().num_feasible_cases(ctx)
    }

    fn is_feasible(&self, ctx: &Context) -> bool {
        self.core().is_feasible(ctx)
    }

    fn is_implication(&self, ctx: &Context) -> bool {
        self.core().is_implication(ctx)
    }

    /// The next case worth trying: the pinned phase when the phase is fixed,
    /// otherwise the first case not yet ruled out, or
    /// [`PhaseStatus::NOT_FIXED`] when none remains.
    fn next_feasible_case(&self, ctx: &Context) -> PhaseStatus {
        if self.phase_fixed(ctx) {
            return self.core().phase(ctx);
        }
        for case in self.all_cases() {
            if !self.core().is_case_infeasible(ctx, case) {
                return case;
            }
        }
        PhaseStatus::NOT_FIXED
    }
}

/// Arena owning the constraints of a query. Stable: constraints are never
/// removed, so a [`ConstraintId`] outlives the whole search.
#[derive(Default)]
pub struct ConstraintStore {
    constraints: RefVec<ConstraintId, Box<dyn PiecewiseLinearConstraint>>,
}

impl ConstraintStore {
    pub fn new() -> ConstraintStore {
        ConstraintStore::default()
    }

    pub fn add(&mut self, constraint: Box<dyn PiecewiseLinearConstraint>) -> ConstraintId {
        self.constraints.push(constraint)
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ConstraintId> {
        (0..self.constraints.len()).map(ConstraintId::from)
    }
}

impl std::ops::Index<ConstraintId> for ConstraintStore {
    type Output = dyn PiecewiseLinearConstraint;

    fn index(&self, id: ConstraintId) -> &Self::Output {
        self.constraints[id].as_ref()
    }
}

impl std::ops::IndexMut<ConstraintId> for ConstraintStore {
    fn index_mut(&mut self, id: ConstraintId) -> &mut Self::Output {
        self.constraints[id].as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtrack::Backtrack;

    #[test]
    fn test_core_lifecycle() {
        let mut ctx = Context::new();
        let mut core = ConstraintCore::new(2);
        assert!(!core.is_initialized());
        core.initialize_cdos(&mut ctx);
        assert!(core.is_initialized());
        assert!(core.is_active(&ctx));
        assert_eq!(core.phase(&ctx), PhaseStatus::NOT_FIXED);
        assert_eq!(core.num_feasible_cases(&ctx), 2);

        core.cdo_cleanup();
        assert!(!core.is_initialized());
        core.cdo_cleanup(); // idempotent
    }

    #[test]
    #[should_panic(expected = "not properly initialized")]
    fn test_access_before_initialization_panics() {
        let ctx = Context::new();
        let core = ConstraintCore::new(2);
        core.is_active(&ctx);
    }

    #[test]
    fn test_mark_infeasible_backtracks() {
        let mut ctx = Context::new();
        let mut core = ConstraintCore::new(3);
        core.initialize_cdos(&mut ctx);

        ctx.save_state();
        core.mark_infeasible(&mut ctx, PhaseStatus::case(1));
        assert_eq!(core.num_feasible_cases(&ctx), 2);
        assert!(core.is_case_infeasible(&ctx, PhaseStatus::case(1)));

        core.mark_infeasible(&mut ctx, PhaseStatus::case(2));
        assert!(core.is_implication(&ctx));

        ctx.restore_last();
        assert_eq!(core.num_feasible_cases(&ctx), 3);
        assert!(!core.is_case_infeasible(&ctx, PhaseStatus::case(1)));
    }

    #[test]
    fn test_reinitialize_preserves_values() {
        let mut ctx = Context::new();
        let mut core = ConstraintCore::new(2);
        core.initialize_cdos(&mut ctx);
        core.set_active(&mut ctx, false);
        core.set_phase(&mut ctx, PhaseStatus::RELU_ACTIVE);
        core.mark_infeasible(&mut ctx, PhaseStatus::RELU_INACTIVE);

        let mut fresh = Context::new();
        core.reinitialize_cdos(&ctx, &mut fresh);
        assert!(!core.is_active(&fresh));
        assert_eq!(core.phase(&fresh), PhaseStatus::RELU_ACTIVE);
        // the infeasible-cases set starts empty in the new context
        assert_eq!(core.num_feasible_cases(&fresh), 2);
    }
}
