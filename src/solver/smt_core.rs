//! The search driver: violation bookkeeping, case-split decisions, the
//! decision trail, and backtracking.

use std::time::Instant;

use env_param::EnvParam;
use hashbrown::HashMap;
use tracing::trace;

use crate::backtrack::{Backtrack, DecLvl, EventIndex, ObsTrail};
use crate::constraints::{ConstraintId, ConstraintStore, PiecewiseLinearConstraint};
use crate::context::Context;
use crate::core::bounds::BoundManager;
use crate::core::{float, BoundKind, CaseSplit, PhaseStatus, VarRef};
use crate::solver::config::{SmtConfig, SplittingHeuristic};
use crate::solver::stats::Stats;
use crate::solver::{Engine, SmtError};

/// If true, decisions, implications and pops are logged to standard output.
static LOG_SEARCH: EnvParam<bool> = EnvParam::new("SPLINTER_LOG_SEARCH", "false");

/// Uses the same syntax as `println!()` but only evaluates its arguments and
/// prints when `SPLINTER_LOG_SEARCH` is set.
macro_rules! log_search {
    ($($arg:tt)+) => {
        if LOG_SEARCH.get() {
            println!($($arg)+);
        }
    }
}

/// One asserted case on the trail: which constraint, which of its phases,
/// and whether this assertion opened a decision level (in which case the
/// phases still worth trying afterwards are carried along).
#[derive(Clone, Debug)]
pub struct TrailEntry {
    pub constraint: ConstraintId,
    pub phase: PhaseStatus,
    pub is_decision: bool,
    pub decision_level: DecLvl,
    /// Sibling phases left to explore; empty for implications.
    pub alternatives: Vec<PhaseStatus>,
}

/// The search-control core.
///
/// Owns the context, the bound registry, the constraint arena and the trail,
/// and keeps them in lock-step: every decision opens exactly one save-point
/// in each, and backtracking pops them together. The numerical engine stays
/// external and is handed in on the operations that need it.
pub struct SmtCore {
    context: Context,
    bounds: BoundManager,
    constraints: ConstraintStore,
    trail: ObsTrail<TrailEntry>,
    /// `decisions[k-1]` locates the decision that opened level `k`.
    decisions: Vec<EventIndex>,
    violation_counts: HashMap<ConstraintId, u32>,
    need_to_split: bool,
    constraint_for_splitting: Option<ConstraintId>,
    config: SmtConfig,
    debugging_solution: HashMap<VarRef, f64>,
    pub stats: Stats,
}

impl SmtCore {
    pub fn new(config: SmtConfig) -> SmtCore {
        SmtCore {
            context: Context::new(),
            bounds: BoundManager::new(),
            constraints: ConstraintStore::new(),
            trail: ObsTrail::new(),
            decisions: Vec::new(),
            violation_counts: HashMap::new(),
            need_to_split: false,
            constraint_for_splitting: None,
            config,
            debugging_solution: HashMap::new(),
            stats: Stats::new(),
        }
    }

    // ===== ownership accessors =====

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn bounds(&self) -> &BoundManager {
        &self.bounds
    }

    pub fn bounds_mut(&mut self) -> &mut BoundManager {
        &mut self.bounds
    }

    pub fn constraints(&self) -> &ConstraintStore {
        &self.constraints
    }

    /// Adds a constraint to the arena, allocating its context-dependent
    /// state. To be called once preprocessing has settled the query.
    pub fn register_constraint(
        &mut self,
        mut constraint: Box<dyn PiecewiseLinearConstraint>,
    ) -> ConstraintId {
        constraint.core_mut().initialize_cdos(&mut self.context);
        self.constraints.add(constraint)
    }

    // ===== watcher forwarding =====

    pub fn constraint_notify_lower_bound(&mut self, c: ConstraintId, var: VarRef, bound: f64) {
        self.constraints[c].notify_lower_bound(&mut self.context, var, bound);
    }

    pub fn constraint_notify_upper_bound(&mut self, c: ConstraintId, var: VarRef, bound: f64) {
        self.constraints[c].notify_upper_bound(&mut self.context, var, bound);
    }

    pub fn constraint_notify_variable_value(&mut self, c: ConstraintId, var: VarRef, value: f64) {
        self.constraints[c].notify_variable_value(var, value);
    }

    // ===== levels =====

    /// Current decision level, asserting that every backtrackable member
    /// agrees on it.
    pub fn decision_level(&self) -> DecLvl {
        let level = self.context.current_decision_level();
        debug_assert_eq!(self.bounds.num_saved(), level.to_int());
        debug_assert_eq!(self.trail.num_saved(), level.to_int());
        debug_assert_eq!(self.decisions.len() as u32, level.to_int());
        level
    }

    fn save_state_all(&mut self) -> DecLvl {
        let level = self.context.save_state();
        assert_eq!(self.bounds.save_state(), level);
        assert_eq!(self.trail.save_state(), level);
        level
    }

    fn restore_last_all(&mut self) {
        self.context.restore_last();
        self.bounds.restore_last();
        self.trail.restore_last();
    }

    // ===== violation bookkeeping =====

    /// Informs the core that the engine found `c` violated by the current
    /// assignment. Once the count passes the configured threshold the core
    /// requests a split. Callers must not report phase-fixed constraints.
    pub fn report_violated_constraint(&mut self, c: ConstraintId, engine: &mut dyn Engine) {
        debug_assert!(!self.constraints[c].phase_fixed(&self.context));

        let count = {
            let count = self.violation_counts.entry(c).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.config.violation_threshold && self.constraints[c].is_active(&self.context) {
            self.need_to_split = true;
            self.constraint_for_splitting = match self.config.splitting_heuristic {
                SplittingHeuristic::ReluViolation => Some(c),
                SplittingHeuristic::EngineGuided => engine
                    .pick_split_pl_constraint(&self.constraints, &self.context)
                    .or(Some(c)),
            };
        }
    }

    pub fn need_to_split(&self) -> bool {
        self.need_to_split
    }

    pub fn violation_count(&self, c: ConstraintId) -> u32 {
        self.violation_counts.get(&c).copied().unwrap_or(0)
    }

    pub fn reset_reported_violations(&mut self) {
        self.violation_counts.clear();
        self.need_to_split = false;
    }

    /// Among a set of violated constraints, the one to repair without
    /// splitting: the least-often-violated one under the least-fix
    /// heuristic, the first otherwise. Ties keep the earliest.
    pub fn choose_violated_constraint_for_fixing(
        &self,
        violated: &[ConstraintId],
    ) -> Option<ConstraintId> {
        let (&first, rest) = violated.split_first()?;
        if !self.config.use_least_fix {
            return Some(first);
        }
        let mut candidate = first;
        let mut min_fixes = self.violation_count(candidate);
        for &contender in rest {
            let fixes = self.violation_count(contender);
            if fixes < min_fixes {
                min_fixes = fixes;
                candidate = contender;
            }
        }
        Some(candidate)
    }

    // ===== splitting =====

    /// Performs the split requested by the violation bookkeeping.
    ///
    /// If the chosen constraint has become inactive in the meantime the
    /// request is dropped and its counter reset.
    pub fn decide(&mut self, engine: &mut dyn Engine) -> Result<(), SmtError> {
        debug_assert!(self.need_to_split);
        let start = Instant::now();

        let c = self
            .constraint_for_splitting
            .take()
            .expect("no constraint chosen for splitting");

        if !self.constraints[c].is_active(&self.context) {
            self.need_to_split = false;
            self.violation_counts.insert(c, 0);
            self.stats.time_in_core += start.elapsed();
            return Ok(());
        }

        self.need_to_split = false;
        self.constraints[c].set_active(&mut self.context, false);

        let cases = self.constraints[c].all_cases();
        let result = self.decide_split(c, cases, engine);
        self.stats.time_in_core += start.elapsed();
        result
    }

    /// Chooses a phase among `cases` (the first, by default) and opens a
    /// decision level asserting it, keeping the rest as alternatives.
    fn decide_split(
        &mut self,
        c: ConstraintId,
        mut cases: Vec<PhaseStatus>,
        engine: &mut dyn Engine,
    ) -> Result<(), SmtError> {
        debug_assert!(cases.len() >= 2);
        self.stats.num_splits += 1;
        self.stats.num_visited_tree_states += 1;

        let decision = cases.remove(0);
        self.push_decision(c, decision, cases, engine)?;

        let level = self.decision_level();
        self.stats.set_current_decision_level(level);
        Ok(())
    }

    fn push_decision(
        &mut self,
        c: ConstraintId,
        phase: PhaseStatus,
        alternatives: Vec<PhaseStatus>,
        engine: &mut dyn Engine,
    ) -> Result<(), SmtError> {
        debug_assert_eq!(self.decisions.len() as u32, self.decision_level().to_int());

        let level = self.save_state_all();
        let entry = TrailEntry {
            constraint: c,
            phase,
            is_decision: true,
            decision_level: level,
            alternatives,
        };
        let index = self.trail.push(entry);
        self.decisions.push(index);

        let split = self.constraints[c].case_split(phase);
        trace!("decision at {:?}: {:?}", level, split);
        log_search!("[splinter] decision @ {:?}: {:?}", level, split);
        engine.apply_split(&split, &mut self.bounds);

        debug_assert_eq!(self.decisions.len() as u32, self.decision_level().to_int());
        self.verify_against_debugging_solution()
    }

    /// Asserts `phase` of `c` at the current level, leaving no alternatives.
    pub fn push_implication(
        &mut self,
        c: ConstraintId,
        phase: PhaseStatus,
        engine: &mut dyn Engine,
    ) -> Result<(), SmtError> {
        let level = self.decision_level();
        let entry = TrailEntry {
            constraint: c,
            phase,
            is_decision: false,
            decision_level: level,
            alternatives: Vec::new(),
        };
        self.trail.push(entry);

        let split = self.constraints[c].case_split(phase);
        log_search!("[splinter] implication @ {:?}: {:?}", level, split);
        engine.apply_split(&split, &mut self.bounds);

        self.verify_against_debugging_solution()
    }

    /// Records a split that became valid at the current level (typically a
    /// constraint whose phase the bounds have pinned) without opening a new
    /// level. Discarded on pop like any implication.
    pub fn imply_valid_split(
        &mut self,
        c: ConstraintId,
        engine: &mut dyn Engine,
    ) -> Result<(), SmtError> {
        let phase = self.constraints[c].valid_case_split(&self.context).phase();
        self.push_implication(c, phase, engine)
    }

    // ===== backtracking =====

    /// Reverts the most recent decision with remaining alternatives and
    /// asserts the next one: as an implication when it is the only case
    /// left, as a fresh decision otherwise. Returns `false` when the search
    /// is exhausted.
    pub fn backtrack_and_continue(&mut self, engine: &mut dyn Engine) -> Result<bool, SmtError> {
        let start = Instant::now();
        let result = self.backtrack_impl(engine);
        self.stats.time_in_core += start.elapsed();
        result
    }

    fn backtrack_impl(&mut self, engine: &mut dyn Engine) -> Result<bool, SmtError> {
        if self.decision_level() == DecLvl::ROOT {
            return Ok(false);
        }
        self.stats.num_visited_tree_states += 1;

        let mut last = self.pop_decision_level();
        self.constraints[last.constraint].mark_infeasible(&mut self.context, last.phase);

        loop {
            let c = last.constraint;
            let remaining: Vec<PhaseStatus> = last
                .alternatives
                .iter()
                .copied()
                .filter(|p| !self.constraints[c].core().is_case_infeasible(&self.context, *p))
                .collect();

            if !remaining.is_empty() {
                if remaining.len() == 1 {
                    self.push_implication(c, remaining[0], engine)?;
                    self.stats.set_current_decision_level(self.decision_level());
                } else {
                    self.decide_split(c, remaining, engine)?;
                }
                return Ok(true);
            }

            // every alternative of this decision is ruled out; a trail that
            // still admits the stored witness must not be abandoned
            self.interrupt_if_compliant_with_debug_solution()?;

            if self.decision_level() == DecLvl::ROOT {
                return Ok(false);
            }
            last = self.pop_decision_level();
            self.constraints[last.constraint].mark_infeasible(&mut self.context, last.phase);
        }
    }

    /// Pops one decision level, returning the decision that opened it.
    fn pop_decision_level(&mut self) -> TrailEntry {
        let index = *self.decisions.last().expect("no decision to pop");
        let entry = self.trail.get_event(index).clone();
        log_search!("[splinter] pop @ {:?}", self.decision_level());
        self.restore_last_all();
        self.decisions.pop();
        self.stats.num_pops += 1;
        debug_assert_eq!(self.decisions.len() as u32, self.decision_level().to_int());
        entry
    }

    // ===== trail inspection =====

    pub fn trail(&self) -> &[TrailEntry] {
        self.trail.events()
    }

    /// All splits asserted so far, in assertion order.
    pub fn all_splits_so_far(&self) -> Vec<CaseSplit> {
        self.trail
            .events()
            .iter()
            .map(|e| self.constraints[e.constraint].case_split(e.phase))
            .collect()
    }

    /// The split decided at the given level (1-based).
    pub fn decision_split(&self, level: u32) -> CaseSplit {
        debug_assert!(level >= 1 && level <= self.decision_level().to_int());
        let entry = self.trail.get_event(self.decisions[(level - 1) as usize]);
        self.constraints[entry.constraint].case_split(entry.phase)
    }

    /// To be called once loading and preprocessing are done: a query whose
    /// root bounds are already inconsistent is infeasible without search.
    pub fn check_initial_consistency(&self) -> Result<(), SmtError> {
        debug_assert_eq!(self.decision_level(), DecLvl::ROOT);
        if self.bounds.consistent_bounds() {
            Ok(())
        } else {
            Err(SmtError::InfeasibleQuery)
        }
    }

    // ===== debugging witness =====

    /// Installs a known-correct solution; every subsequent push is checked
    /// against it.
    pub fn store_debugging_solution(&mut self, solution: HashMap<VarRef, f64>) {
        self.debugging_solution = solution;
    }

    /// Whether `split` leaves the stored witness reachable. `Err` carries a
    /// description of the contradicted variable.
    pub fn split_allows_stored_solution(&self, split: &CaseSplit) -> Result<(), String> {
        for t in split.bound_tightenings() {
            let Some(&solution_value) = self.debugging_solution.get(&t.var) else {
                continue;
            };
            match t.kind {
                BoundKind::Lower if t.value > solution_value + float::EPSILON => {
                    return Err(format!(
                        "variable {:?}: new lower bound {:.5} contradicts solution value {:.5}",
                        t.var, t.value, solution_value
                    ));
                }
                BoundKind::Upper if t.value < solution_value - float::EPSILON => {
                    return Err(format!(
                        "variable {:?}: new upper bound {:.5} contradicts solution value {:.5}",
                        t.var, t.value, solution_value
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Walks the trail against the stored witness. `Ok(true)` means every
    /// asserted split admits the witness; `Ok(false)` that the path has
    /// taken a wrong turn it can still backtrack out of; `Err` that the
    /// witness has been lost for good. Without a witness: `Ok(false)`.
    pub fn check_skew_from_debugging_solution(&self) -> Result<bool, SmtError> {
        if self.debugging_solution.is_empty() {
            return Ok(false);
        }
        for entry in self.trail.events() {
            let split = self.constraints[entry.constraint].case_split(entry.phase);
            if let Err(error) = self.split_allows_stored_solution(&split) {
                let recoverable = entry.is_decision
                    && entry.alternatives.iter().any(|p| {
                        !self.constraints[entry.constraint]
                            .core()
                            .is_case_infeasible(&self.context, *p)
                    });
                if recoverable {
                    // a wrong turn with siblings left: fine, stop here
                    return Ok(false);
                }
                return Err(SmtError::Debugging(error));
            }
        }
        Ok(true)
    }

    fn verify_against_debugging_solution(&self) -> Result<(), SmtError> {
        self.check_skew_from_debugging_solution().map(|_| ())
    }

    fn interrupt_if_compliant_with_debug_solution(&self) -> Result<(), SmtError> {
        if self.check_skew_from_debugging_solution()? {
            return Err(SmtError::Debugging(
                "abandoning a subtree that still admits the stored solution".to_string(),
            ));
        }
        Ok(())
    }

    // ===== invariants =====

    /// Asserts the cross-component invariants: level agreement, trail
    /// coherence, and that the bound registry is at least as tight as the
    /// cumulative bounds asserted on the trail.
    pub fn check_invariants(&self) {
        let level = self.context.current_decision_level().to_int();
        assert_eq!(self.decisions.len() as u32, level);
        assert_eq!(self.bounds.num_saved(), level);
        assert_eq!(self.trail.num_saved(), level);

        let mut decisions_seen = 0u32;
        for entry in self.trail.events() {
            if entry.is_decision {
                decisions_seen += 1;
            }
            assert_eq!(entry.decision_level.to_int(), decisions_seen);
            assert!(entry.decision_level.to_int() <= level);
        }

        for (k, index) in self.decisions.iter().enumerate() {
            let entry = self.trail.get_event(*index);
            assert!(entry.is_decision);
            assert_eq!(entry.decision_level.to_int() as usize, k + 1);
        }

        for entry in self.trail.events() {
            let split = self.constraints[entry.constraint].case_split(entry.phase);
            for t in split.bound_tightenings() {
                match t.kind {
                    BoundKind::Lower => {
                        assert!(self.bounds.lower_bound(t.var) >= t.value - float::EPSILON)
                    }
                    BoundKind::Upper => {
                        assert!(self.bounds.upper_bound(t.var) <= t.value + float::EPSILON)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::DisjunctionConstraint;
    use crate::core::Tightening;

    struct MockEngine {
        applied: Vec<CaseSplit>,
        preferred: Option<ConstraintId>,
    }

    impl MockEngine {
        fn new() -> MockEngine {
            MockEngine {
                applied: Vec::new(),
                preferred: None,
            }
        }
    }

    impl Engine for MockEngine {
        fn apply_split(&mut self, split: &CaseSplit, bounds: &mut BoundManager) {
            for t in split.bound_tightenings() {
                bounds.apply_tightening(t);
            }
            self.applied.push(split.clone());
        }

        fn pick_split_pl_constraint(
            &mut self,
            _constraints: &ConstraintStore,
            _ctx: &Context,
        ) -> Option<ConstraintId> {
            self.preferred
        }
    }

    /// A disjunction with `n` interval cases over `var`, case i asserting
    /// `var` in `[10 * i, 10 * i + 1]`.
    fn chooser(smt: &mut SmtCore, var: VarRef, n: u32) -> ConstraintId {
        let splits = (1..=n)
            .map(|i| {
                let mut split = CaseSplit::new(PhaseStatus::case(i));
                split.store_bound_tightening(Tightening::lower(var, 10.0 * i as f64));
                split.store_bound_tightening(Tightening::upper(var, 10.0 * i as f64 + 1.0));
                split
            })
            .collect();
        smt.register_constraint(Box::new(DisjunctionConstraint::new(splits)))
    }

    fn core_with_threshold(threshold: u32, num_vars: usize) -> SmtCore {
        let config = SmtConfig {
            violation_threshold: threshold,
            ..Default::default()
        };
        let mut smt = SmtCore::new(config);
        smt.bounds_mut().initialize(num_vars);
        smt
    }

    fn report_until_split(smt: &mut SmtCore, c: ConstraintId, engine: &mut MockEngine) {
        while !smt.need_to_split() {
            smt.report_violated_constraint(c, engine);
        }
    }

    #[test]
    fn test_simple_decide_then_backtrack_to_implication() {
        let mut smt = core_with_threshold(2, 1);
        let mut engine = MockEngine::new();
        let x = VarRef::from_u32(0);
        let c = chooser(&mut smt, x, 2);

        report_until_split(&mut smt, c, &mut engine);
        assert_eq!(smt.violation_count(c), 2);

        smt.decide(&mut engine).unwrap();
        smt.check_invariants();
        assert_eq!(smt.decision_level(), DecLvl::new(1));
        assert!(!smt.constraints()[c].is_active(smt.context()));
        assert_eq!(smt.trail().len(), 1);
        assert!(smt.trail()[0].is_decision);
        assert_eq!(smt.trail()[0].phase, PhaseStatus::case(1));
        assert_eq!(smt.trail()[0].alternatives, vec![PhaseStatus::case(2)]);
        assert_eq!(smt.bounds().lower_bound(x), 10.0);

        // the engine reports the subtree infeasible
        assert!(smt.backtrack_and_continue(&mut engine).unwrap());
        smt.check_invariants();
        assert_eq!(smt.decision_level(), DecLvl::ROOT);
        assert_eq!(smt.trail().len(), 1);
        assert!(!smt.trail()[0].is_decision);
        assert_eq!(smt.trail()[0].phase, PhaseStatus::case(2));
        assert_eq!(smt.trail()[0].decision_level, DecLvl::ROOT);
        assert!(smt.constraints()[c]
            .core()
            .is_case_infeasible(smt.context(), PhaseStatus::case(1)));
        assert_eq!(
            smt.constraints()[c].next_feasible_case(smt.context()),
            PhaseStatus::case(2)
        );
        assert_eq!(smt.bounds().lower_bound(x), 20.0);
    }

    #[test]
    fn test_deep_backtrack_with_exhaustion() {
        let mut smt = core_with_threshold(1, 2);
        let mut engine = MockEngine::new();
        let c1 = chooser(&mut smt, VarRef::from_u32(0), 2);
        let c2 = chooser(&mut smt, VarRef::from_u32(1), 2);

        report_until_split(&mut smt, c1, &mut engine);
        smt.decide(&mut engine).unwrap();
        report_until_split(&mut smt, c2, &mut engine);
        smt.decide(&mut engine).unwrap();
        smt.check_invariants();
        assert_eq!(smt.decision_level(), DecLvl::new(2));

        // first backtrack: C2 = 1 ruled out, C2 = 2 implied at level 1
        assert!(smt.backtrack_and_continue(&mut engine).unwrap());
        smt.check_invariants();
        assert_eq!(smt.decision_level(), DecLvl::new(1));
        assert_eq!(smt.trail().len(), 2);
        assert!(!smt.trail()[1].is_decision);
        assert_eq!(smt.trail()[1].phase, PhaseStatus::case(2));

        // second backtrack: C1 = 1 ruled out, C1 = 2 implied at the root;
        // C2's mark was made below level 1 and is gone
        assert!(smt.backtrack_and_continue(&mut engine).unwrap());
        smt.check_invariants();
        assert_eq!(smt.decision_level(), DecLvl::ROOT);
        assert_eq!(smt.trail().len(), 1);
        assert_eq!(smt.trail()[0].constraint, c1);
        assert_eq!(smt.trail()[0].phase, PhaseStatus::case(2));
        assert_eq!(smt.constraints()[c2].num_feasible_cases(smt.context()), 2);

        // third backtrack from the root: exhausted
        assert!(!smt.backtrack_and_continue(&mut engine).unwrap());
        smt.check_invariants();
    }

    #[test]
    fn test_three_way_split() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let x = VarRef::from_u32(0);
        let m = chooser(&mut smt, x, 3);

        report_until_split(&mut smt, m, &mut engine);
        smt.decide(&mut engine).unwrap();
        assert_eq!(smt.trail()[0].phase, PhaseStatus::case(1));
        assert_eq!(
            smt.trail()[0].alternatives,
            vec![PhaseStatus::case(2), PhaseStatus::case(3)]
        );

        // backtrack: 1 ruled out, 2 decided with 3 as the alternative
        assert!(smt.backtrack_and_continue(&mut engine).unwrap());
        smt.check_invariants();
        assert_eq!(smt.decision_level(), DecLvl::new(1));
        assert!(smt.trail()[0].is_decision);
        assert_eq!(smt.trail()[0].phase, PhaseStatus::case(2));
        assert_eq!(smt.trail()[0].alternatives, vec![PhaseStatus::case(3)]);

        // backtrack: 2 ruled out, 3 implied at the root
        assert!(smt.backtrack_and_continue(&mut engine).unwrap());
        smt.check_invariants();
        assert_eq!(smt.decision_level(), DecLvl::ROOT);
        assert!(!smt.trail()[0].is_decision);
        assert_eq!(smt.trail()[0].phase, PhaseStatus::case(3));

        // exhausted
        assert!(!smt.backtrack_and_continue(&mut engine).unwrap());
        assert_eq!(
            smt.constraints()[m].next_feasible_case(smt.context()),
            PhaseStatus::case(3)
        );
    }

    #[test]
    fn test_violation_counter_heuristic() {
        let mut smt = core_with_threshold(3, 2);
        let mut engine = MockEngine::new();
        let c1 = chooser(&mut smt, VarRef::from_u32(0), 2);
        let c2 = chooser(&mut smt, VarRef::from_u32(1), 2);

        smt.report_violated_constraint(c1, &mut engine);
        smt.report_violated_constraint(c1, &mut engine);
        smt.report_violated_constraint(c2, &mut engine);
        smt.report_violated_constraint(c2, &mut engine);
        assert!(!smt.need_to_split());

        smt.report_violated_constraint(c2, &mut engine);
        assert!(smt.need_to_split());
        assert_eq!(smt.constraint_for_splitting, Some(c2));
    }

    #[test]
    fn test_engine_guided_choice_falls_back() {
        let config = SmtConfig {
            violation_threshold: 1,
            splitting_heuristic: SplittingHeuristic::EngineGuided,
            ..Default::default()
        };
        let mut smt = SmtCore::new(config);
        smt.bounds_mut().initialize(2);
        let mut engine = MockEngine::new();
        let c1 = chooser(&mut smt, VarRef::from_u32(0), 2);
        let c2 = chooser(&mut smt, VarRef::from_u32(1), 2);

        engine.preferred = Some(c2);
        smt.report_violated_constraint(c1, &mut engine);
        assert_eq!(smt.constraint_for_splitting, Some(c2));

        smt.need_to_split = false;
        engine.preferred = None;
        smt.report_violated_constraint(c1, &mut engine);
        assert_eq!(smt.constraint_for_splitting, Some(c1));
    }

    #[test]
    fn test_decide_on_inactive_constraint_is_dropped() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let c = chooser(&mut smt, VarRef::from_u32(0), 2);

        report_until_split(&mut smt, c, &mut engine);
        smt.constraints[c].set_active(&mut smt.context, false);

        smt.decide(&mut engine).unwrap();
        assert!(!smt.need_to_split());
        assert_eq!(smt.violation_count(c), 0);
        assert!(smt.constraint_for_splitting.is_none());
        assert_eq!(smt.decision_level(), DecLvl::ROOT);
        assert!(smt.trail().is_empty());
    }

    #[test]
    fn test_report_on_inactive_constraint_only_counts() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let c = chooser(&mut smt, VarRef::from_u32(0), 2);
        smt.constraints[c].set_active(&mut smt.context, false);

        smt.report_violated_constraint(c, &mut engine);
        assert_eq!(smt.violation_count(c), 1);
        assert!(!smt.need_to_split());
        assert!(smt.constraint_for_splitting.is_none());
    }

    #[test]
    fn test_backtrack_at_root_is_a_noop() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let c = chooser(&mut smt, VarRef::from_u32(0), 2);

        assert!(!smt.backtrack_and_continue(&mut engine).unwrap());
        assert_eq!(smt.decision_level(), DecLvl::ROOT);
        assert!(smt.trail().is_empty());
        assert_eq!(smt.constraints()[c].num_feasible_cases(smt.context()), 2);
    }

    #[test]
    fn test_exhaustion_through_pre_marked_alternatives() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let c = chooser(&mut smt, VarRef::from_u32(0), 2);

        // case 2 is already ruled out at the root
        smt.constraints[c].mark_infeasible(&mut smt.context, PhaseStatus::case(2));

        report_until_split(&mut smt, c, &mut engine);
        smt.decide(&mut engine).unwrap();

        // the only alternative is infeasible: the search is exhausted
        assert!(!smt.backtrack_and_continue(&mut engine).unwrap());
        assert_eq!(smt.decision_level(), DecLvl::ROOT);
        assert_eq!(smt.constraints()[c].num_feasible_cases(smt.context()), 0);
    }

    #[test]
    fn test_least_fix_choice() {
        let mut smt = core_with_threshold(10, 2);
        let mut engine = MockEngine::new();
        let c1 = chooser(&mut smt, VarRef::from_u32(0), 2);
        let c2 = chooser(&mut smt, VarRef::from_u32(1), 2);
        smt.report_violated_constraint(c1, &mut engine);
        smt.report_violated_constraint(c1, &mut engine);
        smt.report_violated_constraint(c2, &mut engine);

        // first by default
        assert_eq!(smt.choose_violated_constraint_for_fixing(&[c1, c2]), Some(c1));

        smt.config.use_least_fix = true;
        assert_eq!(smt.choose_violated_constraint_for_fixing(&[c1, c2]), Some(c2));
        assert_eq!(smt.choose_violated_constraint_for_fixing(&[]), None);
    }

    #[test]
    fn test_all_splits_so_far_and_decision_split() {
        let mut smt = core_with_threshold(1, 2);
        let mut engine = MockEngine::new();
        let c1 = chooser(&mut smt, VarRef::from_u32(0), 2);
        let c2 = chooser(&mut smt, VarRef::from_u32(1), 2);

        report_until_split(&mut smt, c1, &mut engine);
        smt.decide(&mut engine).unwrap();
        smt.push_implication(c2, PhaseStatus::case(1), &mut engine).unwrap();

        let splits = smt.all_splits_so_far();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].phase(), PhaseStatus::case(1));
        assert_eq!(splits, engine.applied);

        assert_eq!(smt.decision_split(1).phase(), PhaseStatus::case(1));
    }

    #[test]
    fn test_imply_valid_split_records_an_implication() {
        use crate::constraints::ReluConstraint;

        let mut smt = core_with_threshold(1, 2);
        let mut engine = MockEngine::new();
        let b = VarRef::from_u32(0);
        let f = VarRef::from_u32(1);
        let c = smt.register_constraint(Box::new(ReluConstraint::new(b, f)));

        // the tableau derived b <= -1: the phase is pinned to inactive
        smt.constraint_notify_upper_bound(c, b, -1.0);
        assert!(smt.constraints[c].phase_fixed(&smt.context));

        smt.imply_valid_split(c, &mut engine).unwrap();
        assert_eq!(smt.decision_level(), DecLvl::ROOT);
        assert_eq!(smt.trail().len(), 1);
        assert!(!smt.trail()[0].is_decision);
        assert_eq!(smt.trail()[0].phase, PhaseStatus::RELU_INACTIVE);
        assert_eq!(engine.applied[0].phase(), PhaseStatus::RELU_INACTIVE);
        smt.check_invariants();
    }

    #[test]
    fn test_reset_reported_violations() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let c = chooser(&mut smt, VarRef::from_u32(0), 2);

        smt.report_violated_constraint(c, &mut engine);
        assert!(smt.need_to_split());
        smt.reset_reported_violations();
        assert!(!smt.need_to_split());
        assert_eq!(smt.violation_count(c), 0);
    }

    #[test]
    fn test_initial_consistency() {
        let mut smt = core_with_threshold(1, 1);
        let x = VarRef::from_u32(0);
        assert!(smt.check_initial_consistency().is_ok());
        smt.bounds_mut().set_lower_bound(x, 1.0);
        smt.bounds_mut().set_upper_bound(x, 0.0);
        assert!(matches!(
            smt.check_initial_consistency(),
            Err(SmtError::InfeasibleQuery)
        ));
    }

    #[test]
    fn test_witness_violated_by_implication() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let x = VarRef::from_u32(0);
        let c = chooser(&mut smt, x, 2);

        let mut witness = HashMap::new();
        witness.insert(x, 20.5); // lives in case 2
        smt.store_debugging_solution(witness);

        // asserting case 1 as an implication loses the witness for good
        let result = smt.push_implication(c, PhaseStatus::case(1), &mut engine);
        assert!(matches!(result, Err(SmtError::Debugging(_))));
    }

    #[test]
    fn test_witness_survives_decision_with_alternatives() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let x = VarRef::from_u32(0);
        let c = chooser(&mut smt, x, 2);

        let mut witness = HashMap::new();
        witness.insert(x, 20.5);
        smt.store_debugging_solution(witness);

        // deciding case 1 is a recoverable wrong turn: case 2 remains
        report_until_split(&mut smt, c, &mut engine);
        smt.decide(&mut engine).unwrap();
        assert!(!smt.check_skew_from_debugging_solution().unwrap());

        // backtracking lands on the witness side
        assert!(smt.backtrack_and_continue(&mut engine).unwrap());
        assert!(smt.check_skew_from_debugging_solution().unwrap());
    }

    #[test]
    fn test_abandoning_compliant_subtree_is_an_error() {
        let mut smt = core_with_threshold(1, 1);
        let mut engine = MockEngine::new();
        let x = VarRef::from_u32(0);
        let c = chooser(&mut smt, x, 2);

        let mut witness = HashMap::new();
        witness.insert(x, 10.5); // lives in case 1
        smt.store_debugging_solution(witness);

        // rule out case 2 at the root, then decide case 1
        smt.constraints[c].mark_infeasible(&mut smt.context, PhaseStatus::case(2));
        report_until_split(&mut smt, c, &mut engine);
        smt.decide(&mut engine).unwrap();

        // the engine claims infeasibility although the witness lives here:
        // exhausting the constraint must surface a debugging error
        let result = smt.backtrack_and_continue(&mut engine);
        assert!(matches!(result, Err(SmtError::Debugging(_))));
    }
}
