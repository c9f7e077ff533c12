//! Disjunction over an explicit list of case splits.

use itertools::Itertools;

use crate::constraints::{ConstraintCore, ConstraintKind, PiecewiseLinearConstraint};
use crate::context::Context;
use crate::core::{float, BoundKind, CaseSplit, EquationKind, Fix, LinearEquation, PhaseStatus, Tableau, Tightening, VarRef};

/// A disjunction of explicitly enumerated case splits, exactly one of which
/// must hold. Cases are identified by their 1-based position in the list.
#[derive(Clone)]
pub struct DisjunctionConstraint {
    splits: Vec<CaseSplit>,
    variables: Vec<VarRef>,
    core: ConstraintCore,
    obsolete: bool,
}

impl DisjunctionConstraint {
    pub fn new(disjuncts: Vec<CaseSplit>) -> DisjunctionConstraint {
        assert!(!disjuncts.is_empty(), "empty disjunction");
        let variables = disjuncts
            .iter()
            .flat_map(|split| {
                split
                    .bound_tightenings()
                    .iter()
                    .map(|t| t.var)
                    .chain(split.equations().iter().flat_map(|eq| eq.addends.iter().map(|(_, v)| *v)))
                    .collect::<Vec<_>>()
            })
            .unique()
            .collect();
        let splits: Vec<CaseSplit> = disjuncts
            .into_iter()
            .enumerate()
            .map(|(i, mut split)| {
                split.set_phase(PhaseStatus::case(i as u32 + 1));
                split
            })
            .collect();
        let num_cases = splits.len() as u32;
        DisjunctionConstraint {
            splits,
            variables,
            core: ConstraintCore::new(num_cases),
            obsolete: false,
        }
    }

    fn equation_satisfied(&self, eq: &LinearEquation) -> bool {
        let sum: Option<f64> = eq
            .addends
            .iter()
            .map(|(c, v)| self.core.value_of(*v).map(|x| c * x))
            .sum();
        match sum {
            Some(sum) => match eq.kind {
                EquationKind::Equal => float::are_equal(sum, eq.scalar),
                EquationKind::GreaterEq => sum >= eq.scalar - float::EPSILON,
                EquationKind::LessEq => sum <= eq.scalar + float::EPSILON,
            },
            None => false,
        }
    }

    fn disjunct_satisfied(&self, split: &CaseSplit) -> bool {
        let bounds_hold = split.bound_tightenings().iter().all(|t| {
            match self.core.value_of(t.var) {
                Some(value) => match t.kind {
                    BoundKind::Lower => value >= t.value - float::EPSILON,
                    BoundKind::Upper => value <= t.value + float::EPSILON,
                },
                None => false,
            }
        });
        bounds_hold && split.equations().iter().all(|eq| self.equation_satisfied(eq))
    }

    /// Whether the disjunct is still compatible with the known bounds of its
    /// variables.
    fn disjunct_feasible(&self, split: &CaseSplit) -> bool {
        split.bound_tightenings().iter().all(|t| match t.kind {
            BoundKind::Lower => match self.core.upper_bound_of(t.var) {
                Some(ub) => ub >= t.value - float::EPSILON,
                None => true,
            },
            BoundKind::Upper => match self.core.lower_bound_of(t.var) {
                Some(lb) => lb <= t.value + float::EPSILON,
                None => true,
            },
        })
    }

    fn fix_phase_if_forced(&mut self, ctx: &mut Context) {
        if !self.core.is_initialized() || self.core.phase(ctx).is_fixed() {
            return;
        }
        let mut feasible = self
            .splits
            .iter()
            .filter(|split| self.disjunct_feasible(split));
        match (feasible.next(), feasible.next()) {
            (Some(split), None) => {
                let phase = split.phase();
                self.core.set_phase(ctx, phase);
            }
            _ => (),
        }
    }
}

impl PiecewiseLinearConstraint for DisjunctionConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Disjunction
    }

    fn core(&self) -> &ConstraintCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConstraintCore {
        &mut self.core
    }

    fn participating_variables(&self) -> Vec<VarRef> {
        self.variables.clone()
    }

    fn participates(&self, var: VarRef) -> bool {
        self.variables.contains(&var)
    }

    fn all_cases(&self) -> Vec<PhaseStatus> {
        (1..=self.splits.len() as u32).map(PhaseStatus::case).collect()
    }

    fn case_split(&self, phase: PhaseStatus) -> CaseSplit {
        let index = phase.case_index() as usize;
        debug_assert!(index >= 1 && index <= self.splits.len(), "{phase:?}");
        self.splits[index - 1].clone()
    }

    fn satisfied(&self) -> bool {
        self.splits.iter().any(|split| self.disjunct_satisfied(split))
    }

    fn possible_fixes(&self) -> Vec<Fix> {
        Vec::new()
    }

    fn smart_fixes(&self, _tableau: &dyn Tableau) -> Vec<Fix> {
        Vec::new()
    }

    fn entailed_tightenings(&self, _out: &mut Vec<Tightening>) {}

    fn eliminate_variable(&mut self, var: VarRef, _fixed_value: f64) {
        if self.participates(var) {
            self.obsolete = true;
        }
    }

    fn update_variable_index(&mut self, old: VarRef, new: VarRef) {
        for split in self.splits.iter_mut() {
            split.update_variable_index(old, new);
        }
        for v in self.variables.iter_mut() {
            if *v == old {
                *v = new;
            }
        }
        self.core.rename_variable(old, new);
    }

    fn obsolete(&self) -> bool {
        self.obsolete
    }

    fn notify_lower_bound(&mut self, ctx: &mut Context, var: VarRef, bound: f64) {
        self.core.note_lower_bound(var, bound);
        self.fix_phase_if_forced(ctx);
    }

    fn notify_upper_bound(&mut self, ctx: &mut Context, var: VarRef, bound: f64) {
        self.core.note_upper_bound(var, bound);
        self.fix_phase_if_forced(ctx);
    }

    fn duplicate(&self, old_ctx: &Context, new_ctx: &mut Context) -> Box<dyn PiecewiseLinearConstraint> {
        let mut clone = self.clone();
        clone.core.reinitialize_cdos(old_ctx, new_ctx);
        Box::new(clone)
    }
}
