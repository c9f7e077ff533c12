//! The ReLU constraint `f = max(b, 0)`.

use hashbrown::HashMap;

use crate::constraints::{ConstraintCore, ConstraintKind, PiecewiseLinearConstraint};
use crate::context::Context;
use crate::core::{
    float, CaseSplit, Fix, LinearEquation, PhaseStatus, Tableau, Tightening, TighteningSource, VarRef,
};

/// `f = max(b, 0)` over the pre-activation variable `b` and the
/// post-activation variable `f`.
///
/// Two cases: active (`b >= 0`, `f = b`) and inactive (`b <= 0`, `f = 0`).
/// Preprocessing is assumed to have asserted `f >= 0`.
#[derive(Clone)]
pub struct ReluConstraint {
    b: VarRef,
    f: VarRef,
    core: ConstraintCore,
    obsolete: bool,
}

impl ReluConstraint {
    pub fn new(b: VarRef, f: VarRef) -> ReluConstraint {
        ReluConstraint {
            b,
            f,
            core: ConstraintCore::new(2),
            obsolete: false,
        }
    }

    pub fn b(&self) -> VarRef {
        self.b
    }

    pub fn f(&self) -> VarRef {
        self.f
    }

    fn active_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new(PhaseStatus::RELU_ACTIVE);
        split.store_bound_tightening(Tightening::lower(self.b, 0.0));
        split.add_equation(LinearEquation::difference(self.f, self.b));
        split
    }

    fn inactive_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new(PhaseStatus::RELU_INACTIVE);
        split.store_bound_tightening(Tightening::upper(self.b, 0.0));
        split.store_bound_tightening(Tightening::upper(self.f, 0.0));
        split
    }

    fn fixes_for(&self, b_value: f64, f_value: f64) -> Vec<Fix> {
        if float::is_negative(b_value) {
            vec![Fix::new(self.f, 0.0), Fix::new(self.b, f_value)]
        } else {
            vec![Fix::new(self.f, b_value), Fix::new(self.b, f_value)]
        }
    }
}

impl PiecewiseLinearConstraint for ReluConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Relu
    }

    fn core(&self) -> &ConstraintCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConstraintCore {
        &mut self.core
    }

    fn participating_variables(&self) -> Vec<VarRef> {
        vec![self.b, self.f]
    }

    fn participates(&self, var: VarRef) -> bool {
        var == self.b || var == self.f
    }

    fn all_cases(&self) -> Vec<PhaseStatus> {
        vec![PhaseStatus::RELU_ACTIVE, PhaseStatus::RELU_INACTIVE]
    }

    fn case_split(&self, phase: PhaseStatus) -> CaseSplit {
        match phase {
            PhaseStatus::RELU_ACTIVE => self.active_split(),
            PhaseStatus::RELU_INACTIVE => self.inactive_split(),
            _ => unreachable!("not a ReLU phase: {phase:?}"),
        }
    }

    fn satisfied(&self) -> bool {
        match (self.core.value_of(self.b), self.core.value_of(self.f)) {
            (Some(b), Some(f)) => float::are_equal(f, b.max(0.0)),
            _ => false,
        }
    }

    fn possible_fixes(&self) -> Vec<Fix> {
        match (self.core.value_of(self.b), self.core.value_of(self.f)) {
            (Some(b), Some(f)) => self.fixes_for(b, f),
            _ => Vec::new(),
        }
    }

    fn smart_fixes(&self, tableau: &dyn Tableau) -> Vec<Fix> {
        self.fixes_for(tableau.value(self.b), tableau.value(self.f))
    }

    fn entailed_tightenings(&self, out: &mut Vec<Tightening>) {
        let source = TighteningSource::ComputedByConstraint;
        out.push(Tightening::lower(self.f, 0.0).with_source(source));
        if let Some(b_ub) = self.core.upper_bound_of(self.b) {
            out.push(Tightening::upper(self.f, b_ub.max(0.0)).with_source(source));
        }
        if let Some(f_ub) = self.core.upper_bound_of(self.f) {
            out.push(Tightening::upper(self.b, f_ub).with_source(source));
        }
        if let Some(b_lb) = self.core.lower_bound_of(self.b) {
            if float::is_positive(b_lb) {
                out.push(Tightening::lower(self.f, b_lb).with_source(source));
            }
        }
        if let Some(f_lb) = self.core.lower_bound_of(self.f) {
            if float::is_positive(f_lb) {
                out.push(Tightening::lower(self.b, f_lb).with_source(source));
            }
        }
    }

    fn eliminate_variable(&mut self, var: VarRef, _fixed_value: f64) {
        if var == self.b || var == self.f {
            self.obsolete = true;
        }
    }

    fn update_variable_index(&mut self, old: VarRef, new: VarRef) {
        if self.b == old {
            self.b = new;
        }
        if self.f == old {
            self.f = new;
        }
        self.core.rename_variable(old, new);
    }

    fn obsolete(&self) -> bool {
        self.obsolete
    }

    fn notify_lower_bound(&mut self, ctx: &mut Context, var: VarRef, bound: f64) {
        self.core.note_lower_bound(var, bound);
        if !self.core.is_initialized() || self.core.phase(ctx).is_fixed() {
            return;
        }
        if var == self.b && !float::is_negative(bound) {
            self.core.set_phase(ctx, PhaseStatus::RELU_ACTIVE);
        } else if var == self.f && float::is_positive(bound) {
            self.core.set_phase(ctx, PhaseStatus::RELU_ACTIVE);
        }
    }

    fn notify_upper_bound(&mut self, ctx: &mut Context, var: VarRef, bound: f64) {
        self.core.note_upper_bound(var, bound);
        if !self.core.is_initialized() || self.core.phase(ctx).is_fixed() {
            return;
        }
        if (var == self.b || var == self.f) && !float::is_positive(bound) {
            self.core.set_phase(ctx, PhaseStatus::RELU_INACTIVE);
        }
    }

    fn cost_component(&self, ctx: &Context, cost: &mut HashMap<VarRef, f64>) {
        if !self.core.is_active(ctx) || self.satisfied() {
            return;
        }
        // cost f - b when the input is non-negative, cost f otherwise;
        // minimizing it drives the constraint towards satisfaction
        let b_value = self.core.value_of(self.b).unwrap_or(0.0);
        *cost.entry(self.f).or_insert(0.0) += 1.0;
        if !float::is_negative(b_value) {
            *cost.entry(self.b).or_insert(0.0) -= 1.0;
        }
    }

    fn duplicate(&self, old_ctx: &Context, new_ctx: &mut Context) -> Box<dyn PiecewiseLinearConstraint> {
        let mut clone = self.clone();
        clone.core.reinitialize_cdos(old_ctx, new_ctx);
        Box::new(clone)
    }
}
