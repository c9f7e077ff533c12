//! The absolute-value constraint `f = |b|`.

use crate::constraints::{ConstraintCore, ConstraintKind, PiecewiseLinearConstraint};
use crate::context::Context;
use crate::core::{
    float, CaseSplit, Fix, LinearEquation, PhaseStatus, Tableau, Tightening, TighteningSource, VarRef,
};

/// `f = |b|`, split into the positive branch (`b >= 0`, `f = b`) and the
/// negative branch (`b <= 0`, `f = -b`).
#[derive(Clone)]
pub struct AbsoluteValueConstraint {
    b: VarRef,
    f: VarRef,
    core: ConstraintCore,
    obsolete: bool,
}

impl AbsoluteValueConstraint {
    pub fn new(b: VarRef, f: VarRef) -> AbsoluteValueConstraint {
        AbsoluteValueConstraint {
            b,
            f,
            core: ConstraintCore::new(2),
            obsolete: false,
        }
    }

    fn positive_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new(PhaseStatus::ABS_POSITIVE);
        split.store_bound_tightening(Tightening::lower(self.b, 0.0));
        split.add_equation(LinearEquation::difference(self.f, self.b));
        split
    }

    fn negative_split(&self) -> CaseSplit {
        let mut split = CaseSplit::new(PhaseStatus::ABS_NEGATIVE);
        split.store_bound_tightening(Tightening::upper(self.b, 0.0));
        split.add_equation(LinearEquation::sum(self.f, self.b));
        split
    }
}

impl PiecewiseLinearConstraint for AbsoluteValueConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::AbsoluteValue
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
        vec![PhaseStatus::ABS_POSITIVE, PhaseStatus::ABS_NEGATIVE]
    }

    fn case_split(&self, phase: PhaseStatus) -> CaseSplit {
        match phase {
            PhaseStatus::ABS_POSITIVE => self.positive_split(),
            PhaseStatus::ABS_NEGATIVE => self.negative_split(),
            _ => unreachable!("not an absolute-value phase: {phase:?}"),
        }
    }

    fn satisfied(&self) -> bool {
        match (self.core.value_of(self.b), self.core.value_of(self.f)) {
            (Some(b), Some(f)) => float::are_equal(f, b.abs()),
            _ => false,
        }
    }

    fn possible_fixes(&self) -> Vec<Fix> {
        match (self.core.value_of(self.b), self.core.value_of(self.f)) {
            (Some(b), Some(f)) => {
                let b_fix = if float::is_negative(b) { -f } else { f };
                vec![Fix::new(self.f, b.abs()), Fix::new(self.b, b_fix)]
            }
            _ => Vec::new(),
        }
    }

    fn smart_fixes(&self, tableau: &dyn Tableau) -> Vec<Fix> {
        let b = tableau.value(self.b);
        let f = tableau.value(self.f);
        let b_fix = if float::is_negative(b) { -f } else { f };
        vec![Fix::new(self.f, b.abs()), Fix::new(self.b, b_fix)]
    }

    fn entailed_tightenings(&self, out: &mut Vec<Tightening>) {
        let source = TighteningSource::ComputedByConstraint;
        out.push(Tightening::lower(self.f, 0.0).with_source(source));
        if let (Some(b_lb), Some(b_ub)) = (
            self.core.lower_bound_of(self.b),
            self.core.upper_bound_of(self.b),
        ) {
            out.push(Tightening::upper(self.f, b_lb.abs().max(b_ub.abs())).with_source(source));
        }
        if let Some(f_ub) = self.core.upper_bound_of(self.f) {
            out.push(Tightening::upper(self.b, f_ub).with_source(source));
            out.push(Tightening::lower(self.b, -f_ub).with_source(source));
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
            self.core.set_phase(ctx, PhaseStatus::ABS_POSITIVE);
        }
    }

    fn notify_upper_bound(&mut self, ctx: &mut Context, var: VarRef, bound: f64) {
        self.core.note_upper_bound(var, bound);
        if !self.core.is_initialized() || self.core.phase(ctx).is_fixed() {
            return;
        }
        if var == self.b && !float::is_positive(bound) {
            self.core.set_phase(ctx, PhaseStatus::ABS_NEGATIVE);
        }
    }

    fn duplicate(&self, old_ctx: &Context, new_ctx: &mut Context) -> Box<dyn PiecewiseLinearConstraint> {
        let mut clone = self.clone();
        clone.core.reinitialize_cdos(old_ctx, new_ctx);
        Box::new(clone)
    }
}
