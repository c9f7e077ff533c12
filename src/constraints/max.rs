//! The max constraint `y = max(x_1, ..., x_n)`.

use itertools::Itertools;

use crate::constraints::{ConstraintCore, ConstraintKind, PiecewiseLinearConstraint};
use crate::context::Context;
use crate::core::{
    float, CaseSplit, Fix, LinearEquation, PhaseStatus, Tableau, Tightening, TighteningSource, VarRef,
};

/// `y = max(x_1, ..., x_n)`. Case `i` (1-based) asserts `y = x_i`; the phase
/// tag is the case index.
#[derive(Clone)]
pub struct MaxConstraint {
    output: VarRef,
    elements: Vec<VarRef>,
    core: ConstraintCore,
    obsolete: bool,
}

impl MaxConstraint {
    pub fn new(output: VarRef, elements: Vec<VarRef>) -> MaxConstraint {
        assert!(elements.len() >= 2, "max over fewer than two elements");
        let num_cases = elements.len() as u32;
        MaxConstraint {
            output,
            elements,
            core: ConstraintCore::new(num_cases),
            obsolete: false,
        }
    }

    pub fn output(&self) -> VarRef {
        self.output
    }

    pub fn elements(&self) -> &[VarRef] {
        &self.elements
    }

    fn element(&self, phase: PhaseStatus) -> VarRef {
        let index = phase.case_index() as usize;
        debug_assert!(index >= 1 && index <= self.elements.len(), "{phase:?}");
        self.elements[index - 1]
    }

    /// The largest known lower bound over the output and the elements: the
    /// value any selected element must be able to reach.
    fn attainability_threshold(&self) -> Option<f64> {
        let candidates = std::iter::once(self.output)
            .chain(self.elements.iter().copied())
            .filter_map(|v| self.core.lower_bound_of(v));
        candidates.fold(None, |acc, lb| Some(acc.map_or(lb, |a: f64| a.max(lb))))
    }

    /// Pins the phase when the bounds leave exactly one element able to
    /// reach the maximum.
    fn fix_phase_if_forced(&mut self, ctx: &mut Context) {
        if !self.core.is_initialized() || self.core.phase(ctx).is_fixed() {
            return;
        }
        let Some(threshold) = self.attainability_threshold() else {
            return;
        };
        let attainable = |v: VarRef| match self.core.upper_bound_of(v) {
            Some(ub) => ub >= threshold - float::EPSILON,
            None => true,
        };
        let mut attainable_elements = self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, v)| attainable(**v));
        match (attainable_elements.next(), attainable_elements.next()) {
            (Some((index, _)), None) => {
                self.core.set_phase(ctx, PhaseStatus::case(index as u32 + 1));
            }
            _ => (),
        }
    }
}

impl PiecewiseLinearConstraint for MaxConstraint {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Max
    }

    fn core(&self) -> &ConstraintCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConstraintCore {
        &mut self.core
    }

    fn participating_variables(&self) -> Vec<VarRef> {
        std::iter::once(self.output)
            .chain(self.elements.iter().copied())
            .collect()
    }

    fn participates(&self, var: VarRef) -> bool {
        var == self.output || self.elements.contains(&var)
    }

    fn all_cases(&self) -> Vec<PhaseStatus> {
        (1..=self.elements.len() as u32).map(PhaseStatus::case).collect()
    }

    fn case_split(&self, phase: PhaseStatus) -> CaseSplit {
        let element = self.element(phase);
        let mut split = CaseSplit::new(phase);
        split.add_equation(LinearEquation::difference(self.output, element));
        split
    }

    fn satisfied(&self) -> bool {
        let Some(output_value) = self.core.value_of(self.output) else {
            return false;
        };
        let values: Option<Vec<f64>> = self.elements.iter().map(|v| self.core.value_of(*v)).collect();
        match values {
            Some(values) => {
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                float::are_equal(output_value, max)
            }
            None => false,
        }
    }

    fn possible_fixes(&self) -> Vec<Fix> {
        let values: Option<Vec<(VarRef, f64)>> = self
            .elements
            .iter()
            .map(|v| self.core.value_of(*v).map(|x| (*v, x)))
            .collect();
        let (Some(values), Some(output_value)) = (values, self.core.value_of(self.output)) else {
            return Vec::new();
        };
        let (argmax, max) = values
            .iter()
            .copied()
            .reduce(|a, b| if b.1 > a.1 { b } else { a })
            .expect("max constraint with no elements");
        // either move the output onto the maximum, or pull the largest
        // element up to the output
        vec![Fix::new(self.output, max), Fix::new(argmax, output_value)]
    }

    fn smart_fixes(&self, tableau: &dyn Tableau) -> Vec<Fix> {
        let (argmax, max) = self
            .elements
            .iter()
            .map(|v| (*v, tableau.value(*v)))
            .reduce(|a, b| if b.1 > a.1 { b } else { a })
            .expect("max constraint with no elements");
        vec![
            Fix::new(self.output, max),
            Fix::new(argmax, tableau.value(self.output)),
        ]
    }

    fn entailed_tightenings(&self, out: &mut Vec<Tightening>) {
        let source = TighteningSource::ComputedByConstraint;
        // every element is dominated by the output
        if let Some(output_ub) = self.core.upper_bound_of(self.output) {
            for element in &self.elements {
                out.push(Tightening::upper(*element, output_ub).with_source(source));
            }
        }
        // the output dominates every element
        for element in &self.elements {
            if let Some(lb) = self.core.lower_bound_of(*element) {
                out.push(Tightening::lower(self.output, lb).with_source(source));
            }
        }
        // the output cannot exceed the largest element upper bound
        let element_ubs: Option<Vec<f64>> = self
            .elements
            .iter()
            .map(|v| self.core.upper_bound_of(*v))
            .collect();
        if let Some(ubs) = element_ubs {
            let max_ub = ubs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            out.push(Tightening::upper(self.output, max_ub).with_source(source));
        }
    }

    fn eliminate_variable(&mut self, var: VarRef, _fixed_value: f64) {
        debug_assert!(
            !self.core.is_initialized(),
            "variable elimination after registration"
        );
        if var == self.output {
            self.obsolete = true;
            return;
        }
        if self.elements.contains(&var) {
            self.elements.retain(|v| *v != var);
            self.core.set_num_cases(self.elements.len() as u32);
            if self.elements.len() < 2 {
                // degenerated to an equality; the preprocessor replaces it
                self.obsolete = true;
            }
        }
    }

    fn update_variable_index(&mut self, old: VarRef, new: VarRef) {
        if self.output == old {
            self.output = new;
        }
        for v in self.elements.iter_mut() {
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

impl std::fmt::Debug for MaxConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} = max({:?})",
            self.output,
            self.elements.iter().format(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max3() -> (MaxConstraint, VarRef, Vec<VarRef>) {
        let y = VarRef::from_u32(0);
        let xs: Vec<VarRef> = (1..=3).map(VarRef::from_u32).collect();
        (MaxConstraint::new(y, xs.clone()), y, xs)
    }

    #[test]
    fn test_cases_are_indices() {
        let (m, _, xs) = max3();
        assert_eq!(m.num_cases(), 3);
        assert_eq!(
            m.all_cases(),
            vec![PhaseStatus::case(1), PhaseStatus::case(2), PhaseStatus::case(3)]
        );
        let split = m.case_split(PhaseStatus::case(2));
        assert_eq!(split.equations()[0].addends[1].1, xs[1]);
        assert!(split.bound_tightenings().is_empty());
    }

    #[test]
    fn test_satisfaction() {
        let (mut m, y, xs) = max3();
        m.notify_variable_value(y, 4.0);
        for (v, val) in xs.iter().zip([1.0, 4.0, -2.0]) {
            m.notify_variable_value(*v, val);
        }
        assert!(m.satisfied());
        m.notify_variable_value(y, 5.0);
        assert!(!m.satisfied());
        let fixes = m.possible_fixes();
        assert_eq!(fixes[0], Fix::new(y, 4.0));
        assert_eq!(fixes[1], Fix::new(xs[1], 5.0));
    }

    #[test]
    fn test_phase_forced_by_bounds() {
        let (mut m, y, xs) = max3();
        let mut ctx = Context::new();
        m.core_mut().initialize_cdos(&mut ctx);

        m.notify_lower_bound(&mut ctx, y, 10.0);
        assert!(!m.phase_fixed(&ctx));

        // only x2 can still reach the output's lower bound
        m.notify_upper_bound(&mut ctx, xs[0], 5.0);
        m.notify_upper_bound(&mut ctx, xs[2], 9.0);
        assert!(m.phase_fixed(&ctx));
        assert_eq!(m.core().phase(&ctx), PhaseStatus::case(2));
    }

    #[test]
    fn test_entailed_tightenings() {
        let (mut m, y, xs) = max3();
        let mut ctx = Context::new();
        m.core_mut().initialize_cdos(&mut ctx);
        m.notify_upper_bound(&mut ctx, y, 7.0);
        m.notify_lower_bound(&mut ctx, xs[0], 3.0);

        let mut out = Vec::new();
        m.entailed_tightenings(&mut out);
        use crate::core::BoundKind;
        assert!(out
            .iter()
            .any(|t| t.var == xs[1] && t.kind == BoundKind::Upper && t.value == 7.0));
        assert!(out
            .iter()
            .any(|t| t.var == y && t.kind == BoundKind::Lower && t.value == 3.0));
    }

    #[test]
    fn test_element_elimination() {
        let (mut m, _, xs) = max3();
        m.eliminate_variable(xs[0], 0.0);
        assert_eq!(m.num_cases(), 2);
        assert!(!m.obsolete());
        m.eliminate_variable(xs[1], 0.0);
        assert!(m.obsolete());
    }
}
