pub mod bounds;

use itertools::Itertools;
use smallvec::SmallVec;

use crate::create_ref_type;

create_ref_type!(VarRef);

/// Tolerance-aware comparisons on `f64`, used wherever two quantities of the
/// relaxation are compared for equality. Bound updates use the total order
/// instead: see [`bounds::BoundManager`].
pub mod float {
    use std::cmp::Ordering;

    pub const EPSILON: f64 = 1e-6;

    pub fn are_equal(a: f64, b: f64) -> bool {
        (a - b).abs() <= EPSILON
    }

    pub fn is_positive(a: f64) -> bool {
        a > EPSILON
    }

    pub fn is_negative(a: f64) -> bool {
        a < -EPSILON
    }

    pub fn is_zero(a: f64) -> bool {
        are_equal(a, 0.0)
    }

    /// Total-order comparison; distinguishes `-0.0 < 0.0` and orders NaNs
    /// last, so callers must reject NaN inputs beforehand.
    pub fn total_gt(a: f64, b: f64) -> bool {
        a.total_cmp(&b) == Ordering::Greater
    }

    pub fn total_lt(a: f64, b: f64) -> bool {
        a.total_cmp(&b) == Ordering::Less
    }
}

/// Identifies which branch of a piecewise-linear constraint is asserted.
///
/// The value 0 is reserved for [`PhaseStatus::NOT_FIXED`]. ReLU and
/// absolute-value constraints use the named constants; max-like constraints
/// and disjunctions interpret the value as a 1-based case index.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseStatus(u32);

impl PhaseStatus {
    pub const NOT_FIXED: PhaseStatus = PhaseStatus(0);
    pub const RELU_ACTIVE: PhaseStatus = PhaseStatus(1);
    pub const RELU_INACTIVE: PhaseStatus = PhaseStatus(2);
    pub const ABS_POSITIVE: PhaseStatus = PhaseStatus(3);
    pub const ABS_NEGATIVE: PhaseStatus = PhaseStatus(4);

    /// Phase tag of the `index`-th case (1-based) of a max-like constraint.
    pub const fn case(index: u32) -> PhaseStatus {
        debug_assert!(index >= 1);
        PhaseStatus(index)
    }

    pub const fn is_fixed(self) -> bool {
        self.0 != 0
    }

    /// 1-based case index; only meaningful for max-like constraints.
    pub const fn case_index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_fixed() {
            write!(f, "phase({})", self.0)
        } else {
            write!(f, "phase(not-fixed)")
        }
    }
}

/// Which of the two bounds of a variable a tightening affects.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BoundKind {
    Lower,
    Upper,
}

/// Provenance of a bound tightening.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TighteningSource {
    /// Derived by the engine (e.g. row-based bound propagation).
    ComputedByEngine,
    /// Entailed by a piecewise-linear constraint from the current bounds.
    ComputedByConstraint,
    /// Asserted by a case split.
    Decided,
}

/// A single bound update: `var >= value` or `var <= value`.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Tightening {
    pub var: VarRef,
    pub value: f64,
    pub kind: BoundKind,
    pub source: TighteningSource,
}

impl Tightening {
    pub fn lower(var: VarRef, value: f64) -> Tightening {
        Tightening {
            var,
            value,
            kind: BoundKind::Lower,
            source: TighteningSource::Decided,
        }
    }

    pub fn upper(var: VarRef, value: f64) -> Tightening {
        Tightening {
            var,
            value,
            kind: BoundKind::Upper,
            source: TighteningSource::Decided,
        }
    }

    pub fn with_source(mut self, source: TighteningSource) -> Tightening {
        self.source = source;
        self
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EquationKind {
    Equal,
    GreaterEq,
    LessEq,
}

/// A linear equation `sum(coefficient * var) <op> scalar` asserted by a case
/// split.
#[derive(Clone, PartialEq, Debug)]
pub struct LinearEquation {
    pub addends: Vec<(f64, VarRef)>,
    pub scalar: f64,
    pub kind: EquationKind,
}

impl LinearEquation {
    pub fn new(kind: EquationKind) -> LinearEquation {
        LinearEquation {
            addends: Vec::new(),
            scalar: 0.0,
            kind,
        }
    }

    /// The equation `a - b = 0`.
    pub fn difference(a: VarRef, b: VarRef) -> LinearEquation {
        let mut eq = LinearEquation::new(EquationKind::Equal);
        eq.add_addend(1.0, a);
        eq.add_addend(-1.0, b);
        eq
    }

    /// The equation `a + b = 0`.
    pub fn sum(a: VarRef, b: VarRef) -> LinearEquation {
        let mut eq = LinearEquation::new(EquationKind::Equal);
        eq.add_addend(1.0, a);
        eq.add_addend(1.0, b);
        eq
    }

    pub fn add_addend(&mut self, coefficient: f64, var: VarRef) {
        self.addends.push((coefficient, var));
    }

    pub fn update_variable_index(&mut self, old: VarRef, new: VarRef) {
        for (_, v) in self.addends.iter_mut() {
            if *v == old {
                *v = new;
            }
        }
    }
}

/// The realisation of one case of a piecewise-linear constraint: an ordered
/// set of bound tightenings plus optional linear equations, tagged with the
/// phase the case corresponds to. Equality is structural.
#[derive(Clone, PartialEq)]
pub struct CaseSplit {
    phase: PhaseStatus,
    bound_tightenings: SmallVec<[Tightening; 4]>,
    equations: Vec<LinearEquation>,
}

impl CaseSplit {
    pub fn new(phase: PhaseStatus) -> CaseSplit {
        CaseSplit {
            phase,
            bound_tightenings: SmallVec::new(),
            equations: Vec::new(),
        }
    }

    pub fn phase(&self) -> PhaseStatus {
        self.phase
    }

    pub fn set_phase(&mut self, phase: PhaseStatus) {
        self.phase = phase;
    }

    pub fn store_bound_tightening(&mut self, tightening: Tightening) {
        self.bound_tightenings.push(tightening);
    }

    pub fn add_equation(&mut self, equation: LinearEquation) {
        self.equations.push(equation);
    }

    pub fn bound_tightenings(&self) -> &[Tightening] {
        &self.bound_tightenings
    }

    pub fn equations(&self) -> &[LinearEquation] {
        &self.equations
    }

    pub fn update_variable_index(&mut self, old: VarRef, new: VarRef) {
        for t in self.bound_tightenings.iter_mut() {
            if t.var == old {
                t.var = new;
            }
        }
        for eq in self.equations.iter_mut() {
            eq.update_variable_index(old, new);
        }
    }
}

impl std::fmt::Debug for CaseSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bounds = self.bound_tightenings.iter().map(|t| {
            let op = match t.kind {
                BoundKind::Lower => ">=",
                BoundKind::Upper => "<=",
            };
            format!("{:?} {} {}", t.var, op, t.value)
        });
        write!(f, "{:?}: [{}]", self.phase, bounds.format(", "))?;
        if !self.equations.is_empty() {
            write!(f, " + {} equation(s)", self.equations.len())?;
        }
        Ok(())
    }
}

/// A possible fix for a violated piecewise-linear constraint: a variable
/// whose value should be changed.
#[derive(Copy, Clone, Debug)]
pub struct Fix {
    pub variable: VarRef,
    pub value: f64,
}

impl Fix {
    pub fn new(variable: VarRef, value: f64) -> Fix {
        Fix { variable, value }
    }
}

impl PartialEq for Fix {
    fn eq(&self, other: &Self) -> bool {
        self.variable == other.variable && float::are_equal(self.value, other.value)
    }
}

/// Surface of the simplex tableau as seen by the bound manager and the
/// piecewise-linear constraints. Notifications fire synchronously from
/// within the bound-tightening calls.
pub trait Tableau {
    fn notify_lower_bound(&mut self, var: VarRef, bound: f64);
    fn notify_upper_bound(&mut self, var: VarRef, bound: f64);
    fn notify_variable_value(&mut self, var: VarRef, value: f64);

    /// Current assignment of the variable.
    fn value(&self, var: VarRef) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_split_equality() {
        let v = VarRef::from_u32(3);
        let w = VarRef::from_u32(4);

        let mut a = CaseSplit::new(PhaseStatus::RELU_ACTIVE);
        a.store_bound_tightening(Tightening::lower(v, 0.0));
        a.add_equation(LinearEquation::difference(w, v));

        let mut b = CaseSplit::new(PhaseStatus::RELU_ACTIVE);
        b.store_bound_tightening(Tightening::lower(v, 0.0));
        b.add_equation(LinearEquation::difference(w, v));

        assert_eq!(a, b);

        let mut c = b.clone();
        c.store_bound_tightening(Tightening::upper(w, 1.0));
        assert_ne!(a, c);
    }

    #[test]
    fn test_update_variable_index() {
        let old = VarRef::from_u32(1);
        let new = VarRef::from_u32(9);
        let other = VarRef::from_u32(2);

        let mut split = CaseSplit::new(PhaseStatus::case(1));
        split.store_bound_tightening(Tightening::upper(old, 5.0));
        split.add_equation(LinearEquation::difference(old, other));
        split.update_variable_index(old, new);

        assert_eq!(split.bound_tightenings()[0].var, new);
        assert_eq!(split.equations()[0].addends[0].1, new);
        assert_eq!(split.equations()[0].addends[1].1, other);
    }

    #[test]
    fn test_phase_status_cases() {
        assert!(!PhaseStatus::NOT_FIXED.is_fixed());
        assert!(PhaseStatus::RELU_ACTIVE.is_fixed());
        assert_eq!(PhaseStatus::case(2).case_index(), 2);
        assert_ne!(PhaseStatus::case(1), PhaseStatus::case(2));
    }
}
