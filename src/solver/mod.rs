//! The search driver and its collaborator interfaces.

pub mod config;
pub mod smt_core;
pub mod stats;

use crate::constraints::{ConstraintId, ConstraintStore};
use crate::context::Context;
use crate::core::bounds::BoundManager;
use crate::core::CaseSplit;

pub use config::{SmtConfig, SplittingHeuristic};
pub use smt_core::{SmtCore, TrailEntry};
pub use stats::Stats;

/// The numerical engine driving the relaxation, as seen by the search core.
///
/// The engine owns the tableau; the core owns the context, the bounds and
/// the constraints, and hands the engine mutable access to the bounds when a
/// split is applied.
pub trait Engine {
    /// Asserts a case's bound tightenings and equations into the relaxation.
    fn apply_split(&mut self, split: &CaseSplit, bounds: &mut BoundManager);

    /// Heuristic hook: the engine's preferred constraint to split on (by
    /// polarity, score, ...), or `None` to fall back to the core's own
    /// violation-based choice.
    fn pick_split_pl_constraint(
        &mut self,
        constraints: &ConstraintStore,
        ctx: &Context,
    ) -> Option<ConstraintId>;
}

/// Terminal failures surfaced to the outer driver.
#[derive(Debug)]
pub enum SmtError {
    /// The query was proved infeasible before the search began.
    InfeasibleQuery,
    /// The search diverged from a stored debugging witness.
    Debugging(String),
}

impl std::fmt::Display for SmtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmtError::InfeasibleQuery => write!(f, "query is infeasible"),
            SmtError::Debugging(msg) => write!(f, "diverged from the stored solution: {msg}"),
        }
    }
}

impl std::error::Error for SmtError {}
