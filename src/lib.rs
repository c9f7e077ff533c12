//! Search-control core for a solver of piecewise-linear constraints embedded
//! in a linear-arithmetic theory.
//!
//! The crate drives a case-splitting search: it detects when the underlying
//! numerical engine is stuck, selects a piecewise-linear constraint whose
//! phase to split on, records the decision on a trail and backtracks to the
//! remaining cases when a subtree fails. All search-sensitive state (variable
//! bounds, constraint flags, the trail itself) is context-dependent: it is
//! journaled on write and rewound in lock-step when a decision level is
//! popped.
//!
//! The main entry point is [`solver::SmtCore`]; the numerical engine and its
//! tableau are external collaborators accessed through the [`solver::Engine`]
//! and [`core::Tableau`] traits.

pub mod backtrack;
pub mod collections;
pub mod constraints;
pub mod context;
pub mod core;
pub mod solver;

pub use crate::context::Context;
pub use crate::core::bounds::BoundManager;
pub use crate::core::{CaseSplit, PhaseStatus, Tightening, VarRef};
pub use crate::solver::smt_core::SmtCore;
pub use crate::solver::{Engine, SmtError};
