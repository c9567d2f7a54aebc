//! Constraint-based qualifier inference
//!
//! This module implements the whole-program inference core:
//! - Four-point qualifier lattice (Ptr < Arr < NtArr < Wild)
//! - One constraint variable per pointer-typed site
//! - Union-find equivalence classes with deterministic leaders
//! - Global constraint store shared across translation units
//! - Worklist-based fixpoint solver

mod equiv;
mod lattice;
mod solver;
mod store;
mod vars;

pub use equiv::EquivClasses;
pub use lattice::Qualifier;
pub use solver::{is_fixpoint, Solver};
pub use store::{Constraint, ConstraintStore, SolvedStore, WildReason};
pub use vars::{ConstraintVariable, VarId, VarKind};
