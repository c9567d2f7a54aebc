//! Solution verification
//!
//! Independent re-checks of the solver's postconditions. The solver is
//! trusted to be monotone; this module confirms it on concrete runs so a
//! regression shows up as a named violation instead of a bad rewrite.

use checkify_core::constraints::is_fixpoint;
use checkify_core::prelude::{Qualifier, SolvedStore};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Two members of one equivalence class solved to different levels.
    ClassNotUniform { leader: String, member: String },
    /// An implication edge ends below its source.
    EdgeUnsatisfied { from: String, to: String },
    /// A Wild variable with no taint anywhere in its class or upstream.
    WildWithoutCause { name: String },
}

pub struct SolutionVerifier;

impl SolutionVerifier {
    /// All violations in a solved store. Empty means the solution holds.
    pub fn check(solved: &SolvedStore) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (leader, members) in solved.classes() {
            let value = solved.qualifier(leader);
            for &member in members {
                if solved.qualifier(member) != value {
                    violations.push(Violation::ClassNotUniform {
                        leader: solved.var(leader).name.clone(),
                        member: solved.var(member).name.clone(),
                    });
                }
            }
        }

        for var in solved.vars() {
            let from = solved.qualifier(var.id);
            for to in solved.outgoing(var.id) {
                if solved.qualifier(to) < from {
                    violations.push(Violation::EdgeUnsatisfied {
                        from: var.name.clone(),
                        to: solved.var(to).name.clone(),
                    });
                }
            }
        }

        for var in solved.vars() {
            if solved.qualifier(var.id) == Qualifier::Wild && !has_cause(solved, var.id) {
                violations.push(Violation::WildWithoutCause {
                    name: var.name.clone(),
                });
            }
        }

        if violations.is_empty() {
            debug_assert!(is_fixpoint(solved));
        } else {
            warn!(count = violations.len(), "solution verification failed");
        }
        violations
    }
}

/// Whether some taint reaches `v` through its class or implication edges.
fn has_cause(solved: &SolvedStore, v: checkify_core::prelude::VarId) -> bool {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    let mut stack = vec![v];
    while let Some(cur) = stack.pop() {
        if !seen.insert(cur) {
            continue;
        }
        for &member in solved.class_members(cur) {
            if !solved.wild_reasons(member).is_empty() {
                return true;
            }
            if !seen.contains(&member) {
                stack.push(member);
            }
            for source in solved.incoming(member) {
                if solved.qualifier(source) == Qualifier::Wild && !seen.contains(&source) {
                    stack.push(source);
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkify_core::constraints::{Constraint, ConstraintStore, Solver, VarKind, WildReason};
    use checkify_core::hir::SourceLoc;

    fn loc() -> SourceLoc {
        SourceLoc::new("test.c", 1, 1)
    }

    #[test]
    fn test_clean_solution_passes() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        store.constrain(Constraint::Equality { a, b });
        store.constrain(Constraint::Floor {
            v: a,
            level: Qualifier::Arr,
        });
        let solved = Solver::solve(store);
        assert!(SolutionVerifier::check(&solved).is_empty());
    }

    #[test]
    fn test_tainted_solution_has_causes() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        store.constrain(Constraint::Implication { from: a, to: b });
        store.constrain(Constraint::ForcedWild {
            v: a,
            reason: WildReason::BadCast,
        });
        let solved = Solver::solve(store);
        assert!(SolutionVerifier::check(&solved).is_empty());
    }
}
