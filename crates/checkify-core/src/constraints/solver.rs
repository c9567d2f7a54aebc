//! Worklist-based fixpoint solver for the constraint store
//!
//! Seeds the worklist with every variable carrying a forced taint or a
//! declared floor, then propagates: class members are raised to the class
//! maximum and implication targets are raised to at least their source's
//! level. Terminates because the lattice has finite height and values only
//! increase; work is linear in edges times lattice height.

use super::store::{ConstraintStore, SolvedStore};
use super::vars::VarId;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Closes the store to fixpoint. Consuming the store and returning a
/// read-only [`SolvedStore`] is what makes the solve-once lifecycle a
/// compile-time fact rather than a convention.
pub struct Solver;

impl Solver {
    pub fn solve(mut store: ConstraintStore) -> SolvedStore {
        let mut worklist: VecDeque<VarId> = VecDeque::new();
        let mut in_worklist: HashSet<VarId> = HashSet::new();

        for &(v, _) in store.seeds() {
            if in_worklist.insert(v) {
                worklist.push_back(v);
            }
        }

        let mut iterations = 0usize;
        while let Some(v) = worklist.pop_front() {
            in_worklist.remove(&v);
            iterations += 1;

            let level = store.value(v);

            // Close the equivalence class: every member carries the same
            // final value, so raise all of them to the popped level.
            let members: Vec<VarId> = store.class_members(v).to_vec();
            for member in members {
                if store.raise(member, level) && in_worklist.insert(member) {
                    worklist.push_back(member);
                }
            }

            // Satisfy outgoing implication edges: value(target) >= value(v).
            let targets: Vec<VarId> = store.outgoing(v).collect();
            for target in targets {
                if store.raise(target, level) && in_worklist.insert(target) {
                    worklist.push_back(target);
                }
            }
        }

        debug!(
            vars = store.len(),
            edges = store.edge_count(),
            iterations,
            "constraint solving reached fixpoint"
        );
        SolvedStore::new(store, iterations)
    }
}

/// True when every edge and class in the store is already satisfied; the
/// solver's postcondition, re-checked by tests and the verifier.
pub fn is_fixpoint(solved: &SolvedStore) -> bool {
    let classes_ok = solved.classes().all(|(leader, members)| {
        let value = solved.qualifier(leader);
        members.iter().all(|&m| solved.qualifier(m) == value)
    });
    let edges_ok = solved.vars().all(|var| {
        let from = solved.qualifier(var.id);
        solved.outgoing(var.id).all(|to| solved.qualifier(to) >= from)
    });
    classes_ok && edges_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::store::{Constraint, WildReason};
    use crate::constraints::Qualifier;
    use crate::constraints::vars::VarKind;
    use crate::hir::SourceLoc;
    use proptest::prelude::*;

    fn loc() -> SourceLoc {
        SourceLoc::new("test.c", 1, 1)
    }

    #[test]
    fn test_unconstrained_stays_ptr() {
        let mut store = ConstraintStore::new();
        let v = store.add_var("p", VarKind::Declaration, loc());
        let solved = Solver::solve(store);
        assert_eq!(solved.qualifier(v), Qualifier::Ptr);
    }

    #[test]
    fn test_taint_spreads_through_class() {
        // t = s; with s independently forced Wild.
        let mut store = ConstraintStore::new();
        let s = store.add_var("s", VarKind::Declaration, loc());
        let t = store.add_var("t", VarKind::Declaration, loc());
        store.constrain(Constraint::Equality { a: t, b: s });
        store.constrain(Constraint::ForcedWild {
            v: s,
            reason: WildReason::BadCast,
        });
        let solved = Solver::solve(store);
        assert_eq!(solved.qualifier(s), Qualifier::Wild);
        assert_eq!(solved.qualifier(t), Qualifier::Wild);
    }

    #[test]
    fn test_implication_chain_propagates() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        let c = store.add_var("c", VarKind::Declaration, loc());
        store.constrain(Constraint::Implication { from: a, to: b });
        store.constrain(Constraint::Implication { from: b, to: c });
        store.constrain(Constraint::Floor {
            v: a,
            level: Qualifier::Arr,
        });
        let solved = Solver::solve(store);
        assert_eq!(solved.qualifier(b), Qualifier::Arr);
        assert_eq!(solved.qualifier(c), Qualifier::Arr);
        assert!(is_fixpoint(&solved));
    }

    #[test]
    fn test_implication_is_directional() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        store.constrain(Constraint::Implication { from: a, to: b });
        store.constrain(Constraint::Floor {
            v: b,
            level: Qualifier::NtArr,
        });
        let solved = Solver::solve(store);
        // Raising the target says nothing about the source.
        assert_eq!(solved.qualifier(a), Qualifier::Ptr);
        assert_eq!(solved.qualifier(b), Qualifier::NtArr);
    }

    #[test]
    fn test_cycle_terminates() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        store.constrain(Constraint::Implication { from: a, to: b });
        store.constrain(Constraint::Implication { from: b, to: a });
        store.constrain(Constraint::ForcedWild {
            v: a,
            reason: WildReason::FunctionPointer,
        });
        let solved = Solver::solve(store);
        assert_eq!(solved.qualifier(a), Qualifier::Wild);
        assert_eq!(solved.qualifier(b), Qualifier::Wild);
    }

    #[test]
    fn test_equality_join_feeds_implication_edges() {
        // Unifying a floored variable raises the class leader at constrain
        // time; the leader's own edges must still relax during solve.
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        let c = store.add_var("c", VarKind::Declaration, loc());
        store.constrain(Constraint::Floor {
            v: b,
            level: Qualifier::Arr,
        });
        store.constrain(Constraint::Equality { a, b });
        store.constrain(Constraint::Implication { from: a, to: c });
        let solved = Solver::solve(store);
        assert_eq!(solved.qualifier(a), Qualifier::Arr);
        assert_eq!(solved.qualifier(c), Qualifier::Arr);
        assert!(is_fixpoint(&solved));
    }

    #[test]
    fn test_idempotent_resolve() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        store.constrain(Constraint::Implication { from: a, to: b });
        store.constrain(Constraint::Floor {
            v: a,
            level: Qualifier::Arr,
        });
        let solved = Solver::solve(store);
        let before: Vec<Qualifier> = solved.vars().map(|v| solved.qualifier(v.id)).collect();
        let resolved = Solver::solve(solved.into_inner());
        let after: Vec<Qualifier> = resolved.vars().map(|v| resolved.qualifier(v.id)).collect();
        assert_eq!(before, after);
    }

    proptest! {
        /// Random stores always reach a state where every class is uniform
        /// and every edge satisfied, and no value sits below its seed.
        #[test]
        fn prop_solve_reaches_fixpoint(
            ops in prop::collection::vec((0u32..12, 0u32..12, 0u8..4), 0..40)
        ) {
            let mut store = ConstraintStore::new();
            for i in 0..12u32 {
                store.add_var(format!("v{i}"), VarKind::Declaration, loc());
            }
            let mut seeds: Vec<(VarId, Qualifier)> = Vec::new();
            for (a, b, kind) in ops {
                let (a, b) = (VarId(a), VarId(b));
                match kind {
                    0 => store.constrain(Constraint::Equality { a, b }),
                    1 => store.constrain(Constraint::Implication { from: a, to: b }),
                    2 => {
                        store.constrain(Constraint::Floor { v: a, level: Qualifier::Arr });
                        seeds.push((a, Qualifier::Arr));
                    }
                    _ => {
                        store.constrain(Constraint::ForcedWild {
                            v: a,
                            reason: WildReason::BadCast,
                        });
                        seeds.push((a, Qualifier::Wild));
                    }
                }
            }
            let solved = Solver::solve(store);
            prop_assert!(is_fixpoint(&solved));
            for (v, level) in seeds {
                prop_assert!(solved.qualifier(v) >= level);
            }
        }
    }
}
