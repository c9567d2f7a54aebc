//! Wild root-cause reporting
//!
//! Attributes every Wild variable to the taints that produced it. A
//! variable may be Wild directly (it carries reasons of its own) or
//! transitively, through its equivalence class or a chain of implication
//! edges; the walk follows both backwards to the originating taints.

use checkify_core::prelude::{Qualifier, SolvedStore, VarId, WildReason};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;

/// One Wild variable and the root causes it traces back to.
#[derive(Debug, Clone, Serialize)]
pub struct WildEntry {
    pub name: String,
    pub location: String,
    pub causes: Vec<String>,
}

/// The full report: per-variable attributions plus a frequency table of
/// causes, most damaging first.
#[derive(Debug, Clone, Serialize)]
pub struct WildReport {
    pub entries: Vec<WildEntry>,
    pub cause_counts: IndexMap<String, usize>,
}

impl WildReport {
    pub fn collect(solved: &SolvedStore) -> Self {
        let mut entries = Vec::new();
        let mut cause_counts: IndexMap<String, usize> = IndexMap::new();
        for var in solved.vars() {
            if solved.qualifier(var.id) != Qualifier::Wild {
                continue;
            }
            let causes = root_causes(solved, var.id);
            let rendered: Vec<String> = causes.iter().map(WildReason::to_string).collect();
            for cause in &rendered {
                *cause_counts.entry(cause.clone()).or_default() += 1;
            }
            entries.push(WildEntry {
                name: var.name.clone(),
                location: var.loc.to_string(),
                causes: rendered,
            });
        }
        cause_counts.sort_by(|_, a, _, b| b.cmp(a));
        WildReport {
            entries,
            cause_counts,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Taints reachable backwards from `v`: its own, its class's, and those of
/// Wild variables upstream along implication edges.
fn root_causes(solved: &SolvedStore, v: VarId) -> Vec<WildReason> {
    let mut causes = Vec::new();
    let mut seen_vars: HashSet<VarId> = HashSet::new();
    let mut stack = vec![v];
    while let Some(cur) = stack.pop() {
        if !seen_vars.insert(cur) {
            continue;
        }
        for member in solved.class_members(cur) {
            let member = *member;
            for reason in solved.wild_reasons(member) {
                if !causes.contains(reason) {
                    causes.push(reason.clone());
                }
            }
            if seen_vars.insert(member) {
                stack.push(member);
            }
            // Only a Wild source can have forced this variable Wild.
            for source in solved.incoming(member) {
                if solved.qualifier(source) == Qualifier::Wild && !seen_vars.contains(&source) {
                    stack.push(source);
                }
            }
        }
    }
    causes
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkify_core::constraints::{Constraint, ConstraintStore, Solver, VarKind};
    use checkify_core::hir::SourceLoc;

    fn loc() -> SourceLoc {
        SourceLoc::new("test.c", 1, 1)
    }

    #[test]
    fn test_direct_cause_reported() {
        let mut store = ConstraintStore::new();
        let v = store.add_var("r", VarKind::Declaration, loc());
        store.constrain(Constraint::ForcedWild {
            v,
            reason: WildReason::UnknownExternArg {
                callee: "mystery".into(),
            },
        });
        let report = WildReport::collect(&Solver::solve(store));
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].name, "r");
        assert!(report.entries[0].causes[0].contains("mystery"));
    }

    #[test]
    fn test_class_member_inherits_cause() {
        // t = s with s tainted; t's entry names s's cause.
        let mut store = ConstraintStore::new();
        let s = store.add_var("s", VarKind::Declaration, loc());
        let t = store.add_var("t", VarKind::Declaration, loc());
        store.constrain(Constraint::Equality { a: t, b: s });
        store.constrain(Constraint::ForcedWild {
            v: s,
            reason: WildReason::BadCast,
        });
        let report = WildReport::collect(&Solver::solve(store));
        let t_entry = report.entries.iter().find(|e| e.name == "t").unwrap();
        assert_eq!(t_entry.causes, vec!["incompatible pointer cast".to_string()]);
    }

    #[test]
    fn test_cause_traced_through_implication_chain() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        let c = store.add_var("c", VarKind::Declaration, loc());
        store.constrain(Constraint::Implication { from: a, to: b });
        store.constrain(Constraint::Implication { from: b, to: c });
        store.constrain(Constraint::ForcedWild {
            v: a,
            reason: WildReason::FunctionPointer,
        });
        let report = WildReport::collect(&Solver::solve(store));
        let c_entry = report.entries.iter().find(|e| e.name == "c").unwrap();
        assert_eq!(c_entry.causes, vec!["function pointer".to_string()]);
    }

    #[test]
    fn test_cause_counts_aggregate() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        for v in [a, b] {
            store.constrain(Constraint::ForcedWild {
                v,
                reason: WildReason::PointerToPointer,
            });
        }
        let report = WildReport::collect(&Solver::solve(store));
        assert_eq!(report.cause_counts["multi-level pointer"], 2);
    }

    #[test]
    fn test_checked_vars_absent() {
        let mut store = ConstraintStore::new();
        store.add_var("p", VarKind::Declaration, loc());
        let report = WildReport::collect(&Solver::solve(store));
        assert!(report.entries.is_empty());
    }
}
