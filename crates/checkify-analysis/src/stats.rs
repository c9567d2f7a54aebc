//! Per-level solution statistics
//!
//! Counts how many pointer variables landed on each lattice point, overall
//! and per source file, in the shape the stats output file carries.

use checkify_core::prelude::{Qualifier, SolvedStore};
use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LevelCounts {
    pub ptr: usize,
    pub arr: usize,
    pub ntarr: usize,
    pub wild: usize,
}

impl LevelCounts {
    fn bump(&mut self, q: Qualifier) {
        match q {
            Qualifier::Ptr => self.ptr += 1,
            Qualifier::Arr => self.arr += 1,
            Qualifier::NtArr => self.ntarr += 1,
            Qualifier::Wild => self.wild += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ptr + self.arr + self.ntarr + self.wild
    }

    pub fn checked(&self) -> usize {
        self.ptr + self.arr + self.ntarr
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QualifierStats {
    pub totals: LevelCounts,
    pub per_file: IndexMap<String, LevelCounts>,
}

impl QualifierStats {
    pub fn collect(solved: &SolvedStore) -> Self {
        let mut stats = QualifierStats::default();
        for var in solved.vars() {
            let q = solved.qualifier(var.id);
            stats.totals.bump(q);
            stats.per_file.entry(var.loc.file.clone()).or_default().bump(q);
        }
        stats
    }

    /// Share of pointer variables that solved to a checked level.
    pub fn checked_ratio(&self) -> f64 {
        let total = self.totals.total();
        if total == 0 {
            return 1.0;
        }
        self.totals.checked() as f64 / total as f64
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkify_core::constraints::{Constraint, ConstraintStore, Solver, WildReason};
    use checkify_core::constraints::VarKind;
    use checkify_core::hir::SourceLoc;

    fn solved_fixture() -> SolvedStore {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, SourceLoc::new("a.c", 1, 1));
        let b = store.add_var("b", VarKind::Declaration, SourceLoc::new("a.c", 2, 1));
        let _c = store.add_var("c", VarKind::Declaration, SourceLoc::new("b.c", 1, 1));
        store.constrain(Constraint::Floor {
            v: a,
            level: Qualifier::Arr,
        });
        store.constrain(Constraint::ForcedWild {
            v: b,
            reason: WildReason::BadCast,
        });
        Solver::solve(store)
    }

    #[test]
    fn test_totals_and_per_file() {
        let stats = QualifierStats::collect(&solved_fixture());
        assert_eq!(stats.totals.total(), 3);
        assert_eq!(stats.totals.arr, 1);
        assert_eq!(stats.totals.wild, 1);
        assert_eq!(stats.totals.ptr, 1);
        assert_eq!(stats.per_file["a.c"].wild, 1);
        assert_eq!(stats.per_file["b.c"].ptr, 1);
    }

    #[test]
    fn test_checked_ratio() {
        let stats = QualifierStats::collect(&solved_fixture());
        let ratio = stats.checked_ratio();
        assert!((ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_store_ratio_is_one() {
        let solved = Solver::solve(ConstraintStore::new());
        assert_eq!(QualifierStats::collect(&solved).checked_ratio(), 1.0);
    }

    #[test]
    fn test_json_shape() {
        let stats = QualifierStats::collect(&solved_fixture());
        let value: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(value["totals"]["wild"], 1);
    }
}
