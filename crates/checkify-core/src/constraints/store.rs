//! Global constraint store
//!
//! The store is created once per run, populated incrementally by every
//! translation unit's generator pass, solved exactly once, and read-only
//! afterwards. The read-only stage is enforced by construction: the solver
//! consumes the `ConstraintStore` and returns a [`SolvedStore`] that only
//! exposes accessors.

use super::equiv::EquivClasses;
use super::lattice::Qualifier;
use super::vars::{ConstraintVariable, VarId, VarKind};
use crate::hir::SourceLoc;
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Why a variable was pinned to Wild. Carried through solving so the
/// diagnostics layer can attribute every Wild site to its root causes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum WildReason {
    /// Argument of an externally-unmodeled function.
    UnknownExternArg { callee: String },
    /// Pointer passed into a variadic tail under the conservative policy.
    VariadicArg { callee: String },
    /// Cast between incompatible pointer types.
    BadCast,
    /// Address of a non-array object later indexed or offset.
    AddressOfIndexed,
    /// Function pointers are not modeled.
    FunctionPointer,
    /// Multi-level pointers are not modeled.
    PointerToPointer,
    /// Pointer member of a union.
    UnionMember,
    /// An AST shape the generator could not classify.
    UnmodeledPattern { what: String },
    /// Interface-propagation disabled: annotated boundary acts one-way.
    PolicyBoundary { callee: String },
}

impl std::fmt::Display for WildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WildReason::UnknownExternArg { callee } => {
                write!(f, "argument of externally-unmodeled function `{callee}`")
            }
            WildReason::VariadicArg { callee } => {
                write!(f, "pointer argument in variadic call to `{callee}`")
            }
            WildReason::BadCast => write!(f, "incompatible pointer cast"),
            WildReason::AddressOfIndexed => {
                write!(f, "address of a non-array object used with indexing")
            }
            WildReason::FunctionPointer => write!(f, "function pointer"),
            WildReason::PointerToPointer => write!(f, "multi-level pointer"),
            WildReason::UnionMember => write!(f, "pointer member of a union"),
            WildReason::UnmodeledPattern { what } => write!(f, "unmodeled pattern: {what}"),
            WildReason::PolicyBoundary { callee } => {
                write!(f, "interface boundary of annotated function `{callee}`")
            }
        }
    }
}

/// A typing constraint over qualifier variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Both sides end with identical value; realized by union-find merge.
    Equality { a: VarId, b: VarId },
    /// `value(to) >= value(from)` at fixpoint; realized as an edge.
    Implication { from: VarId, to: VarId },
    /// `value(v) >= level`; used for annotations and usage demands.
    Floor { v: VarId, level: Qualifier },
    /// Unconditional taint.
    ForcedWild { v: VarId, reason: WildReason },
}

/// The whole-program constraint state.
#[derive(Debug, Default)]
pub struct ConstraintStore {
    vars: Vec<ConstraintVariable>,
    values: Vec<Qualifier>,
    equiv: EquivClasses,
    edges: DiGraph<VarId, ()>,
    constraints: Vec<Constraint>,
    /// Seeded minimums, the solver's initial worklist.
    seeds: Vec<(VarId, Qualifier)>,
    wild_reasons: IndexMap<VarId, Vec<WildReason>>,
    /// External symbols shared across translation units.
    extern_symbols: IndexMap<String, VarId>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh variable. Ids are dense and allocated in order, so
    /// they double as arena and graph indices.
    pub fn add_var(&mut self, name: impl Into<String>, kind: VarKind, loc: SourceLoc) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(ConstraintVariable::new(id, name, kind, loc));
        self.values.push(Qualifier::default());
        self.equiv.push(id);
        let node = self.edges.add_node(id);
        debug_assert_eq!(node.index(), id.index());
        id
    }

    pub fn var(&self, v: VarId) -> &ConstraintVariable {
        &self.vars[v.index()]
    }

    pub fn var_mut(&mut self, v: VarId) -> &mut ConstraintVariable {
        &mut self.vars[v.index()]
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn vars(&self) -> impl Iterator<Item = &ConstraintVariable> {
        self.vars.iter()
    }

    pub fn value(&self, v: VarId) -> Qualifier {
        self.values[v.index()]
    }

    /// Raise a value, never lowering it. Returns true when it changed.
    pub(crate) fn raise(&mut self, v: VarId, to: Qualifier) -> bool {
        let slot = &mut self.values[v.index()];
        if to > *slot {
            trace!(var = %v, from = %slot, to = %to, "raise");
            *slot = to;
            true
        } else {
            false
        }
    }

    /// Record and apply a constraint.
    pub fn constrain(&mut self, constraint: Constraint) {
        match &constraint {
            Constraint::Equality { a, b } => {
                let (a, b) = (*a, *b);
                let joined = self.value(a).join(self.value(b));
                let leader = self.equiv.union(a, b);
                // A leader raised here must re-enter the worklist, or its
                // outgoing implication edges would never fire.
                if self.raise(leader, joined) {
                    self.seeds.push((leader, joined));
                }
            }
            Constraint::Implication { from, to } => {
                self.edges.add_edge(
                    NodeIndex::new(from.index()),
                    NodeIndex::new(to.index()),
                    (),
                );
            }
            Constraint::Floor { v, level } => {
                let (v, level) = (*v, *level);
                self.raise(v, level);
                self.seeds.push((v, level));
            }
            Constraint::ForcedWild { v, reason } => {
                let v = *v;
                self.raise(v, Qualifier::Wild);
                self.seeds.push((v, Qualifier::Wild));
                let reasons = self.wild_reasons.entry(v).or_default();
                // Repeat declarations re-taint the same site; keep one entry.
                if !reasons.contains(reason) {
                    reasons.push(reason.clone());
                }
            }
        }
        self.constraints.push(constraint);
    }

    /// Bind an external symbol slot. The first binding registers the
    /// variable; later bindings from other translation units are unified
    /// into the same class, so conflicting declarations simply merge and
    /// the conservative outcome wins through propagation.
    pub fn bind_extern(&mut self, symbol: impl Into<String>, v: VarId) -> VarId {
        let symbol = symbol.into();
        if let Some(&existing) = self.extern_symbols.get(&symbol) {
            self.constrain(Constraint::Equality { a: existing, b: v });
            existing
        } else {
            self.extern_symbols.insert(symbol, v);
            v
        }
    }

    pub fn extern_binding(&self, symbol: &str) -> Option<VarId> {
        self.extern_symbols.get(symbol).copied()
    }

    pub fn leader(&self, v: VarId) -> VarId {
        self.equiv.leader_of(v)
    }

    pub fn class_members(&self, v: VarId) -> &[VarId] {
        self.equiv.class_members(v)
    }

    pub fn classes(&self) -> impl Iterator<Item = (VarId, &[VarId])> {
        self.equiv.classes()
    }

    pub fn outgoing(&self, v: VarId) -> impl Iterator<Item = VarId> + '_ {
        self.edges
            .neighbors_directed(NodeIndex::new(v.index()), Direction::Outgoing)
            .map(|n| self.edges[n])
    }

    pub fn incoming(&self, v: VarId) -> impl Iterator<Item = VarId> + '_ {
        self.edges
            .neighbors_directed(NodeIndex::new(v.index()), Direction::Incoming)
            .map(|n| self.edges[n])
    }

    pub fn edge_count(&self) -> usize {
        self.edges.edge_count()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub(crate) fn seeds(&self) -> &[(VarId, Qualifier)] {
        &self.seeds
    }

    pub fn wild_reasons(&self, v: VarId) -> &[WildReason] {
        self.wild_reasons.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Variables carrying a direct taint, with their reasons.
    pub fn tainted_vars(&self) -> impl Iterator<Item = (VarId, &[WildReason])> {
        self.wild_reasons.iter().map(|(v, r)| (*v, r.as_slice()))
    }
}

/// The store after the single solve, read-only by construction.
#[derive(Debug)]
pub struct SolvedStore {
    store: ConstraintStore,
    iterations: usize,
}

impl SolvedStore {
    pub(crate) fn new(store: ConstraintStore, iterations: usize) -> Self {
        Self { store, iterations }
    }

    /// The final qualifier for a variable.
    pub fn qualifier(&self, v: VarId) -> Qualifier {
        self.store.value(v)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn var(&self, v: VarId) -> &ConstraintVariable {
        self.store.var(v)
    }

    pub fn vars(&self) -> impl Iterator<Item = &ConstraintVariable> {
        self.store.vars()
    }

    pub fn leader(&self, v: VarId) -> VarId {
        self.store.leader(v)
    }

    pub fn class_members(&self, v: VarId) -> &[VarId] {
        self.store.class_members(v)
    }

    pub fn classes(&self) -> impl Iterator<Item = (VarId, &[VarId])> {
        self.store.classes()
    }

    pub fn outgoing(&self, v: VarId) -> impl Iterator<Item = VarId> + '_ {
        self.store.outgoing(v)
    }

    pub fn incoming(&self, v: VarId) -> impl Iterator<Item = VarId> + '_ {
        self.store.incoming(v)
    }

    pub fn constraints(&self) -> &[Constraint] {
        self.store.constraints()
    }

    pub fn wild_reasons(&self, v: VarId) -> &[WildReason] {
        self.store.wild_reasons(v)
    }

    pub fn tainted_vars(&self) -> impl Iterator<Item = (VarId, &[WildReason])> {
        self.store.tainted_vars()
    }

    /// Hand the store back to the solver for idempotence checks in tests.
    #[cfg(test)]
    pub(crate) fn into_inner(self) -> ConstraintStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc::new("test.c", 1, 1)
    }

    #[test]
    fn test_fresh_vars_default_to_ptr() {
        let mut store = ConstraintStore::new();
        let v = store.add_var("p", VarKind::Declaration, loc());
        assert_eq!(store.value(v), Qualifier::Ptr);
    }

    #[test]
    fn test_equality_joins_values() {
        let mut store = ConstraintStore::new();
        let a = store.add_var("a", VarKind::Declaration, loc());
        let b = store.add_var("b", VarKind::Declaration, loc());
        store.constrain(Constraint::Floor {
            v: b,
            level: Qualifier::Arr,
        });
        store.constrain(Constraint::Equality { a, b });
        assert_eq!(store.leader(b), a);
        assert_eq!(store.value(a), Qualifier::Arr);
    }

    #[test]
    fn test_forced_wild_records_reason() {
        let mut store = ConstraintStore::new();
        let v = store.add_var("r", VarKind::Declaration, loc());
        store.constrain(Constraint::ForcedWild {
            v,
            reason: WildReason::UnknownExternArg {
                callee: "mystery".into(),
            },
        });
        assert_eq!(store.value(v), Qualifier::Wild);
        assert_eq!(store.wild_reasons(v).len(), 1);
    }

    #[test]
    fn test_extern_binding_unifies_across_units() {
        let mut store = ConstraintStore::new();
        let first = store.add_var("g", VarKind::Declaration, loc());
        let second = store.add_var("g", VarKind::Declaration, loc());
        assert_eq!(store.bind_extern("g", first), first);
        assert_eq!(store.bind_extern("g", second), first);
        assert_eq!(store.leader(second), first);
    }

    #[test]
    fn test_raise_never_lowers() {
        let mut store = ConstraintStore::new();
        let v = store.add_var("p", VarKind::Declaration, loc());
        assert!(store.raise(v, Qualifier::NtArr));
        assert!(!store.raise(v, Qualifier::Arr));
        assert_eq!(store.value(v), Qualifier::NtArr);
    }
}
