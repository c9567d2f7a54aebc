//! Constraint variables: one inference variable per pointer-typed site

use crate::hir::{RewriteSite, SourceLoc};
use super::lattice::Qualifier;
use serde::{Deserialize, Serialize};

/// Stable index of a constraint variable in the store's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Syntactic kind of the site a variable stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Declaration,
    Parameter,
    Return,
    Field,
    Temporary,
}

/// One pointer-typed program site under inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintVariable {
    pub id: VarId,
    /// Display name: `var`, `fn.param`, `fn.return`, `struct.field`.
    pub name: String,
    pub kind: VarKind,
    pub loc: SourceLoc,
    /// Part of a public interface; the rewriter treats such sites
    /// conservatively absent corroborating evidence, and the store unifies
    /// them across translation units.
    pub externally_visible: bool,
    /// A declared floor ("itype") already present on the site.
    pub annotation: Option<Qualifier>,
    /// Where the declaration can be respelled, when known. A symbol
    /// declared more than once in a unit carries one site per spelling.
    #[serde(skip)]
    pub sites: Vec<RewriteSite>,
}

impl ConstraintVariable {
    pub fn new(id: VarId, name: impl Into<String>, kind: VarKind, loc: SourceLoc) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            loc,
            externally_visible: false,
            annotation: None,
            sites: Vec::new(),
        }
    }

    pub fn externally_visible(mut self) -> Self {
        self.externally_visible = true;
        self
    }

    pub fn with_annotation(mut self, floor: Qualifier) -> Self {
        self.annotation = Some(floor);
        self
    }

    pub fn with_site(mut self, site: RewriteSite) -> Self {
        self.sites.push(site);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_id_display() {
        assert_eq!(VarId(7).to_string(), "q7");
    }

    #[test]
    fn test_builder_flags() {
        let v = ConstraintVariable::new(
            VarId(0),
            "strtab.name",
            VarKind::Field,
            SourceLoc::new("a.c", 3, 5),
        )
        .externally_visible()
        .with_annotation(Qualifier::NtArr);
        assert!(v.externally_visible);
        assert_eq!(v.annotation, Some(Qualifier::NtArr));
        assert!(v.sites.is_empty());
    }
}
