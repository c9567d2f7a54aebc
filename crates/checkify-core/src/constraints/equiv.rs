//! Union-find over constraint variables with deterministic leaders
//!
//! Equality constraints merge variables into equivalence classes. The
//! leader of a class is always its lowest `VarId`, so dumps and rewrites
//! are reproducible across runs regardless of merge order.

use super::vars::VarId;

#[derive(Debug, Clone, Default)]
pub struct EquivClasses {
    parent: Vec<u32>,
    /// Members per leader; empty for non-leaders.
    members: Vec<Vec<VarId>>,
}

impl EquivClasses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next variable as a singleton class. Must be called in
    /// id order as variables are created.
    pub fn push(&mut self, id: VarId) {
        debug_assert_eq!(id.index(), self.parent.len());
        self.parent.push(id.0);
        self.members.push(vec![id]);
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Leader of the class containing `v`, with path compression.
    pub fn leader(&mut self, v: VarId) -> VarId {
        let mut root = v.0;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        // Compress the chain.
        let mut cur = v.0;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        VarId(root)
    }

    /// Leader without mutation, for read-only views of a solved store.
    pub fn leader_of(&self, v: VarId) -> VarId {
        let mut root = v.0;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        VarId(root)
    }

    /// Merge the classes of `a` and `b`; the surviving leader is the lower
    /// id. Returns the leader of the merged class.
    pub fn union(&mut self, a: VarId, b: VarId) -> VarId {
        let la = self.leader(a);
        let lb = self.leader(b);
        if la == lb {
            return la;
        }
        let (keep, absorb) = if la < lb { (la, lb) } else { (lb, la) };
        self.parent[absorb.index()] = keep.0;
        let moved = std::mem::take(&mut self.members[absorb.index()]);
        self.members[keep.index()].extend(moved);
        keep
    }

    pub fn same_class(&mut self, a: VarId, b: VarId) -> bool {
        self.leader(a) == self.leader(b)
    }

    /// Members of the class containing `v`.
    pub fn class_members(&self, v: VarId) -> &[VarId] {
        &self.members[self.leader_of(v).index()]
    }

    /// All (leader, members) pairs.
    pub fn classes(&self) -> impl Iterator<Item = (VarId, &[VarId])> {
        self.members
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_empty())
            .map(|(i, m)| (VarId(i as u32), m.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_vars(n: u32) -> EquivClasses {
        let mut eq = EquivClasses::new();
        for i in 0..n {
            eq.push(VarId(i));
        }
        eq
    }

    #[test]
    fn test_union_keeps_lowest_leader() {
        let mut eq = with_vars(4);
        assert_eq!(eq.union(VarId(3), VarId(1)), VarId(1));
        assert_eq!(eq.union(VarId(1), VarId(0)), VarId(0));
        assert_eq!(eq.leader(VarId(3)), VarId(0));
        assert_eq!(eq.leader(VarId(2)), VarId(2));
    }

    #[test]
    fn test_class_members_accumulate() {
        let mut eq = with_vars(5);
        eq.union(VarId(4), VarId(2));
        eq.union(VarId(2), VarId(0));
        let mut members: Vec<u32> = eq.class_members(VarId(4)).iter().map(|v| v.0).collect();
        members.sort_unstable();
        assert_eq!(members, vec![0, 2, 4]);
    }

    #[test]
    fn test_union_idempotent() {
        let mut eq = with_vars(2);
        eq.union(VarId(0), VarId(1));
        eq.union(VarId(0), VarId(1));
        assert_eq!(eq.class_members(VarId(1)).len(), 2);
    }
}
