//! Pointer-qualifier lattice
//!
//! Implements the four-point qualifier domain ordered safe-to-unsafe:
//! - `Ptr` (⊥) = safe pointer to a single object
//! - `Arr` = safe pointer into a bounded array
//! - `NtArr` = safe pointer into a null-terminated array
//! - `Wild` (⊤) = unconvertible/unsafe, absorbing under join

use serde::{Deserialize, Serialize};

/// A pointer qualifier. The derived `Ord` is the lattice order; solving
/// only ever moves values upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Qualifier {
    /// Safe single-object pointer, `_Ptr<T>`.
    Ptr,
    /// Safe bounded-array pointer, `_Array_ptr<T>`.
    Arr,
    /// Safe null-terminated-array pointer, `_Nt_array_ptr<T>`.
    NtArr,
    /// Unconvertible; left with its original spelling.
    Wild,
}

impl Qualifier {
    /// Join operation (least upper bound). Wild absorbs everything.
    pub fn join(self, other: Qualifier) -> Qualifier {
        self.max(other)
    }

    /// Meet operation (greatest lower bound).
    pub fn meet(self, other: Qualifier) -> Qualifier {
        self.min(other)
    }

    /// Whether this qualifier has a checked spelling at all.
    pub fn is_checked(self) -> bool {
        !matches!(self, Qualifier::Wild)
    }

    /// The Checked C spelling for a pointee type, e.g.
    /// `Qualifier::Arr.checked_spelling("int")` is `_Array_ptr<int>`.
    /// Wild has no spelling.
    pub fn checked_spelling(self, pointee: &str) -> Option<String> {
        let keyword = match self {
            Qualifier::Ptr => "_Ptr",
            Qualifier::Arr => "_Array_ptr",
            Qualifier::NtArr => "_Nt_array_ptr",
            Qualifier::Wild => return None,
        };
        Some(format!("{keyword}<{}>", pointee.trim_end()))
    }

    /// All levels, bottom to top. Used by reports and tests.
    pub fn all() -> [Qualifier; 4] {
        [Qualifier::Ptr, Qualifier::Arr, Qualifier::NtArr, Qualifier::Wild]
    }
}

impl Default for Qualifier {
    /// A variable that never participates in any constraint stays at the
    /// safest level.
    fn default() -> Self {
        Qualifier::Ptr
    }
}

impl std::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Qualifier::Ptr => "ptr",
            Qualifier::Arr => "arr",
            Qualifier::NtArr => "ntarr",
            Qualifier::Wild => "wild",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_join_wild_absorbs() {
        for q in Qualifier::all() {
            assert_eq!(q.join(Qualifier::Wild), Qualifier::Wild);
            assert_eq!(Qualifier::Wild.join(q), Qualifier::Wild);
        }
    }

    #[test]
    fn test_join_ptr_is_identity() {
        for q in Qualifier::all() {
            assert_eq!(q.join(Qualifier::Ptr), q);
            assert_eq!(Qualifier::Ptr.join(q), q);
        }
    }

    #[test]
    fn test_order_safe_to_unsafe() {
        assert!(Qualifier::Ptr < Qualifier::Arr);
        assert!(Qualifier::Arr < Qualifier::NtArr);
        assert!(Qualifier::NtArr < Qualifier::Wild);
    }

    #[test]
    fn test_checked_spellings() {
        assert_eq!(
            Qualifier::Ptr.checked_spelling("int"),
            Some("_Ptr<int>".to_string())
        );
        assert_eq!(
            Qualifier::Arr.checked_spelling("struct node "),
            Some("_Array_ptr<struct node>".to_string())
        );
        assert_eq!(
            Qualifier::NtArr.checked_spelling("char"),
            Some("_Nt_array_ptr<char>".to_string())
        );
        assert_eq!(Qualifier::Wild.checked_spelling("int"), None);
    }

    fn any_qualifier() -> impl Strategy<Value = Qualifier> {
        prop::sample::select(Qualifier::all().to_vec())
    }

    proptest! {
        #[test]
        fn prop_join_commutative(a in any_qualifier(), b in any_qualifier()) {
            prop_assert_eq!(a.join(b), b.join(a));
        }

        #[test]
        fn prop_join_associative(
            a in any_qualifier(),
            b in any_qualifier(),
            c in any_qualifier()
        ) {
            prop_assert_eq!(a.join(b).join(c), a.join(b.join(c)));
        }

        #[test]
        fn prop_join_idempotent(a in any_qualifier()) {
            prop_assert_eq!(a.join(a), a);
        }

        #[test]
        fn prop_meet_dual(a in any_qualifier(), b in any_qualifier()) {
            prop_assert!(a.meet(b) <= a.join(b));
        }
    }
}
