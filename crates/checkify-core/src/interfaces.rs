//! Interface-propagation policy
//!
//! Governs the two soundness-affecting boundary choices: whether
//! constraints flow through functions whose interfaces already carry
//! partial annotations ("itypes"), and how variadic call sites are
//! treated. Known external interfaces come from a JSON profile plus a
//! built-in table for common libc entry points.

use crate::constraints::Qualifier;
use crate::error::CheckifyError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// A known external function interface: per-parameter and return floors,
/// plus variadic shape. `None` means the slot carries no annotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionInterface {
    #[serde(default)]
    pub params: Vec<Option<Qualifier>>,
    #[serde(default)]
    pub ret: Option<Qualifier>,
    #[serde(default)]
    pub variadic: bool,
    /// Index of the format-string parameter for printf-family functions.
    #[serde(default)]
    pub format_arg: Option<usize>,
}

/// The set of known external interfaces for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceProfile {
    #[serde(default)]
    pub functions: IndexMap<String, FunctionInterface>,
}

impl InterfaceProfile {
    /// Interfaces for the libc functions legacy C leans on. User profiles
    /// are merged on top and win on conflict.
    pub fn libc_defaults() -> Self {
        let mut functions = IndexMap::new();
        let nt = Some(Qualifier::NtArr);
        let arr = Some(Qualifier::Arr);

        functions.insert(
            "strlen".into(),
            FunctionInterface {
                params: vec![nt],
                ..Default::default()
            },
        );
        functions.insert(
            "strcpy".into(),
            FunctionInterface {
                params: vec![nt, nt],
                ret: nt,
                ..Default::default()
            },
        );
        functions.insert(
            "strcmp".into(),
            FunctionInterface {
                params: vec![nt, nt],
                ..Default::default()
            },
        );
        functions.insert(
            "strcat".into(),
            FunctionInterface {
                params: vec![nt, nt],
                ret: nt,
                ..Default::default()
            },
        );
        functions.insert(
            "strchr".into(),
            FunctionInterface {
                params: vec![nt, None],
                ret: nt,
                ..Default::default()
            },
        );
        functions.insert(
            "memcpy".into(),
            FunctionInterface {
                params: vec![arr, arr, None],
                ..Default::default()
            },
        );
        functions.insert(
            "memset".into(),
            FunctionInterface {
                params: vec![arr, None, None],
                ..Default::default()
            },
        );
        functions.insert(
            "malloc".into(),
            FunctionInterface {
                params: vec![None],
                ..Default::default()
            },
        );
        functions.insert(
            "calloc".into(),
            FunctionInterface {
                params: vec![None, None],
                ..Default::default()
            },
        );
        functions.insert(
            "realloc".into(),
            FunctionInterface {
                params: vec![None, None],
                ..Default::default()
            },
        );
        functions.insert(
            "free".into(),
            FunctionInterface {
                params: vec![None],
                ..Default::default()
            },
        );
        functions.insert(
            "printf".into(),
            FunctionInterface {
                params: vec![nt],
                variadic: true,
                format_arg: Some(0),
                ..Default::default()
            },
        );
        functions.insert(
            "fprintf".into(),
            FunctionInterface {
                params: vec![None, nt],
                variadic: true,
                format_arg: Some(1),
                ..Default::default()
            },
        );
        functions.insert(
            "snprintf".into(),
            FunctionInterface {
                params: vec![nt, None, nt],
                variadic: true,
                format_arg: Some(2),
                ..Default::default()
            },
        );
        functions.insert(
            "puts".into(),
            FunctionInterface {
                params: vec![nt],
                ..Default::default()
            },
        );

        Self { functions }
    }

    pub fn from_path(path: &Path) -> Result<Self, CheckifyError> {
        let text = std::fs::read_to_string(path).map_err(|source| CheckifyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| CheckifyError::Profile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Overlay `other` on top of this profile.
    pub fn merge(&mut self, other: InterfaceProfile) {
        for (name, iface) in other.functions {
            self.functions.insert(name, iface);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionInterface> {
        self.functions.get(name)
    }
}

/// What a printf directive expects of its paired variadic argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSlot {
    /// `%s`: a null-terminated string.
    NtString,
    /// `%p`: any pointer, printed by value.
    AnyPointer,
    /// Numeric/char directives; a pointer here is a mismatch.
    Scalar,
    /// `%n` and anything unrecognized; cannot be proven sound.
    Unsupported,
}

/// Structural matcher for printf-style format strings, used only under the
/// opt-in variadic policy. Returns one slot per consumed argument.
pub fn match_format(format: &str) -> Vec<FormatSlot> {
    let mut slots = Vec::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            continue;
        }
        // Skip flags, width, and precision.
        let mut spec = None;
        for c in chars.by_ref() {
            if c.is_ascii_alphabetic() {
                spec = Some(c);
                break;
            }
        }
        // Length modifiers precede the conversion; skip to the final letter.
        let mut spec = match spec {
            Some(s) => s,
            None => break,
        };
        while matches!(spec, 'h' | 'l' | 'j' | 'z' | 't' | 'L') {
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() => spec = c,
                _ => {
                    slots.push(FormatSlot::Unsupported);
                    return slots;
                }
            }
        }
        slots.push(match spec {
            's' => FormatSlot::NtString,
            'p' => FormatSlot::AnyPointer,
            'd' | 'i' | 'u' | 'o' | 'x' | 'X' | 'c' | 'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                FormatSlot::Scalar
            }
            _ => FormatSlot::Unsupported,
        });
    }
    slots
}

/// Resolved policy for a run.
#[derive(Debug, Clone)]
pub struct InterfacePolicy {
    /// When false (default), annotated external interfaces act as a
    /// one-way Wild boundary; when true, annotations are floors and
    /// caller/callee obligations still flow across.
    pub propagate_through_itypes: bool,
    /// When false (default), every pointer argument in a variadic tail is
    /// tainted; when true, printf-family formats are matched structurally.
    pub handle_varargs: bool,
    profile: InterfaceProfile,
}

impl InterfacePolicy {
    pub fn new(propagate_through_itypes: bool, handle_varargs: bool) -> Self {
        Self {
            propagate_through_itypes,
            handle_varargs,
            profile: InterfaceProfile::libc_defaults(),
        }
    }

    pub fn with_profile(mut self, profile: InterfaceProfile) -> Self {
        debug!(functions = profile.functions.len(), "merging interface profile");
        self.profile.merge(profile);
        self
    }

    pub fn known_interface(&self, name: &str) -> Option<&FunctionInterface> {
        self.profile.lookup(name)
    }
}

impl Default for InterfacePolicy {
    fn default() -> Self {
        Self::new(false, false)
    }
}
