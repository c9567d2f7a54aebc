//! # Checkify Core
//!
//! Whole-program inference of Checked C pointer qualifiers for legacy C.
//! Every pointer-typed declaration site gets a constraint variable over the
//! four-point lattice `Ptr < Arr < NtArr < Wild`; usage patterns generate
//! constraints, a worklist solver closes them to fixpoint, and a span-based
//! rewriter splices the checked spellings back into the sources.
//!
//! ## Modules
//!
//! - **[`hir`]** - Simplified C representation the generator walks
//! - **[`ast_bridge`]** - lang-c parsing and lowering to the HIR
//! - **[`constraints`]** - Lattice, variables, store, and fixpoint solver
//! - **[`generate`]** - Constraint generation from usage patterns
//! - **[`interfaces`]** - External interface profiles and variadic policy
//! - **[`rewrite`]** - Byte-span source rewriting and checked regions
//! - **[`pipeline`]** - The build/solve/rewrite phase driver
//!
//! ## Quick Start
//!
//! ```no_run
//! use checkify_core::prelude::*;
//! use std::path::PathBuf;
//!
//! let config = CheckifyConfig {
//!     files: vec![PathBuf::from("unit.c")],
//!     ..Default::default()
//! };
//! let outcome = Pipeline::new(config)?.run();
//! assert!(outcome.is_success());
//! # Ok::<(), checkify_core::CheckifyError>(())
//! ```

pub mod ast_bridge;
pub mod config;
pub mod constraints;
pub mod error;
pub mod generate;
pub mod hir;
pub mod interfaces;
pub mod pipeline;
pub mod rewrite;

pub use error::{CheckifyError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::ast_bridge::AstBridge;
    pub use crate::config::CheckifyConfig;
    pub use crate::constraints::{
        Constraint, ConstraintStore, Qualifier, SolvedStore, Solver, VarId, VarKind, WildReason,
    };
    pub use crate::error::CheckifyError;
    pub use crate::generate::{ConstraintGenerator, GeneratedModule};
    pub use crate::interfaces::{InterfacePolicy, InterfaceProfile};
    pub use crate::pipeline::{Phase, Pipeline, PipelineOutcome, RunSummary};
    pub use crate::rewrite::{OutputMode, RewritePlanner};
}
