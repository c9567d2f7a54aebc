//! # Checkify Analysis
//!
//! Reporting and verification layer over a solved constraint store.
//!
//! ## Modules
//!
//! - **[`stats`]** - Per-level and per-file qualifier counts
//! - **[`explain`]** - Wild root-cause attribution
//! - **[`verify`]** - Independent re-checks of solver postconditions

pub mod explain;
pub mod stats;
pub mod verify;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::explain::{WildEntry, WildReport};
    pub use crate::stats::{LevelCounts, QualifierStats};
    pub use crate::verify::{SolutionVerifier, Violation};
}
