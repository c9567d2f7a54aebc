//! Typed errors shared across the Checkify crates

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the core pipeline and its phases.
#[derive(Debug, Error)]
pub enum CheckifyError {
    /// Rejected before any phase runs.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A source file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The C parser rejected a translation unit outright. Unmodeled shapes
    /// inside a parseable unit never raise this; they degrade to Wild.
    #[error("parse error in {file}: {message}")]
    Parse { file: PathBuf, message: String },

    /// A rewritten file could not be written back.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A diagnostics artifact could not be produced.
    #[error("failed to emit report {path}: {message}")]
    Report { path: PathBuf, message: String },

    /// An interface profile file was malformed.
    #[error("invalid interface profile {path}: {message}")]
    Profile { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, CheckifyError>;
