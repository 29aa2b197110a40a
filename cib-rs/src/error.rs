//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Paths of the debug snapshots written when a patch result fails verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugArtifacts {
    /// The document the diff was applied to.
    pub original: PathBuf,
    /// The diff itself.
    pub diff: PathBuf,
    /// The rejected candidate.
    pub candidate: PathBuf,
}

/// Errors that can occur during engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The input could not be parsed as a document.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The input contained no markup at all.
    #[error("cannot parse an empty document")]
    EmptyInput,

    /// A schema version name is not in the catalog.
    #[error("unknown schema version: {0}")]
    UnknownSchemaVersion(String),

    /// A document did not validate against the requested schema.
    #[error("document is not valid for schema {0}")]
    ValidationFailed(String),

    /// A schema transform could not be applied.
    #[error("transform {transform} failed: {reason}")]
    TransformFailed { transform: String, reason: String },

    /// The patched document does not hash to the digest recorded in the diff.
    ///
    /// The candidate must be discarded and a full copy requested from a peer.
    #[error("digest mismatch: expected {expected}, calculated {calculated}")]
    DigestMismatch {
        expected: String,
        calculated: String,
        artifacts: Option<DebugArtifacts>,
    },

    /// A diff section held more than one top-level change set.
    #[error("diff section {section} holds {count} change sets, at most one is allowed")]
    MultipleChangeRoots { section: &'static str, count: usize },

    /// A grammar or transform resource could not be loaded.
    #[error("cannot load {path}: {reason}")]
    SchemaLoad { path: PathBuf, reason: String },

    /// The schema catalog is inconsistent.
    #[error("invalid schema catalog: {0}")]
    InvalidCatalog(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for failures whose only recovery is a full resync.
    pub fn requires_full_resync(&self) -> bool {
        matches!(self, Error::DigestMismatch { .. })
    }
}
