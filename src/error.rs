//! Error types for avmfs
//!
//! Recoverable conditions (`NotFound`, `NameConflict`) are returned to
//! callers as typed failures; `ReadOnly` and `UnbackedIndirection`
//! indicate misuse or corrupt data and should abort the enclosing unit
//! of work. `MissingPrimaryAncestor` is an internal invariant breach.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the avmfs core
#[derive(Debug, Error)]
pub enum Error {
    /// Path, version, or name does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Path string does not parse as "store:/a/b"
    #[error("Malformed path: {0}")]
    MalformedPath(String),

    /// A live child with this name already exists under the parent
    #[error("Name conflict: {0}")]
    NameConflict(String),

    /// Mutation attempted on a node frozen by a snapshot
    #[error("Read-only node: {0}")]
    ReadOnly(String),

    /// A layered node's indirection target cannot be resolved or has
    /// the wrong type
    #[error("Unbacked indirection: {0}")]
    UnbackedIndirection(String),

    /// A non-primary layered directory was entered outside any layer,
    /// leaving it with no indirection to inherit
    #[error("No enclosing layer indirection: {0}")]
    MissingPrimaryAncestor(String),

    /// Collaborator (node/entry/root/content store) failure
    #[error("Store error: {0}")]
    Store(String),

    /// Record encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}
