//! avmfs - Versioned, branchable virtual filesystem core
//!
//! A copy-on-write node tree with union-mount style layering: layered
//! directories and files project content from a target path, snapshots
//! freeze whole stores into immutable numbered versions, and all
//! mutation happens by copying frozen nodes up the path. Persistence
//! is abstracted behind narrow collaborator traits with an in-memory
//! reference implementation.

pub mod cow;
pub mod error;
pub mod indirection;
pub mod lookup;
pub mod node;
pub mod path;
pub mod repo;
pub mod store;
pub mod txn;

pub use error::{Error, Result};
pub use repo::Repository;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::lookup::Lookup;
    pub use crate::node::{Node, NodeBody, NodeId, NodeType, HEAD_VERSION};
    pub use crate::path::AvmPath;
    pub use crate::repo::Repository;
    pub use crate::store::StoreContext;
}
