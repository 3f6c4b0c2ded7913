//! Persistence collaborator contracts
//!
//! The core never talks to a database directly; it consumes these
//! narrow interfaces. Implementations are expected to run inside the
//! caller's transaction, with isolation and conflict retry handled
//! outside this crate. `store::memory` provides the in-process
//! reference implementation used by the test suite.

mod memory;

pub use memory::{MemoryContentStore, MemoryStore};

use crate::error::Result;
use crate::node::{ContentRef, Node, NodeId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Node record persistence
pub trait NodeStore: Send + Sync {
    /// Allocate a fresh node id
    fn next_id(&self) -> NodeId;

    /// Allocate a fresh layer generation id
    fn next_layer_id(&self) -> i64;

    /// Persist a new node record
    fn save(&self, node: &Node) -> Result<()>;

    /// Rewrite an existing node record
    fn update(&self, node: &Node) -> Result<()>;

    /// Fetch a node by id
    fn get(&self, id: NodeId) -> Result<Option<Node>>;

    /// Bulk-freeze every node still new in `store`, clearing its
    /// `store_new` back-reference. Returns the number frozen. Invoked
    /// exactly once per snapshot.
    fn clear_new_in_store(&self, store: &str) -> Result<usize>;

    /// Node this one was copied from
    fn get_ancestor(&self, node: &Node) -> Result<Option<Node>> {
        match node.common.ancestor {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    /// Node this one was merged from
    fn get_merged_from(&self, node: &Node) -> Result<Option<Node>> {
        match node.common.merged_from {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }
}

/// (parent, name) -> child mapping
pub trait DirectoryEntryStore: Send + Sync {
    fn get(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>>;

    /// All entries under a parent, name-sorted
    fn get_all(&self, parent: NodeId) -> Result<BTreeMap<String, NodeId>>;

    fn put(&self, parent: NodeId, name: &str, child: NodeId) -> Result<()>;

    fn remove(&self, parent: NodeId, name: &str) -> Result<()>;
}

/// Store registry and version-root history
pub trait VersionRootProvider: Send + Sync {
    /// Register a new store with its initial root. Fails with
    /// `NameConflict` if the store already exists.
    fn create_store(&self, store: &str, root: NodeId) -> Result<()>;

    /// Root of a historical version, or `None` if that version was
    /// never snapshotted
    fn get_root(&self, store: &str, version: i64) -> Result<Option<NodeId>>;

    /// Current (possibly uncommitted) root
    fn current_root(&self, store: &str) -> Result<NodeId>;

    /// Replace the current root (root copy-on-write)
    fn set_current_root(&self, store: &str, root: NodeId) -> Result<()>;

    /// Record a snapshotted version root
    fn record_version(&self, store: &str, version: i64, root: NodeId) -> Result<()>;

    /// Highest snapshotted version id, or -1 if none
    fn max_version_id(&self, store: &str) -> Result<i64>;
}

/// Reference-counted byte content, keyed by opaque handles. Multiple
/// plain files may share one reference until a write forces a private
/// copy.
pub trait ContentStore: Send + Sync {
    /// Store new content under a fresh reference (count 1)
    fn write(&self, data: &[u8]) -> Result<ContentRef>;

    fn read(&self, content: &ContentRef) -> Result<Vec<u8>>;

    /// Increment the reference count (content shared by a copy)
    fn retain(&self, content: &ContentRef) -> Result<()>;

    /// Decrement the reference count; the blob is reclaimed at zero
    fn release(&self, content: &ContentRef) -> Result<()>;

    fn ref_count(&self, content: &ContentRef) -> Result<usize>;
}

/// Bundle of collaborator handles passed to every component, built
/// once at startup. No global registries.
#[derive(Clone)]
pub struct StoreContext {
    pub nodes: Arc<dyn NodeStore>,
    pub entries: Arc<dyn DirectoryEntryStore>,
    pub roots: Arc<dyn VersionRootProvider>,
    pub content: Arc<dyn ContentStore>,
}

impl StoreContext {
    /// Context backed entirely by the in-memory reference stores
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        StoreContext {
            nodes: store.clone(),
            entries: store.clone(),
            roots: store,
            content: Arc::new(MemoryContentStore::new()),
        }
    }
}
