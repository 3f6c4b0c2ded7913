//! In-memory reference stores
//!
//! Node records are kept bincode-encoded, so every fetch round-trips
//! through the same serialization a persistent record store would use.
//! Content blobs are reference-counted.

use super::{ContentStore, DirectoryEntryStore, NodeStore, VersionRootProvider};
use crate::error::{Error, Result};
use crate::node::{ContentRef, Node, NodeId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug)]
struct StoreRecord {
    current_root: NodeId,
    /// version id -> root node id
    versions: BTreeMap<i64, NodeId>,
}

/// In-memory node/entry/root store
pub struct MemoryStore {
    next_node_id: AtomicU64,
    next_layer_id: AtomicI64,
    /// Node id -> bincode-encoded record
    nodes: RwLock<HashMap<NodeId, Vec<u8>>>,
    /// Parent id -> name-sorted child entries
    entries: RwLock<HashMap<NodeId, BTreeMap<String, NodeId>>>,
    /// Store name -> roots and version history
    stores: RwLock<HashMap<String, StoreRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            next_node_id: AtomicU64::new(1),
            next_layer_id: AtomicI64::new(1),
            nodes: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            stores: RwLock::new(HashMap::new()),
        }
    }

    fn encode(node: &Node) -> Result<Vec<u8>> {
        bincode::serialize(node).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<Node> {
        bincode::deserialize(data).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryStore {
    fn next_id(&self) -> NodeId {
        self.next_node_id.fetch_add(1, Ordering::SeqCst)
    }

    fn next_layer_id(&self) -> i64 {
        self.next_layer_id.fetch_add(1, Ordering::SeqCst)
    }

    fn save(&self, node: &Node) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.common.id) {
            return Err(Error::Store(format!(
                "node {} already exists",
                node.common.id
            )));
        }
        nodes.insert(node.common.id, Self::encode(node)?);
        Ok(())
    }

    fn update(&self, node: &Node) -> Result<()> {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&node.common.id) {
            return Err(Error::Store(format!("node {} does not exist", node.common.id)));
        }
        nodes.insert(node.common.id, Self::encode(node)?);
        Ok(())
    }

    fn get(&self, id: NodeId) -> Result<Option<Node>> {
        match self.nodes.read().get(&id) {
            Some(data) => Ok(Some(Self::decode(data)?)),
            None => Ok(None),
        }
    }

    fn clear_new_in_store(&self, store: &str) -> Result<usize> {
        let mut nodes = self.nodes.write();
        let mut frozen = 0;
        for data in nodes.values_mut() {
            let mut node = Self::decode(data)?;
            if node.common.store_new.as_deref() == Some(store) {
                node.common.store_new = None;
                *data = Self::encode(&node)?;
                frozen += 1;
            }
        }
        Ok(frozen)
    }
}

impl DirectoryEntryStore for MemoryStore {
    fn get(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>> {
        Ok(self
            .entries
            .read()
            .get(&parent)
            .and_then(|m| m.get(name).copied()))
    }

    fn get_all(&self, parent: NodeId) -> Result<BTreeMap<String, NodeId>> {
        Ok(self.entries.read().get(&parent).cloned().unwrap_or_default())
    }

    fn put(&self, parent: NodeId, name: &str, child: NodeId) -> Result<()> {
        self.entries
            .write()
            .entry(parent)
            .or_default()
            .insert(name.to_string(), child);
        Ok(())
    }

    fn remove(&self, parent: NodeId, name: &str) -> Result<()> {
        if let Some(m) = self.entries.write().get_mut(&parent) {
            m.remove(name);
        }
        Ok(())
    }
}

impl VersionRootProvider for MemoryStore {
    fn create_store(&self, store: &str, root: NodeId) -> Result<()> {
        let mut stores = self.stores.write();
        if stores.contains_key(store) {
            return Err(Error::NameConflict(format!("store {} already exists", store)));
        }
        stores.insert(
            store.to_string(),
            StoreRecord {
                current_root: root,
                versions: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn get_root(&self, store: &str, version: i64) -> Result<Option<NodeId>> {
        let stores = self.stores.read();
        let record = stores
            .get(store)
            .ok_or_else(|| Error::NotFound(format!("store {}", store)))?;
        Ok(record.versions.get(&version).copied())
    }

    fn current_root(&self, store: &str) -> Result<NodeId> {
        let stores = self.stores.read();
        let record = stores
            .get(store)
            .ok_or_else(|| Error::NotFound(format!("store {}", store)))?;
        Ok(record.current_root)
    }

    fn set_current_root(&self, store: &str, root: NodeId) -> Result<()> {
        let mut stores = self.stores.write();
        let record = stores
            .get_mut(store)
            .ok_or_else(|| Error::NotFound(format!("store {}", store)))?;
        record.current_root = root;
        Ok(())
    }

    fn record_version(&self, store: &str, version: i64, root: NodeId) -> Result<()> {
        let mut stores = self.stores.write();
        let record = stores
            .get_mut(store)
            .ok_or_else(|| Error::NotFound(format!("store {}", store)))?;
        record.versions.insert(version, root);
        Ok(())
    }

    fn max_version_id(&self, store: &str) -> Result<i64> {
        let stores = self.stores.read();
        let record = stores
            .get(store)
            .ok_or_else(|| Error::NotFound(format!("store {}", store)))?;
        Ok(record.versions.keys().next_back().copied().unwrap_or(-1))
    }
}

/// In-memory reference-counted content store
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, usize)>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        MemoryContentStore {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for MemoryContentStore {
    fn write(&self, data: &[u8]) -> Result<ContentRef> {
        let key = Uuid::new_v4().to_string();
        self.blobs.write().insert(key.clone(), (data.to_vec(), 1));
        Ok(ContentRef(key))
    }

    fn read(&self, content: &ContentRef) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(&content.0)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::NotFound(format!("content {}", content.0)))
    }

    fn retain(&self, content: &ContentRef) -> Result<()> {
        let mut blobs = self.blobs.write();
        let entry = blobs
            .get_mut(&content.0)
            .ok_or_else(|| Error::NotFound(format!("content {}", content.0)))?;
        entry.1 += 1;
        Ok(())
    }

    fn release(&self, content: &ContentRef) -> Result<()> {
        let mut blobs = self.blobs.write();
        let entry = blobs
            .get_mut(&content.0)
            .ok_or_else(|| Error::NotFound(format!("content {}", content.0)))?;
        entry.1 -= 1;
        if entry.1 == 0 {
            blobs.remove(&content.0);
        }
        Ok(())
    }

    fn ref_count(&self, content: &ContentRef) -> Result<usize> {
        Ok(self
            .blobs
            .read()
            .get(&content.0)
            .map(|(_, count)| *count)
            .unwrap_or(0))
    }
}
