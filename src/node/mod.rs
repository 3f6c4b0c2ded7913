//! Node model
//!
//! Every object in the filesystem is one of five node variants: plain
//! or layered files, plain or layered directories, or deleted-node
//! tombstones. Variants share common attributes (identity, ownership,
//! aspects/properties) and differ only in their body. A node is mutable
//! while its `store_new` back-reference is set (it is still new in an
//! unsnapshotted store) and frozen forever once a snapshot clears it;
//! all subsequent changes go through copy-on-write.

mod attrs;

pub use attrs::{BasicAttributes, PropertyValue, QName};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Stable surrogate key for a node. Never reused, never changed.
pub type NodeId = u64;

/// Version id meaning "head" / unversioned.
pub const HEAD_VERSION: i64 = -1;

/// Opaque handle into the external content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef(pub String);

/// Node variant discriminant, also used to record what type a
/// tombstone replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    PlainFile,
    LayeredFile,
    PlainDirectory,
    LayeredDirectory,
    Deleted,
}

/// Attributes shared by all node variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCommon {
    /// Surrogate key, immutable after creation
    pub id: NodeId,
    /// Version counter; -1 while unversioned
    pub version_id: i64,
    /// Opaque identity string, regenerated on every copy
    pub guid: String,
    /// Whether this node is a store root directory
    pub is_root: bool,
    /// Name of the store this node is still new (uncommitted) in.
    /// `None` means the node belongs to a snapshotted version and is
    /// immutable.
    pub store_new: Option<String>,
    /// Optional ACL reference (ACL model is an external concern)
    pub acl: Option<u64>,
    /// Ownership and timestamp metadata
    pub attrs: BasicAttributes,
    /// Aspect markers
    pub aspects: BTreeSet<QName>,
    /// Typed properties
    pub properties: BTreeMap<QName, PropertyValue>,
    /// Node this one was copied from, if any
    pub ancestor: Option<NodeId>,
    /// Node this one was merged from, if any
    pub merged_from: Option<NodeId>,
}

impl NodeCommon {
    fn new(id: NodeId, store: &str, user: &str) -> Self {
        NodeCommon {
            id,
            version_id: HEAD_VERSION,
            guid: Uuid::new_v4().to_string(),
            is_root: false,
            store_new: Some(store.to_string()),
            acl: None,
            attrs: BasicAttributes::new(user),
            aspects: BTreeSet::new(),
            properties: BTreeMap::new(),
            ancestor: None,
            merged_from: None,
        }
    }
}

/// Variant-specific node data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeBody {
    /// File owning its content directly
    PlainFile { content: ContentRef, length: u64 },
    /// File whose content is defined by another path. Always a primary
    /// indirection; copy-on-write replaces it with a PlainFile.
    LayeredFile {
        indirection: String,
        indirection_version: i64,
    },
    /// Directory whose entries live in the directory entry store
    PlainDirectory,
    /// Directory shadowing an underlying target path. Own entries
    /// override the target's; `deleted` tombstones hide inherited
    /// names (each value is the id of a stored DeletedNode).
    LayeredDirectory {
        primary_indirection: bool,
        indirection: Option<String>,
        indirection_version: i64,
        layer_id: i64,
        opaque: bool,
        deleted: BTreeMap<String, NodeId>,
    },
    /// Tombstone recording the type of the node it replaced
    Deleted { deleted_type: NodeType },
}

/// A filesystem node: shared attributes plus a variant body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub common: NodeCommon,
    pub body: NodeBody,
}

impl Node {
    /// Create a new plain file owning the given content
    pub fn new_plain_file(
        id: NodeId,
        store: &str,
        user: &str,
        content: ContentRef,
        length: u64,
    ) -> Self {
        Node {
            common: NodeCommon::new(id, store, user),
            body: NodeBody::PlainFile { content, length },
        }
    }

    /// Create a new layered file pointing at `target`
    pub fn new_layered_file(id: NodeId, store: &str, user: &str, target: &str) -> Self {
        Node {
            common: NodeCommon::new(id, store, user),
            body: NodeBody::LayeredFile {
                indirection: target.to_string(),
                indirection_version: HEAD_VERSION,
            },
        }
    }

    /// Create a new plain directory (entries live in the entry store)
    pub fn new_plain_directory(id: NodeId, store: &str, user: &str) -> Self {
        Node {
            common: NodeCommon::new(id, store, user),
            body: NodeBody::PlainDirectory,
        }
    }

    /// Create a new primary layered directory pointing at `target`,
    /// starting a fresh layer
    pub fn new_layered_directory(
        id: NodeId,
        store: &str,
        user: &str,
        target: &str,
        layer_id: i64,
    ) -> Self {
        Node {
            common: NodeCommon::new(id, store, user),
            body: NodeBody::LayeredDirectory {
                primary_indirection: true,
                indirection: Some(target.to_string()),
                indirection_version: HEAD_VERSION,
                layer_id,
                opaque: false,
                deleted: BTreeMap::new(),
            },
        }
    }

    /// Create a non-primary layered directory inside an existing layer.
    /// It carries no indirection of its own; resolution derives one
    /// from the enclosing layer's target, extended by the walked path.
    pub fn new_layered_subdirectory(id: NodeId, store: &str, user: &str, layer_id: i64) -> Self {
        Node {
            common: NodeCommon::new(id, store, user),
            body: NodeBody::LayeredDirectory {
                primary_indirection: false,
                indirection: None,
                indirection_version: HEAD_VERSION,
                layer_id,
                opaque: false,
                deleted: BTreeMap::new(),
            },
        }
    }

    /// Create a tombstone recording the type it replaced
    pub fn new_deleted(id: NodeId, store: &str, user: &str, deleted_type: NodeType) -> Self {
        Node {
            common: NodeCommon::new(id, store, user),
            body: NodeBody::Deleted { deleted_type },
        }
    }

    /// Variant discriminant
    pub fn node_type(&self) -> NodeType {
        match self.body {
            NodeBody::PlainFile { .. } => NodeType::PlainFile,
            NodeBody::LayeredFile { .. } => NodeType::LayeredFile,
            NodeBody::PlainDirectory => NodeType::PlainDirectory,
            NodeBody::LayeredDirectory { .. } => NodeType::LayeredDirectory,
            NodeBody::Deleted { .. } => NodeType::Deleted,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(
            self.body,
            NodeBody::PlainDirectory | NodeBody::LayeredDirectory { .. }
        )
    }

    pub fn is_file(&self) -> bool {
        matches!(
            self.body,
            NodeBody::PlainFile { .. } | NodeBody::LayeredFile { .. }
        )
    }

    /// Layered variants define themselves relative to another path
    pub fn is_layered(&self) -> bool {
        matches!(
            self.body,
            NodeBody::LayeredFile { .. } | NodeBody::LayeredDirectory { .. }
        )
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.body, NodeBody::Deleted { .. })
    }

    /// Writability predicate: new in the given store, not yet frozen
    /// by a snapshot.
    pub fn is_writable_in(&self, store: &str) -> bool {
        self.common.store_new.as_deref() == Some(store)
    }

    fn check_mutable(&self) -> Result<()> {
        if self.common.store_new.is_none() {
            return Err(Error::ReadOnly(format!(
                "node {} belongs to a snapshotted version",
                self.common.id
            )));
        }
        Ok(())
    }

    /// Set a property. Fails with `ReadOnly` on frozen nodes.
    pub fn set_property(&mut self, name: QName, value: PropertyValue) -> Result<()> {
        self.check_mutable()?;
        self.common.properties.insert(name, value);
        Ok(())
    }

    pub fn get_property(&self, name: &QName) -> Option<&PropertyValue> {
        self.common.properties.get(name)
    }

    /// Add an aspect marker. Fails with `ReadOnly` on frozen nodes.
    pub fn add_aspect(&mut self, name: QName) -> Result<()> {
        self.check_mutable()?;
        self.common.aspects.insert(name);
        Ok(())
    }

    /// Remove an aspect marker. Fails with `ReadOnly` on frozen nodes.
    pub fn remove_aspect(&mut self, name: &QName) -> Result<()> {
        self.check_mutable()?;
        self.common.aspects.remove(name);
        Ok(())
    }

    pub fn has_aspect(&self, name: &QName) -> bool {
        self.common.aspects.contains(name)
    }

    /// Update modification metadata. Fails with `ReadOnly` on frozen
    /// nodes.
    pub fn touch(&mut self, user: &str) -> Result<()> {
        self.check_mutable()?;
        self.common.attrs.touch(user);
        Ok(())
    }

    /// Replace a plain file's content reference
    pub fn set_content(&mut self, new_content: ContentRef, new_length: u64) -> Result<()> {
        self.check_mutable()?;
        match &mut self.body {
            NodeBody::PlainFile { content, length } => {
                *content = new_content;
                *length = new_length;
                Ok(())
            }
            _ => Err(Error::Store(format!(
                "node {} is not a plain file",
                self.common.id
            ))),
        }
    }

    /// Layer generation id of a layered directory
    pub fn layer_id(&self) -> Option<i64> {
        match &self.body {
            NodeBody::LayeredDirectory { layer_id, .. } => Some(*layer_id),
            _ => None,
        }
    }

    /// Whether a layered directory hides its indirection target
    pub fn is_opaque(&self) -> bool {
        matches!(&self.body, NodeBody::LayeredDirectory { opaque: true, .. })
    }

    /// Toggle a layered directory's opacity flag
    pub fn set_opacity(&mut self, value: bool) -> Result<()> {
        self.check_mutable()?;
        match &mut self.body {
            NodeBody::LayeredDirectory { opaque, .. } => {
                *opaque = value;
                Ok(())
            }
            _ => Err(Error::Store(format!(
                "node {} is not a layered directory",
                self.common.id
            ))),
        }
    }

    /// Tombstone id recorded for `name`, if the name is hidden
    pub fn deleted_child(&self, name: &str) -> Option<NodeId> {
        match &self.body {
            NodeBody::LayeredDirectory { deleted, .. } => deleted.get(name).copied(),
            _ => None,
        }
    }

    /// Record a tombstone hiding `name` behind the given DeletedNode
    pub fn add_deleted_name(&mut self, name: &str, tombstone: NodeId) -> Result<()> {
        self.check_mutable()?;
        match &mut self.body {
            NodeBody::LayeredDirectory { deleted, .. } => {
                deleted.insert(name.to_string(), tombstone);
                Ok(())
            }
            _ => Err(Error::Store(format!(
                "node {} is not a layered directory",
                self.common.id
            ))),
        }
    }

    /// Clear a tombstone, making the name resolvable again
    pub fn remove_deleted_name(&mut self, name: &str) -> Result<()> {
        self.check_mutable()?;
        match &mut self.body {
            NodeBody::LayeredDirectory { deleted, .. } => {
                deleted.remove(name);
                Ok(())
            }
            _ => Err(Error::Store(format!(
                "node {} is not a layered directory",
                self.common.id
            ))),
        }
    }
}
