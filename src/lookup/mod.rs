//! Lookup trail
//!
//! A `Lookup` is the ordered trail of nodes visited while resolving a
//! path. It doubles as the resolution result and as the context for
//! copy-on-write: each component remembers whether it was reached
//! directly or inherited through an indirection, the running layer
//! state, and the running effective indirection. The latter is rolled
//! forward on every push (a primary indirection resets it to its own
//! target, anything else extends the previous one by the walked name),
//! so it stays correct even when a fall-through splices a node from
//! another layer's trail.

mod cache;
mod walker;

pub use cache::LookupCache;
pub use walker::PathWalker;

use crate::node::{Node, NodeBody};
use crate::path;
use serde::{Deserialize, Serialize};

/// Cache key identifying one resolution request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupKey {
    pub store: String,
    pub version: i64,
    pub path: String,
    pub write: bool,
    pub include_deleted: bool,
}

impl LookupKey {
    pub fn new(
        store: &str,
        version: i64,
        components: &[String],
        write: bool,
        include_deleted: bool,
    ) -> Self {
        LookupKey {
            store: store.to_string(),
            version,
            path: format!("/{}", components.join("/")),
            write,
            include_deleted,
        }
    }
}

/// One visited node on the trail
#[derive(Debug, Clone)]
pub struct LookupComponent {
    /// The node visited at this position
    pub node: Node,
    /// Its name within the parent ("" for the root)
    pub name: String,
    /// Whether it was inherited through an indirection rather than
    /// directly present in the parent's entries
    pub indirect: bool,
    /// Whether layering has started by this point
    pub layered: bool,
    /// Running effective indirection: the underlying (path, version)
    /// this position overlays, if the trail is inside a layer
    pub indirection: Option<(String, i64)>,
    /// Highest layer generation id seen so far
    pub highest_layer_id: i64,
    /// Index of the first (topmost) layered directory on the trail
    pub top_layer_index: Option<usize>,
    /// Index of the most recent layered directory seen so far
    pub lowest_layer_index: Option<usize>,
}

/// Append-only trail of visited nodes, unwindable one step at a time
#[derive(Debug, Clone)]
pub struct Lookup {
    pub store: String,
    pub version: i64,
    pub write: bool,
    pub include_deleted: bool,
    components: Vec<LookupComponent>,
}

impl Lookup {
    pub fn new(store: &str, version: i64, write: bool, include_deleted: bool) -> Self {
        Lookup {
            store: store.to_string(),
            version,
            write,
            include_deleted,
            components: Vec::new(),
        }
    }

    /// Append a visited node, rolling the layer state forward.
    pub fn push(&mut self, node: Node, name: &str, indirect: bool) {
        let index = self.components.len();
        let prev = self.components.last();
        let prev_layered = prev.map(|c| c.layered).unwrap_or(false);
        let prev_highest = prev.map(|c| c.highest_layer_id).unwrap_or(-1);
        let prev_top = prev.and_then(|c| c.top_layer_index);
        let prev_lowest = prev.and_then(|c| c.lowest_layer_index);

        let is_layered_dir = matches!(node.body, NodeBody::LayeredDirectory { .. });
        let layer_id = node.layer_id().unwrap_or(-1);

        let indirection = match &node.body {
            // Primary indirections reset the running target to their
            // own; everything else walks one name deeper into the
            // enclosing layer's target.
            NodeBody::LayeredFile {
                indirection,
                indirection_version,
            } => Some((indirection.clone(), *indirection_version)),
            NodeBody::LayeredDirectory {
                primary_indirection: true,
                indirection,
                indirection_version,
                ..
            } => indirection
                .as_ref()
                .map(|target| (target.clone(), *indirection_version)),
            _ => prev.and_then(|c| c.indirection.as_ref()).map(|(target, version)| {
                (path::extend(target, &[name.to_string()]), *version)
            }),
        };

        self.components.push(LookupComponent {
            node,
            name: name.to_string(),
            indirect,
            layered: prev_layered || indirect || is_layered_dir,
            indirection,
            highest_layer_id: prev_highest.max(layer_id),
            top_layer_index: prev_top.or(if is_layered_dir { Some(index) } else { None }),
            lowest_layer_index: if is_layered_dir { Some(index) } else { prev_lowest },
        });
    }

    /// Unwind one step (copy-on-write propagation back up the path).
    pub fn pop(&mut self) -> Option<LookupComponent> {
        self.components.pop()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> &LookupComponent {
        &self.components[index]
    }

    pub fn components(&self) -> &[LookupComponent] {
        &self.components
    }

    /// The final component (the resolved node)
    pub fn leaf(&self) -> &LookupComponent {
        self.components
            .last()
            .expect("lookup always holds at least the root")
    }

    /// Whether the trail passes through any layer. Layered lookups are
    /// subject to the cache's conservative global invalidation.
    pub fn is_layered(&self) -> bool {
        self.components.last().map(|c| c.layered).unwrap_or(false)
    }

    /// Replace the node at a position (cache freshening, COW linking).
    pub(crate) fn set_node(&mut self, index: usize, node: Node) {
        self.components[index].node = node;
    }

    /// Mark a component directly contained after copy-up.
    pub(crate) fn clear_indirect(&mut self, index: usize) {
        self.components[index].indirect = false;
    }
}
