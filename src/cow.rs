//! Copy-on-write materialization
//!
//! Turns a completed read of the head version into a writable node
//! chain. Walking the trail top-down, every node that is frozen, was
//! reached through an indirection, or is a layered file gets copied:
//! the copy receives a fresh id and guid, links to its original via
//! the ancestor relation, and is spliced into its (already writable)
//! parent's entries. A plain directory copied while under a layer is
//! reified as a non-primary layered directory so subsequent changes
//! are recorded as overrides of the layer, not mutations of the
//! shared original.

use crate::error::{Error, Result};
use crate::indirection::effective_indirection;
use crate::lookup::{Lookup, PathWalker};
use crate::node::{ContentRef, Node, NodeBody, HEAD_VERSION};
use crate::path::AvmPath;
use crate::store::StoreContext;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Bound on layered-file chains (a layered file may point at another
/// layered file).
const MAX_FILE_CHAIN: usize = 8;

/// Copy every component of the trail that cannot be written in place,
/// returning the writable trail. Requires a head-version lookup.
pub fn materialize(ctx: &StoreContext, user: &str, lookup: &Lookup) -> Result<Lookup> {
    if lookup.version >= 0 {
        return Err(Error::ReadOnly(format!(
            "version {} of store {} is frozen",
            lookup.version, lookup.store
        )));
    }

    let store = lookup.store.clone();
    let mut trail = lookup.clone();

    for index in 0..trail.len() {
        let component = trail.get(index);
        let node = component.node.clone();
        let name = component.name.clone();
        let indirect = component.indirect;

        let needs_copy = indirect
            || !node.is_writable_in(&store)
            || matches!(node.body, NodeBody::LayeredFile { .. });
        if !needs_copy {
            continue;
        }

        let in_layer = indirect
            || trail.components()[..index]
                .iter()
                .any(|c| matches!(c.node.body, NodeBody::LayeredDirectory { .. }));

        let copy = copy_node(ctx, user, &trail, index, &node, in_layer)?;

        if index == 0 {
            ctx.roots.set_current_root(&store, copy.common.id)?;
        } else {
            let parent_id = trail.get(index - 1).node.common.id;
            ctx.entries.put(parent_id, &name, copy.common.id)?;
        }
        debug!(
            old = node.common.id,
            new = copy.common.id,
            name,
            indirect,
            "copied on write"
        );

        trail.set_node(index, copy);
        trail.clear_indirect(index);
    }
    Ok(trail)
}

/// Produce, save, and entry-populate the copy of one node per the
/// variant rules.
fn copy_node(
    ctx: &StoreContext,
    user: &str,
    trail: &Lookup,
    index: usize,
    old: &Node,
    in_layer: bool,
) -> Result<Node> {
    let store = &trail.store;
    let body = match &old.body {
        NodeBody::PlainFile { content, length } => {
            // Content is shared, reference-counted, until a write
            // forces a private copy.
            ctx.content.retain(content)?;
            NodeBody::PlainFile {
                content: content.clone(),
                length: *length,
            }
        }
        // A layered file always copies to a plain file materializing
        // the pointed-to content.
        NodeBody::LayeredFile { .. } => {
            let (content, length) = resolve_backing_content(ctx, trail, index)?;
            ctx.content.retain(&content)?;
            NodeBody::PlainFile { content, length }
        }
        NodeBody::PlainDirectory => {
            if in_layer {
                NodeBody::LayeredDirectory {
                    primary_indirection: false,
                    indirection: None,
                    indirection_version: HEAD_VERSION,
                    layer_id: enclosing_layer_id(trail, index)?,
                    opaque: false,
                    deleted: BTreeMap::new(),
                }
            } else {
                NodeBody::PlainDirectory
            }
        }
        // Indirection fields and tombstones are value-copied, never
        // shared.
        NodeBody::LayeredDirectory { .. } => old.body.clone(),
        NodeBody::Deleted { .. } => old.body.clone(),
    };

    let mut copy = Node {
        common: old.common.clone(),
        body,
    };
    copy.common.id = ctx.nodes.next_id();
    copy.common.guid = Uuid::new_v4().to_string();
    copy.common.version_id = old.common.version_id + 1;
    copy.common.store_new = Some(store.clone());
    copy.common.ancestor = Some(old.common.id);
    copy.common.merged_from = None;
    copy.common.attrs.touch(user);

    ctx.nodes.save(&copy)?;

    // Directory child entries are duplicated by value under the new id.
    if old.is_directory() {
        for (child_name, child_id) in ctx.entries.get_all(old.common.id)? {
            ctx.entries.put(copy.common.id, &child_name, child_id)?;
        }
    }
    Ok(copy)
}

/// Layer a reified plain directory joins: the nearest layered
/// directory above it on the trail.
fn enclosing_layer_id(trail: &Lookup, index: usize) -> Result<i64> {
    for j in (0..index).rev() {
        if let Some(layer_id) = trail.get(j).node.layer_id() {
            return Ok(layer_id);
        }
    }
    Err(Error::MissingPrimaryAncestor(format!(
        "no enclosing layer above {} on the trail",
        trail.get(index).node.common.id
    )))
}

/// Follow a layered file's indirection to its concrete backing
/// content, traversing chained layered files up to a fixed bound.
pub(crate) fn resolve_backing_content(
    ctx: &StoreContext,
    trail: &Lookup,
    index: usize,
) -> Result<(ContentRef, u64)> {
    let (mut target, mut version) = effective_indirection(trail, index)?;
    for _ in 0..MAX_FILE_CHAIN {
        let parsed = AvmPath::parse(&target)
            .map_err(|_| Error::UnbackedIndirection(format!("malformed target {}", target)))?;
        let walker = PathWalker::new(ctx);
        let sub = walker
            .resolve(&parsed.store, version, &parsed.components, false, false)?
            .ok_or_else(|| {
                Error::UnbackedIndirection(format!("target {} cannot be resolved", target))
            })?;
        match &sub.leaf().node.body {
            NodeBody::PlainFile { content, length } => return Ok((content.clone(), *length)),
            NodeBody::LayeredFile { .. } => {
                let next = effective_indirection(&sub, sub.len() - 1)?;
                target = next.0;
                version = next.1;
            }
            _ => {
                return Err(Error::UnbackedIndirection(format!(
                    "target {} is not file-typed",
                    target
                )))
            }
        }
    }
    Err(Error::UnbackedIndirection(format!(
        "layered file chain through {} too deep",
        target
    )))
}
