//! Path walker
//!
//! Walks a path component-by-component from a version root, consulting
//! the directory entry store and falling through layered-directory
//! indirections on misses. The walk is pure: it never mutates persisted
//! state, so a failed unit of work can be retried safely. All failure
//! causes (missing component, missing version, broken indirection) are
//! reported uniformly as "not found"; diagnosis goes to the log.

use crate::error::{Error, Result};
use crate::indirection::effective_indirection;
use crate::lookup::Lookup;
use crate::node::NodeBody;
use crate::path::AvmPath;
use crate::store::StoreContext;
use tracing::{debug, warn};

/// Bound on nested indirection hops, catching self-referential layer
/// targets that would otherwise recurse forever.
const MAX_INDIRECTION_DEPTH: usize = 32;

/// Pure path resolution over the collaborator stores
pub struct PathWalker<'a> {
    ctx: &'a StoreContext,
}

impl<'a> PathWalker<'a> {
    pub fn new(ctx: &'a StoreContext) -> Self {
        PathWalker { ctx }
    }

    /// Resolve a path to a Lookup trail. `Ok(None)` means "does not
    /// exist"; in write mode callers interpret that as "safe to
    /// create".
    pub fn resolve(
        &self,
        store: &str,
        version: i64,
        components: &[String],
        write: bool,
        include_deleted: bool,
    ) -> Result<Option<Lookup>> {
        self.resolve_at(store, version, components, write, include_deleted, 0)
    }

    fn resolve_at(
        &self,
        store: &str,
        version: i64,
        components: &[String],
        write: bool,
        include_deleted: bool,
        depth: usize,
    ) -> Result<Option<Lookup>> {
        if depth > MAX_INDIRECTION_DEPTH {
            warn!(store, "indirection depth limit hit, treating as not found");
            return Ok(None);
        }

        let root_id = if version < 0 {
            match self.ctx.roots.current_root(store) {
                Ok(id) => id,
                Err(Error::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        } else {
            match self.ctx.roots.get_root(store, version)? {
                Some(id) => id,
                None => return Ok(None),
            }
        };
        let root = match self.ctx.nodes.get(root_id)? {
            Some(node) => node,
            None => {
                warn!(store, root_id, "version root record missing");
                return Ok(None);
            }
        };

        let mut lookup = Lookup::new(store, version, write, include_deleted);
        lookup.push(root, "", false);

        for (i, name) in components.iter().enumerate() {
            let last = i + 1 == components.len();
            if !self.step(&mut lookup, name, last, depth)? {
                return Ok(None);
            }
        }
        Ok(Some(lookup))
    }

    /// Resolve one component against the current leaf. Returns whether
    /// the walk may continue.
    fn step(&self, lookup: &mut Lookup, name: &str, last: bool, depth: usize) -> Result<bool> {
        let dir = lookup.leaf().node.clone();
        if !dir.is_directory() {
            return Ok(false);
        }

        // Direct entry wins over anything inherited.
        if let Some(child_id) = self.ctx.entries.get(dir.common.id, name)? {
            let child = match self.ctx.nodes.get(child_id)? {
                Some(child) => child,
                None => {
                    warn!(parent = dir.common.id, child_id, name, "dangling directory entry");
                    return Ok(false);
                }
            };
            if child.is_deleted() {
                if last && lookup.include_deleted {
                    lookup.push(child, name, false);
                    return Ok(true);
                }
                return Ok(false);
            }
            lookup.push(child, name, false);
            return Ok(true);
        }

        let opaque = match dir.body {
            NodeBody::LayeredDirectory { opaque, .. } => opaque,
            // Plain directories have nothing to fall through to.
            _ => return Ok(false),
        };

        if let Some(tomb_id) = dir.deleted_child(name) {
            if last && lookup.include_deleted {
                return match self.ctx.nodes.get(tomb_id)? {
                    Some(tombstone) => {
                        lookup.push(tombstone, name, false);
                        Ok(true)
                    }
                    None => {
                        warn!(parent = dir.common.id, tomb_id, name, "dangling tombstone");
                        Ok(false)
                    }
                };
            }
            return Ok(false);
        }
        if opaque {
            return Ok(false);
        }

        // Fall through to the effective indirection target.
        let index = lookup.len() - 1;
        let (target, target_version) = match effective_indirection(lookup, index) {
            Ok(resolved) => resolved,
            Err(Error::UnbackedIndirection(msg)) | Err(Error::MissingPrimaryAncestor(msg)) => {
                warn!(parent = dir.common.id, %msg, "indirection unresolvable");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let parsed = match AvmPath::parse(&target) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(parent = dir.common.id, target, "malformed stored indirection");
                return Ok(false);
            }
        };
        debug!(
            parent = dir.common.id,
            name, target, target_version, "layered fall-through"
        );

        let mut target_components = parsed.components;
        target_components.push(name.to_string());
        match self.resolve_at(
            &parsed.store,
            target_version,
            &target_components,
            false,
            false,
            depth + 1,
        )? {
            Some(sub) => {
                let node = sub.leaf().node.clone();
                lookup.push(node, name, true);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
