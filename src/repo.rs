//! Repository operations
//!
//! The operation surface over the core: store/version management,
//! create/remove/read/write of files and directories, merged listings,
//! and indirection queries. Every mutation resolves its target through
//! the lookup cache, materializes the trail copy-on-write, applies the
//! change to the writable leaf, and records a store event for the
//! commit phase. Callers drive the transaction boundary through
//! `commit`/`rollback`.

use crate::cow;
use crate::error::{Error, Result};
use crate::indirection::effective_indirection;
use crate::lookup::{Lookup, LookupCache};
use crate::node::{Node, NodeBody, NodeId, PropertyValue, QName, HEAD_VERSION};
use crate::path::AvmPath;
use crate::store::StoreContext;
use crate::txn::{EventRecorder, StoreEvent};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Bound on nested layers consulted while merging a listing.
const MAX_LISTING_DEPTH: usize = 32;

/// The versioned filesystem, bound to its collaborator stores
pub struct Repository {
    ctx: StoreContext,
    cache: LookupCache,
    recorder: EventRecorder,
    user: String,
}

impl Repository {
    pub fn new(ctx: StoreContext, user: &str) -> Self {
        Repository {
            ctx,
            cache: LookupCache::new(),
            recorder: EventRecorder::new(),
            user: user.to_string(),
        }
    }

    /// Repository over the in-memory reference stores
    pub fn in_memory(user: &str) -> Self {
        Self::new(StoreContext::in_memory(), user)
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    /// Commit the current unit of work: fire accumulated store events
    /// against the lookup cache, exactly once each.
    pub fn commit(&self) {
        self.recorder.commit(&self.cache);
    }

    /// Roll back the current unit of work: discard pending events and
    /// clear the cache entirely.
    pub fn rollback(&self) {
        self.recorder.rollback(&self.cache);
    }

    // ---- stores and versions ----

    /// Create a store with an empty root, snapshotted as version 0.
    pub fn create_store(&self, name: &str) -> Result<()> {
        let mut root = Node::new_plain_directory(self.ctx.nodes.next_id(), name, &self.user);
        root.common.is_root = true;

        self.ctx.roots.create_store(name, root.common.id)?;
        self.ctx.nodes.save(&root)?;
        self.ctx.nodes.clear_new_in_store(name)?;
        self.ctx.roots.record_version(name, 0, root.common.id)?;
        self.recorder.record(StoreEvent::Snapshot(name.to_string()));
        debug!(store = name, root = root.common.id, "store created");
        Ok(())
    }

    /// Snapshot a store: freeze everything new in it, record the
    /// current root as the next version, and schedule the snapshot
    /// event for commit. Returns the new version id.
    pub fn snapshot(&self, store: &str) -> Result<i64> {
        let root_id = self.ctx.roots.current_root(store)?;
        let version = self.ctx.roots.max_version_id(store)? + 1;
        let frozen = self.ctx.nodes.clear_new_in_store(store)?;
        self.ctx.roots.record_version(store, version, root_id)?;
        self.recorder.record(StoreEvent::Snapshot(store.to_string()));
        debug!(store, version, frozen, "snapshot taken");
        Ok(version)
    }

    // ---- resolution ----

    fn resolve(
        &self,
        path: &AvmPath,
        version: i64,
        write: bool,
        include_deleted: bool,
    ) -> Result<Option<Lookup>> {
        self.cache.lookup(
            &self.ctx,
            &path.store,
            version,
            &path.components,
            write,
            include_deleted,
        )
    }

    /// Resolve a path for reading. `version` -1 means head.
    pub fn lookup(&self, path: &str, version: i64) -> Result<Lookup> {
        let parsed = AvmPath::parse(path)?;
        self.resolve(&parsed, version, false, false)?
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Like `lookup`, but tombstoned names surface their DeletedNode
    /// placeholder instead of failing.
    pub fn lookup_deleted(&self, path: &str, version: i64) -> Result<Lookup> {
        let parsed = AvmPath::parse(path)?;
        self.resolve(&parsed, version, false, true)?
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Resolve for writing and materialize the trail copy-on-write,
    /// re-caching the writable result under the write key.
    fn lookup_write(&self, path: &AvmPath) -> Result<Lookup> {
        let lookup = self
            .resolve(path, HEAD_VERSION, true, false)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let writable = cow::materialize(&self.ctx, &self.user, &lookup)?;
        self.cache.store_lookup(
            &path.store,
            HEAD_VERSION,
            &path.components,
            true,
            false,
            writable.clone(),
        );
        Ok(writable)
    }

    // ---- creation ----

    /// Make the parent writable and clear of conflicts for `name`.
    fn prepare_create(&self, parent: &str, name: &str) -> Result<(Lookup, Node)> {
        let parsed = AvmPath::parse(parent)?;
        let child_path = parsed.child(name);
        if self.resolve(&child_path, HEAD_VERSION, false, false)?.is_some() {
            return Err(Error::NameConflict(child_path.to_string()));
        }

        let writable = self.lookup_write(&parsed)?;
        let mut dir = writable.leaf().node.clone();
        if !dir.is_directory() {
            return Err(Error::NotFound(format!("{} is not a directory", parent)));
        }
        // Creating over a tombstone revives the name.
        if dir.deleted_child(name).is_some() {
            dir.remove_deleted_name(name)?;
        }
        dir.touch(&self.user)?;
        self.ctx.nodes.update(&dir)?;
        Ok((writable, dir))
    }

    fn attach(&self, store: &str, dir: &Node, name: &str, child: &Node) -> Result<NodeId> {
        self.ctx.nodes.save(child)?;
        self.ctx.entries.put(dir.common.id, name, child.common.id)?;
        self.recorder.record(StoreEvent::Write(store.to_string()));
        debug!(
            parent = dir.common.id,
            child = child.common.id,
            name,
            "created"
        );
        Ok(child.common.id)
    }

    /// Create a directory. Inside a layer the new directory is born as
    /// a non-primary layered directory so later target content under
    /// the same name still shows through.
    pub fn create_directory(&self, parent: &str, name: &str) -> Result<NodeId> {
        let (writable, dir) = self.prepare_create(parent, name)?;
        let store = writable.store.clone();
        let id = self.ctx.nodes.next_id();

        let child = match writable
            .components()
            .iter()
            .rev()
            .find_map(|c| c.node.layer_id())
        {
            Some(layer_id) => Node::new_layered_subdirectory(id, &store, &self.user, layer_id),
            None => Node::new_plain_directory(id, &store, &self.user),
        };
        self.attach(&store, &dir, name, &child)
    }

    /// Create a layered directory with its own (primary) indirection,
    /// starting a fresh layer.
    pub fn create_layered_directory(
        &self,
        target: &str,
        parent: &str,
        name: &str,
    ) -> Result<NodeId> {
        AvmPath::parse(target)?;
        let (writable, dir) = self.prepare_create(parent, name)?;
        let store = writable.store.clone();
        let layer_id = self.ctx.nodes.next_layer_id();
        let child = Node::new_layered_directory(
            self.ctx.nodes.next_id(),
            &store,
            &self.user,
            target,
            layer_id,
        );
        self.attach(&store, &dir, name, &child)
    }

    /// Create a plain file owning the given content
    pub fn create_file(&self, parent: &str, name: &str, data: &[u8]) -> Result<NodeId> {
        let (writable, dir) = self.prepare_create(parent, name)?;
        let store = writable.store.clone();
        let content = self.ctx.content.write(data)?;
        let child = Node::new_plain_file(
            self.ctx.nodes.next_id(),
            &store,
            &self.user,
            content,
            data.len() as u64,
        );
        self.attach(&store, &dir, name, &child)
    }

    /// Create a layered file pointing at `target`
    pub fn create_layered_file(&self, target: &str, parent: &str, name: &str) -> Result<NodeId> {
        AvmPath::parse(target)?;
        let (writable, dir) = self.prepare_create(parent, name)?;
        let store = writable.store.clone();
        let child =
            Node::new_layered_file(self.ctx.nodes.next_id(), &store, &self.user, target);
        self.attach(&store, &dir, name, &child)
    }

    // ---- content ----

    /// Replace a file's content. Copy-on-write makes the whole path
    /// writable first; a layered file is reified as a plain file in
    /// the process.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let parsed = AvmPath::parse(path)?;
        let writable = self.lookup_write(&parsed)?;
        let mut node = writable.leaf().node.clone();

        let old_content = match &node.body {
            NodeBody::PlainFile { content, .. } => content.clone(),
            _ => return Err(Error::NotFound(format!("{} is not a file", path))),
        };
        let new_content = self.ctx.content.write(data)?;
        node.set_content(new_content, data.len() as u64)?;
        node.touch(&self.user)?;
        self.ctx.nodes.update(&node)?;
        self.ctx.content.release(&old_content)?;
        self.recorder
            .record(StoreEvent::Write(parsed.store.clone()));
        Ok(())
    }

    /// Read a file's content at a version (-1 for head). Layered files
    /// read through their indirection.
    pub fn read_file(&self, path: &str, version: i64) -> Result<Vec<u8>> {
        let lookup = self.lookup(path, version)?;
        match &lookup.leaf().node.body {
            NodeBody::PlainFile { content, .. } => self.ctx.content.read(content),
            NodeBody::LayeredFile { .. } => {
                let (content, _) =
                    cow::resolve_backing_content(&self.ctx, &lookup, lookup.len() - 1)?;
                self.ctx.content.read(&content)
            }
            _ => Err(Error::NotFound(format!("{} is not a file", path))),
        }
    }

    // ---- removal ----

    /// Remove a visible name. Under a plain directory the entry is
    /// severed; under a layered directory a tombstone is recorded so
    /// the name stays hidden even if the target still has it. The
    /// removed node itself is left for the orphan collector.
    pub fn remove(&self, parent: &str, name: &str) -> Result<()> {
        let parsed = AvmPath::parse(parent)?;
        let child_path = parsed.child(name);
        let child = self
            .resolve(&child_path, HEAD_VERSION, false, false)?
            .ok_or_else(|| Error::NotFound(child_path.to_string()))?;
        let child_type = child.leaf().node.node_type();

        let writable = self.lookup_write(&parsed)?;
        let store = writable.store.clone();
        let mut dir = writable.leaf().node.clone();

        if matches!(dir.body, NodeBody::LayeredDirectory { .. }) {
            self.ctx.entries.remove(dir.common.id, name)?;
            let tombstone =
                Node::new_deleted(self.ctx.nodes.next_id(), &store, &self.user, child_type);
            self.ctx.nodes.save(&tombstone)?;
            dir.add_deleted_name(name, tombstone.common.id)?;
        } else {
            self.ctx
                .entries
                .get(dir.common.id, name)?
                .ok_or_else(|| Error::NotFound(child_path.to_string()))?;
            self.ctx.entries.remove(dir.common.id, name)?;
        }
        dir.touch(&self.user)?;
        self.ctx.nodes.update(&dir)?;
        self.recorder.record(StoreEvent::Delete(store));
        debug!(parent = dir.common.id, name, "removed");
        Ok(())
    }

    // ---- queries ----

    /// Name-sorted merged listing of a directory: own entries shadow
    /// inherited ones; tombstoned names and opaque targets are hidden.
    pub fn get_listing(&self, path: &str, version: i64) -> Result<BTreeMap<String, NodeId>> {
        let parsed = AvmPath::parse(path)?;
        let lookup = self
            .resolve(&parsed, version, false, false)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.listing_of(&lookup, 0)
    }

    fn listing_of(&self, lookup: &Lookup, depth: usize) -> Result<BTreeMap<String, NodeId>> {
        let leaf = &lookup.leaf().node;
        if !leaf.is_directory() {
            return Err(Error::NotFound(format!(
                "node {} is not a directory",
                leaf.common.id
            )));
        }

        let mut out = BTreeMap::new();
        for (name, child_id) in self.ctx.entries.get_all(leaf.common.id)? {
            match self.ctx.nodes.get(child_id)? {
                Some(child) if !child.is_deleted() => {
                    out.insert(name, child_id);
                }
                Some(_) => {}
                None => warn!(parent = leaf.common.id, child_id, "dangling entry in listing"),
            }
        }

        if let NodeBody::LayeredDirectory {
            opaque: false,
            deleted,
            ..
        } = &leaf.body
        {
            if depth >= MAX_LISTING_DEPTH {
                warn!(node = leaf.common.id, "listing depth limit hit");
                return Ok(out);
            }
            let (target, target_version) =
                match effective_indirection(lookup, lookup.len() - 1) {
                    Ok(resolved) => resolved,
                    Err(Error::UnbackedIndirection(msg))
                    | Err(Error::MissingPrimaryAncestor(msg)) => {
                        warn!(node = leaf.common.id, %msg, "listing skips indirection");
                        return Ok(out);
                    }
                    Err(e) => return Err(e),
                };
            if let Ok(parsed) = AvmPath::parse(&target) {
                if let Some(sub) = self.resolve(&parsed, target_version, false, false)? {
                    if sub.leaf().node.is_directory() {
                        for (name, child_id) in self.listing_of(&sub, depth + 1)? {
                            if !deleted.contains_key(&name) && !out.contains_key(&name) {
                                out.insert(name, child_id);
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Tombstoned names recorded on a layered directory (empty for a
    /// plain directory).
    pub fn deleted_names(&self, path: &str) -> Result<Vec<String>> {
        let lookup = self.lookup(path, HEAD_VERSION)?;
        match &lookup.leaf().node.body {
            NodeBody::LayeredDirectory { deleted, .. } => {
                Ok(deleted.keys().cloned().collect())
            }
            NodeBody::PlainDirectory => Ok(Vec::new()),
            _ => Err(Error::NotFound(format!("{} is not a directory", path))),
        }
    }

    /// Effective indirection of a layered node. Works on opaque
    /// directories too; opacity only affects lookup and listing.
    pub fn get_indirection(&self, path: &str) -> Result<(String, i64)> {
        let lookup = self.lookup(path, HEAD_VERSION)?;
        if !lookup.leaf().node.is_layered() {
            return Err(Error::UnbackedIndirection(format!(
                "{} is not layered",
                path
            )));
        }
        effective_indirection(&lookup, lookup.len() - 1)
    }

    /// Toggle a layered directory's opacity
    pub fn set_opacity(&self, path: &str, opaque: bool) -> Result<()> {
        let parsed = AvmPath::parse(path)?;
        let writable = self.lookup_write(&parsed)?;
        let mut node = writable.leaf().node.clone();
        node.set_opacity(opaque)?;
        node.touch(&self.user)?;
        self.ctx.nodes.update(&node)?;
        self.recorder
            .record(StoreEvent::Write(parsed.store.clone()));
        Ok(())
    }

    // ---- properties and aspects ----

    pub fn set_property(&self, path: &str, name: QName, value: PropertyValue) -> Result<()> {
        let parsed = AvmPath::parse(path)?;
        let writable = self.lookup_write(&parsed)?;
        let mut node = writable.leaf().node.clone();
        node.set_property(name, value)?;
        node.touch(&self.user)?;
        self.ctx.nodes.update(&node)?;
        self.recorder
            .record(StoreEvent::Write(parsed.store.clone()));
        Ok(())
    }

    pub fn get_property(
        &self,
        path: &str,
        version: i64,
        name: &QName,
    ) -> Result<Option<PropertyValue>> {
        let lookup = self.lookup(path, version)?;
        Ok(lookup.leaf().node.get_property(name).cloned())
    }

    pub fn add_aspect(&self, path: &str, name: QName) -> Result<()> {
        let parsed = AvmPath::parse(path)?;
        let writable = self.lookup_write(&parsed)?;
        let mut node = writable.leaf().node.clone();
        node.add_aspect(name)?;
        node.touch(&self.user)?;
        self.ctx.nodes.update(&node)?;
        self.recorder
            .record(StoreEvent::Write(parsed.store.clone()));
        Ok(())
    }
}
