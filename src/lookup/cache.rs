//! Lookup cache
//!
//! Caches completed Lookups keyed by (store, version, path, write,
//! include-deleted). Hits are freshened against current node records
//! before being returned; stale entries are evicted and treated as
//! misses. Invalidation is event-driven: write/delete/snapshot events
//! fire at transaction commit, rollback clears the cache outright.
//!
//! Layered lookups are invalidated globally on any write or delete,
//! because an indirection can make content from any store visible in
//! any other; non-layered lookups are store-local and pruned precisely.

use crate::error::Result;
use crate::lookup::{Lookup, LookupKey, PathWalker};
use crate::store::StoreContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Shared, process-wide cache of completed Lookups. One mutex domain;
/// nothing under the lock blocks on I/O.
pub struct LookupCache {
    inner: Mutex<HashMap<LookupKey, Lookup>>,
}

impl LookupCache {
    pub fn new() -> Self {
        LookupCache {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve through the cache, delegating to the path walker on a
    /// miss. Read misses may be satisfied by a cached write lookup for
    /// the same path (a write lookup is always at least as fresh).
    /// Failed resolutions are never cached.
    pub fn lookup(
        &self,
        ctx: &StoreContext,
        store: &str,
        version: i64,
        components: &[String],
        write: bool,
        include_deleted: bool,
    ) -> Result<Option<Lookup>> {
        let key = LookupKey::new(store, version, components, write, include_deleted);
        let mut map = self.inner.lock();

        if let Some(hit) = map.get(&key) {
            match Self::freshen(ctx, hit)? {
                Some(fresh) => {
                    debug!(store, path = %key.path, write, "lookup cache hit");
                    return Ok(Some(fresh));
                }
                None => {
                    debug!(store, path = %key.path, write, "evicting stale lookup");
                    map.remove(&key);
                }
            }
        }

        if !write {
            let write_key = LookupKey::new(store, version, components, true, include_deleted);
            if let Some(hit) = map.get(&write_key) {
                match Self::freshen(ctx, hit)? {
                    Some(fresh) => {
                        debug!(store, path = %key.path, "read satisfied by write lookup");
                        return Ok(Some(fresh));
                    }
                    None => {
                        map.remove(&write_key);
                    }
                }
            }
        }

        let walker = PathWalker::new(ctx);
        match walker.resolve(store, version, components, write, include_deleted)? {
            Some(lookup) => {
                map.insert(key, lookup.clone());
                Ok(Some(lookup))
            }
            None => Ok(None),
        }
    }

    /// Re-cache a lookup after copy-on-write materialization so cached
    /// write entries always describe the writable node chain.
    pub(crate) fn store_lookup(
        &self,
        store: &str,
        version: i64,
        components: &[String],
        write: bool,
        include_deleted: bool,
        lookup: Lookup,
    ) {
        let key = LookupKey::new(store, version, components, write, include_deleted);
        self.inner.lock().insert(key, lookup);
    }

    /// Rebuild a cached Lookup against current node records. `None` if
    /// any referenced node no longer exists.
    fn freshen(ctx: &StoreContext, cached: &Lookup) -> Result<Option<Lookup>> {
        let mut fresh = cached.clone();
        for index in 0..fresh.len() {
            let id = fresh.get(index).node.common.id;
            match ctx.nodes.get(id)? {
                Some(node) => fresh.set_node(index, node),
                None => return Ok(None),
            }
        }
        Ok(Some(fresh))
    }

    /// A transaction that wrote to `store` committed: drop that
    /// store's read entries, plus every layered entry anywhere.
    pub fn on_write(&self, store: &str) {
        let mut map = self.inner.lock();
        map.retain(|key, lookup| {
            !((key.store == store && !key.write) || lookup.is_layered())
        });
        debug!(store, remaining = map.len(), "cache invalidated after write");
    }

    /// A transaction that deleted from `store` committed: drop all of
    /// that store's entries, plus every layered entry anywhere.
    pub fn on_delete(&self, store: &str) {
        let mut map = self.inner.lock();
        map.retain(|key, lookup| key.store != store && !lookup.is_layered());
        debug!(store, remaining = map.len(), "cache invalidated after delete");
    }

    /// `store` was snapshotted: its write entries now point at a frozen
    /// generation; drop them, plus every layered entry anywhere. Read
    /// entries stay valid because committed version content is
    /// unchanged.
    pub fn on_snapshot(&self, store: &str) {
        let mut map = self.inner.lock();
        map.retain(|key, lookup| {
            !((key.store == store && key.write) || lookup.is_layered())
        });
        debug!(store, remaining = map.len(), "cache invalidated after snapshot");
    }

    /// Unconditional clear, used on transaction rollback.
    pub fn reset(&self) {
        self.inner.lock().clear();
        debug!("lookup cache reset");
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new()
    }
}
