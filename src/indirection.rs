//! Effective-indirection resolution
//!
//! Computes, for a layered node at a given lookup position, the
//! underlying path its indirection refers to and the version that
//! target should be read at. A primary indirection carries its own
//! target; a non-primary layered directory inherits the enclosing
//! layer's running indirection, which the trail extends name by name
//! as it is built. Consulting the trail's running value rather than
//! scanning for a primary ancestor keeps stacked layers resolvable:
//! a fall-through may splice a non-primary directory onto a trail
//! that never visited that layer's primary.

use crate::error::{Error, Result};
use crate::lookup::Lookup;
use crate::node::{NodeBody, HEAD_VERSION};

/// Pin the stored indirection version to the enclosing lookup: a
/// head-relative lookup always resolves targets at head, so frozen
/// historical version numbers never leak into it.
fn pin_version(lookup: &Lookup, stored: i64) -> i64 {
    if lookup.version < 0 {
        HEAD_VERSION
    } else {
        stored
    }
}

/// Compute the underlying (path, version) for the layered node at
/// `index` of the lookup trail.
///
/// Opacity is a listing/lookup concern and is deliberately ignored
/// here; explicit indirection queries work on opaque directories too.
pub fn effective_indirection(lookup: &Lookup, index: usize) -> Result<(String, i64)> {
    let component = lookup.get(index);
    match &component.node.body {
        // Layered files and primary layered directories carry their
        // own target; the trail recorded it on push.
        NodeBody::LayeredFile { .. }
        | NodeBody::LayeredDirectory {
            primary_indirection: true,
            ..
        } => match &component.indirection {
            Some((target, version)) => Ok((target.clone(), pin_version(lookup, *version))),
            None => Err(Error::UnbackedIndirection(format!(
                "primary layered directory {} has no indirection path",
                component.node.common.id
            ))),
        },

        NodeBody::LayeredDirectory {
            primary_indirection: false,
            layer_id,
            ..
        } => match &component.indirection {
            Some((target, version)) => Ok((target.clone(), pin_version(lookup, *version))),
            // Only reachable on a hand-built trail that entered the
            // directory outside any layer.
            None => Err(Error::MissingPrimaryAncestor(format!(
                "layered directory {} (layer {}) entered outside any layer",
                component.node.common.id, layer_id
            ))),
        },

        _ => Err(Error::UnbackedIndirection(format!(
            "node {} is not layered",
            component.node.common.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeBody};

    fn non_primary_dir(id: u64, layer_id: i64) -> Node {
        Node::new_layered_subdirectory(id, "main", "alice", layer_id)
    }

    #[test]
    fn test_primary_is_authoritative() {
        let mut lookup = Lookup::new("main", -1, false, false);
        lookup.push(Node::new_plain_directory(1, "main", "alice"), "", false);
        lookup.push(
            Node::new_layered_directory(2, "main", "alice", "main:/a", 1),
            "b",
            false,
        );

        let (target, version) = effective_indirection(&lookup, 1).unwrap();
        assert_eq!(target, "main:/a");
        assert_eq!(version, -1);
    }

    #[test]
    fn test_non_primary_inherits_from_ancestor() {
        let mut lookup = Lookup::new("main", -1, false, false);
        lookup.push(Node::new_plain_directory(1, "main", "alice"), "", false);
        lookup.push(
            Node::new_layered_directory(2, "main", "alice", "main:/a", 1),
            "b",
            false,
        );
        lookup.push(non_primary_dir(3, 1), "sub", false);
        lookup.push(non_primary_dir(4, 1), "deep", false);

        let (target, _) = effective_indirection(&lookup, 3).unwrap();
        assert_eq!(target, "main:/a/sub/deep");
    }

    #[test]
    fn test_layer_id_mismatch_is_skipped() {
        let mut lookup = Lookup::new("main", -1, false, false);
        lookup.push(Node::new_plain_directory(1, "main", "alice"), "", false);
        lookup.push(
            Node::new_layered_directory(2, "main", "alice", "other:/p", 5),
            "outer",
            false,
        );
        lookup.push(
            Node::new_layered_directory(3, "main", "alice", "main:/a", 9),
            "inner",
            false,
        );
        lookup.push(non_primary_dir(4, 9), "sub", false);

        // Must match layer 9 (inner), not layer 5 (outer).
        let (target, _) = effective_indirection(&lookup, 3).unwrap();
        assert_eq!(target, "main:/a/sub");
    }

    #[test]
    fn test_inherited_through_foreign_layer() {
        // A fall-through from a stacked layer splices a non-primary
        // directory belonging to the target's layer onto the trail;
        // the running indirection resolves it even though that layer's
        // primary was never visited.
        let mut lookup = Lookup::new("main", -1, false, false);
        lookup.push(Node::new_plain_directory(1, "main", "alice"), "", false);
        lookup.push(
            Node::new_layered_directory(2, "main", "alice", "main:/b", 2),
            "c",
            false,
        );
        lookup.push(non_primary_dir(3, 1), "sub", true);

        let (target, version) = effective_indirection(&lookup, 2).unwrap();
        assert_eq!(target, "main:/b/sub");
        assert_eq!(version, -1);
    }

    #[test]
    fn test_missing_primary_ancestor() {
        let mut lookup = Lookup::new("main", -1, false, false);
        lookup.push(Node::new_plain_directory(1, "main", "alice"), "", false);
        lookup.push(non_primary_dir(2, 1), "orphan", false);

        let err = effective_indirection(&lookup, 1).unwrap_err();
        assert!(matches!(err, Error::MissingPrimaryAncestor(_)));
    }

    #[test]
    fn test_version_pinning() {
        let mut head = Lookup::new("main", -1, false, false);
        head.push(Node::new_plain_directory(1, "main", "alice"), "", false);
        let mut file = Node::new_layered_file(2, "main", "alice", "main:/a/f");
        if let NodeBody::LayeredFile {
            indirection_version, ..
        } = &mut file.body
        {
            *indirection_version = 4;
        }
        head.push(file.clone(), "f", false);

        // Head-relative lookups ignore the stored version.
        let (_, version) = effective_indirection(&head, 1).unwrap();
        assert_eq!(version, -1);

        // Versioned lookups use it verbatim.
        let mut pinned = Lookup::new("main", 6, false, false);
        pinned.push(Node::new_plain_directory(1, "main", "alice"), "", false);
        pinned.push(file, "f", false);
        let (_, version) = effective_indirection(&pinned, 1).unwrap();
        assert_eq!(version, 4);
    }
}
