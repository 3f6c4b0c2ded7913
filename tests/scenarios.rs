//! End-to-end scenarios over the in-memory stores: layering,
//! tombstones, snapshots, and copy-on-write interacting through the
//! full Repository surface.

use avmfs::node::{NodeBody, NodeType};
use avmfs::{Error, Repository};
use std::sync::Once;

static INIT: Once = Once::new();

/// Route crate logs through the test writer; RUST_LOG selects detail.
fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn repo_with_base() -> Repository {
    init_tracing();
    let repo = Repository::in_memory("alice");
    repo.create_store("main").unwrap();
    repo.create_directory("main:/", "a").unwrap();
    repo.create_file("main:/a", "f", b"under-f").unwrap();
    repo.create_file("main:/a", "g", b"under-g").unwrap();
    repo.commit();
    repo
}

#[test]
fn layer_reads_through_then_diverges_on_write() {
    let repo = repo_with_base();
    repo.create_layered_directory("main:/a", "main:/", "b").unwrap();
    repo.commit();

    // Transparent read-through before any write.
    assert_eq!(repo.read_file("main:/b/f", -1).unwrap(), b"under-f");
    let listing = repo.get_listing("main:/b", -1).unwrap();
    assert_eq!(listing.keys().cloned().collect::<Vec<_>>(), vec!["f", "g"]);

    // Writing through the layer copies; the underlying file keeps its
    // content and identity.
    let under_id = repo.lookup("main:/a/f", -1).unwrap().leaf().node.common.id;
    repo.write_file("main:/b/f", b"over-f").unwrap();
    repo.commit();

    assert_eq!(repo.read_file("main:/b/f", -1).unwrap(), b"over-f");
    assert_eq!(repo.read_file("main:/a/f", -1).unwrap(), b"under-f");

    let over = repo.lookup("main:/b/f", -1).unwrap();
    let leaf = over.leaf();
    assert!(!leaf.indirect);
    assert_ne!(leaf.node.common.id, under_id);
    assert_eq!(leaf.node.common.ancestor, Some(under_id));

    // The untouched sibling still shows through.
    assert_eq!(repo.read_file("main:/b/g", -1).unwrap(), b"under-g");

    // Divergence survives a snapshot and further writes underneath.
    repo.snapshot("main").unwrap();
    repo.commit();
    repo.write_file("main:/a/f", b"under-f-3").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/b/f", -1).unwrap(), b"over-f");
    assert_eq!(repo.read_file("main:/a/f", -1).unwrap(), b"under-f-3");
}

#[test]
fn layer_tracks_later_changes_to_its_target() {
    let repo = repo_with_base();
    repo.snapshot("main").unwrap();
    repo.commit();
    repo.create_layered_directory("main:/a", "main:/", "b").unwrap();
    repo.commit();

    repo.create_file("main:/a", "late", b"late-content").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/b/late", -1).unwrap(), b"late-content");

    repo.write_file("main:/a/f", b"under-f-2").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/b/f", -1).unwrap(), b"under-f-2");
}

#[test]
fn tombstone_hides_surfaces_and_revives() {
    let repo = repo_with_base();
    repo.create_layered_directory("main:/a", "main:/", "b").unwrap();
    repo.commit();

    repo.remove("main:/b", "f").unwrap();
    repo.commit();

    // Hidden in the layer, intact underneath.
    assert!(matches!(repo.lookup("main:/b/f", -1), Err(Error::NotFound(_))));
    assert_eq!(repo.read_file("main:/a/f", -1).unwrap(), b"under-f");
    let listing = repo.get_listing("main:/b", -1).unwrap();
    assert!(!listing.contains_key("f"));
    assert!(listing.contains_key("g"));

    // The tombstone itself is reachable on request and remembers what
    // it replaced.
    let deleted = repo.lookup_deleted("main:/b/f", -1).unwrap();
    match deleted.leaf().node.body {
        NodeBody::Deleted { deleted_type } => assert_eq!(deleted_type, NodeType::PlainFile),
        ref other => panic!("expected tombstone, got {:?}", other),
    }

    // Creating the name again clears the tombstone.
    repo.create_file("main:/b", "f", b"revived").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/b/f", -1).unwrap(), b"revived");
    assert!(repo.deleted_names("main:/b").unwrap().is_empty());
    assert_eq!(repo.read_file("main:/a/f", -1).unwrap(), b"under-f");
}

#[test]
fn snapshot_freezes_and_write_copies_forward() {
    let repo = repo_with_base();
    let v1 = repo.snapshot("main").unwrap();
    repo.commit();
    assert_eq!(v1, 1);

    let frozen = repo.lookup("main:/a/f", -1).unwrap().leaf().node.clone();
    assert!(frozen.common.store_new.is_none());

    repo.write_file("main:/a/f", b"edited").unwrap();
    repo.commit();

    // Head sees the edit through a fresh node chain.
    let head = repo.lookup("main:/a/f", -1).unwrap().leaf().node.clone();
    assert_ne!(head.common.id, frozen.common.id);
    assert_ne!(head.common.guid, frozen.common.guid);
    assert_eq!(head.common.ancestor, Some(frozen.common.id));
    assert!(head.is_writable_in("main"));
    assert_eq!(repo.read_file("main:/a/f", -1).unwrap(), b"edited");

    // The snapshotted version is untouched, down to node identity.
    assert_eq!(repo.read_file("main:/a/f", v1).unwrap(), b"under-f");
    let old = repo.lookup("main:/a/f", v1).unwrap().leaf().node.clone();
    assert_eq!(old.common.id, frozen.common.id);

    let v2 = repo.snapshot("main").unwrap();
    repo.commit();
    assert_eq!(v2, 2);
    assert_eq!(repo.read_file("main:/a/f", v2).unwrap(), b"edited");
    assert_eq!(repo.read_file("main:/a/f", v1).unwrap(), b"under-f");
}

#[test]
fn version_zero_is_the_empty_store() {
    init_tracing();
    let repo = Repository::in_memory("alice");
    repo.create_store("main").unwrap();
    repo.commit();

    assert!(repo.get_listing("main:/", 0).unwrap().is_empty());
    repo.create_directory("main:/", "a").unwrap();
    repo.commit();
    assert!(repo.get_listing("main:/", 0).unwrap().is_empty());
    assert_eq!(repo.get_listing("main:/", -1).unwrap().len(), 1);
}

#[test]
fn cross_store_layer_is_transparent_and_isolated() {
    let repo = repo_with_base();
    repo.create_store("branch").unwrap();
    repo.create_layered_directory("main:/a", "branch:/", "work").unwrap();
    repo.commit();

    assert_eq!(repo.read_file("branch:/work/f", -1).unwrap(), b"under-f");

    // A branch-side write never leaks back into main.
    repo.write_file("branch:/work/f", b"branch-f").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("branch:/work/f", -1).unwrap(), b"branch-f");
    assert_eq!(repo.read_file("main:/a/f", -1).unwrap(), b"under-f");

    // Unmodified names keep tracking main's head.
    repo.write_file("main:/a/g", b"under-g-2").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("branch:/work/g", -1).unwrap(), b"under-g-2");
}

#[test]
fn nested_path_reifies_with_computed_indirection() {
    let repo = repo_with_base();
    repo.create_directory("main:/a", "sub").unwrap();
    repo.create_file("main:/a/sub", "deep", b"deep-under").unwrap();
    repo.create_layered_directory("main:/a", "main:/", "b").unwrap();
    repo.commit();

    // Two inherited levels resolve without any stored indirection on
    // the intermediate directory.
    assert_eq!(repo.read_file("main:/b/sub/deep", -1).unwrap(), b"deep-under");

    repo.write_file("main:/b/sub/deep", b"deep-over").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/b/sub/deep", -1).unwrap(), b"deep-over");
    assert_eq!(repo.read_file("main:/a/sub/deep", -1).unwrap(), b"deep-under");

    // The reified intermediate directory computes its target from the
    // enclosing layer.
    let sub = repo.lookup("main:/b/sub", -1).unwrap();
    match &sub.leaf().node.body {
        NodeBody::LayeredDirectory {
            primary_indirection,
            indirection,
            ..
        } => {
            assert!(!primary_indirection);
            assert!(indirection.is_none());
        }
        other => panic!("expected layered directory, got {:?}", other),
    }
    let (target, _) = repo.get_indirection("main:/b/sub").unwrap();
    assert_eq!(target, "main:/a/sub");
}

#[test]
fn stacked_layers_resolve_list_and_tombstone() {
    let repo = repo_with_base();
    repo.create_layered_directory("main:/a", "main:/", "b").unwrap();
    repo.create_directory("main:/b", "sub").unwrap();
    repo.create_layered_directory("main:/b", "main:/", "c").unwrap();
    repo.commit();

    // Content appearing underneath after both layers exist shows
    // through the whole stack.
    repo.create_directory("main:/a", "sub").unwrap();
    repo.create_file("main:/a/sub", "deep", b"deep-under").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/b/sub/deep", -1).unwrap(), b"deep-under");
    assert_eq!(repo.read_file("main:/c/sub/deep", -1).unwrap(), b"deep-under");

    // Merged listings chain through both layers.
    let listing = repo.get_listing("main:/c", -1).unwrap();
    assert_eq!(
        listing.keys().cloned().collect::<Vec<_>>(),
        vec!["f", "g", "sub"]
    );
    let sub_listing = repo.get_listing("main:/c/sub", -1).unwrap();
    assert_eq!(sub_listing.keys().cloned().collect::<Vec<_>>(), vec!["deep"]);

    // The spliced middle directory overlays b's sub, one hop down.
    assert_eq!(repo.get_indirection("main:/c/sub").unwrap().0, "main:/b/sub");

    // A tombstone in the top layer hides a name inherited through the
    // middle one, which keeps it.
    repo.remove("main:/c", "f").unwrap();
    repo.commit();
    assert!(matches!(repo.lookup("main:/c/f", -1), Err(Error::NotFound(_))));
    assert_eq!(repo.read_file("main:/b/f", -1).unwrap(), b"under-f");

    // Writing through the stack copies into the top layer only.
    repo.write_file("main:/c/sub/deep", b"deep-top").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/c/sub/deep", -1).unwrap(), b"deep-top");
    assert_eq!(repo.read_file("main:/b/sub/deep", -1).unwrap(), b"deep-under");
    assert_eq!(repo.read_file("main:/a/sub/deep", -1).unwrap(), b"deep-under");
}

#[test]
fn opaque_layer_cuts_off_inheritance_only() {
    let repo = repo_with_base();
    repo.create_layered_directory("main:/a", "main:/", "b").unwrap();
    repo.create_file("main:/b", "own", b"own").unwrap();
    repo.commit();
    repo.set_opacity("main:/b", true).unwrap();
    repo.commit();

    // Inherited names vanish; direct entries and the stored
    // indirection remain visible.
    assert!(matches!(repo.lookup("main:/b/f", -1), Err(Error::NotFound(_))));
    let listing = repo.get_listing("main:/b", -1).unwrap();
    assert_eq!(listing.keys().cloned().collect::<Vec<_>>(), vec!["own"]);
    assert_eq!(repo.get_indirection("main:/b").unwrap().0, "main:/a");

    repo.set_opacity("main:/b", false).unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/b/f", -1).unwrap(), b"under-f");
}

#[test]
fn inherited_name_conflicts_on_create() {
    let repo = repo_with_base();
    repo.create_layered_directory("main:/a", "main:/", "b").unwrap();
    repo.commit();

    assert!(matches!(
        repo.create_file("main:/b", "f", b"x"),
        Err(Error::NameConflict(_))
    ));
}

#[test]
fn remove_in_plain_directory_severs_entry() {
    let repo = repo_with_base();
    repo.remove("main:/a", "g").unwrap();
    repo.commit();

    assert!(matches!(repo.lookup("main:/a/g", -1), Err(Error::NotFound(_))));
    let listing = repo.get_listing("main:/a", -1).unwrap();
    assert_eq!(listing.keys().cloned().collect::<Vec<_>>(), vec!["f"]);
    // Plain directories carry no tombstones.
    assert!(repo.deleted_names("main:/a").unwrap().is_empty());
}

#[test]
fn rollback_discards_cached_state() {
    let repo = repo_with_base();
    repo.lookup("main:/a/f", -1).unwrap();
    assert!(!repo.cache().is_empty());

    repo.write_file("main:/a/f", b"speculative").unwrap();
    repo.rollback();
    assert!(repo.cache().is_empty());

    // Resolution still works from a cold cache.
    assert!(repo.lookup("main:/a/f", -1).is_ok());
}

#[test]
fn layered_file_reifies_to_plain_on_write() {
    let repo = repo_with_base();
    repo.create_layered_file("main:/a/f", "main:/", "lf").unwrap();
    repo.commit();
    assert_eq!(repo.read_file("main:/lf", -1).unwrap(), b"under-f");

    repo.write_file("main:/lf", b"detached").unwrap();
    repo.commit();

    let leaf = repo.lookup("main:/lf", -1).unwrap().leaf().node.clone();
    assert_eq!(leaf.node_type(), NodeType::PlainFile);
    assert_eq!(repo.read_file("main:/lf", -1).unwrap(), b"detached");
    assert_eq!(repo.read_file("main:/a/f", -1).unwrap(), b"under-f");
}

#[test]
fn duplicate_store_name_rejected() {
    init_tracing();
    let repo = Repository::in_memory("alice");
    repo.create_store("main").unwrap();
    assert!(matches!(
        repo.create_store("main"),
        Err(Error::NameConflict(_))
    ));
}
