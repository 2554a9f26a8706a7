//! Unit tests for workspace file helpers.

use std::collections::BTreeMap;

use agent_steward::models::{AgentId, EditSet, MessageId, Revision};
use agent_steward::workspace::{
    fingerprint, fingerprint_of, read_optional, restore, write_atomic, DisposableCopy, Workspace,
};

#[test]
fn write_atomic_creates_parents_and_replaces() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested/deep/file.rs");

    write_atomic(&path, "first").expect("write");
    write_atomic(&path, "second").expect("overwrite");

    assert_eq!(std::fs::read_to_string(&path).expect("read"), "second");
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().expect("parent"))
        .expect("list")
        .collect();
    assert_eq!(leftovers.len(), 1, "no temporary files left behind");
}

#[test]
fn restore_rewrites_or_removes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let existing = dir.path().join("a.rs");
    let created = dir.path().join("b.rs");
    write_atomic(&existing, "changed").expect("write");
    write_atomic(&created, "new").expect("write");

    restore(&existing, Some("original")).expect("restore");
    restore(&created, None).expect("remove");
    restore(&created, None).expect("removing twice is fine");

    assert_eq!(std::fs::read_to_string(&existing).expect("read"), "original");
    assert!(!created.exists());
}

#[test]
fn read_optional_maps_missing_to_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert_eq!(read_optional(&dir.path().join("absent")).expect("read"), None);
}

#[test]
fn fingerprint_is_sha256_hex() {
    assert_eq!(
        fingerprint(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(fingerprint_of(None), None);
    assert_eq!(fingerprint_of(Some("abc")), Some(fingerprint(b"abc")));
}

#[test]
fn workspace_read_resolves_relative_paths() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().canonicalize().expect("canonical");
    std::fs::write(root.join("a.rs"), "fn a() {}").expect("seed");
    let workspace = Workspace::new(root.clone());

    assert_eq!(workspace.root(), root.as_path());
    assert_eq!(workspace.read("a.rs").expect("read").as_deref(), Some("fn a() {}"));
    assert_eq!(workspace.read("missing.rs").expect("read"), None);
    assert!(workspace.read("../escape.rs").is_err());
}

#[test]
fn disposable_copy_overlays_edit_set_and_skips_reserved_dirs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    std::fs::create_dir_all(root.join("src")).expect("mkdir");
    std::fs::create_dir_all(root.join("target/debug")).expect("mkdir");
    std::fs::create_dir_all(root.join(".steward")).expect("mkdir");
    std::fs::write(root.join("src/lib.rs"), "old").expect("seed");
    std::fs::write(root.join("src/other.rs"), "other").expect("seed");
    std::fs::write(root.join("target/debug/bin"), "bin").expect("seed");

    let edit_set = EditSet {
        files: BTreeMap::from([
            ("src/lib.rs".to_owned(), "new".to_owned()),
            ("src/added.rs".to_owned(), "added".to_owned()),
        ]),
        base_revision: Revision::new("rev-0"),
        base_fingerprints: BTreeMap::new(),
        origin_message: MessageId::new("m1"),
        agent: AgentId::slot(1),
        summary: "s".into(),
    };

    let copy = DisposableCopy::create(root, &edit_set).expect("copy");
    let copy_root = copy.path().to_path_buf();

    assert_eq!(std::fs::read_to_string(copy_root.join("src/lib.rs")).expect("r"), "new");
    assert_eq!(std::fs::read_to_string(copy_root.join("src/added.rs")).expect("r"), "added");
    assert_eq!(std::fs::read_to_string(copy_root.join("src/other.rs")).expect("r"), "other");
    assert!(!copy_root.join("target").exists());
    assert!(!copy_root.join(".steward").exists());
    assert_eq!(std::fs::read_to_string(root.join("src/lib.rs")).expect("r"), "old");

    copy.discard().expect("discard");
    assert!(!copy_root.exists());
}

#[test]
fn disposable_copy_keeps_nested_dirs_named_like_reserved_ones() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    std::fs::create_dir_all(root.join("src/target")).expect("mkdir");
    std::fs::write(root.join("src/target/x.rs"), "pub fn x() {}").expect("seed");

    let edit_set = EditSet {
        files: BTreeMap::from([("src/lib.rs".to_owned(), "mod target;".to_owned())]),
        base_revision: Revision::new("rev-0"),
        base_fingerprints: BTreeMap::new(),
        origin_message: MessageId::new("m1"),
        agent: AgentId::slot(1),
        summary: "s".into(),
    };

    let copy = DisposableCopy::create(root, &edit_set).expect("copy");
    assert_eq!(
        std::fs::read_to_string(copy.path().join("src/target/x.rs")).expect("r"),
        "pub fn x() {}"
    );
}
