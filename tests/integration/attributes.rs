use vaultfs::fs::digest::path_digest;
use vaultfs::storage::attributes::{AttributeMap, AttributeStore};
use vaultfs::VaultError;

use crate::helpers::TestRoot;

#[test]
fn test_set_get_list_delete() {
    let root = TestRoot::new();
    root.fs.write_file("a.txt", b"x").unwrap();

    root.fs.set_attribute("a.txt", "owner", "alice").unwrap();
    root.fs.set_attribute("a.txt", "color", "red").unwrap();
    root.fs.set_attribute("a.txt", "color", "green").unwrap();

    assert_eq!(root.fs.get_attribute("a.txt", "color").unwrap(), "green");
    let all = root.fs.list_attributes("a.txt").unwrap();
    assert_eq!(all.keys().collect::<Vec<_>>(), vec!["color", "owner"]);

    root.fs.delete_attribute("a.txt", "color").unwrap();
    assert!(matches!(
        root.fs.get_attribute("a.txt", "color"),
        Err(VaultError::AttributeNotFound { ref key, .. }) if key == "color"
    ));
}

#[test]
fn test_attributes_require_an_existing_target() {
    let root = TestRoot::new();
    assert!(root.fs.set_attribute("ghost.txt", "k", "v").unwrap_err().is_not_found());
    assert!(matches!(
        root.fs.set_attribute(".", "", "v"),
        Err(VaultError::InvalidPath { .. })
    ));
}

#[test]
fn test_directories_and_root_carry_attributes() {
    let root = TestRoot::new();
    root.fs.create_dir("docs").unwrap();
    root.fs.set_attribute("docs", "kind", "folder").unwrap();
    root.fs.set_attribute(".", "label", "vault").unwrap();

    assert_eq!(root.fs.get_attribute("docs/", "kind").unwrap(), "folder");
    assert_eq!(root.fs.get_attribute("/", "label").unwrap(), "vault");
    assert_eq!(root.fs.stat("docs").unwrap().attributes.len(), 1);
}

#[test]
fn test_last_attribute_delete_removes_the_record_file() {
    let root = TestRoot::new();
    root.fs.write_file("a.txt", b"x").unwrap();
    root.fs.set_attribute("a.txt", "only", "1").unwrap();
    let attr_dir = root.host(".attributes");
    assert_eq!(std::fs::read_dir(&attr_dir).unwrap().count(), 1);

    root.fs.delete_attribute("a.txt", "only").unwrap();
    assert_eq!(std::fs::read_dir(&attr_dir).unwrap().count(), 0);
}

#[test]
fn test_deleting_a_file_drops_its_attributes() {
    let root = TestRoot::new();
    root.fs.write_file("a.txt", b"x").unwrap();
    root.fs.set_attribute("a.txt", "k", "v").unwrap();
    root.fs.delete_file("a.txt").unwrap();

    root.fs.write_file("a.txt", b"new").unwrap();
    assert!(root.fs.list_attributes("a.txt").unwrap().is_empty());
}

#[test]
fn test_corrupt_record_does_not_break_listing() {
    let root = TestRoot::new();
    root.fs.write_file("good.txt", b"x").unwrap();
    root.fs.write_file("bad.txt", b"x").unwrap();
    root.fs.set_attribute("good.txt", "k", "v").unwrap();
    root.fs.set_attribute("bad.txt", "k", "v").unwrap();

    let bad_record = root
        .host(".attributes")
        .join(format!("{}.json", path_digest("bad.txt")));
    std::fs::write(&bad_record, b"not json at all").unwrap();

    assert!(matches!(
        root.fs.list_attributes("bad.txt"),
        Err(VaultError::CorruptRecord { .. })
    ));
    let entries = root.fs.list_dir(".").unwrap();
    assert_eq!(entries.len(), 2);
    let bad = entries.iter().find(|e| e.name == "bad.txt").unwrap();
    let good = entries.iter().find(|e| e.name == "good.txt").unwrap();
    assert!(bad.attributes.is_empty());
    assert_eq!(good.attributes.len(), 1);

    // Setting an attribute starts a fresh record.
    root.fs.set_attribute("bad.txt", "k2", "v2").unwrap();
    assert_eq!(root.fs.list_attributes("bad.txt").unwrap().len(), 1);
}

fn store() -> (tempfile::TempDir, AttributeStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = AttributeStore::new(dir.path().join(".attributes"));
    (dir, store)
}

fn record_file(dir: &tempfile::TempDir, key: &str) -> std::path::PathBuf {
    dir.path()
        .join(".attributes")
        .join(format!("{}.json", path_digest(key)))
}

#[test]
fn test_store_missing_record_is_empty() {
    let (_dir, store) = store();
    assert!(store.load("nothing").unwrap().is_empty());
    assert!(matches!(
        store.get("nothing", "k"),
        Err(VaultError::AttributeNotFound { .. })
    ));
}

#[test]
fn test_store_set_get_remove() {
    let (dir, store) = store();
    store.set("a.txt", "k", "v").unwrap();
    assert_eq!(store.get("a.txt", "k").unwrap(), "v");
    assert!(record_file(&dir, "a.txt").exists());

    assert!(matches!(
        store.remove("a.txt", "other"),
        Err(VaultError::AttributeNotFound { .. })
    ));
    store.remove("a.txt", "k").unwrap();
    assert!(!record_file(&dir, "a.txt").exists());
}

#[test]
fn test_store_corrupt_record_is_reported_and_replaced() {
    let (dir, store) = store();
    store.set("a.txt", "k", "v").unwrap();
    std::fs::write(record_file(&dir, "a.txt"), b"{not json").unwrap();

    assert!(matches!(store.load("a.txt"), Err(VaultError::CorruptRecord { .. })));
    assert!(store.load_lenient("a.txt").is_empty());

    store.set("a.txt", "fresh", "1").unwrap();
    let attrs = store.load("a.txt").unwrap();
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs["fresh"], "1");
}

#[test]
fn test_store_merge_and_replace() {
    let (_dir, store) = store();
    store.set("a", "keep", "1").unwrap();
    store.set("a", "over", "old").unwrap();

    let extra: AttributeMap = [("over", "new"), ("add", "2")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    store.merge("a", &extra).unwrap();
    let merged = store.load("a").unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(merged["over"], "new");
    assert_eq!(merged["keep"], "1");

    store.replace("a", &extra).unwrap();
    assert_eq!(store.load("a").unwrap(), extra);
    store.clear("a").unwrap();
    assert!(store.load("a").unwrap().is_empty());
}
