use std::path::PathBuf;

use vaultfs::fs::digest::path_digest;
use vaultfs::fs::path::{basename, join_path, parent_path, sanitize_path, split_path, PathResolver};
use vaultfs::VaultError;

fn resolver() -> PathResolver {
    PathResolver::new(PathBuf::from("/data"))
}

#[test]
fn test_resolves_plain_relative_paths() {
    let r = resolver().resolve("docs/a.txt").unwrap();
    assert_eq!(r.absolute, PathBuf::from("/data/docs/a.txt"));
    assert_eq!(r.key(), "docs/a.txt");
}

#[test]
fn test_leading_slash_is_relative_to_root() {
    let r = resolver().resolve("/etc/passwd").unwrap();
    assert_eq!(r.absolute, PathBuf::from("/data/etc/passwd"));
}

#[test]
fn test_dot_segments_collapse() {
    let r = resolver().resolve("./a/./b/../c.txt").unwrap();
    assert_eq!(r.absolute, PathBuf::from("/data/a/c.txt"));
}

#[test]
fn test_escapes_are_rejected() {
    for input in ["..", "../", "../etc/passwd", "a/../../b", "a/b/../../../x", "../../.."] {
        let err = resolver().resolve(input).unwrap_err();
        assert!(
            matches!(err, VaultError::PathEscapesRoot(_)),
            "{input} should escape, got {err:?}"
        );
    }
}

#[test]
fn test_reentering_root_through_parent_is_allowed() {
    let r = resolver().resolve("../data/x").unwrap();
    assert_eq!(r.absolute, PathBuf::from("/data/x"));
}

#[test]
fn test_resolved_paths_stay_under_root() {
    for input in ["a", "a/b/c", "a/../b", ".", "/", "x/./y/../z"] {
        let r = resolver().resolve(input).unwrap();
        assert!(r.absolute.starts_with("/data"), "{input} -> {:?}", r.absolute);
    }
}

#[test]
fn test_root_resolves_to_root() {
    let r = resolver().resolve(".").unwrap();
    assert!(r.is_root());
    assert_eq!(r.key(), ".");
    assert!(r.parent().is_none());

    let parent = resolver().resolve("a.txt").unwrap().parent().unwrap();
    assert!(parent.is_root());
    assert_eq!(parent.absolute, PathBuf::from("/data"));
}

#[test]
fn test_empty_and_nul_paths_are_invalid() {
    assert!(matches!(
        resolver().resolve(""),
        Err(VaultError::InvalidPath { .. })
    ));
    assert!(matches!(
        resolver().resolve("a\0b"),
        Err(VaultError::InvalidPath { .. })
    ));
}

#[test]
fn test_reserved_directories_are_not_addressable() {
    for input in [".journal/fs.log", ".versions", "/.attributes/x.json"] {
        assert!(matches!(
            resolver().resolve(input),
            Err(VaultError::InvalidPath { .. })
        ));
    }
    // Only reserved at the top level.
    assert!(resolver().resolve("docs/.journal").is_ok());
}

#[test]
fn test_string_helpers() {
    assert_eq!(sanitize_path("/a/b/../c"), "a/c");
    assert_eq!(sanitize_path(""), ".");
    assert_eq!(join_path(&["a", "b", "../c"]), "a/c");
    assert_eq!(split_path("a/b/c"), vec!["a", "b", "c"]);
    assert!(split_path(".").is_empty());
    assert_eq!(parent_path("a/b/c"), "a/b");
    assert_eq!(parent_path("a"), ".");
    assert_eq!(basename("a/b/c.txt"), "c.txt");
}

#[test]
fn test_path_digest_is_stable_sha256_hex() {
    let a = path_digest("docs/a.txt");
    assert_eq!(a, path_digest("docs/a.txt"));
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a, path_digest("docs/b.txt"));
    assert_eq!(
        path_digest(""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}
