use std::io;

use clap::Parser;
use vaultfs::config::{Cli, Command};
use vaultfs::{Options, VaultError};

#[test]
fn test_default_options() {
    let opts = Options::default();
    assert!(opts.enable_journaling);
    assert!(!opts.enable_versioning);
    assert_eq!(opts.max_versions, 10);
}

#[test]
fn test_partial_json_falls_back_to_defaults() {
    let opts = Options::from_json(r#"{"enable_versioning": true}"#).unwrap();
    assert!(opts.enable_versioning);
    assert!(opts.enable_journaling);
    assert_eq!(opts.max_versions, 10);
}

#[test]
fn test_cli_flags_map_to_options() {
    let cli = Cli::parse_from([
        "vaultfs",
        "--root",
        "/tmp/x",
        "--versioning",
        "--no-journal",
        "--max-versions",
        "3",
        "ls",
    ]);
    let opts = cli.global.options();
    assert!(opts.enable_versioning);
    assert!(!opts.enable_journaling);
    assert_eq!(opts.max_versions, 3);
    assert!(matches!(cli.command, Command::Ls { ref path } if path == "."));
}

#[test]
fn test_host_not_found_maps_to_not_found() {
    let err = VaultError::io("a.txt", io::Error::from(io::ErrorKind::NotFound));
    assert!(matches!(err, VaultError::NotFound(ref p) if p == "a.txt"));
    assert!(err.is_not_found());

    let err = VaultError::io("b.txt", io::Error::from(io::ErrorKind::PermissionDenied));
    assert!(matches!(err, VaultError::Io { ref path, .. } if path == "b.txt"));
    assert!(err.to_string().contains("b.txt"));
    assert!(!err.is_not_found());
}
