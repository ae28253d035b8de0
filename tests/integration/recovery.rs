use std::io::Write;

use vaultfs::storage::journal::JournalEntry;
use vaultfs::{Options, RecoveryReport, VaultError};

use crate::helpers::TestRoot;

fn append_raw(root: &TestRoot, entries: &[JournalEntry]) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(root.journal_path())
        .unwrap();
    for entry in entries {
        writeln!(file, "{}", serde_json::to_string(entry).unwrap()).unwrap();
    }
}

fn journal_lines(root: &TestRoot) -> usize {
    std::fs::read_to_string(root.journal_path())
        .unwrap()
        .lines()
        .count()
}

#[test]
fn test_recovery_rebuilds_lost_mutations() {
    let mut root = TestRoot::new();
    root.fs.create_dir("docs").unwrap();
    root.fs.write_file_with_mode("docs/a.txt", b"alpha", 0o600).unwrap();
    root.fs.write_file("b.txt", b"beta").unwrap();

    // Simulate a crash that lost the host-side effects.
    std::fs::remove_dir_all(root.host("docs")).unwrap();
    std::fs::write(root.host("b.txt"), b"torn wr").unwrap();

    root.reopen(Options::default());
    let report = root.fs.recover().unwrap();
    assert_eq!(report.entries_read, 3);
    assert_eq!(report.replayed, 3);
    assert_eq!(report.failed, 0);

    assert_eq!(root.read_string("docs/a.txt"), "alpha");
    assert_eq!(root.fs.stat("docs/a.txt").unwrap().mode, 0o600);
    assert_eq!(root.read_string("b.txt"), "beta");
}

#[test]
fn test_recovery_converges_to_last_entry_per_path() {
    let root = TestRoot::new();
    append_raw(
        &root,
        &[
            JournalEntry::write("a", b"a1", 0o644),
            JournalEntry::write("b", b"b1", 0o644),
            JournalEntry::write("a", b"a2", 0o644),
            JournalEntry::write("c", b"c1", 0o644),
            JournalEntry::delete("b", false),
            JournalEntry::write("a", b"a3", 0o644),
        ],
    );

    let report = root.fs.recover().unwrap();
    assert_eq!(
        report,
        RecoveryReport {
            entries_read: 6,
            corrupt_skipped: 0,
            unique_paths: 3,
            replayed: 3,
            failed: 0,
        }
    );
    assert_eq!(root.read_string("a"), "a3");
    assert_eq!(root.read_string("c"), "c1");
    assert!(!root.fs.exists("b"));
}

#[test]
fn test_replay_does_not_append_to_the_journal() {
    let root = TestRoot::new();
    root.fs.write_file("a", b"1").unwrap();
    root.fs.set_attribute("a", "k", "v").unwrap();
    let before = journal_lines(&root);

    root.fs.recover().unwrap();
    root.fs.recover().unwrap();
    assert_eq!(journal_lines(&root), before);

    // The stream is usable again after recovery.
    root.fs.write_file("b", b"2").unwrap();
    assert_eq!(journal_lines(&root), before + 1);
}

#[test]
fn test_corrupt_lines_are_counted_and_skipped() {
    let root = TestRoot::new();
    root.fs.write_file("ok.txt", b"fine").unwrap();
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(root.journal_path())
            .unwrap();
        file.write_all(b"{\"operation\":\"write\",\"path\":\"tru\n").unwrap();
        file.write_all(b"\n").unwrap();
        file.write_all(b"garbage\n").unwrap();
    }
    std::fs::remove_file(root.host("ok.txt")).unwrap();

    let report = root.fs.recover().unwrap();
    assert_eq!(report.corrupt_skipped, 2);
    assert_eq!(report.replayed, 1);
    assert_eq!(root.read_string("ok.txt"), "fine");
}

#[test]
fn test_directory_deletes_and_attributes_replay() {
    let root = TestRoot::new();
    std::fs::create_dir_all(root.host("old/nested")).unwrap();
    std::fs::write(root.host("kept.txt"), b"k").unwrap();
    append_raw(
        &root,
        &[
            JournalEntry::delete("old", true),
            JournalEntry::set_attr("kept.txt", "tag", "restored"),
            JournalEntry::mkdir("fresh/dir"),
        ],
    );

    let report = root.fs.recover().unwrap();
    assert_eq!(report.failed, 0);
    assert!(!root.fs.exists("old"));
    assert!(root.fs.is_dir("fresh/dir"));
    assert_eq!(root.fs.get_attribute("kept.txt", "tag").unwrap(), "restored");
}

#[test]
fn test_attribute_entry_shadows_earlier_write_of_same_path() {
    // Only the final entry per path is replayed, so a write followed by a
    // setattr replays just the setattr.
    let root = TestRoot::new();
    append_raw(
        &root,
        &[
            JournalEntry::write("doc.txt", b"body", 0o644),
            JournalEntry::set_attr("doc.txt", "k", "v"),
        ],
    );
    let report = root.fs.recover().unwrap();
    assert_eq!(report.unique_paths, 1);
    assert_eq!(report.failed, 1);
    assert!(!root.fs.exists("doc.txt"));
}

#[test]
fn test_replay_failures_do_not_stop_recovery() {
    let root = TestRoot::new();
    append_raw(
        &root,
        &[
            JournalEntry::write("../escape", b"x", 0o644),
            JournalEntry::write(".versions/x", b"x", 0o644),
            JournalEntry::write("good.txt", b"good", 0o644),
        ],
    );
    let report = root.fs.recover().unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.replayed, 1);
    assert_eq!(root.read_string("good.txt"), "good");
}

#[test]
fn test_rotate_starts_a_fresh_log() {
    let root = TestRoot::new();
    root.fs.write_file("a", b"1").unwrap();
    let rotated = root.fs.rotate_journal().unwrap();
    assert!(rotated.exists());
    assert_eq!(journal_lines(&root), 0);

    root.fs.write_file("b", b"2").unwrap();
    assert_eq!(journal_lines(&root), 1);
    let report = root.fs.recover().unwrap();
    assert_eq!(report.entries_read, 1);
}

#[test]
fn test_truncate_discards_entries() {
    let root = TestRoot::new();
    root.fs.write_file("a", b"1").unwrap();
    root.fs.truncate_journal().unwrap();
    assert_eq!(journal_lines(&root), 0);
    assert_eq!(root.fs.recover().unwrap(), RecoveryReport::default());
}

#[test]
fn test_recovery_needs_journaling() {
    let root = TestRoot::with_options(Options {
        enable_journaling: false,
        ..Options::default()
    });
    assert!(matches!(root.fs.recover(), Err(VaultError::JournalingDisabled)));
}
