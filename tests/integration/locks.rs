use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vaultfs::state::expiry::start_expiry_thread;
use vaultfs::state::explicit_locks::ExplicitLockManager;
use vaultfs::{LockKind, VaultError};

use crate::helpers::TestRoot;

const FOREVER: Duration = Duration::ZERO;

#[test]
fn test_explicit_locks_are_keyed_by_normalized_path() {
    let root = TestRoot::new();
    root.fs.lock_path("docs/a.txt", "alice", LockKind::Write, FOREVER).unwrap();

    assert!(root.fs.is_locked("docs/../docs/a.txt").unwrap());
    assert!(matches!(
        root.fs.lock_path("/docs/a.txt", "bob", LockKind::Read, FOREVER),
        Err(VaultError::LockConflict { ref holder, ref kind, .. }) if holder == "alice" && kind == "write"
    ));
    assert_eq!(root.fs.lock_info("./docs/a.txt").unwrap().unwrap().owner, "alice");

    root.fs.unlock_path("docs/./a.txt", "alice").unwrap();
    assert!(!root.fs.is_locked("docs/a.txt").unwrap());
}

#[test]
fn test_explicit_locks_reject_escaping_paths() {
    let root = TestRoot::new();
    assert!(matches!(
        root.fs.lock_path("../x", "a", LockKind::Write, FOREVER),
        Err(VaultError::PathEscapesRoot(_))
    ));
}

#[test]
fn test_explicit_locks_do_not_block_primitive_operations() {
    let root = TestRoot::new();
    root.fs.lock_path("a.txt", "someone", LockKind::Write, FOREVER).unwrap();
    root.fs.write_file("a.txt", b"still writable").unwrap();
    assert_eq!(root.read_string("a.txt"), "still writable");
}

#[test]
fn test_single_slot_read_lock_keeps_only_latest_reader() {
    let root = TestRoot::new();
    root.fs.lock_path("p", "r1", LockKind::Read, FOREVER).unwrap();
    root.fs.lock_path("p", "r2", LockKind::Read, FOREVER).unwrap();

    assert_eq!(root.fs.all_locks().len(), 1);
    assert_eq!(root.fs.lock_info("p").unwrap().unwrap().owner, "r2");
    assert!(matches!(root.fs.unlock_path("p", "r1"), Err(VaultError::NotOwner { .. })));
    assert!(root
        .fs
        .try_lock_path("p", "w", LockKind::Write, FOREVER)
        .unwrap()
        .is_none());
    root.fs.unlock_path("p", "r2").unwrap();
    assert!(root
        .fs
        .try_lock_path("p", "w", LockKind::Write, FOREVER)
        .unwrap()
        .is_some());
}

#[test]
fn test_wait_for_lock_wakes_on_release() {
    let root = Arc::new(TestRoot::new());
    root.fs.lock_path("job", "worker", LockKind::Write, FOREVER).unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let root = Arc::clone(&root);
            thread::spawn(move || root.fs.wait_for_lock("job", Duration::from_secs(10)).unwrap())
        })
        .collect();

    thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    root.fs.unlock_path("job", "worker").unwrap();
    for w in waiters {
        assert!(w.join().unwrap());
    }
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_wait_for_lock_times_out() {
    let root = TestRoot::new();
    assert!(root.fs.wait_for_lock("free", Duration::from_secs(30)).unwrap());

    root.fs.lock_path("held", "a", LockKind::Write, FOREVER).unwrap();
    assert!(!root.fs.wait_for_lock("held", Duration::from_millis(50)).unwrap());
}

#[test]
fn test_expiry_thread_releases_timed_out_locks() {
    let root = TestRoot::new();
    root.fs
        .lock_path("lease", "holder", LockKind::Write, Duration::from_millis(100))
        .unwrap();
    root.fs.lock_path("pinned", "holder", LockKind::Write, FOREVER).unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = start_expiry_thread(
        root.fs.lock_manager(),
        Duration::from_millis(50),
        Arc::clone(&shutdown),
    )
    .unwrap();

    assert!(root.fs.wait_for_lock("lease", Duration::from_secs(5)).unwrap());
    assert!(!root.fs.is_locked("lease").unwrap());
    assert!(root.fs.is_locked("pinned").unwrap());

    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

#[test]
fn test_manual_expiry_through_the_facade() {
    let root = TestRoot::new();
    root.fs
        .lock_path("a", "x", LockKind::Read, Duration::from_millis(10))
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    let expired = root.fs.expire_locks();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].path, "a");
    assert!(root.fs.all_locks().is_empty());
}

#[test]
fn test_write_lock_blocks_everyone_else() {
    let locks = ExplicitLockManager::new();
    locks.acquire("a", "w", LockKind::Write, FOREVER).unwrap();
    assert!(locks.acquire("a", "r", LockKind::Read, FOREVER).is_err());
    assert!(locks.acquire("a", "w2", LockKind::Write, FOREVER).is_err());
    assert!(locks.try_acquire("a", "w", LockKind::Write, FOREVER).is_none());
    assert!(locks.acquire("b", "w2", LockKind::Write, FOREVER).is_ok());
}

#[test]
fn test_read_lock_rejects_writers() {
    let locks = ExplicitLockManager::new();
    locks.acquire("a", "r", LockKind::Read, FOREVER).unwrap();
    assert!(matches!(
        locks.acquire("a", "w", LockKind::Write, FOREVER),
        Err(VaultError::LockConflict { ref kind, .. }) if kind == "read"
    ));
}

#[test]
fn test_second_reader_replaces_the_slot() {
    let locks = ExplicitLockManager::new();
    locks.acquire("a", "r1", LockKind::Read, FOREVER).unwrap();
    locks.acquire("a", "r2", LockKind::Read, FOREVER).unwrap();
    assert_eq!(locks.get("a").unwrap().owner, "r2");
    assert_eq!(locks.all().len(), 1);
}

#[test]
fn test_release_errors() {
    let locks = ExplicitLockManager::new();
    assert!(matches!(locks.release("a", "x"), Err(VaultError::LockNotFound(_))));

    locks.acquire("a", "owner", LockKind::Write, FOREVER).unwrap();
    assert!(matches!(
        locks.release("a", "intruder"),
        Err(VaultError::NotOwner { ref owner, ref requester, .. })
            if owner == "owner" && requester == "intruder"
    ));
    assert!(locks.is_locked("a"));
    locks.release("a", "owner").unwrap();
    assert!(!locks.is_locked("a"));
}

#[test]
fn test_release_wakes_all_waiters() {
    let locks = Arc::new(ExplicitLockManager::new());
    locks.acquire("a", "w", LockKind::Write, FOREVER).unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.wait_for("a", Duration::from_secs(10)))
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    locks.release("a", "w").unwrap();
    for w in waiters {
        assert!(w.join().unwrap());
    }
}

#[test]
fn test_wait_times_out_while_held() {
    let locks = ExplicitLockManager::new();
    locks.acquire("a", "w", LockKind::Write, FOREVER).unwrap();
    let start = Instant::now();
    assert!(!locks.wait_for("a", Duration::from_millis(30)));
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(locks.is_locked("a"));
}

#[test]
fn test_wait_on_unlocked_path_returns_immediately() {
    let locks = ExplicitLockManager::new();
    let start = Instant::now();
    assert!(locks.wait_for("a", Duration::from_secs(30)));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_expire_removes_only_timed_out_locks() {
    let locks = ExplicitLockManager::new();
    locks
        .acquire("short", "x", LockKind::Write, Duration::from_millis(10))
        .unwrap();
    locks
        .acquire("long", "x", LockKind::Write, Duration::from_secs(3600))
        .unwrap();
    locks.acquire("pinned", "x", LockKind::Read, FOREVER).unwrap();
    thread::sleep(Duration::from_millis(30));

    let expired = locks.expire();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].path, "short");
    let left: Vec<String> = locks.all().into_iter().map(|l| l.path).collect();
    assert_eq!(left, vec!["long", "pinned"]);
}
