//! Advisory locks for callers. One slot per path: a second reader replaces
//! the first reader's record instead of being counted.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Read,
    Write,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Read => f.write_str("read"),
            LockKind::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockInfo {
    pub path: String,
    pub kind: LockKind,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    /// Zero means the lock never expires.
    pub timeout: Duration,
}

impl LockInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.timeout.is_zero() {
            return false;
        }
        (now - self.created_at)
            .to_std()
            .map(|age| age > self.timeout)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct WaitSlot {
    /// Bumped on every release of the path.
    generation: u64,
    waiting: usize,
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<String, LockInfo>,
    waiters: HashMap<String, WaitSlot>,
}

impl LockTable {
    fn wake(&mut self, path: &str) -> bool {
        match self.waiters.get_mut(path) {
            Some(slot) => {
                slot.generation += 1;
                true
            }
            None => false,
        }
    }
}

pub struct ExplicitLockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl ExplicitLockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
        }
    }

    /// Grant a lock or fail with `LockConflict`.
    pub fn acquire(
        &self,
        path: &str,
        owner: &str,
        kind: LockKind,
        timeout: Duration,
    ) -> Result<LockInfo> {
        let mut table = self.table.lock();

        if let Some(existing) = table.locks.get(path) {
            let compatible = existing.kind == LockKind::Read && kind == LockKind::Read;
            if !compatible {
                return Err(VaultError::LockConflict {
                    path: path.to_string(),
                    holder: existing.owner.clone(),
                    kind: existing.kind.to_string(),
                });
            }
        }

        let info = LockInfo {
            path: path.to_string(),
            kind,
            owner: owner.to_string(),
            created_at: Utc::now(),
            timeout,
        };
        table.locks.insert(path.to_string(), info.clone());
        debug!("explicit {} lock on {} granted to {}", kind, path, owner);
        Ok(info)
    }

    pub fn try_acquire(
        &self,
        path: &str,
        owner: &str,
        kind: LockKind,
        timeout: Duration,
    ) -> Option<LockInfo> {
        self.acquire(path, owner, kind, timeout).ok()
    }

    /// Release a lock held by `owner` and wake every waiter on the path.
    pub fn release(&self, path: &str, owner: &str) -> Result<()> {
        let mut table = self.table.lock();

        let holder = match table.locks.get(path) {
            Some(lock) => lock.owner.clone(),
            None => return Err(VaultError::LockNotFound(path.to_string())),
        };
        if holder != owner {
            return Err(VaultError::NotOwner {
                path: path.to_string(),
                owner: holder,
                requester: owner.to_string(),
            });
        }

        table.locks.remove(path);
        if table.wake(path) {
            self.released.notify_all();
        }
        debug!("explicit lock on {} released by {}", path, owner);
        Ok(())
    }

    /// Block until the lock on `path` is released or `max_wait` elapses.
    /// Returns `true` immediately if the path is not locked. Does not
    /// acquire anything; callers retry `acquire` afterwards.
    pub fn wait_for(&self, path: &str, max_wait: Duration) -> bool {
        let deadline = Instant::now().checked_add(max_wait);
        let mut table = self.table.lock();

        if !table.locks.contains_key(path) {
            return true;
        }

        let start = {
            let slot = table.waiters.entry(path.to_string()).or_default();
            slot.waiting += 1;
            slot.generation
        };

        let released = loop {
            let current = table.waiters.get(path).map(|s| s.generation);
            if current != Some(start) {
                break true;
            }
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut table, deadline).timed_out() {
                        break table.waiters.get(path).map(|s| s.generation) != Some(start);
                    }
                }
                None => self.released.wait(&mut table),
            }
        };

        if let Some(slot) = table.waiters.get_mut(path) {
            slot.waiting -= 1;
            if slot.waiting == 0 {
                table.waiters.remove(path);
            }
        }
        released
    }

    /// Drop every lock older than its timeout and wake its waiters.
    /// Must be driven by an external scheduler, see [`super::expiry`].
    pub fn expire(&self) -> Vec<LockInfo> {
        let now = Utc::now();
        let mut table = self.table.lock();

        let expired: Vec<String> = table
            .locks
            .iter()
            .filter(|(_, lock)| lock.is_expired(now))
            .map(|(path, _)| path.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        let mut woke = false;
        for path in expired {
            if let Some(lock) = table.locks.remove(&path) {
                debug!("explicit lock on {} held by {} expired", path, lock.owner);
                removed.push(lock);
            }
            woke |= table.wake(&path);
        }
        if woke {
            self.released.notify_all();
        }
        removed
    }

    pub fn get(&self, path: &str) -> Option<LockInfo> {
        self.table.lock().locks.get(path).cloned()
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.table.lock().locks.contains_key(path)
    }

    /// All current locks, sorted by path.
    pub fn all(&self) -> Vec<LockInfo> {
        let table = self.table.lock();
        let mut locks: Vec<LockInfo> = table.locks.values().cloned().collect();
        locks.sort_by(|a, b| a.path.cmp(&b.path));
        locks
    }
}

impl Default for ExplicitLockManager {
    fn default() -> Self {
        Self::new()
    }
}
