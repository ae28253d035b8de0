use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
}

/// Reader/writer lock for one resolved path. Waiting writers block new
/// readers so a steady stream of reads cannot starve a write.
#[derive(Debug, Default)]
struct ResourceLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl ResourceLock {
    fn lock(&self, mode: LockMode) {
        let mut state = self.state.lock();
        match mode {
            LockMode::Read => {
                while state.writer || state.writers_waiting > 0 {
                    self.released.wait(&mut state);
                }
                state.readers += 1;
            }
            LockMode::Write => {
                state.writers_waiting += 1;
                while state.writer || state.readers > 0 {
                    self.released.wait(&mut state);
                }
                state.writers_waiting -= 1;
                state.writer = true;
            }
        }
    }

    fn unlock(&self, mode: LockMode) {
        let mut state = self.state.lock();
        match mode {
            LockMode::Read => state.readers -= 1,
            LockMode::Write => state.writer = false,
        }
        drop(state);
        self.released.notify_all();
    }
}

/// Per-path lock table used implicitly by every facade operation.
///
/// Entries are created on first use and evicted when the last guard for a
/// path is dropped, so the table only holds paths that are currently locked
/// or being waited on.
pub struct LockRegistry {
    locks: DashMap<PathBuf, Arc<ResourceLock>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Block until `path` is held in `mode`.
    pub fn acquire(&self, path: &Path, mode: LockMode) -> ResourceGuard<'_> {
        // The shard lock is released at the end of this statement, before
        // we block on the resource lock itself.
        let lock = Arc::clone(&*self.locks.entry(path.to_path_buf()).or_default());
        lock.lock(mode);
        trace!("resource lock acquired: {} ({:?})", path.display(), mode);
        ResourceGuard {
            registry: self,
            path: path.to_path_buf(),
            lock: Some(lock),
            mode,
        }
    }

    /// Acquire several paths at once. Requests are de-duplicated (the
    /// strongest mode wins) and taken in sorted path order, so two callers
    /// locking the same pair of paths can never wait on each other in a cycle.
    pub fn acquire_all<I>(&self, requests: I) -> LockSet<'_>
    where
        I: IntoIterator<Item = (PathBuf, LockMode)>,
    {
        let mut plan: BTreeMap<PathBuf, LockMode> = BTreeMap::new();
        for (path, mode) in requests {
            plan.entry(path)
                .and_modify(|m| *m = (*m).max(mode))
                .or_insert(mode);
        }
        let guards = plan
            .into_iter()
            .map(|(path, mode)| self.acquire(&path, mode))
            .collect();
        LockSet { guards }
    }

    /// Number of paths with an outstanding lock handle.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn evict_if_unused(&self, path: &Path) {
        // Handles are only cloned while holding the shard lock, which
        // `remove_if` also holds, so a count of 1 means nobody else can
        // reach this entry.
        if self
            .locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
        {
            trace!("resource lock evicted: {}", path.display());
        }
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock on one path; released on drop.
pub struct ResourceGuard<'a> {
    registry: &'a LockRegistry,
    path: PathBuf,
    lock: Option<Arc<ResourceLock>>,
    mode: LockMode,
}

impl ResourceGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.unlock(self.mode);
            drop(lock);
            self.registry.evict_if_unused(&self.path);
        }
    }
}

/// Guards from a multi-path acquisition.
pub struct LockSet<'a> {
    guards: Vec<ResourceGuard<'a>>,
}

impl LockSet<'_> {
    pub fn paths(&self) -> Vec<&Path> {
        self.guards.iter().map(|g| g.path()).collect()
    }

    pub fn mode_of(&self, path: &Path) -> Option<LockMode> {
        self.guards
            .iter()
            .find(|g| g.path() == path)
            .map(|g| g.mode())
    }
}
