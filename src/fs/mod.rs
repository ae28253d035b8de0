pub mod digest;
pub mod path;
pub mod reserved;

use std::fs::{Metadata, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use self::path::{PathInfo, PathResolver, ResolvedPath};
use self::reserved::*;
use crate::config::Options;
use crate::error::{IoResultExt, Result, VaultError};
use crate::hooks::{HookContext, HookFn, HookRegistry, HookResult, Operation, Phase};
use crate::state::explicit_locks::{ExplicitLockManager, LockInfo, LockKind};
use crate::state::lock_registry::{LockMode, LockRegistry, LockSet};
use crate::storage::attributes::{AttributeMap, AttributeStore};
use crate::storage::journal::{
    Journal, JournalEntry, JournalOp, RecoveryReport, ReplayTarget,
};
use crate::storage::versions::{VersionRecord, VersionStore};

/// Permission bits for files written without an explicit mode.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// One entry of a directory listing, or the result of `stat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub name: String,
    /// Root-relative path.
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    /// Permission bits.
    pub mode: u32,
    pub attributes: AttributeMap,
}

/// Who asked for a mutation. Journal replay goes through the same code as
/// callers but must not append to the journal it is reading, nor snapshot
/// versions of state it is merely re-applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Replay,
}

/// Sandboxed filesystem rooted at one host directory.
///
/// Every operation resolves its path inside the root, takes the resource
/// locks it needs, runs pre-hooks, snapshots the previous version, appends
/// to the journal, touches the host filesystem and finally runs post-hooks.
/// Any step failing stops the ones after it.
pub struct VaultFs {
    options: Options,
    resolver: PathResolver,
    /// `None` when journaling is disabled.
    journal: Option<Journal>,
    /// Implicit per-path locks taken by every operation.
    resource_locks: LockRegistry,
    /// Opt-in advisory locks for callers; never consulted implicitly.
    explicit_locks: Arc<ExplicitLockManager>,
    /// `None` when versioning is disabled.
    versions: Option<VersionStore>,
    attributes: AttributeStore,
    hooks: HookRegistry,
}

impl VaultFs {
    /// Open a root, creating the directory if it does not exist.
    pub fn open(root: impl AsRef<Path>, options: Options) -> Result<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir().at(".")?.join(root)
        };
        std::fs::create_dir_all(&root).at(&root)?;
        let root = std::fs::canonicalize(&root).at(&root)?;
        if !root.is_dir() {
            return Err(VaultError::NotADirectory(root.display().to_string()));
        }

        let journal = if options.enable_journaling {
            Some(Journal::open(
                root.join(JOURNAL_DIR_NAME).join(JOURNAL_FILE_NAME),
            )?)
        } else {
            None
        };
        let versions = options
            .enable_versioning
            .then(|| VersionStore::new(root.join(VERSIONS_DIR_NAME), options.max_versions));
        let attributes = AttributeStore::new(root.join(ATTRIBUTES_DIR_NAME));

        info!(
            "Opened {} (journaling={}, versioning={}, max_versions={})",
            root.display(),
            options.enable_journaling,
            options.enable_versioning,
            options.max_versions
        );

        Ok(Self {
            options,
            resolver: PathResolver::new(root),
            journal,
            resource_locks: LockRegistry::new(),
            explicit_locks: Arc::new(ExplicitLockManager::new()),
            versions,
            attributes,
            hooks: HookRegistry::new(),
        })
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    pub fn resolve(&self, path: &str) -> Result<ResolvedPath> {
        self.resolver.resolve(path)
    }

    /// Resolve a path that is about to be changed. The root itself is not.
    fn resolve_mutable(&self, path: &str) -> Result<ResolvedPath> {
        let resolved = self.resolver.resolve(path)?;
        if resolved.is_root() {
            return Err(VaultError::invalid_path(path, "cannot modify the root"));
        }
        Ok(resolved)
    }

    pub fn validate_path(&self, path: &str) -> Result<()> {
        self.resolver.resolve(path).map(|_| ())
    }

    pub fn absolute_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.resolver.resolve(path)?.absolute)
    }

    pub fn relative_path(&self, path: &str) -> Result<String> {
        Ok(self.resolver.resolve(path)?.key())
    }

    pub fn path_info(&self, path: &str) -> Result<PathInfo> {
        let resolved = self.resolver.resolve(path)?;
        PathInfo::describe(path, &resolved)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolver
            .resolve(path)
            .map(|r| r.absolute.exists())
            .unwrap_or(false)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.resolver
            .resolve(path)
            .map(|r| r.absolute.is_dir())
            .unwrap_or(false)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.resolver
            .resolve(path)
            .map(|r| r.absolute.is_file())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Pipeline plumbing
    // ------------------------------------------------------------------

    /// Lock `target` in `mode` and, if given, its parent in `parent_mode`.
    fn lock_with_parent(
        &self,
        target: &ResolvedPath,
        mode: LockMode,
        parent_mode: Option<LockMode>,
    ) -> LockSet<'_> {
        let mut requests = vec![(target.absolute.clone(), mode)];
        if let (Some(parent_mode), Some(parent)) = (parent_mode, target.parent()) {
            requests.push((parent.absolute, parent_mode));
        }
        self.resource_locks.acquire_all(requests)
    }

    fn run_pre(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.hooks
            .run(Phase::Pre, ctx)
            .map_err(|e| VaultError::HookRejected {
                operation: ctx.operation.to_string(),
                path: ctx.path.clone(),
                reason: e.to_string(),
            })
    }

    fn run_post(&self, ctx: &mut HookContext<'_>) -> Result<()> {
        self.hooks
            .run(Phase::Post, ctx)
            .map_err(|e| VaultError::HookFailed {
                operation: ctx.operation.to_string(),
                path: ctx.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Durably record a mutation before it is applied. Replay never
    /// re-journals.
    fn record(&self, origin: Origin, entry: impl FnOnce() -> JournalEntry) -> Result<()> {
        match (&self.journal, origin) {
            (Some(journal), Origin::Caller) => journal.append(&entry()),
            _ => Ok(()),
        }
    }

    /// Snapshot the current content of `target` if versioning is on and it
    /// is an existing regular file. Runs the `CreateVersion` hooks like an
    /// explicit `create_version` would.
    fn snapshot_existing(
        &self,
        target: &ResolvedPath,
        origin: Origin,
    ) -> Result<Option<VersionRecord>> {
        let versions = match (&self.versions, origin) {
            (Some(versions), Origin::Caller) => versions,
            _ => return Ok(None),
        };
        if !target.absolute.is_file() {
            return Ok(None);
        }
        let key = target.key();
        let mut ctx = HookContext::new(Operation::CreateVersion, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        let attrs = self.attributes.load_lenient(&key);
        let record = versions.snapshot(&key, &target.absolute, attrs)?;
        ctx.version_id = Some(record.version_id.clone());
        self.run_post(&mut ctx)?;
        Ok(Some(record))
    }

    fn require_versions(&self) -> Result<&VersionStore> {
        self.versions.as_ref().ok_or(VaultError::VersioningDisabled)
    }

    fn require_journal(&self) -> Result<&Journal> {
        self.journal.as_ref().ok_or(VaultError::JournalingDisabled)
    }

    /// Host metadata with errors reported against the logical path.
    fn metadata(&self, target: &ResolvedPath) -> Result<Metadata> {
        std::fs::metadata(&target.absolute).map_err(|e| VaultError::io(target.key(), e))
    }

    fn try_metadata(&self, target: &ResolvedPath) -> Result<Option<Metadata>> {
        match self.metadata(target) {
            Ok(meta) => Ok(Some(meta)),
            Err(VaultError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn file_info(&self, name: String, key: String, meta: &Metadata) -> FileInfo {
        let attributes = self.attributes.load_lenient(&key);
        FileInfo {
            name,
            path: key,
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_default(),
            is_dir: meta.is_dir(),
            mode: meta.permissions().mode() & 0o7777,
            attributes,
        }
    }

    // ------------------------------------------------------------------
    // Directories
    // ------------------------------------------------------------------

    /// Create a directory and any missing parents. Existing directories are
    /// left alone.
    pub fn create_dir(&self, path: &str) -> Result<()> {
        let target = self.resolve_mutable(path)?;
        self.create_dir_resolved(&target, Origin::Caller)
    }

    fn create_dir_resolved(&self, target: &ResolvedPath, origin: Origin) -> Result<()> {
        let key = target.key();
        debug!("create_dir: {}", key);
        let _locks = self.lock_with_parent(target, LockMode::Write, Some(LockMode::Write));

        if let Some(meta) = self.try_metadata(target)? {
            if !meta.is_dir() {
                return Err(VaultError::NotADirectory(key));
            }
        }

        let mut ctx = HookContext::new(Operation::CreateDir, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        self.record(origin, || JournalEntry::mkdir(&key))?;
        std::fs::create_dir_all(&target.absolute).map_err(|e| VaultError::io(&key, e))?;
        self.run_post(&mut ctx)
    }

    /// List a directory, sorted by name. Bookkeeping directories are hidden.
    pub fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        debug!("list_dir: {}", key);
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Read);

        if !self.metadata(&target)?.is_dir() {
            return Err(VaultError::NotADirectory(key));
        }

        let mut ctx = HookContext::new(Operation::ListDir, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&target.absolute).map_err(|e| VaultError::io(&key, e))? {
            let entry = entry.map_err(|e| VaultError::io(&key, e))?;
            let name = entry.file_name();
            if target.is_root() && is_reserved_name(&name) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Removed between readdir and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(VaultError::io(entry.path(), e)),
            };
            let name = name.to_string_lossy().into_owned();
            let child_key = if target.is_root() {
                name.clone()
            } else {
                format!("{}/{}", key, name)
            };
            entries.push(self.file_info(name, child_key, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        self.run_post(&mut ctx)?;
        Ok(entries)
    }

    /// Remove a directory and everything in it.
    pub fn delete_dir(&self, path: &str) -> Result<()> {
        let target = self.resolve_mutable(path)?;
        self.delete_dir_resolved(&target, Origin::Caller)
    }

    fn delete_dir_resolved(&self, target: &ResolvedPath, origin: Origin) -> Result<()> {
        let key = target.key();
        debug!("delete_dir: {}", key);
        let _locks = self.lock_with_parent(target, LockMode::Write, Some(LockMode::Write));

        if !self.metadata(target)?.is_dir() {
            return Err(VaultError::NotADirectory(key));
        }

        let mut ctx = HookContext::new(Operation::DeleteDir, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        self.record(origin, || JournalEntry::delete(&key, true))?;
        std::fs::remove_dir_all(&target.absolute).map_err(|e| VaultError::io(&key, e))?;
        self.attributes.clear(&key)?;
        self.run_post(&mut ctx)
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.write_file_with_mode(path, data, DEFAULT_FILE_MODE)
    }

    /// Create or overwrite a file. Missing parent directories are created.
    pub fn write_file_with_mode(&self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        let target = self.resolve_mutable(path)?;
        self.write_resolved(&target, data, mode, Origin::Caller)
    }

    fn write_resolved(
        &self,
        target: &ResolvedPath,
        data: &[u8],
        mode: u32,
        origin: Origin,
    ) -> Result<()> {
        let key = target.key();
        debug!("write_file: {} ({} bytes, mode {:o})", key, data.len(), mode);
        let _locks = self.lock_with_parent(target, LockMode::Write, Some(LockMode::Read));

        if let Some(meta) = self.try_metadata(target)? {
            if meta.is_dir() {
                return Err(VaultError::IsADirectory(key));
            }
        }

        let mut ctx = HookContext::new(Operation::WriteFile, key.as_str(), &target.absolute)
            .with_data(data)
            .with_mode(mode);
        self.run_pre(&mut ctx)?;
        self.snapshot_existing(target, origin)?;
        self.record(origin, || JournalEntry::write(&key, data, mode))?;
        write_host_file(&target.absolute, data, mode).map_err(|e| VaultError::io(&key, e))?;
        self.run_post(&mut ctx)
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        debug!("read_file: {}", key);
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Read);

        if self.metadata(&target)?.is_dir() {
            return Err(VaultError::IsADirectory(key));
        }

        let mut ctx = HookContext::new(Operation::ReadFile, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        let data = std::fs::read(&target.absolute).map_err(|e| VaultError::io(&key, e))?;
        self.run_post(&mut ctx)?;
        Ok(data)
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        let target = self.resolve_mutable(path)?;
        self.delete_file_resolved(&target, Origin::Caller)
    }

    fn delete_file_resolved(&self, target: &ResolvedPath, origin: Origin) -> Result<()> {
        let key = target.key();
        debug!("delete_file: {}", key);
        let _locks = self.lock_with_parent(target, LockMode::Write, Some(LockMode::Write));

        if self.metadata(target)?.is_dir() {
            return Err(VaultError::IsADirectory(key));
        }

        let mut ctx = HookContext::new(Operation::DeleteFile, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        self.snapshot_existing(target, origin)?;
        self.record(origin, || JournalEntry::delete(&key, false))?;
        std::fs::remove_file(&target.absolute).map_err(|e| VaultError::io(&key, e))?;
        self.attributes.clear(&key)?;
        self.run_post(&mut ctx)
    }

    /// Copy content, permission bits and attributes of `src` to `dst`.
    /// Attributes of `src` are merged over any existing ones of `dst`.
    pub fn copy_file(&self, src: &str, dst: &str) -> Result<()> {
        let source = self.resolver.resolve(src)?;
        let dest = self.resolve_mutable(dst)?;
        if source.absolute == dest.absolute {
            return Err(VaultError::invalid_path(dst, "source and destination are the same"));
        }
        let (src_key, dst_key) = (source.key(), dest.key());
        debug!("copy_file: {} -> {}", src_key, dst_key);

        let mut requests = vec![
            (source.absolute.clone(), LockMode::Read),
            (dest.absolute.clone(), LockMode::Write),
        ];
        requests.extend(source.parent().map(|p| (p.absolute, LockMode::Read)));
        requests.extend(dest.parent().map(|p| (p.absolute, LockMode::Read)));
        let _locks = self.resource_locks.acquire_all(requests);

        let src_meta = self.metadata(&source)?;
        if src_meta.is_dir() {
            return Err(VaultError::IsADirectory(src_key));
        }
        if let Some(meta) = self.try_metadata(&dest)? {
            if meta.is_dir() {
                return Err(VaultError::IsADirectory(dst_key));
            }
        }

        let mut ctx = HookContext::new(Operation::CopyFile, src_key.as_str(), &source.absolute)
            .with_destination(dst_key.as_str(), &dest.absolute);
        self.run_pre(&mut ctx)?;

        let data = std::fs::read(&source.absolute).map_err(|e| VaultError::io(&src_key, e))?;
        let mode = src_meta.permissions().mode() & 0o7777;
        self.snapshot_existing(&dest, Origin::Caller)?;
        self.record(Origin::Caller, || JournalEntry::write(&dst_key, &data, mode))?;
        write_host_file(&dest.absolute, &data, mode).map_err(|e| VaultError::io(&dst_key, e))?;
        self.attributes
            .merge(&dst_key, &self.attributes.load_lenient(&src_key))?;

        self.run_post(&mut ctx)
    }

    /// Rename a file. The destination's attributes are replaced by the
    /// source's; an existing destination is versioned first.
    pub fn move_file(&self, src: &str, dst: &str) -> Result<()> {
        let source = self.resolve_mutable(src)?;
        let dest = self.resolve_mutable(dst)?;
        if source.absolute == dest.absolute {
            return Err(VaultError::invalid_path(dst, "source and destination are the same"));
        }
        let (src_key, dst_key) = (source.key(), dest.key());
        debug!("move_file: {} -> {}", src_key, dst_key);

        let mut requests = vec![
            (source.absolute.clone(), LockMode::Write),
            (dest.absolute.clone(), LockMode::Write),
        ];
        requests.extend(source.parent().map(|p| (p.absolute, LockMode::Write)));
        requests.extend(dest.parent().map(|p| (p.absolute, LockMode::Write)));
        let _locks = self.resource_locks.acquire_all(requests);

        let src_meta = self.metadata(&source)?;
        if src_meta.is_dir() {
            return Err(VaultError::IsADirectory(src_key));
        }
        if let Some(meta) = self.try_metadata(&dest)? {
            if meta.is_dir() {
                return Err(VaultError::IsADirectory(dst_key));
            }
        }

        let mut ctx = HookContext::new(Operation::MoveFile, src_key.as_str(), &source.absolute)
            .with_destination(dst_key.as_str(), &dest.absolute);
        self.run_pre(&mut ctx)?;

        let mode = src_meta.permissions().mode() & 0o7777;
        self.snapshot_existing(&dest, Origin::Caller)?;
        if self.journal.is_some() {
            let data =
                std::fs::read(&source.absolute).map_err(|e| VaultError::io(&src_key, e))?;
            self.record(Origin::Caller, || JournalEntry::delete(&src_key, false))?;
            self.record(Origin::Caller, || JournalEntry::write(&dst_key, &data, mode))?;
        }
        if let Some(parent) = dest.absolute.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VaultError::io(&dst_key, e))?;
        }
        std::fs::rename(&source.absolute, &dest.absolute)
            .map_err(|e| VaultError::io(&src_key, e))?;

        let attrs = self.attributes.load_lenient(&src_key);
        self.attributes.replace(&dst_key, &attrs)?;
        self.attributes.clear(&src_key)?;

        self.run_post(&mut ctx)
    }

    pub fn stat(&self, path: &str) -> Result<FileInfo> {
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Read);
        let meta = self.metadata(&target)?;
        let name = target
            .relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        Ok(self.file_info(name, key, &meta))
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    /// Set one attribute on an existing file or directory.
    pub fn set_attribute(&self, path: &str, name: &str, value: &str) -> Result<()> {
        let target = self.resolver.resolve(path)?;
        self.set_attribute_resolved(&target, name, value, Origin::Caller)
    }

    fn set_attribute_resolved(
        &self,
        target: &ResolvedPath,
        name: &str,
        value: &str,
        origin: Origin,
    ) -> Result<()> {
        let key = target.key();
        if name.is_empty() {
            return Err(VaultError::invalid_path(&key, "empty attribute name"));
        }
        debug!("set_attribute: {} {}={}", key, name, value);
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Write);

        self.metadata(target)?;

        let mut ctx = HookContext::new(Operation::SetAttribute, key.as_str(), &target.absolute)
            .with_key(name)
            .with_value(value);
        self.run_pre(&mut ctx)?;
        self.record(origin, || JournalEntry::set_attr(&key, name, value))?;
        self.attributes.set(&key, name, value)?;
        self.run_post(&mut ctx)
    }

    pub fn get_attribute(&self, path: &str, name: &str) -> Result<String> {
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Read);

        let mut ctx = HookContext::new(Operation::GetAttribute, key.as_str(), &target.absolute)
            .with_key(name);
        self.run_pre(&mut ctx)?;
        let value = self.attributes.get(&key, name)?;
        self.run_post(&mut ctx)?;
        Ok(value)
    }

    pub fn list_attributes(&self, path: &str) -> Result<AttributeMap> {
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Read);

        let mut ctx = HookContext::new(Operation::ListAttributes, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        let attrs = self.attributes.load(&key)?;
        self.run_post(&mut ctx)?;
        Ok(attrs)
    }

    pub fn delete_attribute(&self, path: &str, name: &str) -> Result<()> {
        let target = self.resolver.resolve(path)?;
        self.delete_attribute_resolved(&target, name, Origin::Caller)
    }

    fn delete_attribute_resolved(
        &self,
        target: &ResolvedPath,
        name: &str,
        origin: Origin,
    ) -> Result<()> {
        let key = target.key();
        debug!("delete_attribute: {} {}", key, name);
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Write);

        self.attributes.get(&key, name)?;

        let mut ctx = HookContext::new(Operation::DeleteAttribute, key.as_str(), &target.absolute)
            .with_key(name);
        self.run_pre(&mut ctx)?;
        self.record(origin, || JournalEntry::delete_attr(&key, name))?;
        self.attributes.remove(&key, name)?;
        self.run_post(&mut ctx)
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    /// Snapshot the current content of a file. An empty description leaves
    /// the record's description unset.
    pub fn create_version(&self, path: &str, description: &str) -> Result<VersionRecord> {
        let versions = self.require_versions()?;
        let target = self.resolve_mutable(path)?;
        let key = target.key();
        debug!("create_version: {}", key);
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Write);

        if self.metadata(&target)?.is_dir() {
            return Err(VaultError::IsADirectory(key));
        }

        let mut ctx = HookContext::new(Operation::CreateVersion, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        let attrs = self.attributes.load_lenient(&key);
        let mut record = versions.snapshot(&key, &target.absolute, attrs)?;
        if !description.is_empty() {
            record = versions.set_description(&key, &record.version_id, description)?;
        }
        ctx.version_id = Some(record.version_id.clone());
        self.run_post(&mut ctx)?;
        Ok(record)
    }

    /// Versions of a path, newest first.
    pub fn list_versions(&self, path: &str) -> Result<Vec<VersionRecord>> {
        let versions = self.require_versions()?;
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Read);

        let mut ctx = HookContext::new(Operation::ListVersions, key.as_str(), &target.absolute);
        self.run_pre(&mut ctx)?;
        let list = versions.list(&key)?;
        self.run_post(&mut ctx)?;
        Ok(list)
    }

    pub fn get_version(&self, path: &str, version_id: &str) -> Result<(Vec<u8>, VersionRecord)> {
        let versions = self.require_versions()?;
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Read);

        let mut ctx = HookContext::new(Operation::GetVersion, key.as_str(), &target.absolute)
            .with_version(version_id);
        self.run_pre(&mut ctx)?;
        let found = versions.get(&key, version_id)?;
        self.run_post(&mut ctx)?;
        Ok(found)
    }

    /// Overwrite a file with an earlier version. The current content is
    /// versioned first, so a restore can itself be undone.
    pub fn restore_version(&self, path: &str, version_id: &str) -> Result<()> {
        let versions = self.require_versions()?;
        let target = self.resolve_mutable(path)?;
        let key = target.key();
        debug!("restore_version: {} to {}", key, version_id);
        let _locks = self.lock_with_parent(&target, LockMode::Write, Some(LockMode::Read));

        let current = self.try_metadata(&target)?;
        if current.as_ref().is_some_and(Metadata::is_dir) {
            return Err(VaultError::IsADirectory(key));
        }

        let mut ctx = HookContext::new(Operation::RestoreVersion, key.as_str(), &target.absolute)
            .with_version(version_id);
        self.run_pre(&mut ctx)?;

        let (data, record) = versions.get(&key, version_id)?;
        let mode = current
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(DEFAULT_FILE_MODE);
        self.snapshot_existing(&target, Origin::Caller)?;
        self.record(Origin::Caller, || JournalEntry::write(&key, &data, mode))?;
        write_host_file(&target.absolute, &data, mode).map_err(|e| VaultError::io(&key, e))?;
        self.attributes.replace(&key, &record.attributes)?;

        self.run_post(&mut ctx)
    }

    pub fn delete_version(&self, path: &str, version_id: &str) -> Result<()> {
        let versions = self.require_versions()?;
        let target = self.resolver.resolve(path)?;
        let key = target.key();
        debug!("delete_version: {} {}", key, version_id);
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Write);

        let mut ctx = HookContext::new(Operation::DeleteVersion, key.as_str(), &target.absolute)
            .with_version(version_id);
        self.run_pre(&mut ctx)?;
        versions.delete(&key, version_id)?;
        self.run_post(&mut ctx)
    }

    pub fn set_version_description(
        &self,
        path: &str,
        version_id: &str,
        description: &str,
    ) -> Result<VersionRecord> {
        let versions = self.require_versions()?;
        let target = self.resolver.resolve(path)?;
        let _lock = self.resource_locks.acquire(&target.absolute, LockMode::Write);
        versions.set_description(&target.key(), version_id, description)
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Register a hook. Hooks run on the calling thread while the
    /// operation's resource locks are held, so a hook must not call back
    /// into this filesystem for the same path.
    pub fn register_hook<F>(&self, operation: Operation, phase: Phase, hook: F)
    where
        F: Fn(&mut HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.register(operation, phase, hook);
    }

    pub fn register_hook_shared(&self, operation: Operation, phase: Phase, hook: HookFn) {
        self.hooks.register_shared(operation, phase, hook);
    }

    pub fn unregister_hook(&self, operation: Operation, phase: Phase) {
        self.hooks.unregister(operation, phase);
    }

    pub fn unregister_all_hooks(&self) {
        self.hooks.clear();
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    // ------------------------------------------------------------------
    // Explicit locks
    // ------------------------------------------------------------------

    /// Take an advisory lock. Paths are normalized first, so `a/../b` and
    /// `b` name the same lock. A zero `timeout` never expires.
    pub fn lock_path(
        &self,
        path: &str,
        owner: &str,
        kind: LockKind,
        timeout: Duration,
    ) -> Result<LockInfo> {
        let key = self.relative_path(path)?;
        self.explicit_locks.acquire(&key, owner, kind, timeout)
    }

    pub fn try_lock_path(
        &self,
        path: &str,
        owner: &str,
        kind: LockKind,
        timeout: Duration,
    ) -> Result<Option<LockInfo>> {
        let key = self.relative_path(path)?;
        Ok(self.explicit_locks.try_acquire(&key, owner, kind, timeout))
    }

    pub fn unlock_path(&self, path: &str, owner: &str) -> Result<()> {
        let key = self.relative_path(path)?;
        self.explicit_locks.release(&key, owner)
    }

    pub fn lock_info(&self, path: &str) -> Result<Option<LockInfo>> {
        let key = self.relative_path(path)?;
        Ok(self.explicit_locks.get(&key))
    }

    pub fn is_locked(&self, path: &str) -> Result<bool> {
        let key = self.relative_path(path)?;
        Ok(self.explicit_locks.is_locked(&key))
    }

    pub fn all_locks(&self) -> Vec<LockInfo> {
        self.explicit_locks.all()
    }

    /// Block until the advisory lock on `path` is released, up to
    /// `max_wait`. Returns whether it was released in time.
    pub fn wait_for_lock(&self, path: &str, max_wait: Duration) -> Result<bool> {
        let key = self.relative_path(path)?;
        Ok(self.explicit_locks.wait_for(&key, max_wait))
    }

    pub fn expire_locks(&self) -> Vec<LockInfo> {
        self.explicit_locks.expire()
    }

    /// Shared handle for schedulers such as
    /// [`start_expiry_thread`](crate::state::expiry::start_expiry_thread).
    pub fn lock_manager(&self) -> Arc<ExplicitLockManager> {
        Arc::clone(&self.explicit_locks)
    }

    // ------------------------------------------------------------------
    // Journal maintenance
    // ------------------------------------------------------------------

    /// Replay the journal so every logged path ends in the state of its
    /// last entry.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let journal = self.require_journal()?;
        if !journal.is_open() {
            return Err(VaultError::JournalClosed);
        }
        info!("Recovering from {}", journal.path().display());
        journal.recover(self)
    }

    pub fn rotate_journal(&self) -> Result<PathBuf> {
        self.require_journal()?.rotate()
    }

    pub fn truncate_journal(&self) -> Result<()> {
        self.require_journal()?.truncate()
    }

    /// Flush and close the journal. Later mutations fail with
    /// `JournalClosed` while journaling is enabled.
    pub fn close(&self) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.close()?;
        }
        info!("Closed {}", self.root().display());
        Ok(())
    }
}

impl ReplayTarget for VaultFs {
    fn replay(&self, entry: &JournalEntry) -> Result<()> {
        let target = self.resolve_mutable(&entry.path)?;
        match entry.operation {
            JournalOp::Write => self.write_resolved(
                &target,
                &entry.payload,
                entry.mode().unwrap_or(DEFAULT_FILE_MODE),
                Origin::Replay,
            ),
            JournalOp::Mkdir => self.create_dir_resolved(&target, Origin::Replay),
            JournalOp::Delete => {
                let result = if entry.is_dir_delete() {
                    self.delete_dir_resolved(&target, Origin::Replay)
                } else {
                    self.delete_file_resolved(&target, Origin::Replay)
                };
                match result {
                    Err(VaultError::NotFound(_)) => Ok(()),
                    other => other,
                }
            }
            JournalOp::SetAttr => {
                let name = entry
                    .attr_key()
                    .ok_or_else(|| VaultError::corrupt(&entry.path, "setattr without key"))?;
                let value = std::str::from_utf8(&entry.payload)
                    .map_err(|e| VaultError::corrupt(&entry.path, e))?;
                self.set_attribute_resolved(&target, name, value, Origin::Replay)
            }
            JournalOp::DeleteAttr => {
                let name = entry
                    .attr_key()
                    .ok_or_else(|| VaultError::corrupt(&entry.path, "deleteattr without key"))?;
                match self.delete_attribute_resolved(&target, name, Origin::Replay) {
                    Err(VaultError::AttributeNotFound { .. }) => Ok(()),
                    other => other,
                }
            }
        }
    }
}

/// Create or truncate `path` with `mode`, creating missing parents. The mode
/// is applied explicitly as well, since `open` only uses it for new files.
fn write_host_file(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(data)?;
    file.set_permissions(Permissions::from_mode(mode))?;
    Ok(())
}
