//! Root-confined path resolution. Purely lexical, no filesystem access.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use super::reserved::is_reserved_name;
use crate::error::{Result, VaultError};

/// A path that has been confined to the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    /// Path relative to the root; empty for the root itself.
    pub relative: PathBuf,
    /// Absolute host path.
    pub absolute: PathBuf,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.relative.as_os_str().is_empty()
    }

    /// Stable logical key, `/`-separated, `.` for the root. Attribute and
    /// version storage are keyed by a digest of this string.
    pub fn key(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }
        self.relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn parent(&self) -> Option<ResolvedPath> {
        if self.is_root() {
            return None;
        }
        Some(ResolvedPath {
            relative: self
                .relative
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            absolute: self.absolute.parent()?.to_path_buf(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// `root` must already be absolute and canonical.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `input` to a root-confined path.
    ///
    /// A leading `/` is treated as the root. Cleaning happens after joining,
    /// so `../<root-name>/x` is accepted when it lands back inside the root.
    pub fn resolve(&self, input: &str) -> Result<ResolvedPath> {
        if input.is_empty() {
            return Err(VaultError::invalid_path(input, "empty path"));
        }
        if input.contains('\0') {
            return Err(VaultError::invalid_path(input, "path contains null byte"));
        }

        let joined = self.root.join(input.trim_start_matches('/'));
        let absolute = lexical_clean(&joined);
        let relative = match absolute.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => return Err(VaultError::PathEscapesRoot(input.to_string())),
        };

        if let Some(Component::Normal(first)) = relative.components().next() {
            if is_reserved_name(first) {
                return Err(VaultError::invalid_path(input, "reserved directory"));
            }
        }

        Ok(ResolvedPath { relative, absolute })
    }
}

/// Collapse `.` and `..` without touching the filesystem. `..` at the root
/// stays at the root; leading `..` on a relative path is preserved.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(comp),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Clean a path and strip its leading slash. `""` and `"."` become `"."`.
pub fn sanitize_path(path: &str) -> String {
    let cleaned = lexical_clean(Path::new(path));
    let s = cleaned.to_string_lossy();
    let s = s.trim_start_matches('/');
    if s.is_empty() {
        if path.starts_with('/') {
            String::new()
        } else {
            ".".to_string()
        }
    } else {
        s.to_string()
    }
}

pub fn join_path(components: &[&str]) -> String {
    let joined: PathBuf = components.iter().collect();
    sanitize_path(&joined.to_string_lossy())
}

pub fn split_path(path: &str) -> Vec<String> {
    let path = sanitize_path(path);
    if path.is_empty() || path == "." {
        return Vec::new();
    }
    path.split('/').map(str::to_string).collect()
}

pub fn parent_path(path: &str) -> String {
    let path = sanitize_path(path);
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

pub fn basename(path: &str) -> String {
    let path = sanitize_path(path);
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None if path.is_empty() => ".".to_string(),
        None => path,
    }
}

/// Resolution details for a path, including whether it exists on the host.
#[derive(Debug, Clone, Serialize)]
pub struct PathInfo {
    pub path: String,
    pub absolute: PathBuf,
    pub relative: String,
    pub exists: bool,
    pub is_dir: bool,
    pub size: u64,
    pub components: Vec<String>,
}

impl PathInfo {
    pub fn describe(input: &str, resolved: &ResolvedPath) -> Result<Self> {
        let path = sanitize_path(input);
        let components = split_path(&path);
        let (exists, is_dir, size) = match std::fs::metadata(&resolved.absolute) {
            Ok(meta) => (true, meta.is_dir(), if meta.is_dir() { 0 } else { meta.len() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (false, false, 0),
            Err(e) => return Err(VaultError::io(&resolved.absolute, e)),
        };
        Ok(Self {
            path,
            absolute: resolved.absolute.clone(),
            relative: resolved.key(),
            exists,
            is_dir,
            size,
            components,
        })
    }
}
