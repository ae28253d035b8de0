//! Historical file versions, one `<id>.data` + `<id>.json` pair each.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::attributes::{write_atomic, AttributeMap};
use crate::error::{IoResultExt, Result, VaultError};
use crate::fs::digest::path_digest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub description: String,
}

pub struct VersionStore {
    dir: PathBuf,
    max_versions: usize,
}

impl VersionStore {
    pub fn new(dir: PathBuf, max_versions: usize) -> Self {
        Self { dir, max_versions }
    }

    fn path_dir(&self, key: &str) -> PathBuf {
        self.dir.join(path_digest(key))
    }

    /// Version IDs become file names, so anything that is not a UUID is
    /// treated as unknown rather than joined onto a path.
    fn files_for(&self, key: &str, version_id: &str) -> Result<(PathBuf, PathBuf)> {
        if Uuid::parse_str(version_id).is_err() {
            return Err(not_found(key, version_id));
        }
        let dir = self.path_dir(key);
        Ok((
            dir.join(format!("{}.data", version_id)),
            dir.join(format!("{}.json", version_id)),
        ))
    }

    /// Capture the content of `source` plus `attributes` as a new version of
    /// `key`, then prune to the retention limit.
    pub fn snapshot(
        &self,
        key: &str,
        source: &Path,
        attributes: AttributeMap,
    ) -> Result<VersionRecord> {
        let meta = std::fs::metadata(source).at(source)?;
        if meta.is_dir() {
            return Err(VaultError::IsADirectory(key.to_string()));
        }
        let data = std::fs::read(source).at(source)?;

        let record = VersionRecord {
            version_id: Uuid::now_v7().to_string(),
            path: key.to_string(),
            created_at: Utc::now(),
            size: data.len() as u64,
            attributes,
            description: String::new(),
        };

        let dir = self.path_dir(key);
        std::fs::create_dir_all(&dir).at(&dir)?;
        let (data_file, meta_file) = self.files_for(key, &record.version_id)?;
        std::fs::write(&data_file, &data).at(&data_file)?;
        write_atomic(&meta_file, &serde_json::to_vec_pretty(&record)?)?;
        debug!("Created version {} of {} ({} bytes)", record.version_id, key, record.size);

        if self.max_versions > 0 {
            self.prune(key)?;
        }
        Ok(record)
    }

    /// All readable versions of `key`, newest first. Unreadable metadata
    /// files are skipped.
    pub fn list(&self, key: &str) -> Result<Vec<VersionRecord>> {
        let dir = self.path_dir(key);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::io(&dir, e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.at(&dir)?;
            let file = entry.path();
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&file) {
                Ok(record) => versions.push(record),
                Err(e) => warn!("Skipping version record {}: {}", file.display(), e),
            }
        }

        sort_newest_first(&mut versions);
        Ok(versions)
    }

    pub fn get(&self, key: &str, version_id: &str) -> Result<(Vec<u8>, VersionRecord)> {
        let (data_file, meta_file) = self.files_for(key, version_id)?;
        let record = read_record(&meta_file).map_err(|e| match e {
            VaultError::NotFound(_) => not_found(key, version_id),
            other => other,
        })?;
        let data = std::fs::read(&data_file).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VaultError::corrupt(&data_file, "version content missing"),
            _ => VaultError::io(&data_file, e),
        })?;
        Ok((data, record))
    }

    pub fn delete(&self, key: &str, version_id: &str) -> Result<()> {
        let (data_file, meta_file) = self.files_for(key, version_id)?;
        match std::fs::remove_file(&meta_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found(key, version_id))
            }
            Err(e) => return Err(VaultError::io(&meta_file, e)),
        }
        match std::fs::remove_file(&data_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io(&data_file, e)),
        }
        debug!("Deleted version {} of {}", version_id, key);
        Ok(())
    }

    pub fn set_description(
        &self,
        key: &str,
        version_id: &str,
        description: &str,
    ) -> Result<VersionRecord> {
        let (_, meta_file) = self.files_for(key, version_id)?;
        let mut record = read_record(&meta_file).map_err(|e| match e {
            VaultError::NotFound(_) => not_found(key, version_id),
            other => other,
        })?;
        record.description = description.to_string();
        write_atomic(&meta_file, &serde_json::to_vec_pretty(&record)?)?;
        Ok(record)
    }

    /// Delete the oldest versions beyond the retention limit. Returns how
    /// many were removed.
    pub fn prune(&self, key: &str) -> Result<usize> {
        if self.max_versions == 0 {
            return Ok(0);
        }
        let versions = self.list(key)?;
        if versions.len() <= self.max_versions {
            return Ok(0);
        }
        let excess = &versions[self.max_versions..];
        for version in excess {
            self.delete(key, &version.version_id)?;
        }
        debug!("Pruned {} version(s) of {}", excess.len(), key);
        Ok(excess.len())
    }
}

fn not_found(key: &str, version_id: &str) -> VaultError {
    VaultError::VersionNotFound {
        path: key.to_string(),
        version_id: version_id.to_string(),
    }
}

fn read_record(file: &Path) -> Result<VersionRecord> {
    let data = std::fs::read(file).at(file)?;
    serde_json::from_slice(&data).map_err(|e| VaultError::corrupt(file, e))
}

/// Newest first; v7 IDs are time-ordered and break timestamp ties.
fn sort_newest_first(versions: &mut [VersionRecord]) {
    versions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.version_id.cmp(&a.version_id))
    });
}
