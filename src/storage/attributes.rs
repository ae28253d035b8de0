use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IoResultExt, Result, VaultError};
use crate::fs::digest::path_digest;

/// Flat string key/value attributes of one logical path.
pub type AttributeMap = BTreeMap<String, String>;

/// Attribute sets persisted as `<dir>/<digest(path)>.json`.
///
/// Callers serialize access per logical path through the resource lock of
/// the path the attributes belong to.
pub struct AttributeStore {
    dir: PathBuf,
}

impl AttributeStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", path_digest(key)))
    }

    /// Load the attribute set; a missing file is an empty set, an unreadable
    /// one is `CorruptRecord`.
    pub fn load(&self, key: &str) -> Result<AttributeMap> {
        let file = self.file_for(key);
        let data = match std::fs::read(&file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AttributeMap::new()),
            Err(e) => return Err(VaultError::io(&file, e)),
        };
        serde_json::from_slice(&data).map_err(|e| VaultError::corrupt(&file, e))
    }

    /// Like [`load`](Self::load) but a corrupt or unreadable record yields an
    /// empty set, for enumeration paths that must not fail on one bad file.
    pub fn load_lenient(&self, key: &str) -> AttributeMap {
        self.load(key).unwrap_or_else(|e| {
            warn!("Skipping attributes of {}: {}", key, e);
            AttributeMap::new()
        })
    }

    pub fn get(&self, key: &str, name: &str) -> Result<String> {
        self.load(key)?
            .remove(name)
            .ok_or_else(|| VaultError::AttributeNotFound {
                path: key.to_string(),
                key: name.to_string(),
            })
    }

    /// Set one attribute. A corrupt existing record is replaced.
    pub fn set(&self, key: &str, name: &str, value: &str) -> Result<()> {
        let mut attrs = match self.load(key) {
            Ok(attrs) => attrs,
            Err(VaultError::CorruptRecord { path, reason }) => {
                warn!("Replacing corrupt attribute record {}: {}", path, reason);
                AttributeMap::new()
            }
            Err(e) => return Err(e),
        };
        attrs.insert(name.to_string(), value.to_string());
        self.store(key, &attrs)
    }

    /// Remove one attribute; the record file is deleted once empty.
    pub fn remove(&self, key: &str, name: &str) -> Result<()> {
        let mut attrs = self.load(key)?;
        if attrs.remove(name).is_none() {
            return Err(VaultError::AttributeNotFound {
                path: key.to_string(),
                key: name.to_string(),
            });
        }
        self.store(key, &attrs)
    }

    /// Add every entry of `extra`, overwriting existing names.
    pub fn merge(&self, key: &str, extra: &AttributeMap) -> Result<()> {
        if extra.is_empty() {
            return Ok(());
        }
        let mut attrs = self.load_lenient(key);
        attrs.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.store(key, &attrs)
    }

    /// Replace the whole set.
    pub fn replace(&self, key: &str, attrs: &AttributeMap) -> Result<()> {
        self.store(key, attrs)
    }

    pub fn clear(&self, key: &str) -> Result<()> {
        self.store(key, &AttributeMap::new())
    }

    fn store(&self, key: &str, attrs: &AttributeMap) -> Result<()> {
        let file = self.file_for(key);
        if attrs.is_empty() {
            return match std::fs::remove_file(&file) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(VaultError::io(&file, e)),
            };
        }
        std::fs::create_dir_all(&self.dir).at(&self.dir)?;
        let data = serde_json::to_vec_pretty(attrs)?;
        write_atomic(&file, &data)
    }
}

/// Write to a sibling temp file then rename over the target.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data).at(&tmp)?;
    std::fs::rename(&tmp, path).at(path)
}
