//! Write-ahead journal: one JSON object per line in `.journal/fs.log`.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IoResultExt, Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOp {
    Write,
    Mkdir,
    Delete,
    SetAttr,
    DeleteAttr,
}

/// Attribute carrying the octal file mode of a `write` entry.
pub const MODE_ATTR: &str = "mode";
/// Attribute marking a `delete` entry as a directory removal.
pub const KIND_ATTR: &str = "kind";
/// Attribute carrying the name for `setattr`/`deleteattr`; `setattr` stores
/// the value in the payload.
pub const KEY_ATTR: &str = "key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub operation: JournalOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl JournalEntry {
    fn new(operation: JournalOp, path: &str) -> Self {
        Self {
            operation,
            path: path.to_string(),
            payload: Vec::new(),
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn write(path: &str, data: &[u8], mode: u32) -> Self {
        let mut entry = Self::new(JournalOp::Write, path).with_attr(MODE_ATTR, format!("{:o}", mode));
        entry.payload = data.to_vec();
        entry
    }

    pub fn mkdir(path: &str) -> Self {
        Self::new(JournalOp::Mkdir, path)
    }

    pub fn delete(path: &str, is_dir: bool) -> Self {
        let entry = Self::new(JournalOp::Delete, path);
        if is_dir {
            entry.with_attr(KIND_ATTR, "dir")
        } else {
            entry
        }
    }

    pub fn set_attr(path: &str, key: &str, value: &str) -> Self {
        let mut entry = Self::new(JournalOp::SetAttr, path).with_attr(KEY_ATTR, key);
        entry.payload = value.as_bytes().to_vec();
        entry
    }

    pub fn delete_attr(path: &str, key: &str) -> Self {
        Self::new(JournalOp::DeleteAttr, path).with_attr(KEY_ATTR, key)
    }

    /// File mode of a `write` entry, if recorded and well-formed.
    pub fn mode(&self) -> Option<u32> {
        self.attributes
            .get(MODE_ATTR)
            .and_then(|m| u32::from_str_radix(m, 8).ok())
    }

    pub fn is_dir_delete(&self) -> bool {
        self.attributes.get(KIND_ATTR).map(String::as_str) == Some("dir")
    }

    pub fn attr_key(&self) -> Option<&str> {
        self.attributes.get(KEY_ATTR).map(String::as_str)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Something that can apply a journal entry. Implemented by the facade,
/// which replays through its own primitives without re-journaling.
pub trait ReplayTarget {
    fn replay(&self, entry: &JournalEntry) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub entries_read: usize,
    pub corrupt_skipped: usize,
    pub unique_paths: usize,
    pub replayed: usize,
    pub failed: usize,
}

/// Result of reading the log file.
#[derive(Debug, Default)]
pub struct Scan {
    pub entries: Vec<JournalEntry>,
    pub corrupt: usize,
}

pub struct Journal {
    path: PathBuf,
    /// `None` once closed, and while recovery has the stream down.
    file: Mutex<Option<File>>,
}

impl Journal {
    /// Open (creating if needed) the log at `path` for appending.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).at(dir)?;
        }
        let file = open_append(&path).at(&path)?;
        debug!("Journal opened at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Append one entry and flush it to disk before returning.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(VaultError::JournalClosed)?;
        file.write_all(&line).at(&self.path)?;
        file.sync_data().at(&self.path)?;
        Ok(())
    }

    /// Read every entry currently in the log. Lines that fail to parse are
    /// counted and skipped; a missing log is empty.
    pub fn scan(&self) -> Result<Scan> {
        scan_file(&self.path)
    }

    /// Replay the log into `target`.
    ///
    /// The append stream is closed for the duration, so concurrent appends
    /// fail with `JournalClosed` instead of racing the replay. Individual
    /// replay failures are logged and counted. Failing to reopen the stream
    /// afterwards is fatal and reported as `JournalReopen`.
    pub fn recover(&self, target: &dyn ReplayTarget) -> Result<RecoveryReport> {
        let previous = self.file.lock().take();
        drop(previous);

        let scanned = scan_file(&self.path);
        let mut report = RecoveryReport::default();

        if let Ok(scan) = &scanned {
            report.entries_read = scan.entries.len() + scan.corrupt;
            report.corrupt_skipped = scan.corrupt;

            let retained = converge(&scan.entries);
            report.unique_paths = retained.len();
            for entry in retained {
                match target.replay(entry) {
                    Ok(()) => report.replayed += 1,
                    Err(e) => {
                        warn!(
                            "Replay of {:?} on {} failed, skipping: {}",
                            entry.operation, entry.path, e
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        let reopened = open_append(&self.path).map_err(|source| VaultError::JournalReopen {
            path: self.path.display().to_string(),
            source,
        })?;
        *self.file.lock() = Some(reopened);

        scanned?;
        info!(
            "Journal recovery: {} entries ({} corrupt), {} paths, {} replayed, {} failed",
            report.entries_read,
            report.corrupt_skipped,
            report.unique_paths,
            report.replayed,
            report.failed
        );
        Ok(report)
    }

    /// Move the live log aside as `fs.log.<timestamp>` and start a fresh one.
    /// Holds the append stream for the whole swap.
    pub fn rotate(&self) -> Result<PathBuf> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            return Err(VaultError::JournalClosed);
        }
        if let Some(file) = guard.as_mut() {
            file.sync_all().at(&self.path)?;
        }

        let target = self.rotation_target();
        *guard = None;
        if let Err(e) = std::fs::rename(&self.path, &target) {
            *guard = Some(open_append(&self.path).at(&self.path)?);
            return Err(VaultError::io(&self.path, e));
        }
        *guard = Some(open_append(&self.path).at(&self.path)?);
        info!("Journal rotated to {}", target.display());
        Ok(target)
    }

    fn rotation_target(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let base = format!("{}.{}", self.path.display(), stamp);
        let mut candidate = PathBuf::from(&base);
        let mut n = 1;
        while candidate.exists() {
            candidate = PathBuf::from(format!("{}.{}", base, n));
            n += 1;
        }
        candidate
    }

    /// Discard every entry.
    pub fn truncate(&self) -> Result<()> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or(VaultError::JournalClosed)?;
        file.set_len(0).at(&self.path)?;
        file.sync_all().at(&self.path)?;
        info!("Journal truncated");
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        if let Some(file) = self.file.lock().take() {
            file.sync_all().at(&self.path)?;
            debug!("Journal closed");
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn scan_file(path: &Path) -> Result<Scan> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Scan::default()),
        Err(e) => return Err(VaultError::io(path, e)),
    };

    let mut scan = Scan::default();
    for (lineno, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line.at(path)?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<JournalEntry>(&line) {
            Ok(entry) => scan.entries.push(entry),
            Err(e) => {
                warn!("Skipping corrupt journal line {}: {}", lineno + 1, e);
                scan.corrupt += 1;
            }
        }
    }
    Ok(scan)
}

/// Keep the last entry per path, ordered by that entry's position in the log.
pub fn converge(entries: &[JournalEntry]) -> Vec<&JournalEntry> {
    let mut last: HashMap<&str, usize> = HashMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        last.insert(entry.path.as_str(), idx);
    }
    let mut positions: Vec<usize> = last.into_values().collect();
    positions.sort_unstable();
    positions.into_iter().map(|idx| &entries[idx]).collect()
}
