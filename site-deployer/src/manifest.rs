//! Inventory and snapshot types, plus the on-disk artifacts they live in.
//!
//! An [`Inventory`] is serialized as a JSON array of
//! `{"path": "...", "type": "file"|"directory", "md5": "<hex>"|false}`.
//! A [`SnapshotDescriptor`] is serialized as `{"revision": "..."}`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::errors::{io_err, Result};

/// Working inventory written into the input root; published as the remote manifest.
pub const LOCAL_INVENTORY_FILE: &str = "files.deploy.json";
/// Cached copy of the last published inventory.
pub const REMOTE_INVENTORY_FILE: &str = "files-remote.json";
/// Cached revision descriptor of the last successful session.
pub const REVISION_FILE: &str = "revision.json";
/// Audit log of the scheduled upload order.
pub const UPLOAD_LOG_FILE: &str = "upload-order.json";
/// Audit log of the scheduled removal order.
pub const REMOVE_LOG_FILE: &str = "remove-order.json";
/// Held while a session is in flight.
pub const LOCK_FILE: &str = "deploy.lock";

/// Entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One file or directory record.
///
/// Directories never carry a fingerprint, files always do. Use
/// [`Entry::file`] and [`Entry::directory`] to keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(with = "fingerprint_field", default)]
    pub md5: Option<String>,
}

impl Entry {
    pub fn file(path: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            md5: Some(fingerprint.into()),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            md5: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Drop the fingerprint; only path and kind matter once diffed.
    pub fn to_target(&self) -> Target {
        Target {
            path: self.path.clone(),
            kind: self.kind,
        }
    }
}

/// `md5` is written as `false` for directories and accepted as `false`,
/// `null` or missing when read back.
mod fingerprint_field {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(hex) => s.serialize_str(hex),
            None => s.serialize_bool(false),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Hex(String),
        Flag(bool),
        Null(()),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Hex(hex) => Ok(Some(hex)),
            Raw::Flag(_) | Raw::Null(()) => Ok(None),
        }
    }
}

/// A diffed entry: path and kind only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl Target {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Ordered entry list, unique by path.
///
/// Serialized as a plain JSON array of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<Entry>")]
pub struct Inventory {
    entries: Vec<Entry>,
    index: HashSet<String>,
}

impl From<Vec<Entry>> for Inventory {
    fn from(entries: Vec<Entry>) -> Self {
        Self::from_entries(entries)
    }
}

impl Serialize for Inventory {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.entries.serialize(s)
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, keeping the first occurrence of each path.
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        let mut inventory = Self {
            entries: Vec::with_capacity(entries.len()),
            index: HashSet::with_capacity(entries.len()),
        };
        for entry in entries {
            inventory.push(entry);
        }
        inventory
    }

    /// Append an entry. Returns `false` if the path was already present.
    pub fn push(&mut self, entry: Entry) -> bool {
        if !self.index.insert(entry.path.clone()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse an inventory from raw JSON bytes.
    ///
    /// Duplicate paths are collapsed to their first occurrence.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Load an inventory file. A missing file yields an empty inventory.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_slice(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(io_err(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn paths(&self) -> HashSet<&str> {
        self.index.iter().map(String::as_str).collect()
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Revision descriptor stamped on a published snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl SnapshotDescriptor {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: Some(revision.into()),
        }
    }

    /// Load a descriptor file. Missing or unreadable descriptors yield `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        match serde_json::from_slice::<Self>(&bytes) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                tracing::warn!("Ignoring malformed revision file {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

/// Locations of every artifact a session reads or writes.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub input_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(input_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            config_dir: config_dir.into(),
        }
    }

    pub fn local_inventory(&self) -> PathBuf {
        self.input_dir.join(LOCAL_INVENTORY_FILE)
    }

    pub fn remote_inventory(&self) -> PathBuf {
        self.config_dir.join(REMOTE_INVENTORY_FILE)
    }

    pub fn revision(&self) -> PathBuf {
        self.config_dir.join(REVISION_FILE)
    }

    pub fn upload_log(&self) -> PathBuf {
        self.config_dir.join(UPLOAD_LOG_FILE)
    }

    pub fn remove_log(&self) -> PathBuf {
        self.config_dir.join(REMOVE_LOG_FILE)
    }

    pub fn lock(&self) -> PathBuf {
        self.config_dir.join(LOCK_FILE)
    }
}

/// Serialize `value` as pretty JSON to `<path>.tmp`, then rename over `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
