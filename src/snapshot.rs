// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Snapshot store - persisted cache of repository facts across runs

use crate::types::{CacheEntry, CacheSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Major format version written by this build
pub const FORMAT_VERSION: u32 = 1;

/// Errors raised by snapshot persistence
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The file exists but cannot be parsed
    #[error("snapshot at {path} is corrupted: {source}")]
    Corrupted {
        /// Offending file
        path: PathBuf,
        /// Parse failure detail
        #[source]
        source: serde_json::Error,
    },

    /// The file was written by an unknown major version
    #[error("snapshot format version {found} is not supported (this build reads version {supported})")]
    IncompatibleVersion {
        /// Version found on disk
        found: u32,
        /// Version this build understands
        supported: u32,
    },

    /// Filesystem failure
    #[error("snapshot I/O on {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// The full persisted mapping from repository identifier to cache entry
///
/// Owned exclusively by the [`SnapshotStore`]; mutated only through its
/// merge operation. A `BTreeMap` keeps serialization deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Major format version for forward-compatibility checks
    pub format_version: u32,
    /// When the last full (non-incremental) refresh completed
    #[serde(default)]
    pub last_full_refresh: Option<DateTime<Utc>>,
    /// All known cache entries by repository identifier
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            last_full_refresh: None,
            entries: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    /// Look up the cache entry for a repository
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    /// Number of cached repositories
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Age of the newest entry, if any
    #[must_use]
    pub fn newest_collection(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|e| e.collected_at).max()
    }

    /// Flag every entry as carried over from a previous run
    ///
    /// Called after load so that only entries overwritten by this run's
    /// merge end up marked [`CacheSource::Fresh`].
    pub fn mark_all_reused(&mut self) {
        for entry in self.entries.values_mut() {
            entry.source = CacheSource::Reused;
        }
    }

    /// Merge freshly collected entries into the snapshot
    ///
    /// New entries overwrite old ones by identifier; entries for
    /// repositories outside the given set are retained unmodified. The
    /// store never silently drops data for out-of-scope repositories.
    pub fn merge(&mut self, fresh: impl IntoIterator<Item = (String, CacheEntry)>) {
        for (id, entry) in fresh {
            self.entries.insert(id, entry);
        }
    }
}

/// Loads, merges, and atomically persists [`Snapshot`] values
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store backed by the given file path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path this store persists to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a snapshot file exists on disk
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the snapshot from disk
    ///
    /// An absent file yields an empty snapshot. Corruption and unknown
    /// major versions are reported as typed errors; callers are expected
    /// to fall back to an empty snapshot plus a full refresh, with a
    /// warning, rather than abort the run.
    pub fn load(&self) -> Result<Snapshot, SnapshotError> {
        if !self.path.exists() {
            return Ok(Snapshot::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        })?;

        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|source| SnapshotError::Corrupted {
                path: self.path.clone(),
                source,
            })?;

        if snapshot.format_version != FORMAT_VERSION {
            return Err(SnapshotError::IncompatibleVersion {
                found: snapshot.format_version,
                supported: FORMAT_VERSION,
            });
        }

        Ok(snapshot)
    }

    /// Persist the snapshot atomically
    ///
    /// Writes to a temporary file in the same directory and renames it
    /// over the target, so an interrupted run never leaves a partial
    /// snapshot behind.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| SnapshotError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(snapshot).map_err(|source| {
            SnapshotError::Corrupted {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| SnapshotError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }
}
