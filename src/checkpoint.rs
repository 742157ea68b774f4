//! Crash-safe persistence of scan and hashing progress.
//!
//! A checkpoint is a single JSON document holding every size group still in
//! play, the per-file hash state, and the run counters. It is always replaced
//! whole: the new version is written next to the target and renamed over it,
//! so a reader sees either the previous complete file or the new one.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};
use crate::{Fingerprint, HashMode, Progress, ScanStats, SizeGroups};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Hash state of one file in the checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HashState {
    /// Not hashed yet, or hashing failed and should be retried
    Pending,
    Hashed { digest: Fingerprint },
}

impl HashState {
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            HashState::Pending => None,
            HashState::Hashed { digest } => Some(digest),
        }
    }
}

impl From<Option<Fingerprint>> for HashState {
    fn from(fingerprint: Option<Fingerprint>) -> Self {
        match fingerprint {
            Some(digest) => HashState::Hashed { digest },
            None => HashState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub hash: HashState,
}

/// Persisted state of one deduplication run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub version: u32,
    pub roots: Vec<PathBuf>,
    pub mode: HashMode,
    pub min_size: u64,
    pub files_by_size: BTreeMap<u64, Vec<CheckpointEntry>>,
    pub stats: ScanStats,
    pub progress: Progress,
}

impl ScanCheckpoint {
    pub fn new(
        roots: &[PathBuf],
        mode: HashMode,
        min_size: u64,
        groups: &SizeGroups,
        stats: ScanStats,
    ) -> Self {
        let files_by_size = groups
            .iter()
            .map(|(&size, records)| {
                let entries = records
                    .iter()
                    .map(|r| CheckpointEntry {
                        path: r.path.clone(),
                        hash: r.fingerprint.clone().into(),
                    })
                    .collect();
                (size, entries)
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION,
            roots: roots.to_vec(),
            mode,
            min_size,
            files_by_size,
            stats,
            progress: Progress::default(),
        }
    }

    /// Fingerprints from another run are only meaningful for the same roots and mode.
    pub fn is_compatible(&self, roots: &[PathBuf], mode: HashMode) -> bool {
        self.version == CHECKPOINT_VERSION && self.roots == roots && self.mode == mode
    }

    /// Already computed fingerprints, keyed by path, with the size they were computed at
    pub fn known_fingerprints(&self) -> HashMap<PathBuf, (u64, Fingerprint)> {
        self.files_by_size
            .iter()
            .flat_map(|(&size, entries)| {
                entries.iter().filter_map(move |entry| {
                    entry
                        .hash
                        .fingerprint()
                        .map(|fp| (entry.path.clone(), (size, fp.clone())))
                })
            })
            .collect()
    }

    /// Update the hash state of the `index`-th file of the `size` group
    pub fn record(&mut self, size: u64, index: usize, state: HashState) {
        if let Some(entry) = self
            .files_by_size
            .get_mut(&size)
            .and_then(|entries| entries.get_mut(index))
        {
            entry.hash = state;
        }
    }

    fn has_malformed_digest(&self) -> bool {
        self.files_by_size
            .values()
            .flatten()
            .filter_map(|e| e.hash.fingerprint())
            .any(|fp| !fp.is_well_formed())
    }

    pub fn pending_count(&self) -> usize {
        self.files_by_size
            .values()
            .flatten()
            .filter(|e| e.hash == HashState::Pending)
            .count()
    }
}

/// Reads and atomically rewrites a checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persist(&self, state: &ScanCheckpoint) -> Result<()> {
        write_json_atomic(&self.path, state)
    }

    /// Load the previous checkpoint. Missing or unreadable files mean a fresh start.
    pub fn load(&self) -> Option<ScanCheckpoint> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                log::debug!("No checkpoint at {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<ScanCheckpoint>(&content) {
            Ok(state) if state.has_malformed_digest() => {
                log::warn!(
                    "Ignoring corrupt checkpoint {}: malformed digest",
                    self.path.display()
                );
                None
            }
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!(
                    "Ignoring corrupt checkpoint {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Path of the temporary file used while replacing `path`
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON next to `path`, then rename it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let temp = temp_path(path);

    let result = write_json(&temp, value).and_then(|()| {
        fs::rename(&temp, path).map_err(|e| DedupError::io(path, e))
    });

    if result.is_err() && temp.exists() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| DedupError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| DedupError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    writer.flush().map_err(|e| DedupError::io(path, e))?;

    let file = writer
        .into_inner()
        .map_err(|e| DedupError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| DedupError::io(path, e))
}
