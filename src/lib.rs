pub mod checkpoint;
pub mod cross;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod signal;
pub mod utils;

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use checkpoint::{CheckpointStore, ScanCheckpoint};
pub use dedup::{run, DedupConfig, RunReport};
pub use error::DedupError;
pub use fingerprint::{Fingerprint, Fingerprinter, HashMode};
pub use resolver::{Resolver, ResolvePolicy};
pub use scanner::{ScanConfig, Scanner};

/// One file discovered under a scan root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    /// `None` until the fingerprinter has processed the file
    pub fingerprint: Option<Fingerprint>,
}

impl FileRecord {
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            size,
            fingerprint: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Files keyed by byte size, each bucket in discovery order.
pub type SizeGroups = BTreeMap<u64, Vec<FileRecord>>;

/// Files of one size sharing one fingerprint. The first member is the canonical copy.
#[derive(Debug, Clone)]
pub struct DuplicateSet {
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub files: Vec<FileRecord>,
}

impl DuplicateSet {
    pub fn canonical(&self) -> &FileRecord {
        &self.files[0]
    }

    pub fn candidates(&self) -> &[FileRecord] {
        &self.files[1..]
    }
}

/// Group fingerprinted records into duplicate sets.
///
/// Sets come out ordered by size, then by the discovery position of their first
/// member, and members keep discovery order. Records without a fingerprint are
/// ignored, as are fingerprints seen only once.
pub fn group_duplicates(groups: &SizeGroups) -> Vec<DuplicateSet> {
    let mut sets = Vec::new();

    for (&size, records) in groups {
        let mut order: Vec<DuplicateSet> = Vec::new();
        let mut index: std::collections::HashMap<&Fingerprint, usize> =
            std::collections::HashMap::new();

        for record in records {
            let Some(fingerprint) = record.fingerprint.as_ref() else {
                continue;
            };
            match index.get(fingerprint) {
                Some(&slot) => order[slot].files.push(record.clone()),
                None => {
                    index.insert(fingerprint, order.len());
                    order.push(DuplicateSet {
                        fingerprint: fingerprint.clone(),
                        size,
                        files: vec![record.clone()],
                    });
                }
            }
        }

        sets.extend(order.into_iter().filter(|set| set.files.len() > 1));
    }

    sets
}

/// Counters produced by the tree walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_files_walked: u64,
    pub files_ignored_by_size: u64,
    pub files_ignored_by_filter: u64,
    pub errors_indexing: u64,
}

impl AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.total_files_walked += other.total_files_walked;
        self.files_ignored_by_size += other.files_ignored_by_size;
        self.files_ignored_by_filter += other.files_ignored_by_filter;
        self.errors_indexing += other.errors_indexing;
    }
}

/// Counters produced by fingerprinting and resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Files hashed during this run
    pub files_processed: u64,
    /// Files whose fingerprint was taken from a checkpoint
    #[serde(default)]
    pub files_reused: u64,
    pub duplicates_found: u64,
    pub bytes_reclaimed: u64,
    #[serde(default)]
    pub bytes_reclaimable: u64,
    pub errors: u64,
    pub skipped: u64,
    #[serde(default)]
    pub collisions: u64,
    pub total_to_process: u64,
}

impl AddAssign for Progress {
    fn add_assign(&mut self, other: Self) {
        self.files_processed += other.files_processed;
        self.files_reused += other.files_reused;
        self.duplicates_found += other.duplicates_found;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.bytes_reclaimable += other.bytes_reclaimable;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.collisions += other.collisions;
        self.total_to_process += other.total_to_process;
    }
}

/// What to do with a confirmed duplicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupAction {
    /// Report duplicates without touching them
    List,
    /// Delete duplicate files (keeps the first occurrence)
    Delete,
    /// Move duplicate files into a quarantine directory, mirroring their relative path
    Move(PathBuf),
}

impl DedupAction {
    pub fn is_destructive(&self) -> bool {
        !matches!(self, DedupAction::List)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, size: u64, fp: Option<&str>) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size,
            fingerprint: fp.map(|f| Fingerprint::from_hex(f.to_string())),
        }
    }

    #[test]
    fn test_group_duplicates_keeps_discovery_order() {
        let mut groups = SizeGroups::new();
        groups.insert(
            10,
            vec![
                record("c", 10, Some("bb")),
                record("a", 10, Some("aa")),
                record("b", 10, Some("bb")),
                record("d", 10, Some("aa")),
                record("e", 10, None),
            ],
        );

        let sets = group_duplicates(&groups);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].canonical().path, PathBuf::from("c"));
        assert_eq!(sets[0].candidates()[0].path, PathBuf::from("b"));
        assert_eq!(sets[1].canonical().path, PathBuf::from("a"));
        assert_eq!(sets[1].candidates()[0].path, PathBuf::from("d"));
    }

    #[test]
    fn test_group_duplicates_drops_unique_fingerprints() {
        let mut groups = SizeGroups::new();
        groups.insert(5, vec![record("x", 5, Some("01")), record("y", 5, Some("02"))]);

        assert!(group_duplicates(&groups).is_empty());
    }

    #[test]
    fn test_progress_add_assign() {
        let mut total = Progress::default();
        total += Progress {
            files_processed: 2,
            bytes_reclaimed: 10,
            ..Default::default()
        };
        total += Progress {
            files_processed: 1,
            errors: 1,
            ..Default::default()
        };
        assert_eq!(total.files_processed, 3);
        assert_eq!(total.bytes_reclaimed, 10);
        assert_eq!(total.errors, 1);
    }
}
