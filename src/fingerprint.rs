use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};

/// Read buffer for hashing and comparison
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Smallest prefix hashed in fast mode
pub const FAST_MIN_PREFIX: u64 = 1024 * 1024;

/// Hex-encoded BLAKE3 digest, always 64 characters for computed values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: String) -> Self {
        Fingerprint(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A full BLAKE3 digest: 64 hex digits
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64 && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Leading characters for display
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Fingerprint(hash.to_hex().to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much of each file is hashed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    /// Hash the whole file
    #[default]
    Full,
    /// Hash only the leading max(1 MiB, 1% of size) bytes; matches must be verified
    Fast,
}

impl HashMode {
    /// Number of bytes to hash for a file of `size` bytes, `None` meaning all of it.
    pub fn read_limit(self, size: u64) -> Option<u64> {
        match self {
            HashMode::Full => None,
            HashMode::Fast => Some(FAST_MIN_PREFIX.max(size / 100)),
        }
    }

    pub fn is_partial(self) -> bool {
        matches!(self, HashMode::Fast)
    }
}

impl fmt::Display for HashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashMode::Full => f.write_str("full"),
            HashMode::Fast => f.write_str("fast"),
        }
    }
}

/// Calculate the BLAKE3 fingerprint of a file, streaming it in fixed-size chunks.
pub fn fingerprint_file(path: &Path, size: u64, mode: HashMode) -> Result<Fingerprint> {
    let mut file = File::open(path).map_err(|e| DedupError::io(path, e))?;

    let limit = mode.read_limit(size);
    let mut hasher = Hasher::new();
    let mut buffer = vec![0; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let want = match limit {
            Some(limit) if total >= limit => break,
            Some(limit) => (limit - total).min(CHUNK_SIZE as u64) as usize,
            None => CHUNK_SIZE,
        };

        let bytes_read = file
            .read(&mut buffer[..want])
            .map_err(|e| DedupError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok(hasher.finalize().into())
}

/// One file to fingerprint
#[derive(Debug, Clone)]
pub struct HashJob {
    pub path: PathBuf,
    pub size: u64,
}

/// Hashes batches of files, sequentially or on a bounded worker pool
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    mode: HashMode,
    threads: usize,
}

impl Fingerprinter {
    pub fn new(mode: HashMode) -> Self {
        Self { mode, threads: 0 }
    }

    /// 0 picks the rayon default, 1 hashes on the calling thread.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn mode(&self) -> HashMode {
        self.mode
    }

    pub fn fingerprint(&self, path: &Path, size: u64) -> Result<Fingerprint> {
        fingerprint_file(path, size, self.mode)
    }

    /// Hash every job, returning results in job order whatever order workers
    /// finish in. `on_done` runs on the worker thread right after each file.
    /// `None` means the job was not attempted because `keep_going` said stop.
    pub fn fingerprint_all<F, C>(
        &self,
        jobs: &[HashJob],
        keep_going: C,
        on_done: F,
    ) -> Result<Vec<Option<Result<Fingerprint>>>>
    where
        F: Fn(usize, &HashJob, &Result<Fingerprint>) + Sync,
        C: Fn() -> bool + Sync,
    {
        let run_one = |(index, job): (usize, &HashJob)| {
            if !keep_going() {
                return None;
            }
            let result = self.fingerprint(&job.path, job.size);
            on_done(index, job, &result);
            Some(result)
        };

        if self.threads == 1 {
            return Ok(jobs.iter().enumerate().map(run_one).collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;

        Ok(pool.install(|| jobs.par_iter().enumerate().map(run_one).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_read_limit() {
        assert_eq!(HashMode::Full.read_limit(10), None);
        assert_eq!(HashMode::Fast.read_limit(10), Some(FAST_MIN_PREFIX));
        assert_eq!(
            HashMode::Fast.read_limit(1_000 * FAST_MIN_PREFIX),
            Some(10 * FAST_MIN_PREFIX)
        );
    }

    #[test]
    fn test_full_hash_is_fixed_width_hex() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, b"hello world").unwrap();

        let fp = fingerprint_file(&path, 11, HashMode::Full).unwrap();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, Fingerprint::from(blake3::hash(b"hello world")));
    }

    #[test]
    fn test_short_never_splits_characters() {
        let odd = Fingerprint::from_hex(format!("a{}", "é".repeat(10)));
        assert_eq!(odd.short(), odd.as_str());
        assert!(!odd.is_well_formed());
        assert_eq!(Fingerprint::from_hex("ab".repeat(32)).short(), "abababababab");
    }

    #[test]
    fn test_fast_mode_ignores_tail() {
        let dir = tempdir().unwrap();
        let size = 2 * FAST_MIN_PREFIX as usize + 16;
        let mut a = vec![7u8; size];
        let mut b = a.clone();
        a[size - 1] = 1;
        b[size - 1] = 2;
        fs::write(dir.path().join("a"), &a).unwrap();
        fs::write(dir.path().join("b"), &b).unwrap();

        let fast_a = fingerprint_file(&dir.path().join("a"), size as u64, HashMode::Fast).unwrap();
        let fast_b = fingerprint_file(&dir.path().join("b"), size as u64, HashMode::Fast).unwrap();
        assert_eq!(fast_a, fast_b);

        let full_a = fingerprint_file(&dir.path().join("a"), size as u64, HashMode::Full).unwrap();
        let full_b = fingerprint_file(&dir.path().join("b"), size as u64, HashMode::Full).unwrap();
        assert_ne!(full_a, full_b);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = fingerprint_file(&dir.path().join("gone"), 0, HashMode::Full);
        assert!(matches!(result, Err(DedupError::Io { .. })));
    }

    #[test]
    fn test_fingerprint_all_preserves_job_order() {
        let dir = tempdir().unwrap();
        let mut jobs = Vec::new();
        for i in 0..16u8 {
            let path = dir.path().join(format!("f{i}"));
            fs::write(&path, vec![i; 64]).unwrap();
            jobs.push(HashJob { path, size: 64 });
        }

        let done = AtomicUsize::new(0);
        let results = Fingerprinter::new(HashMode::Full)
            .with_threads(4)
            .fingerprint_all(&jobs, || true, |_, _, _| {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 16);
        for (i, result) in results.into_iter().enumerate() {
            let expected = Fingerprint::from(blake3::hash(&vec![i as u8; 64]));
            assert_eq!(result.unwrap().unwrap(), expected);
        }
    }

    #[test]
    fn test_fingerprint_all_stops_when_told() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, b"x").unwrap();
        let jobs = vec![HashJob { path, size: 1 }];

        let results = Fingerprinter::new(HashMode::Full)
            .with_threads(1)
            .fingerprint_all(&jobs, || false, |_, _, _| {})
            .unwrap();
        assert!(results[0].is_none());
    }
}
