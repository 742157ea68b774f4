use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures that stop a run before any work is done, plus the per-file
/// failures the pipeline records and recovers from.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("directory does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error for {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl DedupError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        DedupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Path the error refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            DedupError::RootNotFound(p) | DedupError::NotADirectory(p) => Some(p),
            DedupError::Io { path, .. } | DedupError::Json { path, .. } => Some(path),
            DedupError::InvalidConfig(_) | DedupError::WorkerPool(_) => None,
        }
    }
}

pub type Result<T, E = DedupError> = std::result::Result<T, E>;
