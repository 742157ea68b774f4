use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{are_same_file, files_are_identical, generate_unique_path, move_file, relative_to_roots};
use crate::{DedupAction, DuplicateSet, FileRecord, Progress};

/// How confirmed duplicates are handled
#[derive(Debug, Clone)]
pub struct ResolvePolicy {
    pub action: DedupAction,
    /// Byte-compare every candidate with the kept copy before acting on it
    pub verify: bool,
    pub dry_run: bool,
    /// Scan roots, used to mirror relative paths inside the quarantine directory
    pub roots: Vec<PathBuf>,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            action: DedupAction::List,
            verify: true,
            dry_run: false,
            roots: Vec::new(),
        }
    }
}

/// What happened to one duplicate candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Reported only
    Listed,
    Deleted,
    WouldDelete,
    Moved(PathBuf),
    WouldMove(PathBuf),
    /// Fingerprints matched but the bytes differ; the file is kept
    ContentMismatch,
    /// The candidate is the kept file under another name (hard link or overlapping roots)
    SameFile,
    /// The byte comparison could not be completed; the file is kept
    VerifyFailed(String),
    /// A confirmed duplicate that could not be deleted or moved
    ActionFailed(String),
}

impl Disposition {
    /// Whether the candidate was confirmed as a duplicate of a kept file
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Disposition::Listed
                | Disposition::Deleted
                | Disposition::WouldDelete
                | Disposition::Moved(_)
                | Disposition::WouldMove(_)
                | Disposition::ActionFailed(_)
        )
    }

    /// Whether the file left its original location
    pub fn reclaimed(&self) -> bool {
        matches!(self, Disposition::Deleted | Disposition::Moved(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Disposition::VerifyFailed(_) | Disposition::ActionFailed(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub path: PathBuf,
    pub size: u64,
    /// The retained file this candidate was compared with
    pub kept: PathBuf,
    pub disposition: Disposition,
}

/// A retained file and the confirmed duplicates of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub keep: PathBuf,
    pub duplicates: Vec<PathBuf>,
}

impl Cluster {
    fn new(keep: PathBuf) -> Self {
        Self {
            keep,
            duplicates: Vec::new(),
        }
    }
}

/// Result of resolving one duplicate set
#[derive(Debug, Clone)]
pub struct Resolution {
    pub set: DuplicateSet,
    /// The canonical file first, then any file kept after a content mismatch
    pub clusters: Vec<Cluster>,
    pub outcomes: Vec<CandidateOutcome>,
}

impl Resolution {
    pub fn progress(&self) -> Progress {
        tally(&self.outcomes)
    }
}

/// Summary counters for a batch of outcomes
pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a CandidateOutcome>) -> Progress {
    let mut progress = Progress::default();
    for outcome in outcomes {
        let d = &outcome.disposition;
        if d.is_duplicate() {
            progress.duplicates_found += 1;
            progress.bytes_reclaimable += outcome.size;
        }
        if d.reclaimed() {
            progress.bytes_reclaimed += outcome.size;
        }
        if d.is_error() {
            progress.errors += 1;
        }
        match d {
            Disposition::SameFile => progress.skipped += 1,
            Disposition::ContentMismatch => progress.collisions += 1,
            _ => {}
        }
    }
    progress
}

enum Verdict {
    Matches(usize),
    SameFile(usize),
    Differs,
    Unreadable(String),
}

/// Decides which members of a duplicate set to keep and disposes of the rest
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    policy: ResolvePolicy,
}

impl Resolver {
    pub fn new(policy: ResolvePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ResolvePolicy {
        &self.policy
    }

    /// Resolve a duplicate set. The first member is never touched.
    ///
    /// With verification on, a candidate whose bytes differ from every kept file
    /// becomes a kept file itself, so later candidates identical to it are still
    /// caught.
    pub fn resolve(&self, set: &DuplicateSet) -> Resolution {
        let mut clusters = vec![Cluster::new(set.canonical().path.clone())];
        let mut outcomes = Vec::with_capacity(set.candidates().len());

        for candidate in set.candidates() {
            let verdict = self.compare(clusters.iter().map(|c| c.keep.as_path()), candidate);

            let (kept, disposition) = match verdict {
                Verdict::Matches(i) => {
                    let disposition = self.dispose(&clusters[i].keep, candidate);
                    if disposition.is_duplicate() {
                        clusters[i].duplicates.push(candidate.path.clone());
                    }
                    (clusters[i].keep.clone(), disposition)
                }
                Verdict::SameFile(i) => (clusters[i].keep.clone(), Disposition::SameFile),
                Verdict::Differs => {
                    log::warn!(
                        "Fingerprint collision, contents differ: {} and {}",
                        clusters[0].keep.display(),
                        candidate.path.display()
                    );
                    let kept = clusters[0].keep.clone();
                    clusters.push(Cluster::new(candidate.path.clone()));
                    (kept, Disposition::ContentMismatch)
                }
                Verdict::Unreadable(e) => {
                    log::error!("Could not compare {}: {}", candidate.path.display(), e);
                    (clusters[0].keep.clone(), Disposition::VerifyFailed(e))
                }
            };

            outcomes.push(CandidateOutcome {
                path: candidate.path.clone(),
                size: candidate.size,
                kept,
                disposition,
            });
        }

        Resolution {
            set: set.clone(),
            clusters,
            outcomes,
        }
    }

    /// Resolve a single candidate against a file that must be kept.
    pub fn resolve_candidate(&self, keep: &Path, candidate: &FileRecord) -> CandidateOutcome {
        self.resolve_against(&[keep], candidate)
    }

    /// Resolve a single candidate against several files that must be kept.
    ///
    /// The candidate is compared with each of them in turn and disposed of as a
    /// copy of the first one it matches; `kept` names that file.
    pub fn resolve_against(&self, keeps: &[&Path], candidate: &FileRecord) -> CandidateOutcome {
        let first = keeps.first().copied().unwrap_or(candidate.path.as_path());

        let (kept, disposition) = match self.compare(keeps.iter().copied(), candidate) {
            Verdict::Matches(i) => (keeps[i], self.dispose(keeps[i], candidate)),
            Verdict::SameFile(i) => (keeps[i], Disposition::SameFile),
            Verdict::Differs => {
                log::warn!(
                    "Fingerprint collision, contents differ: {} and {}",
                    first.display(),
                    candidate.path.display()
                );
                (first, Disposition::ContentMismatch)
            }
            Verdict::Unreadable(e) => {
                log::error!("Could not compare {}: {}", candidate.path.display(), e);
                (first, Disposition::VerifyFailed(e))
            }
        };

        CandidateOutcome {
            path: candidate.path.clone(),
            size: candidate.size,
            kept: kept.to_path_buf(),
            disposition,
        }
    }

    fn compare<'a>(
        &self,
        keeps: impl IntoIterator<Item = &'a Path>,
        candidate: &FileRecord,
    ) -> Verdict {
        for (i, keep) in keeps.into_iter().enumerate() {
            if are_same_file(keep, &candidate.path).unwrap_or(false) {
                return Verdict::SameFile(i);
            }
            if !self.policy.verify {
                return Verdict::Matches(i);
            }
            match files_are_identical(keep, &candidate.path) {
                Ok(true) => return Verdict::Matches(i),
                Ok(false) => continue,
                Err(e) => return Verdict::Unreadable(e.to_string()),
            }
        }
        Verdict::Differs
    }

    fn dispose(&self, keep: &Path, candidate: &FileRecord) -> Disposition {
        let path = &candidate.path;

        match &self.policy.action {
            DedupAction::List => {
                log::info!("Duplicate: {} == {}", path.display(), keep.display());
                Disposition::Listed
            }
            DedupAction::Delete if self.policy.dry_run => {
                log::warn!("[DRY RUN] Would delete: {} == {}", path.display(), keep.display());
                Disposition::WouldDelete
            }
            DedupAction::Delete => {
                if let Err(reason) = self.check_keep_present(keep) {
                    return Disposition::ActionFailed(reason);
                }
                match fs::remove_file(path) {
                    Ok(()) => {
                        log::warn!("Deleted duplicate: {} == {}", path.display(), keep.display());
                        Disposition::Deleted
                    }
                    Err(e) => {
                        log::error!("Failed to delete {}: {}", path.display(), e);
                        Disposition::ActionFailed(format!("Failed to delete: {}", e))
                    }
                }
            }
            DedupAction::Move(quarantine) => {
                let target = generate_unique_path(
                    &quarantine.join(relative_to_roots(path, &self.policy.roots)),
                );
                if self.policy.dry_run {
                    log::warn!(
                        "[DRY RUN] Would move: {} -> {}",
                        path.display(),
                        target.display()
                    );
                    return Disposition::WouldMove(target);
                }
                if let Err(reason) = self.check_keep_present(keep) {
                    return Disposition::ActionFailed(reason);
                }
                match move_file(path, &target) {
                    Ok(()) => {
                        log::warn!("Moved duplicate: {} -> {}", path.display(), target.display());
                        Disposition::Moved(target)
                    }
                    Err(e) => {
                        log::error!("Failed to move {}: {}", path.display(), e);
                        Disposition::ActionFailed(format!("Failed to move: {}", e))
                    }
                }
            }
        }
    }

    /// Without verification nothing else proves the kept copy is still there.
    fn check_keep_present(&self, keep: &Path) -> Result<(), String> {
        if self.policy.verify || keep.is_file() {
            Ok(())
        } else {
            Err(format!("kept copy {} is no longer present", keep.display()))
        }
    }
}
