use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::checkpoint::{temp_path, CheckpointStore, HashState, ScanCheckpoint};
use crate::error::{DedupError, Result};
use crate::fingerprint::{Fingerprinter, HashJob, HashMode};
use crate::resolver::{Resolution, ResolvePolicy, Resolver};
use crate::scanner::{check_root, ScanConfig, Scanner};
use crate::utils::absolutize;
use crate::{group_duplicates, DedupAction, Progress, ScanStats, SizeGroups};

/// Everything a deduplication run needs to know
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Directories to scan; in cross-directory mode these are the deletion targets
    pub roots: Vec<PathBuf>,
    /// Cross-directory mode: files in `roots` that also exist here are removed
    pub reference: Option<PathBuf>,
    pub scan: ScanConfig,
    pub mode: HashMode,
    pub verify: bool,
    pub dry_run: bool,
    pub action: DedupAction,
    /// Hashing workers, 0 = one per core, 1 = sequential
    pub threads: usize,
    pub state_file: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            reference: None,
            scan: ScanConfig::default(),
            mode: HashMode::Full,
            verify: true,
            dry_run: false,
            action: DedupAction::List,
            threads: 0,
            state_file: None,
            report_file: None,
            show_progress: false,
        }
    }
}

impl DedupConfig {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Partial fingerprints are only candidates, so fast mode always verifies.
    pub fn effective_verify(&self) -> bool {
        self.verify || self.mode.is_partial()
    }

    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(DedupError::InvalidConfig(
                "at least one directory must be specified".into(),
            ));
        }
        if let Some(max) = self.scan.max_size {
            if max < self.scan.min_size {
                return Err(DedupError::InvalidConfig(format!(
                    "maximum size {} is below minimum size {}",
                    max, self.scan.min_size
                )));
            }
        }
        Ok(())
    }

    /// Canonical roots, plus a scanner that skips the tool's own files.
    pub(crate) fn prepare(&self) -> Result<(Vec<PathBuf>, Scanner)> {
        self.validate()?;

        let mut roots: Vec<PathBuf> = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            check_root(root)?;
            let canonical = absolutize(root).map_err(|e| DedupError::io(root, e))?;
            if !roots.contains(&canonical) {
                roots.push(canonical);
            }
        }

        let mut scan = self.scan.clone();
        // Written atomically, so a crash can leave the temporary sibling behind
        for path in self.state_file.iter().chain(self.report_file.iter()) {
            let absolute = absolutize(path).map_err(|e| DedupError::io(path, e))?;
            scan.exclude_paths.push(temp_path(&absolute));
            scan.exclude_paths.push(absolute);
        }
        if let DedupAction::Move(quarantine) = &self.action {
            let absolute = absolutize(quarantine).map_err(|e| DedupError::io(quarantine, e))?;
            scan.exclude_paths.push(absolute);
        }

        Ok((roots, Scanner::with_config(scan)))
    }

    pub(crate) fn resolver(&self, roots: &[PathBuf]) -> Resolver {
        Resolver::new(ResolvePolicy {
            action: self.action.clone(),
            verify: self.effective_verify(),
            dry_run: self.dry_run,
            roots: roots.to_vec(),
        })
    }

    pub(crate) fn fingerprinter(&self) -> Fingerprinter {
        Fingerprinter::new(self.mode).with_threads(self.threads)
    }
}

/// Outcome of a run, returned even when it was interrupted
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub roots: Vec<PathBuf>,
    pub stats: ScanStats,
    pub progress: Progress,
    pub resolutions: Vec<Resolution>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunReport {
    /// Every file confirmed as a duplicate, whether or not it was removed
    pub fn duplicate_paths(&self) -> Vec<PathBuf> {
        self.resolutions
            .iter()
            .flat_map(|r| r.outcomes.iter())
            .filter(|o| o.disposition.is_duplicate())
            .map(|o| o.path.clone())
            .collect()
    }
}

/// Run the full scan, fingerprint and resolve pipeline.
///
/// Only setup problems return `Err`; per-file failures are counted in the report.
/// Setting `cancel` stops the run at the next file boundary.
pub fn run(config: &DedupConfig, cancel: &AtomicBool) -> Result<RunReport> {
    if let Some(reference) = &config.reference {
        return crate::cross::run_cross(config, reference, cancel);
    }

    let start = Instant::now();
    let (roots, scanner) = config.prepare()?;
    let (mut groups, stats) = scanner.scan_directories(&roots)?;

    let store = config.state_file.as_ref().map(CheckpointStore::new);
    let reused = match &store {
        Some(store) => restore_fingerprints(&mut groups, store, &roots, config.mode),
        None => 0,
    };

    let mut checkpoint =
        ScanCheckpoint::new(&roots, config.mode, config.scan.min_size, &groups, stats);
    checkpoint.progress.total_to_process = groups.values().map(|g| g.len() as u64).sum();
    checkpoint.progress.files_reused = reused;
    save(store.as_ref(), &checkpoint);

    log::info!(
        "Found {} size groups with potential duplicates. Processing {} files ({} already hashed).",
        groups.len(),
        checkpoint.progress.total_to_process,
        reused
    );

    let mut checkpoint = hash_pending(config, &mut groups, checkpoint, store.as_ref(), cancel)?;
    let mut report = RunReport {
        roots,
        stats,
        ..Default::default()
    };

    if cancel.load(Ordering::SeqCst) {
        log::warn!("Interrupted while hashing; progress saved");
        report.interrupted = true;
    } else {
        let resolver = config.resolver(&report.roots);
        for set in group_duplicates(&groups) {
            if cancel.load(Ordering::SeqCst) {
                log::warn!("Interrupted while resolving duplicates");
                report.interrupted = true;
                break;
            }
            let resolution = resolver.resolve(&set);
            checkpoint.progress += resolution.progress();
            report.resolutions.push(resolution);
        }
    }

    save(store.as_ref(), &checkpoint);
    report.progress = checkpoint.progress;
    report.elapsed = start.elapsed();

    if let Some(path) = &config.report_file {
        crate::report::DuplicatesReport::from_run(&report, config)
            .write(path)
            .unwrap_or_else(|e| log::error!("Failed to write report: {}", e));
    }

    Ok(report)
}

/// Copy fingerprints from a compatible checkpoint onto freshly scanned records.
/// A file is trusted only if it still has the size it was hashed at.
fn restore_fingerprints(
    groups: &mut SizeGroups,
    store: &CheckpointStore,
    roots: &[PathBuf],
    mode: HashMode,
) -> u64 {
    let Some(previous) = store.load() else {
        return 0;
    };
    if !previous.is_compatible(roots, mode) {
        log::info!(
            "Checkpoint {} belongs to a different run, starting fresh",
            store.path().display()
        );
        return 0;
    }

    let known = previous.known_fingerprints();
    let mut reused = 0;
    for record in groups.values_mut().flatten() {
        if let Some((size, fingerprint)) = known.get(&record.path) {
            if *size == record.size {
                record.fingerprint = Some(fingerprint.clone());
                reused += 1;
            }
        }
    }

    log::info!(
        "Resuming from {}: {} fingerprints reused",
        store.path().display(),
        reused
    );
    reused
}

/// Fingerprint every record that has none yet, persisting after each file.
fn hash_pending(
    config: &DedupConfig,
    groups: &mut SizeGroups,
    checkpoint: ScanCheckpoint,
    store: Option<&CheckpointStore>,
    cancel: &AtomicBool,
) -> Result<ScanCheckpoint> {
    let mut slots = Vec::new();
    let mut jobs = Vec::new();
    for (&size, records) in groups.iter() {
        for (index, record) in records.iter().enumerate() {
            if record.fingerprint.is_none() {
                slots.push((size, index));
                jobs.push(HashJob {
                    path: record.path.clone(),
                    size,
                });
            }
        }
    }

    if jobs.is_empty() {
        return Ok(checkpoint);
    }

    let bar = progress_bar(jobs.len() as u64, config.show_progress);
    let total = checkpoint.progress.total_to_process;
    let shared = Mutex::new(checkpoint);

    let results = config.fingerprinter().fingerprint_all(
        &jobs,
        || !cancel.load(Ordering::SeqCst),
        |i, job, result| {
            let (size, index) = slots[i];
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.progress.files_processed += 1;

            match result {
                Ok(fingerprint) => {
                    state.record(size, index, HashState::Hashed {
                        digest: fingerprint.clone(),
                    });
                }
                Err(e) => {
                    log::warn!("Skipping file, hash failed: {}", e);
                    state.progress.skipped += 1;
                }
            }

            let done = state.progress.files_processed + state.progress.files_reused;
            if config.show_progress {
                log::debug!("Processed file {} of {}: {}", done, total, job.path.display());
            } else {
                log::info!("Processed file {} of {}: {}", done, total, job.path.display());
            }

            save(store, &state);
            bar.inc(1);
        },
    )?;

    bar.finish_and_clear();

    for (&(size, index), result) in slots.iter().zip(results) {
        if let Some(Ok(fingerprint)) = result {
            if let Some(record) = groups.get_mut(&size).and_then(|g| g.get_mut(index)) {
                record.fingerprint = Some(fingerprint);
            }
        }
    }

    Ok(shared.into_inner().unwrap_or_else(PoisonError::into_inner))
}

/// Checkpoint failures are logged; the run goes on without them.
fn save(store: Option<&CheckpointStore>, checkpoint: &ScanCheckpoint) {
    if let Some(store) = store {
        if let Err(e) = store.persist(checkpoint) {
            log::error!("Failed to write checkpoint: {}", e);
        }
    }
}

pub(crate) fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let progress = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    progress.set_style(style);
    progress
}
