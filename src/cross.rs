//! Cross-directory mode: remove files from the target roots that already exist,
//! by size and content, in a reference directory. The reference is read only.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::dedup::{progress_bar, DedupConfig, RunReport};
use crate::error::{DedupError, Result};
use crate::fingerprint::{Fingerprint, HashJob};
use crate::resolver::{Cluster, Resolution};
use crate::scanner::check_root;
use crate::utils::absolutize;
use crate::{DuplicateSet, FileRecord, Progress};

pub fn run_cross(config: &DedupConfig, reference: &Path, cancel: &AtomicBool) -> Result<RunReport> {
    let start = Instant::now();
    check_root(reference)?;
    let reference = absolutize(reference).map_err(|e| DedupError::io(reference, e))?;
    let (targets, scanner) = config.prepare()?;

    if let Some(overlap) = targets
        .iter()
        .find(|t| t.starts_with(&reference) || reference.starts_with(t))
    {
        return Err(DedupError::InvalidConfig(format!(
            "reference {} overlaps target {}",
            reference.display(),
            overlap.display()
        )));
    }
    if config.state_file.is_some() {
        log::warn!("Checkpoints are not used in cross-directory mode");
    }

    log::info!("Scanning reference directory: {}", reference.display());
    let (reference_files, mut stats) = scanner.collect_files(std::slice::from_ref(&reference))?;
    log::info!("Scanning target directories");
    let (target_files, target_stats) = scanner.collect_files(&targets)?;
    stats += target_stats;

    // Only sizes present on both sides can match
    let reference_sizes: HashSet<u64> = reference_files.iter().map(|r| r.size).collect();
    let candidates: Vec<FileRecord> = target_files
        .into_iter()
        .filter(|r| reference_sizes.contains(&r.size))
        .collect();
    let candidate_sizes: HashSet<u64> = candidates.iter().map(|r| r.size).collect();
    let references: Vec<FileRecord> = reference_files
        .into_iter()
        .filter(|r| candidate_sizes.contains(&r.size))
        .collect();

    let jobs: Vec<HashJob> = references
        .iter()
        .chain(candidates.iter())
        .map(|r| HashJob {
            path: r.path.clone(),
            size: r.size,
        })
        .collect();

    let mut progress = Progress {
        total_to_process: jobs.len() as u64,
        ..Default::default()
    };
    log::info!(
        "{} target files share a size with {} reference files",
        candidates.len(),
        references.len()
    );

    let bar = progress_bar(jobs.len() as u64, config.show_progress);
    let counters = Mutex::new((0u64, 0u64));
    let results = config.fingerprinter().fingerprint_all(
        &jobs,
        || !cancel.load(Ordering::SeqCst),
        |_, job, result| {
            let mut counters = counters.lock().unwrap_or_else(|e| e.into_inner());
            counters.0 += 1;
            if let Err(e) = result {
                log::warn!("Skipping file, hash failed: {}", e);
                counters.1 += 1;
            }
            log::debug!("Processed file {} of {}: {}", counters.0, jobs.len(), job.path.display());
            bar.inc(1);
        },
    )?;
    bar.finish_and_clear();

    let (processed, skipped) = counters.into_inner().unwrap_or_else(|e| e.into_inner());
    progress.files_processed = processed;
    progress.skipped = skipped;

    let fingerprints: Vec<Option<Fingerprint>> = results
        .into_iter()
        .map(|r| r.and_then(|r| r.ok()))
        .collect();
    let (reference_fps, candidate_fps) = fingerprints.split_at(references.len());

    // Every reference file with a given size and fingerprint, in walk order.
    // Partial fingerprints can be shared by files that differ further on.
    let mut index: HashMap<(u64, &Fingerprint), Vec<&FileRecord>> = HashMap::new();
    for (record, fingerprint) in references.iter().zip(reference_fps) {
        if let Some(fp) = fingerprint {
            index.entry((record.size, fp)).or_default().push(record);
        }
    }

    let resolver = config.resolver(&targets);
    let mut resolutions: Vec<Resolution> = Vec::new();
    let mut slot_of: HashMap<(u64, &Fingerprint), usize> = HashMap::new();
    let mut interrupted = cancel.load(Ordering::SeqCst);

    for (candidate, fingerprint) in candidates.iter().zip(candidate_fps) {
        if interrupted || cancel.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        let Some(fp) = fingerprint else { continue };
        let Some(kept) = index.get(&(candidate.size, fp)) else {
            continue;
        };

        let mut record = candidate.clone();
        record.fingerprint = Some(fp.clone());
        let keeps: Vec<&Path> = kept.iter().map(|r| r.path.as_path()).collect();
        let outcome = resolver.resolve_against(&keeps, &record);

        let slot = *slot_of.entry((candidate.size, fp)).or_insert_with(|| {
            resolutions.push(Resolution {
                set: DuplicateSet {
                    fingerprint: fp.clone(),
                    size: candidate.size,
                    files: Vec::new(),
                },
                clusters: Vec::new(),
                outcomes: Vec::new(),
            });
            resolutions.len() - 1
        });

        let resolution = &mut resolutions[slot];
        let cluster = match resolution.clusters.iter().position(|c| c.keep == outcome.kept) {
            Some(i) => i,
            None => {
                let mut keep = FileRecord::new(outcome.kept.clone(), candidate.size);
                keep.fingerprint = Some(fp.clone());
                resolution.set.files.push(keep);
                resolution.clusters.push(Cluster {
                    keep: outcome.kept.clone(),
                    duplicates: Vec::new(),
                });
                resolution.clusters.len() - 1
            }
        };

        resolution.set.files.push(record);
        if outcome.disposition.is_duplicate() {
            resolution.clusters[cluster].duplicates.push(outcome.path.clone());
        }
        resolution.outcomes.push(outcome);
    }

    for resolution in &resolutions {
        progress += resolution.progress();
    }
    if interrupted {
        log::warn!("Interrupted; remaining target files left untouched");
    }

    let report = RunReport {
        roots: targets,
        stats,
        progress,
        resolutions,
        interrupted,
        elapsed: start.elapsed(),
    };

    if let Some(path) = &config.report_file {
        crate::report::DuplicatesReport::from_run(&report, config)
            .write(path)
            .unwrap_or_else(|e| log::error!("Failed to write report: {}", e));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DedupAction;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_overlapping_reference_is_rejected() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let mut config = DedupConfig::new(vec![dir.path().to_path_buf()]);
        config.reference = Some(dir.path().join("sub"));
        let result = crate::run(&config, &AtomicBool::new(false));

        assert!(matches!(result, Err(DedupError::InvalidConfig(_))));
    }

    #[test]
    fn test_only_target_side_is_touched() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("x.bin"), b"shared").unwrap();
        fs::write(a.join("y.bin"), b"unique").unwrap();
        fs::write(b.join("x_copy.bin"), b"shared").unwrap();
        fs::write(b.join("x_copy2.bin"), b"shared").unwrap();

        let mut config = DedupConfig::new(vec![a.clone()]);
        config.reference = Some(b.clone());
        config.action = DedupAction::Delete;
        config.threads = 1;
        let report = crate::run(&config, &AtomicBool::new(false)).unwrap();

        assert!(!a.join("x.bin").exists());
        assert!(a.join("y.bin").exists());
        assert!(b.join("x_copy.bin").exists());
        assert!(b.join("x_copy2.bin").exists());
        assert_eq!(report.progress.duplicates_found, 1);
        assert_eq!(report.progress.bytes_reclaimed, 6);
        assert_eq!(report.resolutions[0].clusters[0].keep, fs::canonicalize(b.join("x_copy.bin")).unwrap());
    }
}
