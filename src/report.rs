use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use console::style;
use serde::{Deserialize, Serialize};

use crate::checkpoint::write_json_atomic;
use crate::dedup::{DedupConfig, RunReport};
use crate::error::Result;
use crate::resolver::Disposition;
use crate::utils::{format_duration, format_file_size};
use crate::{HashMode, Progress, ScanStats};

/// The duplicates report written at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicatesReport {
    pub duplicates: BTreeMap<String, ReportEntry>,
    pub metadata: ReportMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Kept file first, then its duplicates
    pub files: Vec<PathBuf>,
    pub count: usize,
    pub example_keep: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(flatten)]
    pub stats: ScanStats,
    #[serde(flatten)]
    pub progress: Progress,
    pub mode: HashMode,
    pub dry_run: bool,
    pub interrupted: bool,
}

impl DuplicatesReport {
    pub fn from_run(run: &RunReport, config: &DedupConfig) -> Self {
        let mut duplicates = BTreeMap::new();

        for resolution in &run.resolutions {
            let fingerprint = resolution.set.fingerprint.as_str();
            for (i, cluster) in resolution.clusters.iter().enumerate() {
                if cluster.duplicates.is_empty() {
                    continue;
                }

                let mut key = if i == 0 {
                    fingerprint.to_string()
                } else {
                    format!("{}-{}", fingerprint, i + 1)
                };
                // Partial fingerprints can repeat across sizes
                if duplicates.contains_key(&key) {
                    key = format!("{}@{}", key, resolution.set.size);
                }

                let mut files = Vec::with_capacity(cluster.duplicates.len() + 1);
                files.push(cluster.keep.clone());
                files.extend(cluster.duplicates.iter().cloned());

                duplicates.insert(
                    key,
                    ReportEntry {
                        count: files.len(),
                        example_keep: cluster.keep.clone(),
                        files,
                    },
                );
            }
        }

        Self {
            duplicates,
            metadata: ReportMetadata {
                stats: run.stats,
                progress: run.progress,
                mode: config.mode,
                dry_run: config.dry_run,
                interrupted: run.interrupted,
            },
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        log::info!("Duplicates report written to {}", path.display());
        Ok(())
    }
}

/// Print each duplicate set, the kept file first
pub fn print_duplicates(run: &RunReport, verbose: bool) {
    if run.resolutions.is_empty() {
        return;
    }

    println!();
    println!("{}", style("📊 Duplicate Files Found").cyan().bold());
    println!("{}", style("=".repeat(40)).cyan());

    for resolution in &run.resolutions {
        let set = &resolution.set;
        if verbose {
            println!();
            println!(
                "{} {} ({})",
                style("Hash:").bold(),
                set.fingerprint.short(),
                format_file_size(set.size)
            );
            println!("  📄 {}", set.canonical().path.display());
            for outcome in &resolution.outcomes {
                println!("  {} {}", marker(&outcome.disposition), outcome.path.display());
            }
        } else {
            let found = resolution.progress().duplicates_found;
            if found > 0 {
                println!(
                    "{} duplicate files for {} ({})",
                    found,
                    set.canonical()
                        .path
                        .file_name()
                        .unwrap_or_default()
                        .to_string_lossy(),
                    format_file_size(set.size * found)
                );
            }
        }
    }
}

fn marker(disposition: &Disposition) -> &'static str {
    match disposition {
        Disposition::Listed => "🔗",
        Disposition::Deleted | Disposition::WouldDelete => "🗑",
        Disposition::Moved(_) | Disposition::WouldMove(_) => "📦",
        Disposition::ContentMismatch => "≠",
        Disposition::SameFile => "=",
        Disposition::VerifyFailed(_) | Disposition::ActionFailed(_) => "❌",
    }
}

/// Print the end-of-run counters
pub fn print_summary(run: &RunReport, dry_run: bool) {
    let p = &run.progress;
    let s = &run.stats;

    println!();
    println!("{}", style("📈 Summary").green().bold());
    println!("{}", style("-".repeat(20)).green());
    println!("Files walked: {}", s.total_files_walked);
    println!("Ignored by size: {}", s.files_ignored_by_size);
    if s.files_ignored_by_filter > 0 {
        println!("Ignored by extension: {}", s.files_ignored_by_filter);
    }
    println!("Files processed: {}", p.files_processed);
    if p.files_reused > 0 {
        println!("Fingerprints reused: {}", p.files_reused);
    }
    println!("Duplicates found: {}", p.duplicates_found);
    if dry_run {
        println!("Space that would be reclaimed: {}", format_file_size(p.bytes_reclaimable));
    } else {
        println!("Space reclaimed: {}", format_file_size(p.bytes_reclaimed));
        if p.bytes_reclaimable > p.bytes_reclaimed {
            println!("Space reclaimable: {}", format_file_size(p.bytes_reclaimable));
        }
    }
    println!("Skipped: {}", p.skipped);
    if p.collisions > 0 {
        println!(
            "{}",
            style(format!("Fingerprint collisions (kept): {}", p.collisions)).yellow()
        );
    }
    let errors = p.errors + s.errors_indexing;
    if errors > 0 {
        println!("{}", style(format!("Errors: {}", errors)).red());
    } else {
        println!("Errors: 0");
    }
    println!("Elapsed: {}", format_duration(run.elapsed));

    if errors > 0 {
        println!();
        println!("{}", style("❌ Errors:").red().bold());
        for outcome in run.resolutions.iter().flat_map(|r| r.outcomes.iter()) {
            if let Disposition::VerifyFailed(e) | Disposition::ActionFailed(e) = &outcome.disposition {
                println!("  {}: {}", outcome.path.display(), e);
            }
        }
    }

    if run.interrupted {
        println!();
        println!("{}", style("⚠ Run interrupted, results are partial").yellow().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{CandidateOutcome, Cluster, Resolution};
    use crate::{DuplicateSet, FileRecord, Fingerprint};

    fn resolution(fp: &str, size: u64, clusters: Vec<Cluster>) -> Resolution {
        let mut files = vec![FileRecord::new(clusters[0].keep.clone(), size)];
        let mut outcomes = Vec::new();
        for cluster in &clusters {
            for dup in &cluster.duplicates {
                files.push(FileRecord::new(dup.clone(), size));
                outcomes.push(CandidateOutcome {
                    path: dup.clone(),
                    size,
                    kept: cluster.keep.clone(),
                    disposition: Disposition::Deleted,
                });
            }
        }
        Resolution {
            set: DuplicateSet {
                fingerprint: Fingerprint::from_hex(fp.to_string()),
                size,
                files,
            },
            clusters,
            outcomes,
        }
    }

    #[test]
    fn test_report_entries() {
        let run = RunReport {
            resolutions: vec![resolution(
                "abc",
                1000,
                vec![
                    Cluster {
                        keep: PathBuf::from("/m/a.bin"),
                        duplicates: vec![PathBuf::from("/m/b.bin")],
                    },
                    Cluster {
                        keep: PathBuf::from("/m/c.bin"),
                        duplicates: Vec::new(),
                    },
                ],
            )],
            ..Default::default()
        };

        let report = DuplicatesReport::from_run(&run, &DedupConfig::default());
        assert_eq!(report.duplicates.len(), 1);
        let entry = &report.duplicates["abc"];
        assert_eq!(entry.count, 2);
        assert_eq!(entry.example_keep, PathBuf::from("/m/a.bin"));
        assert_eq!(entry.files[1], PathBuf::from("/m/b.bin"));
    }

    #[test]
    fn test_repeated_fingerprint_keys_stay_distinct() {
        let cluster = |keep: &str, dup: &str| Cluster {
            keep: PathBuf::from(keep),
            duplicates: vec![PathBuf::from(dup)],
        };
        let run = RunReport {
            resolutions: vec![
                resolution("abc", 10, vec![cluster("/a", "/b")]),
                resolution("abc", 20, vec![cluster("/c", "/d")]),
            ],
            ..Default::default()
        };

        let report = DuplicatesReport::from_run(&run, &DedupConfig::default());
        assert!(report.duplicates.contains_key("abc"));
        assert!(report.duplicates.contains_key("abc@20"));
    }

    #[test]
    fn test_metadata_is_flat() {
        let run = RunReport::default();
        let report = DuplicatesReport::from_run(&run, &DedupConfig::default());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["metadata"]["duplicates_found"], 0);
        assert_eq!(json["metadata"]["total_files_walked"], 0);
        assert_eq!(json["metadata"]["mode"], "full");
    }
}
