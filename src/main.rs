use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use console::style;
use media_dedup::logging::init_logging;
use media_dedup::report::{print_duplicates, print_summary};
use media_dedup::signal::{install_handler, EXIT_CODE_INTERRUPTED};
use media_dedup::{run, DedupAction, DedupConfig, HashMode, Scanner};

#[derive(Debug, Clone, ValueEnum)]
enum ActionType {
    /// List duplicate files without taking any action
    List,
    /// Delete duplicate files (keeps the first occurrence)
    Delete,
    /// Move duplicate files into a quarantine directory
    Move,
}

#[derive(Parser)]
#[command(
    name = "dedup",
    version,
    about = "Find and remove exact duplicate files in media libraries",
    long_about = "Group files by size, fingerprint only sizes shared by several files, verify \
                  matches byte by byte and delete or quarantine every copy but the first. \
                  Long runs can be resumed from a checkpoint file."
)]
struct Cli {
    /// Directories to scan (can be specified multiple times)
    #[arg(short, long, value_name = "PATH", required = true)]
    dir: Vec<PathBuf>,

    /// Reference directory: remove files from --dir that also exist here; it is never modified
    #[arg(long, value_name = "PATH")]
    reference: Option<PathBuf>,

    /// Action to perform on duplicate files
    #[arg(short, long, value_enum, default_value = "list")]
    action: ActionType,

    /// Quarantine directory for the move action
    #[arg(long, value_name = "PATH")]
    move_to: Option<PathBuf>,

    /// Show what would be done without making changes
    #[arg(long)]
    dry_run: bool,

    /// Minimum file size in bytes to consider
    #[arg(long, default_value = "0")]
    min_size: u64,

    /// Maximum file size in bytes to consider
    #[arg(long)]
    max_size: Option<u64>,

    /// File extensions to include (comma-separated)
    #[arg(long, value_delimiter = ',')]
    include_ext: Vec<String>,

    /// File extensions to exclude (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_ext: Vec<String>,

    /// Fingerprint mode: full file, or a leading slice verified before deletion
    #[arg(long, value_enum, default_value = "full")]
    mode: HashMode,

    /// Skip the byte-for-byte check before acting (ignored in fast mode)
    #[arg(long)]
    no_verify: bool,

    /// Number of hashing threads (0 = auto-detect, 1 = sequential)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Checkpoint file used to resume interrupted runs
    #[arg(long, value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Write the duplicates report as JSON
    #[arg(long, value_name = "FILE")]
    report_file: Option<PathBuf>,

    /// Skip confirmation prompts (use with caution)
    #[arg(short, long)]
    yes: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn into_config(self) -> Result<DedupConfig> {
        let action = match self.action {
            ActionType::List => DedupAction::List,
            ActionType::Delete => DedupAction::Delete,
            ActionType::Move => DedupAction::Move(
                self.move_to
                    .context("--move-to is required when using move action")?,
            ),
        };

        let mut scanner = Scanner::new();
        scanner.set_min_size(self.min_size);
        if let Some(max_size) = self.max_size {
            scanner.set_max_size(max_size);
        }
        scanner.set_include_extensions(self.include_ext);
        scanner.set_exclude_extensions(self.exclude_ext);

        Ok(DedupConfig {
            roots: self.dir,
            reference: self.reference,
            scan: scanner.config().clone(),
            mode: self.mode,
            verify: !self.no_verify,
            dry_run: self.dry_run,
            action,
            threads: self.threads,
            state_file: self.state_file,
            report_file: self.report_file,
            show_progress: !self.quiet,
        })
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose, args.quiet);

    let verbose = args.verbose > 0;
    let yes = args.yes;
    let config = args.into_config()?;
    config.validate()?;
    if !config.verify && config.mode == HashMode::Fast {
        log::warn!("Fast mode fingerprints are partial; verification stays enabled");
    }

    if config.action.is_destructive() {
        if config.dry_run {
            println!("{}", style("🧪 Dry run mode - no changes will be made").yellow().bold());
        } else if !yes {
            let proceed = dialoguer::Confirm::new()
                .with_prompt("Duplicates will be removed from the scanned directories. Proceed?")
                .interact()?;

            if !proceed {
                println!("{}", style("Operation cancelled").yellow());
                return Ok(());
            }
        }
    }

    let cancel = install_handler().unwrap_or_else(|e| {
        log::warn!("Could not install Ctrl+C handler: {}", e);
        Arc::new(AtomicBool::new(false))
    });

    log::info!(
        "Starting scan. dry_run={}, mode={}, verify={}, min_size={}",
        config.dry_run,
        config.mode,
        config.effective_verify(),
        config.scan.min_size
    );
    println!("{}", style("🔍 Scanning directories for duplicate files...").cyan().bold());

    let report = run(&config, &cancel)?;

    if report.resolutions.is_empty() && !report.interrupted {
        println!("{}", style("✅ No duplicate files found!").green().bold());
    } else {
        print_duplicates(&report, verbose);
    }
    print_summary(&report, config.dry_run);

    if report.interrupted {
        std::process::exit(EXIT_CODE_INTERRUPTED);
    }

    Ok(())
}
