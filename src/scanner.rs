use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{DedupError, Result};
use crate::{FileRecord, ScanStats, SizeGroups};

/// Configuration for file scanning
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    pub min_size: u64,
    pub max_size: Option<u64>,
    pub include_extensions: HashSet<String>,
    pub exclude_extensions: HashSet<String>,
    /// Files or directories never reported (checkpoint, report, quarantine)
    pub exclude_paths: Vec<PathBuf>,
}

/// Walks directory trees and buckets regular files by size
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScanConfig,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn set_min_size(&mut self, size: u64) {
        self.config.min_size = size;
    }

    pub fn set_max_size(&mut self, size: u64) {
        self.config.max_size = Some(size);
    }

    pub fn set_include_extensions(&mut self, extensions: Vec<String>) {
        self.config.include_extensions = normalize_extensions(extensions);
    }

    pub fn set_exclude_extensions(&mut self, extensions: Vec<String>) {
        self.config.exclude_extensions = normalize_extensions(extensions);
    }

    pub fn exclude_path(&mut self, path: PathBuf) {
        self.config.exclude_paths.push(path);
    }

    /// Scan one root and keep only sizes shared by at least two files.
    pub fn scan(&self, root: &Path) -> Result<(SizeGroups, ScanStats)> {
        self.scan_directories(&[root.to_path_buf()])
    }

    /// Scan several roots in order. Discovery order across roots is preserved
    /// inside each size group; a path reachable from two roots is listed once.
    pub fn scan_directories(&self, roots: &[PathBuf]) -> Result<(SizeGroups, ScanStats)> {
        let (files, stats) = self.collect_files(roots)?;
        let mut groups = SizeGroups::new();

        for record in files {
            groups.entry(record.size).or_default().push(record);
        }
        groups.retain(|_, records| records.len() > 1);

        log::info!(
            "Indexing complete. {} files walked, {} size groups with potential duplicates covering {} files",
            stats.total_files_walked,
            groups.len(),
            groups.values().map(Vec::len).sum::<usize>()
        );

        Ok((groups, stats))
    }

    /// Collect every regular file passing the filters, in walk order.
    pub fn collect_files(&self, roots: &[PathBuf]) -> Result<(Vec<FileRecord>, ScanStats)> {
        for root in roots {
            check_root(root)?;
        }

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut stats = ScanStats::default();

        for (i, root) in roots.iter().enumerate() {
            let earlier = &roots[..i];
            if let Some(outer) = earlier.iter().find(|r| root.starts_with(r)) {
                log::debug!("{} is already covered by {}", root.display(), outer.display());
                continue;
            }
            // Roots nested inside this one were walked already
            let nested: Vec<&Path> = earlier
                .iter()
                .filter(|r| r.starts_with(root))
                .map(PathBuf::as_path)
                .collect();

            let (records, root_stats) = self.walk_skipping(root, &nested)?;
            stats += root_stats;
            files.extend(records.into_iter().filter(|r| seen.insert(r.path.clone())));
        }

        Ok((files, stats))
    }

    /// Walk a single root. Per-entry failures are counted, never returned.
    pub fn walk(&self, root: &Path) -> Result<(Vec<FileRecord>, ScanStats)> {
        self.walk_skipping(root, &[])
    }

    fn walk_skipping(&self, root: &Path, skip: &[&Path]) -> Result<(Vec<FileRecord>, ScanStats)> {
        check_root(root)?;
        log::info!("Indexing files in {}", root.display());

        let mut files = Vec::new();
        let mut stats = ScanStats::default();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !self.is_excluded(e.path()) && !skip.iter().any(|s| e.path().starts_with(s))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    stats.errors_indexing += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    log::warn!("Could not stat {}: {}", entry.path().display(), e);
                    stats.errors_indexing += 1;
                    continue;
                }
            };
            stats.total_files_walked += 1;

            if size < self.config.min_size {
                stats.files_ignored_by_size += 1;
                continue;
            }
            if let Some(max_size) = self.config.max_size {
                if size > max_size {
                    stats.files_ignored_by_size += 1;
                    continue;
                }
            }
            if !self.extension_allowed(entry.path()) {
                stats.files_ignored_by_filter += 1;
                continue;
            }

            files.push(FileRecord::new(entry.into_path(), size));
        }

        log::debug!(
            "{} files in {} matched the filters",
            files.len(),
            root.display()
        );

        Ok((files, stats))
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.config
            .exclude_paths
            .iter()
            .any(|excluded| path.starts_with(excluded))
    }

    /// Check the include/exclude extension lists
    fn extension_allowed(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_lowercase();
                if !self.config.include_extensions.is_empty()
                    && !self.config.include_extensions.contains(&ext)
                {
                    return false;
                }
                !self.config.exclude_extensions.contains(&ext)
            }
            // No extension, but include list is specified
            None => self.config.include_extensions.is_empty(),
        }
    }
}

fn normalize_extensions(extensions: Vec<String>) -> HashSet<String> {
    extensions
        .into_iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// A root that is missing or cannot be listed aborts the run.
pub fn check_root(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(DedupError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(DedupError::NotADirectory(root.to_path_buf()));
    }
    fs::read_dir(root).map_err(|e| DedupError::io(root, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, len: usize, byte: u8) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![byte; len]).unwrap();
    }

    #[test]
    fn test_scan_drops_singleton_sizes() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("a.bin"), 100, 1);
        write(&dir.path().join("sub/b.bin"), 100, 2);
        write(&dir.path().join("c.bin"), 50, 1);

        let (groups, stats) = Scanner::new().scan(dir.path()).unwrap();
        assert_eq!(stats.total_files_walked, 3);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&100].len(), 2);
        assert!(!groups.contains_key(&50));
    }

    #[test]
    fn test_scan_min_size_counts_ignored() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("small1"), 10, 0);
        write(&dir.path().join("small2"), 10, 0);
        write(&dir.path().join("big1"), 2048, 0);
        write(&dir.path().join("big2"), 2048, 0);

        let mut scanner = Scanner::new();
        scanner.set_min_size(1024);
        let (groups, stats) = scanner.scan(dir.path()).unwrap();

        assert_eq!(stats.files_ignored_by_size, 2);
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![2048]);
    }

    #[test]
    fn test_scan_order_is_deterministic() {
        let dir = tempdir().unwrap();
        for name in ["z.bin", "m.bin", "a.bin"] {
            write(&dir.path().join(name), 8, 7);
        }

        let (groups, _) = Scanner::new().scan(dir.path()).unwrap();
        let names: Vec<_> = groups[&8]
            .iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.bin", "m.bin", "z.bin"]);
    }

    #[test]
    fn test_extension_filters() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("a.MKV"), 4, 0);
        write(&dir.path().join("b.mkv"), 4, 0);
        write(&dir.path().join("c.txt"), 4, 0);
        write(&dir.path().join("noext"), 4, 0);

        let mut scanner = Scanner::new();
        scanner.set_include_extensions(vec![".mkv".to_string()]);
        let (groups, stats) = scanner.scan(dir.path()).unwrap();

        assert_eq!(groups[&4].len(), 2);
        assert_eq!(stats.files_ignored_by_filter, 2);
    }

    #[test]
    fn test_excluded_paths_are_pruned() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("keep/a.bin"), 16, 0);
        write(&dir.path().join("keep/b.bin"), 16, 0);
        write(&dir.path().join("trash/c.bin"), 16, 0);

        let mut scanner = Scanner::new();
        scanner.exclude_path(dir.path().join("trash"));
        let (groups, stats) = scanner.scan(dir.path()).unwrap();

        assert_eq!(stats.total_files_walked, 2);
        assert_eq!(groups[&16].len(), 2);
    }

    #[test]
    fn test_overlapping_roots_list_files_once() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("inner/a.bin"), 3, 0);
        write(&dir.path().join("inner/b.bin"), 3, 0);

        let roots = vec![dir.path().to_path_buf(), dir.path().join("inner")];
        let (groups, _) = Scanner::new().scan_directories(&roots).unwrap();
        assert_eq!(groups[&3].len(), 2);
    }

    #[test]
    fn test_nested_roots_are_counted_once() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("top.bin"), 3, 0);
        write(&dir.path().join("inner/a.bin"), 3, 0);
        write(&dir.path().join("inner/b.bin"), 3, 0);
        write(&dir.path().join("inner/tiny"), 1, 0);

        let mut scanner = Scanner::new();
        scanner.set_min_size(2);
        let outer_first = vec![dir.path().to_path_buf(), dir.path().join("inner")];
        let inner_first = vec![dir.path().join("inner"), dir.path().to_path_buf()];

        for roots in [outer_first, inner_first] {
            let (groups, stats) = scanner.scan_directories(&roots).unwrap();
            assert_eq!(groups[&3].len(), 3);
            assert_eq!(stats.total_files_walked, 4);
            assert_eq!(stats.files_ignored_by_size, 1);
        }

        let inner_first = vec![dir.path().join("inner"), dir.path().to_path_buf()];
        let (groups, _) = scanner.scan_directories(&inner_first).unwrap();
        assert_eq!(groups[&3][2].path, dir.path().join("top.bin"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_counted_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        write(&dir.path().join("a.bin"), 4, 0);
        write(&dir.path().join("b.bin"), 4, 0);
        write(&dir.path().join("sealed/c.bin"), 4, 0);
        let sealed = dir.path().join("sealed");
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can list it anyway
        if fs::read_dir(&sealed).is_ok() {
            fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = Scanner::new().scan(dir.path());
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).unwrap();

        let (groups, stats) = result.unwrap();
        assert_eq!(stats.errors_indexing, 1);
        assert_eq!(stats.total_files_walked, 2);
        assert_eq!(groups[&4].len(), 2);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            Scanner::new().scan(&missing),
            Err(DedupError::RootNotFound(_))
        ));

        let file = dir.path().join("file");
        write(&file, 1, 0);
        assert!(matches!(
            Scanner::new().scan(&file),
            Err(DedupError::NotADirectory(_))
        ));
    }
}
