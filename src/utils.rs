use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use humansize::{format_size, DECIMAL};

use crate::fingerprint::CHUNK_SIZE;

/// Format file size in human-readable format
pub fn format_file_size(size: u64) -> String {
    format_size(size, DECIMAL)
}

/// Format duration in human-readable format
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Compare two files byte by byte, reading both in lockstep.
///
/// Stops at the first differing chunk or when both files end together.
pub fn files_are_identical(first: &Path, second: &Path) -> io::Result<bool> {
    let mut a = File::open(first)?;
    let mut b = File::open(second)?;

    if a.metadata()?.len() != b.metadata()?.len() {
        return Ok(false);
    }

    let mut buf_a = vec![0; CHUNK_SIZE];
    let mut buf_b = vec![0; CHUNK_SIZE];

    loop {
        let n_a = read_full(&mut a, &mut buf_a)?;
        let n_b = read_full(&mut b, &mut buf_b)?;

        if n_a != n_b || buf_a[..n_a] != buf_b[..n_b] {
            return Ok(false);
        }
        if n_a == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` unless the reader hits end of file first
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Check if two paths point to the same file
pub fn are_same_file(path1: &Path, path2: &Path) -> io::Result<bool> {
    let meta1 = fs::metadata(path1)?;
    let meta2 = fs::metadata(path2)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok(meta1.dev() == meta2.dev() && meta1.ino() == meta2.ino())
    }

    #[cfg(not(unix))]
    {
        let _ = (meta1, meta2);
        Ok(fs::canonicalize(path1)? == fs::canonicalize(path2)?)
    }
}

/// Make `path` absolute without requiring it to exist yet.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    // The leaf may not exist yet, but its parent usually does
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match fs::canonicalize(parent) {
            Ok(parent) => Ok(parent.join(name)),
            Err(_) => Ok(absolute),
        },
        _ => Ok(absolute),
    }
}

/// Path of `path` relative to the first root that contains it,
/// falling back to the bare file name.
pub fn relative_to_roots(path: &Path, roots: &[PathBuf]) -> PathBuf {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .find_map(|root| pathdiff::diff_paths(path, root))
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(path.file_name().unwrap_or(path.as_os_str())))
}

/// Generate a path that does not exist yet by suffixing `_1`, `_2`, ... to the stem
pub fn generate_unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = split_filename(&name);

    let mut counter = 1;
    loop {
        let candidate = if ext.is_empty() {
            dir.join(format!("{}_{}", stem, counter))
        } else {
            dir.join(format!("{}_{}.{}", stem, counter, ext))
        };
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Split filename into stem and extension
fn split_filename(filename: &str) -> (String, String) {
    match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => (
            filename[..dot_pos].to_string(),
            filename[dot_pos + 1..].to_string(),
        ),
        _ => (filename.to_string(), String::new()),
    }
}

/// Move a file, copying across filesystems when a rename is not possible.
///
/// The source is only removed once the copy is complete, and a failed removal
/// drops the copy again so the file never exists zero or two times.
pub fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!(
                "rename {} -> {} failed ({}), falling back to copy",
                source.display(),
                target.display(),
                rename_err
            );
            fs::copy(source, target)?;
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(target);
                return Err(e);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_split_filename() {
        assert_eq!(split_filename("test.txt"), ("test".to_string(), "txt".to_string()));
        assert_eq!(split_filename("test"), ("test".to_string(), String::new()));
        assert_eq!(split_filename("test.tar.gz"), ("test.tar".to_string(), "gz".to_string()));
        assert_eq!(split_filename(".hidden"), (".hidden".to_string(), String::new()));
    }

    #[test]
    fn test_generate_unique_path() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("test.txt");
        assert_eq!(generate_unique_path(&original), original);

        File::create(&original).unwrap();
        let unique = generate_unique_path(&original);
        assert_eq!(unique.file_name().unwrap(), "test_1.txt");

        File::create(&unique).unwrap();
        let unique2 = generate_unique_path(&original);
        assert_eq!(unique2.file_name().unwrap(), "test_2.txt");
    }

    #[test]
    fn test_files_are_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        let mut content = vec![3u8; CHUNK_SIZE * 2 + 5];
        fs::write(&a, &content).unwrap();
        fs::write(&b, &content).unwrap();
        content[CHUNK_SIZE + 1] = 4;
        fs::write(&c, &content).unwrap();

        assert!(files_are_identical(&a, &b).unwrap());
        assert!(!files_are_identical(&a, &c).unwrap());
    }

    #[test]
    fn test_empty_files_are_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        File::create(&a).unwrap();
        File::create(&b).unwrap();
        assert!(files_are_identical(&a, &b).unwrap());
    }

    #[test]
    fn test_are_same_file() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"1").unwrap();
        fs::write(&b, b"1").unwrap();
        assert!(are_same_file(&a, &a).unwrap());
        assert!(!are_same_file(&a, &b).unwrap());
    }

    #[test]
    fn test_relative_to_roots() {
        let roots = vec![PathBuf::from("/media/a"), PathBuf::from("/media/b")];
        assert_eq!(
            relative_to_roots(Path::new("/media/b/x/y.mkv"), &roots),
            PathBuf::from("x/y.mkv")
        );
        assert_eq!(
            relative_to_roots(Path::new("/elsewhere/z.mkv"), &roots),
            PathBuf::from("z.mkv")
        );
    }

    #[test]
    fn test_move_file_creates_parents() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        fs::write(&source, b"payload").unwrap();
        let target = dir.path().join("q/deep/src.bin");

        move_file(&source, &target).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn test_format_duration() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
