use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::error::Result;

/// A discovered archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the partition root.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

impl DiscoveredFile {
    /// The key under which the import ledger remembers this file.
    pub fn ledger_key(&self) -> String {
        self.absolute_path.to_string_lossy().into_owned()
    }

    pub fn file_name(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A unit of sequential import work within a source directory.
#[derive(Debug, Clone)]
pub struct Partition {
    pub root: PathBuf,
    pub files: Vec<DiscoveredFile>,
}

/// Extensions of packed archives, which must be unpacked before import.
const SKIPPED_EXTENSIONS: &[&str] = &["tar", "xz", "bz2", "gz", "zip"];

/// Recursively walk a directory and discover archive files.
///
/// Skips hidden files and directories (names starting with `.`) and packed
/// archives. Results are sorted by relative path.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, true, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

/// Split a source directory into partitions imported one after another.
///
/// Files directly inside the source form the first partition; every
/// non-hidden subdirectory, in name order, forms one more. A source without
/// subdirectories is a single partition.
pub fn partition_source(source: &Path) -> Result<Vec<Partition>> {
    let root = source.canonicalize()?;

    let mut top = Vec::new();
    walk_dir(&root, &root, false, &mut top)?;
    top.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(&root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && !entry.file_name().to_string_lossy().starts_with('.')
        {
            subdirs.push(entry.path());
        }
    }
    subdirs.sort();

    let mut partitions = Vec::with_capacity(subdirs.len() + 1);
    if !top.is_empty() || subdirs.is_empty() {
        partitions.push(Partition {
            root: root.clone(),
            files: top,
        });
    }
    for dir in subdirs {
        let files = discover_files(&dir)?;
        partitions.push(Partition { root: dir, files });
    }
    Ok(partitions)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    recurse: bool,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if recurse {
                walk_dir(root, &entry.path(), recurse, results)?;
            }
        } else if file_type.is_symlink() {
            let Ok(resolved) = entry.path().canonicalize() else {
                continue; // broken symlink
            };
            if resolved.is_file() && is_importable(&resolved) {
                results.push(make_discovered(root, &entry.path(), &resolved)?);
            }
        } else if file_type.is_file() && is_importable(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs)?);
        }
    }

    Ok(())
}

fn is_importable(path: &Path) -> bool {
    !path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SKIPPED_EXTENSIONS.contains(&ext))
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    let mtime = std::fs::metadata(absolute_path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_archive_files_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("2013-04-01-06-00-00-consensus"), "")
            .unwrap();
        std::fs::write(tmp.path().join("2013-04-01-05-00-00-consensus"), "")
            .unwrap();
        std::fs::write(tmp.path().join("consensuses-2013-04.tar.xz"), "")
            .unwrap();

        let files = discover_files(tmp.path()).unwrap();
        assert_eq!(
            names(&files),
            vec![
                "2013-04-01-05-00-00-consensus",
                "2013-04-01-06-00-00-consensus"
            ]
        );
        assert!(files[0].mtime > 0);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".cache");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("a"), "").unwrap();
        std::fs::write(tmp.path().join(".partial"), "").unwrap();
        std::fs::write(tmp.path().join("b"), "").unwrap();

        assert_eq!(names(&discover_files(tmp.path()).unwrap()), vec!["b"]);
    }

    #[test]
    fn flat_source_is_one_partition() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a"), "").unwrap();
        std::fs::write(tmp.path().join("b"), "").unwrap();

        let parts = partition_source(tmp.path()).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(names(&parts[0].files), vec!["a", "b"]);
    }

    #[test]
    fn empty_source_is_one_empty_partition() {
        let tmp = tempfile::tempdir().unwrap();
        let parts = partition_source(tmp.path()).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].files.is_empty());
    }

    #[test]
    fn subdirectories_become_ordered_partitions() {
        let tmp = tempfile::tempdir().unwrap();
        for dir in ["02", "01"] {
            let sub = tmp.path().join(dir);
            std::fs::create_dir(&sub).unwrap();
            std::fs::create_dir(sub.join("deep")).unwrap();
            std::fs::write(sub.join("deep").join("x"), "").unwrap();
        }
        std::fs::write(tmp.path().join("loose"), "").unwrap();

        let parts = partition_source(tmp.path()).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(names(&parts[0].files), vec!["loose"]);
        assert!(parts[1].root.ends_with("01"));
        assert!(parts[2].root.ends_with("02"));
        assert_eq!(names(&parts[1].files), vec!["deep/x"]);
        assert_ne!(
            parts[1].files[0].absolute_path,
            parts[2].files[0].absolute_path
        );
    }
}
