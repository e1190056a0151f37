use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

/// A regular file found under a walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// `path` relative to the walk root.
    pub relative: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Lazily yields every regular file below `root`, in file-name order.
///
/// The tree is never materialised; call again to restart from the top.
/// `max_depth` of 1 restricts the walk to the immediate children of `root`.
pub fn walk_files(
    root: &Path,
    max_depth: Option<usize>,
) -> impl Iterator<Item = Result<FileEntry>> {
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let root = root.to_path_buf();

    walker.into_iter().filter_map(move |entry| match entry {
        Ok(entry) if entry.file_type().is_file() => Some(file_entry(&root, entry.path())),
        Ok(_) => None,
        Err(e) => Some(Err(anyhow::Error::new(e).context("walk directory"))),
    })
}

/// Immediate subdirectories of `root`, sorted by name.
pub fn subdirectories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("list {}", root.display()))?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

fn file_entry(root: &Path, path: &Path) -> Result<FileEntry> {
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let modified = meta
        .modified()
        .with_context(|| format!("read mtime of {}", path.display()))?;
    Ok(FileEntry {
        path: path.to_path_buf(),
        relative: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
        size: meta.len(),
        modified_at: DateTime::<Utc>::from(modified),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_nested_files_lazily_and_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("cv/2026")).unwrap();
        std::fs::write(tmp.path().join("cv/b.pdf"), b"b").unwrap();
        std::fs::write(tmp.path().join("cv/2026/a.pdf"), b"aa").unwrap();

        let mut walk = walk_files(tmp.path(), None);
        let first = walk.next().unwrap().unwrap();
        assert_eq!(first.relative, PathBuf::from("cv/2026/a.pdf"));
        assert_eq!(first.size, 2);
        let rest: Vec<_> = walk.map(|e| e.unwrap().relative).collect();
        assert_eq!(rest, vec![PathBuf::from("cv/b.pdf")]);
    }

    #[test]
    fn depth_one_skips_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("archive")).unwrap();
        std::fs::write(tmp.path().join("app.log"), b"x").unwrap();
        std::fs::write(tmp.path().join("archive/old.log"), b"x").unwrap();

        let names: Vec<_> = walk_files(tmp.path(), Some(1))
            .map(|e| e.unwrap().relative)
            .collect();
        assert_eq!(names, vec![PathBuf::from("app.log")]);
        assert_eq!(subdirectories(tmp.path()).unwrap(), vec![tmp.path().join("archive")]);
    }
}
