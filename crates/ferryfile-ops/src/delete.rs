//! Recursive delete with progress reporting.

use std::fs;
use std::path::Path;

use ferryfile_core::{MAX_RECURSION_DEPTH, OpError, ProgressCallback, ProgressInfo};
use ferryfile_scan::PathScanner;

use crate::progress::checkpoint;

/// Recursively delete a file, symlink or directory tree.
///
/// Children are removed before their directory. Symlinks are removed, not
/// followed. Deletion is not transactional: on failure or cancellation
/// whatever was already removed stays removed.
///
/// When `progress.files_total` is zero it is filled in by scanning `path`
/// first.
pub fn delete_path(
    path: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
) -> Result<(), OpError> {
    delete_path_with(path, progress, callback, MAX_RECURSION_DEPTH)
}

/// Like [`delete_path`], with an explicit depth limit.
pub fn delete_path_with(
    path: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
    max_depth: usize,
) -> Result<(), OpError> {
    if progress.files_total == 0 {
        let stats = PathScanner::new().with_max_depth(max_depth).scan(path)?;
        progress.files_total = stats.entry_count;
    }
    delete_entry(path, progress, callback, max_depth, 0)
}

fn delete_entry(
    path: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
    max_depth: usize,
    depth: usize,
) -> Result<(), OpError> {
    if depth > max_depth {
        return Err(OpError::DepthExceeded {
            path: path.to_path_buf(),
        });
    }

    let metadata = fs::symlink_metadata(path).map_err(|e| OpError::io("lstat", path, e))?;
    progress.set_current_path(path);
    checkpoint(progress, callback)?;

    if metadata.is_dir() {
        let entries = fs::read_dir(path).map_err(|e| OpError::io("opendir", path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| OpError::io("readdir", path, e))?;
            delete_entry(&entry.path(), progress, callback, max_depth, depth + 1)?;
        }
        fs::remove_dir(path).map_err(|e| OpError::io("rmdir", path, e))?;
    } else {
        fs::remove_file(path).map_err(|e| OpError::io("unlink", path, e))?;
    }

    progress.add_files(1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_delete_tree_counts_entries() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a"), b"1").unwrap();
        fs::write(root.join("sub/b"), b"2").unwrap();

        let mut progress = ProgressInfo::default();
        delete_path(&root, &mut progress, &mut |_| true).unwrap();

        assert!(!root.exists());
        assert_eq!(progress.files_total, 4);
        assert_eq!(progress.files_done, 4);
    }

    #[test]
    fn test_delete_symlink_keeps_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        delete_path(&link, &mut ProgressInfo::default(), &mut |_| true).unwrap();

        assert!(fs::symlink_metadata(&link).is_err());
        assert!(target.join("keep").exists());
    }

    #[test]
    fn test_delete_cancel_leaves_remainder() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a"), b"1").unwrap();

        let err = delete_path(&root, &mut ProgressInfo::default(), &mut |_| false).unwrap_err();

        assert!(err.is_cancelled());
        assert!(root.join("a").exists());
    }

    #[test]
    fn test_delete_missing_path() {
        let temp = TempDir::new().unwrap();
        let err = delete_path(
            &temp.path().join("gone"),
            &mut ProgressInfo::default(),
            &mut |_| true,
        )
        .unwrap_err();
        assert_eq!(err.code(), libc::ENOENT);
    }
}
