//! Move with rename fast path and copy-then-delete fallback.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use ferryfile_core::{EngineConfig, OpError, ProgressCallback, ProgressInfo};

use crate::copy::{CopyOptions, copy_path_with};
use crate::delete::delete_path_with;
use crate::progress::checkpoint;

/// Options for move operations.
#[derive(Debug, Clone, Default)]
pub struct MoveOptions {
    /// Options used by the copy fallback.
    pub copy: CopyOptions,
    /// Skip the rename and always copy then delete.
    pub force_copy_fallback: bool,
}

impl From<&EngineConfig> for MoveOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            copy: CopyOptions::from(config),
            force_copy_fallback: false,
        }
    }
}

/// Move a file, symlink or directory tree to `destination`.
///
/// A rename is tried first. When source and destination live on different
/// filesystems the tree is copied and the source deleted only once the copy
/// has fully succeeded.
pub fn move_path(
    source: &Path,
    destination: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
) -> Result<(), OpError> {
    move_path_with(source, destination, progress, callback, &MoveOptions::default())
}

/// Like [`move_path`], with explicit options.
pub fn move_path_with(
    source: &Path,
    destination: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
    options: &MoveOptions,
) -> Result<(), OpError> {
    fs::symlink_metadata(source).map_err(|e| OpError::io("lstat", source, e))?;
    // rename(2) would silently replace an existing file.
    if fs::symlink_metadata(destination).is_ok() {
        return Err(OpError::AlreadyExists {
            path: destination.to_path_buf(),
        });
    }

    progress.set_current_path(source);
    checkpoint(progress, callback)?;

    if !options.force_copy_fallback {
        match fs::rename(source, destination) {
            Ok(()) => {
                progress.add_files(1);
                progress.bytes_done = progress.bytes_done.max(progress.bytes_total);
                return Ok(());
            }
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                debug!(
                    source = %source.display(),
                    destination = %destination.display(),
                    "rename crosses filesystems, copying instead"
                );
            }
            Err(e) => return Err(OpError::io("rename", source, e)),
        }
    }

    copy_path_with(source, destination, progress, callback, &options.copy)?;

    // The copy is complete; cancelling now would leave both trees behind.
    let mut scratch = ProgressInfo::default();
    if let Err(err) = delete_path_with(source, &mut scratch, &mut |_| true, options.copy.max_depth)
    {
        warn!(source = %source.display(), error = %err, "copied but failed to remove source");
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"hello").unwrap();
        fs::write(root.join("sub/b.txt"), b"abc").unwrap();
        std::os::unix::fs::symlink("a.txt", root.join("link")).unwrap();
    }

    fn assert_tree(root: &Path) {
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(root.join("sub/b.txt")).unwrap(), b"abc");
        assert_eq!(fs::read_link(root.join("link")).unwrap(), Path::new("a.txt"));
    }

    #[test]
    fn test_move_by_rename() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        build_tree(&src);

        let mut progress = ProgressInfo::new(1, 8);
        move_path(&src, &dst, &mut progress, &mut |_| true).unwrap();

        assert!(!src.exists());
        assert_tree(&dst);
        assert_eq!(progress.files_done, 1);
        assert_eq!(progress.bytes_done, 8);
    }

    #[test]
    fn test_move_forced_fallback() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        build_tree(&src);
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(src.join("a.txt"), old).unwrap();

        let options = MoveOptions {
            force_copy_fallback: true,
            ..MoveOptions::default()
        };
        let mut progress = ProgressInfo::default();
        move_path_with(&src, &dst, &mut progress, &mut |_| true, &options).unwrap();

        assert!(fs::symlink_metadata(&src).is_err());
        assert_tree(&dst);
        let meta = fs::metadata(dst.join("a.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
        assert_eq!(progress.bytes_done, 8);
    }

    #[test]
    fn test_move_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a");
        let dst = temp.path().join("b");
        fs::write(&src, b"a").unwrap();
        fs::write(&dst, b"b").unwrap();

        let err = move_path(&src, &dst, &mut ProgressInfo::default(), &mut |_| true).unwrap_err();

        assert_eq!(err.code(), libc::EEXIST);
        assert_eq!(fs::read(&src).unwrap(), b"a");
        assert_eq!(fs::read(&dst).unwrap(), b"b");
    }

    #[test]
    fn test_move_cancel_keeps_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        build_tree(&src);
        let dst = temp.path().join("dst");

        let options = MoveOptions {
            force_copy_fallback: true,
            ..MoveOptions::default()
        };
        let err = move_path_with(&src, &dst, &mut ProgressInfo::default(), &mut |_| false, &options)
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_tree(&src);
        assert!(!dst.exists());
    }
}
