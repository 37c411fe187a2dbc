//! JWalk-based path scanner with a bounded recursion depth.

use std::fs::{self, FileType};
use std::io;
use std::path::Path;

use jwalk::{Parallelism, WalkDir};
use tracing::debug;

use ferryfile_core::{MAX_RECURSION_DEPTH, OpError};

/// Totals for one scanned path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathStats {
    /// Bytes held by regular files.
    pub total_bytes: u64,
    /// Number of entries, the root included.
    pub entry_count: u64,
}

impl PathStats {
    fn record(&mut self, bytes: u64) {
        self.entry_count = self.entry_count.saturating_add(1);
        self.total_bytes = self.total_bytes.saturating_add(bytes);
    }

    /// Merge another set of totals into this one.
    pub fn accumulate(&mut self, other: PathStats) {
        self.entry_count = self.entry_count.saturating_add(other.entry_count);
        self.total_bytes = self.total_bytes.saturating_add(other.total_bytes);
    }
}

/// How the scanner treats FIFOs, sockets and device nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecialFiles {
    /// Count them as zero-byte entries.
    #[default]
    Count,
    /// Fail the scan with an unsupported file type error.
    Reject,
}

/// Scanner computing byte and entry totals for a path.
///
/// Symlinks are never followed: they count as one entry with no bytes.
#[derive(Debug, Clone)]
pub struct PathScanner {
    max_depth: usize,
    special_files: SpecialFiles,
}

impl PathScanner {
    /// Create a scanner with the default depth limit.
    pub fn new() -> Self {
        Self {
            max_depth: MAX_RECURSION_DEPTH,
            special_files: SpecialFiles::Count,
        }
    }

    /// Set the maximum recursion depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the policy for special files.
    pub fn with_special_files(mut self, policy: SpecialFiles) -> Self {
        self.special_files = policy;
        self
    }

    /// Scan a path and return its totals.
    ///
    /// Listing errors abort the scan; no partial totals are returned.
    pub fn scan(&self, path: impl AsRef<Path>) -> Result<PathStats, OpError> {
        let path = path.as_ref();
        let metadata = fs::symlink_metadata(path).map_err(|e| OpError::io("lstat", path, e))?;

        let mut stats = PathStats::default();
        let file_type = metadata.file_type();
        if !file_type.is_dir() {
            stats.record(self.entry_bytes(path, file_type, metadata.len())?);
            return Ok(stats);
        }

        stats.record(0);
        self.walk_directory(path, &mut stats)?;

        debug!(
            path = %path.display(),
            bytes = stats.total_bytes,
            entries = stats.entry_count,
            "scanned path"
        );
        Ok(stats)
    }

    /// Scan several paths and sum their totals.
    pub fn scan_all<P: AsRef<Path>>(&self, paths: &[P]) -> Result<PathStats, OpError> {
        let mut total = PathStats::default();
        for path in paths {
            total.accumulate(self.scan(path)?);
        }
        Ok(total)
    }

    fn walk_directory(&self, root: &Path, stats: &mut PathStats) -> Result<(), OpError> {
        let walker = WalkDir::new(root)
            .parallelism(Parallelism::RayonDefaultPool {
                busy_timeout: std::time::Duration::from_millis(100),
            })
            .skip_hidden(false)
            .follow_links(false)
            .max_depth(self.max_depth.saturating_add(1));

        for entry_result in walker {
            let mut entry = entry_result.map_err(|err| walk_error(err, root))?;
            let path = entry.path();

            // jwalk reports an unreadable directory on the entry itself.
            if let Some(err) = entry.read_children_error.take() {
                return Err(walk_error(err, &path));
            }
            if entry.depth() == 0 {
                continue;
            }

            if entry.depth() > self.max_depth {
                return Err(OpError::DepthExceeded { path });
            }

            let file_type = entry.file_type();
            let len = if file_type.is_file() {
                entry
                    .metadata()
                    .map_err(|err| walk_error(err, &path))?
                    .len()
            } else {
                0
            };
            stats.record(self.entry_bytes(&path, file_type, len)?);
        }

        Ok(())
    }

    fn entry_bytes(&self, path: &Path, file_type: FileType, len: u64) -> Result<u64, OpError> {
        if file_type.is_file() {
            Ok(len)
        } else if file_type.is_dir() || file_type.is_symlink() {
            Ok(0)
        } else {
            match self.special_files {
                SpecialFiles::Count => Ok(0),
                SpecialFiles::Reject => Err(OpError::UnsupportedFileType {
                    path: path.to_path_buf(),
                }),
            }
        }
    }
}

impl Default for PathScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a walker error into an operation error, keeping the OS code.
fn walk_error(err: jwalk::Error, fallback: &Path) -> OpError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| fallback.to_path_buf());
    let source = match err.io_error().and_then(io::Error::raw_os_error) {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::other(err.to_string()),
    };
    OpError::io("readdir", path, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("src/sub")).unwrap();
        fs::write(root.join("src/a.txt"), "hello").unwrap();
        fs::write(root.join("src/sub/b.txt"), "abc").unwrap();
        std::os::unix::fs::symlink("a.txt", root.join("src/link")).unwrap();

        temp
    }

    #[test]
    fn test_scan_directory_tree() {
        let temp = create_test_tree();
        let stats = PathScanner::new().scan(temp.path().join("src")).unwrap();

        // src, a.txt, sub, sub/b.txt, link
        assert_eq!(stats.entry_count, 5);
        assert_eq!(stats.total_bytes, 8);
    }

    #[test]
    fn test_scan_single_file() {
        let temp = create_test_tree();
        let stats = PathScanner::new().scan(temp.path().join("src/a.txt")).unwrap();

        assert_eq!(stats, PathStats { total_bytes: 5, entry_count: 1 });
    }

    #[test]
    fn test_symlink_not_followed() {
        let temp = create_test_tree();
        let target = temp.path().join("big.bin");
        fs::write(&target, vec![0u8; 4096]).unwrap();
        std::os::unix::fs::symlink(&target, temp.path().join("to_big")).unwrap();

        let stats = PathScanner::new().scan(temp.path().join("to_big")).unwrap();
        assert_eq!(stats, PathStats { total_bytes: 0, entry_count: 1 });
    }

    #[test]
    fn test_depth_limit_exceeded() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b/c/d")).unwrap();

        let err = PathScanner::new()
            .with_max_depth(2)
            .scan(temp.path().join("a"))
            .unwrap_err();
        assert!(matches!(err, OpError::DepthExceeded { .. }));

        let ok = PathScanner::new().with_max_depth(3).scan(temp.path().join("a"));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_missing_path_fails() {
        let temp = TempDir::new().unwrap();
        let err = PathScanner::new().scan(temp.path().join("nope")).unwrap_err();
        assert_eq!(err.code(), 2); // ENOENT
    }

    #[test]
    fn test_special_file_policy() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir(&dir).unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(dir.join("sock")).unwrap();

        let counted = PathScanner::new().scan(&dir).unwrap();
        assert_eq!(counted, PathStats { total_bytes: 0, entry_count: 2 });

        let err = PathScanner::new()
            .with_special_files(SpecialFiles::Reject)
            .scan(&dir)
            .unwrap_err();
        assert!(matches!(err, OpError::UnsupportedFileType { .. }));
    }

    fn running_as_root() -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    #[test]
    fn test_unreadable_directory_aborts_scan() {
        use std::os::unix::fs::PermissionsExt;

        if running_as_root() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        let locked = tree.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(tree.join("a.txt"), "abc").unwrap();
        fs::write(locked.join("hidden.txt"), "secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let nested = PathScanner::new().scan(&tree);
        let direct = PathScanner::new().scan(&locked);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(nested.unwrap_err().code(), libc::EACCES);
        assert_eq!(direct.unwrap_err().code(), libc::EACCES);
    }

    #[test]
    fn test_scan_all_accumulates() {
        let temp = create_test_tree();
        let root = temp.path();
        let stats = PathScanner::new()
            .scan_all(&[root.join("src/a.txt"), root.join("src/sub")])
            .unwrap();

        assert_eq!(stats, PathStats { total_bytes: 8, entry_count: 3 });
    }
}
