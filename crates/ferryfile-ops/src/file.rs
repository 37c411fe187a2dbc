//! Whole-file reads, atomic writes and permission changes.

use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::{debug, warn};

use ferryfile_core::OpError;

const DEFAULT_FILE_MODE: u32 = 0o644;

/// Read the whole content of a file.
pub fn read_file_all(path: &Path) -> Result<Vec<u8>, OpError> {
    fs::read(path).map_err(|e| OpError::io("read", path, e))
}

/// Replace the content of `path` atomically.
///
/// Data goes to a temporary file in the same directory, which is synced and
/// renamed over the target. Readers see either the old or the new content.
/// An existing target keeps its permission bits.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<(), OpError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| OpError::invalid(format!("not a file path: {}", path.display())))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mode = match fs::metadata(path) {
        Ok(metadata) => metadata.permissions().mode() & 0o7777,
        Err(_) => DEFAULT_FILE_MODE,
    };

    let mut prefix = std::ffi::OsString::from(".");
    prefix.push(file_name);
    prefix.push(".");
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| OpError::io("create", parent, e))?;

    temp.write_all(data)
        .map_err(|e| OpError::io("write", temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| OpError::io("fsync", temp.path(), e))?;
    temp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .map_err(|e| OpError::io("chmod", temp.path(), e))?;

    // Dropping the failed temp file removes it.
    temp.persist(path)
        .map_err(|e| OpError::io("rename", path, e.error))?;

    sync_dir(parent);
    debug!(path = %path.display(), bytes = data.len(), "atomic write complete");
    Ok(())
}

/// Set the permission bits of a path.
pub fn set_permissions(path: &Path, mode: u32) -> Result<(), OpError> {
    fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))
        .map_err(|e| OpError::io("chmod", path, e))
}

fn sync_dir(dir: &Path) {
    let result = File::open(dir).and_then(|d| d.sync_all());
    if let Err(err) = result {
        warn!(path = %dir.display(), error = %err, "failed to sync directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");

        write_file_atomic(&path, b"first").unwrap();
        assert_eq!(read_file_all(&path).unwrap(), b"first");

        write_file_atomic(&path, b"second version").unwrap();
        assert_eq!(read_file_all(&path).unwrap(), b"second version");

        // No temporary files left behind.
        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("data.bin")]);
    }

    #[test]
    fn test_atomic_write_keeps_mode() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("script.sh");
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o750)).unwrap();

        write_file_atomic(&path, b"#!/bin/sh\necho hi\n").unwrap();

        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o750);
    }

    #[test]
    fn test_atomic_write_missing_parent() {
        let temp = TempDir::new().unwrap();
        let err = write_file_atomic(&temp.path().join("missing/file"), b"x").unwrap_err();
        assert_eq!(err.code(), libc::ENOENT);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_file_all(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.code(), libc::ENOENT);
    }

    #[test]
    fn test_set_permissions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        fs::write(&path, b"x").unwrap();

        set_permissions(&path, 0o600).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_set_permissions_missing_path() {
        let temp = TempDir::new().unwrap();
        let err = set_permissions(&temp.path().join("gone"), 0o600).unwrap_err();
        assert_eq!(err.code(), libc::ENOENT);
    }
}
