//! Recursive copy with progress reporting.

use std::fs::{self, DirBuilder, Metadata, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

use filetime::FileTime;
use tracing::{debug, warn};

use ferryfile_core::{
    DEFAULT_CHUNK_SIZE, EngineConfig, MAX_RECURSION_DEPTH, OpError, ProgressCallback,
    ProgressInfo,
};

use crate::progress::checkpoint;

/// Options for copy operations.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Buffer size for file data.
    pub chunk_size: usize,
    /// Maximum recursion depth.
    pub max_depth: usize,
    /// Preserve uid/gid when permitted.
    pub preserve_ownership: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_depth: MAX_RECURSION_DEPTH,
            preserve_ownership: false,
        }
    }
}

impl From<&EngineConfig> for CopyOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_depth: config.max_depth,
            preserve_ownership: config.preserve_ownership,
        }
    }
}

/// Recursively copy a file, symlink or directory tree to `destination`.
///
/// Symlinks are recreated, never followed. Existing destinations are not
/// overwritten. On cancellation the partial copy is left in place.
pub fn copy_path(
    source: &Path,
    destination: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
) -> Result<(), OpError> {
    copy_path_with(source, destination, progress, callback, &CopyOptions::default())
}

/// Like [`copy_path`], with explicit options.
pub fn copy_path_with(
    source: &Path,
    destination: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
    options: &CopyOptions,
) -> Result<(), OpError> {
    let mut buffer = vec![0u8; options.chunk_size.max(1)];
    copy_entry(source, destination, progress, callback, options, &mut buffer, 0)
}

fn copy_entry(
    source: &Path,
    destination: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
    options: &CopyOptions,
    buffer: &mut [u8],
    depth: usize,
) -> Result<(), OpError> {
    if depth > options.max_depth {
        return Err(OpError::DepthExceeded {
            path: source.to_path_buf(),
        });
    }

    let metadata = fs::symlink_metadata(source).map_err(|e| OpError::io("lstat", source, e))?;
    progress.set_current_path(source);
    checkpoint(progress, callback)?;

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        copy_symlink(source, destination, &metadata, options)?;
        progress.add_files(1);
    } else if file_type.is_dir() {
        copy_directory(source, destination, &metadata, progress, callback, options, buffer, depth)?;
    } else if file_type.is_file() {
        copy_file(source, destination, &metadata, progress, callback, options, buffer)?;
        progress.add_files(1);
    } else {
        return Err(OpError::UnsupportedFileType {
            path: source.to_path_buf(),
        });
    }

    Ok(())
}

/// Copy a directory, its children, then its permissions and times.
#[allow(clippy::too_many_arguments)]
fn copy_directory(
    source: &Path,
    destination: &Path,
    metadata: &Metadata,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
    options: &CopyOptions,
    buffer: &mut [u8],
    depth: usize,
) -> Result<(), OpError> {
    let mode = metadata.mode() & 0o7777;

    // Owner rwx until the children are in place.
    DirBuilder::new()
        .mode(mode | 0o700)
        .create(destination)
        .map_err(|e| OpError::io("mkdir", destination, e))?;
    progress.add_files(1);

    let entries = fs::read_dir(source).map_err(|e| OpError::io("opendir", source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| OpError::io("readdir", source, e))?;
        let name = entry.file_name();
        copy_entry(
            &source.join(&name),
            &destination.join(&name),
            progress,
            callback,
            options,
            buffer,
            depth + 1,
        )?;
    }

    if options.preserve_ownership {
        preserve_owner(destination, metadata, |uid, gid| {
            std::os::unix::fs::lchown(destination, Some(uid), Some(gid))
        })?;
    }
    fs::set_permissions(destination, Permissions::from_mode(mode))
        .map_err(|e| OpError::io("chmod", destination, e))?;

    let atime = FileTime::from_last_access_time(metadata);
    let mtime = FileTime::from_last_modification_time(metadata);
    if let Err(err) = filetime::set_file_times(destination, atime, mtime) {
        warn!(path = %destination.display(), error = %err, "failed to restore directory times");
    }

    Ok(())
}

/// Copy a regular file in chunks, then its permissions, owner and times.
fn copy_file(
    source: &Path,
    destination: &Path,
    metadata: &Metadata,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
    options: &CopyOptions,
    buffer: &mut [u8],
) -> Result<(), OpError> {
    let mode = metadata.mode() & 0o7777;

    let mut input = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(source)
        .map_err(|e| OpError::io("open", source, e))?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode & 0o777)
        .open(destination)
        .map_err(|e| OpError::io("create", destination, e))?;

    loop {
        let n = match input.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(OpError::io("read", source, e)),
        };
        output
            .write_all(&buffer[..n])
            .map_err(|e| OpError::io("write", destination, e))?;
        progress.add_bytes(n as u64);
        checkpoint(progress, callback)?;
    }

    if options.preserve_ownership {
        preserve_owner(destination, metadata, |uid, gid| {
            std::os::unix::fs::fchown(&output, Some(uid), Some(gid))
        })?;
    }
    // After chown, which clears setuid/setgid.
    output
        .set_permissions(Permissions::from_mode(mode))
        .map_err(|e| OpError::io("chmod", destination, e))?;

    let atime = FileTime::from_last_access_time(metadata);
    let mtime = FileTime::from_last_modification_time(metadata);
    filetime::set_file_handle_times(&output, Some(atime), Some(mtime))
        .map_err(|e| OpError::io("utimes", destination, e))?;

    Ok(())
}

/// Recreate a symlink with the same target string.
fn copy_symlink(
    source: &Path,
    destination: &Path,
    metadata: &Metadata,
    options: &CopyOptions,
) -> Result<(), OpError> {
    let target = fs::read_link(source).map_err(|e| OpError::io("readlink", source, e))?;
    std::os::unix::fs::symlink(&target, destination)
        .map_err(|e| OpError::io("symlink", destination, e))?;

    if options.preserve_ownership {
        preserve_owner(destination, metadata, |uid, gid| {
            std::os::unix::fs::lchown(destination, Some(uid), Some(gid))
        })?;
    }

    let atime = FileTime::from_last_access_time(metadata);
    let mtime = FileTime::from_last_modification_time(metadata);
    if let Err(err) = filetime::set_symlink_file_times(destination, atime, mtime) {
        debug!(path = %destination.display(), error = %err, "failed to restore symlink times");
    }

    Ok(())
}

/// Apply the source owner; lacking the privilege to do so is not an error.
fn preserve_owner(
    destination: &Path,
    metadata: &Metadata,
    chown: impl FnOnce(u32, u32) -> io::Result<()>,
) -> Result<(), OpError> {
    match chown(metadata.uid(), metadata.gid()) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
            debug!(path = %destination.display(), "not permitted to preserve ownership");
            Ok(())
        }
        Err(e) => Err(OpError::io("chown", destination, e)),
    }
}
