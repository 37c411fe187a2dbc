//! Tar archive extraction with path sanitization.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tar::{Archive, Entry, EntryType};
use tracing::{debug, warn};

use ferryfile_core::{EngineConfig, OpError, ProgressCallback, ProgressInfo};

use super::path::sanitize_entry_path;
use crate::create::make_dir_parents;
use crate::delete::delete_path_with;
use crate::progress::checkpoint;

/// Compression of an archive stream, detected from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Zstd,
    Gzip,
    Xz,
    Bzip2,
    Plain,
}

impl StreamFormat {
    /// Identify the stream format from its magic number.
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else if magic.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Self::Xz
        } else if magic.starts_with(b"BZh") {
            Self::Bzip2
        } else {
            Self::Plain
        }
    }
}

/// Extracts tar archives into a fresh directory.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    chunk_size: usize,
    max_depth: usize,
}

/// Directory metadata applied once all entries are written.
struct DeferredDir {
    path: PathBuf,
    mode: u32,
    atime: FileTime,
    mtime: FileTime,
}

impl ArchiveReader {
    /// Create a reader with default settings.
    pub fn new() -> Self {
        Self::from_config(&EngineConfig::default())
    }

    /// Create a reader from engine settings.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_depth: config.max_depth,
        }
    }

    /// Extract `archive` into `destination`.
    ///
    /// The destination must not exist. `bytes_total` grows as file entries
    /// are discovered. On failure the partially extracted tree is removed.
    pub fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &mut ProgressInfo,
        callback: &mut ProgressCallback<'_>,
    ) -> Result<(), OpError> {
        if fs::symlink_metadata(destination).is_ok() {
            return Err(OpError::AlreadyExists {
                path: destination.to_path_buf(),
            });
        }

        let file = File::open(archive).map_err(|e| OpError::io("open", archive, e))?;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            make_dir_parents(parent)?;
        }
        fs::create_dir(destination).map_err(|e| OpError::io("mkdir", destination, e))?;

        match self.extract_into(file, archive, destination, progress, callback) {
            Ok(()) => {
                progress.files_total = progress.files_total.max(progress.files_done);
                debug!(
                    archive = %archive.display(),
                    destination = %destination.display(),
                    entries = progress.files_done,
                    "archive extracted"
                );
                Ok(())
            }
            Err(err) => {
                let mut scratch = ProgressInfo::default();
                if let Err(cleanup) =
                    delete_path_with(destination, &mut scratch, &mut |_| true, self.max_depth)
                {
                    warn!(
                        destination = %destination.display(),
                        error = %cleanup,
                        "failed to remove partial extraction"
                    );
                }
                Err(err)
            }
        }
    }

    fn extract_into(
        &self,
        file: File,
        archive_path: &Path,
        destination: &Path,
        progress: &mut ProgressInfo,
        callback: &mut ProgressCallback<'_>,
    ) -> Result<(), OpError> {
        let root = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(destination)
            .map_err(|e| OpError::io("open", destination, e))?;

        let stream = open_decoder(file, self.chunk_size)
            .map_err(|e| OpError::io("open", archive_path, e))?;
        let mut archive = Archive::new(stream);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut deferred = Vec::new();

        let entries = archive
            .entries()
            .map_err(|e| OpError::archive("read archive", e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| OpError::archive("read archive entry", e))?;
            let entry_type = entry.header().entry_type();
            if entry_type == EntryType::XGlobalHeader {
                continue;
            }

            let raw_path = entry.path_bytes().into_owned();
            let relative = sanitize_entry_path(&raw_path)?;
            if relative.as_os_str().is_empty() {
                // "./" style root entries name the destination itself.
                if entry_type == EntryType::Directory {
                    continue;
                }
                return Err(OpError::UnsafeArchivePath {
                    entry: String::from_utf8_lossy(&raw_path).into_owned(),
                });
            }
            if relative.components().count() > self.max_depth {
                return Err(OpError::DepthExceeded {
                    path: destination.join(&relative),
                });
            }

            let target = destination.join(&relative);
            let header = entry.header();
            // setuid, setgid and sticky bits are never taken from an archive.
            let mode = header
                .mode()
                .map_err(|e| OpError::archive("read entry mode", e))?
                & 0o777;
            let mtime = FileTime::from_unix_time(
                header
                    .mtime()
                    .map_err(|e| OpError::archive("read entry mtime", e))? as i64,
                0,
            );
            let atime = pax_atime(&mut entry).unwrap_or(mtime);

            if matches!(entry_type, EntryType::Regular | EntryType::Continuous) {
                progress.grow_bytes_total(entry.size());
            }
            progress.set_current_path(&target);
            checkpoint(progress, callback)?;

            match entry_type {
                EntryType::Directory => {
                    ensure_dir_under(destination, &relative)?;
                    deferred.push(DeferredDir {
                        path: target,
                        mode,
                        atime,
                        mtime,
                    });
                }
                EntryType::Symlink => {
                    if let Some(parent) = relative.parent() {
                        ensure_dir_under(destination, parent)?;
                    }
                    let link = entry.link_name_bytes().ok_or_else(|| {
                        OpError::archive(
                            "read symlink entry",
                            io::Error::new(io::ErrorKind::InvalidData, "missing link target"),
                        )
                    })?;
                    symlink_at(&root, &link, &relative)
                        .map_err(|e| OpError::io("symlink", &target, e))?;
                    if let Err(err) = filetime::set_symlink_file_times(&target, atime, mtime) {
                        debug!(path = %target.display(), error = %err, "failed to restore symlink times");
                    }
                }
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = relative.parent() {
                        ensure_dir_under(destination, parent)?;
                    }
                    let output =
                        write_entry_data(&mut entry, &target, &mut buffer, progress, callback)?;
                    output
                        .set_permissions(Permissions::from_mode(mode))
                        .map_err(|e| OpError::io("chmod", &target, e))?;
                    if let Err(err) =
                        filetime::set_file_handle_times(&output, Some(atime), Some(mtime))
                    {
                        debug!(path = %target.display(), error = %err, "failed to restore file times");
                    }
                }
                _ => {
                    return Err(OpError::UnsupportedFileType { path: target });
                }
            }

            progress.add_files(1);
        }

        // Deepest first so restricted modes don't block their children.
        for dir in deferred.iter().rev() {
            if let Err(err) = fs::set_permissions(&dir.path, Permissions::from_mode(dir.mode)) {
                warn!(path = %dir.path.display(), error = %err, "failed to restore directory mode");
            }
            if let Err(err) = filetime::set_file_times(&dir.path, dir.atime, dir.mtime) {
                debug!(path = %dir.path.display(), error = %err, "failed to restore directory times");
            }
        }

        Ok(())
    }
}

impl Default for ArchiveReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap the archive file in the decoder its magic bytes call for.
fn open_decoder(file: File, chunk_size: usize) -> io::Result<Box<dyn Read>> {
    let mut input = BufReader::with_capacity(chunk_size.max(8 * 1024), file);
    let format = StreamFormat::detect(input.fill_buf()?);
    debug!(?format, "detected archive stream format");

    Ok(match format {
        StreamFormat::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(input)?),
        StreamFormat::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(input)),
        StreamFormat::Xz => Box::new(xz2::bufread::XzDecoder::new(input)),
        StreamFormat::Bzip2 => Box::new(bzip2::bufread::MultiBzDecoder::new(input)),
        StreamFormat::Plain => Box::new(input),
    })
}

/// Stream one regular-file entry to `target` in chunks and return the
/// open output file.
fn write_entry_data<R: Read>(
    entry: &mut Entry<'_, R>,
    target: &Path,
    buffer: &mut [u8],
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
) -> Result<File, OpError> {
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .custom_flags(libc::O_NOFOLLOW)
        .open(target)
        .map_err(|e| OpError::io("create", target, e))?;

    loop {
        let n = match entry.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(OpError::archive("read entry data", e)),
        };
        output
            .write_all(&buffer[..n])
            .map_err(|e| OpError::io("write", target, e))?;
        progress.add_bytes(n as u64);
        checkpoint(progress, callback)?;
    }

    Ok(output)
}

/// Create every component of `relative` under `root`, refusing to pass
/// through symlinks or non-directories.
fn ensure_dir_under(root: &Path, relative: &Path) -> Result<(), OpError> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(OpError::NotADirectory { path: current }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&current).map_err(|e| OpError::io("mkdir", &current, e))?;
            }
            Err(e) => return Err(OpError::io("lstat", current, e)),
        }
    }
    Ok(())
}

/// Create a symlink relative to the extraction root descriptor.
fn symlink_at(root: &File, target: &[u8], relative: &Path) -> io::Result<()> {
    let target = CString::new(target).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let link = CString::new(relative.as_os_str().as_bytes())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

    // SAFETY: both strings are NUL-terminated and `root` keeps the
    // descriptor open for the duration of the call.
    let rc = unsafe { libc::symlinkat(target.as_ptr(), root.as_raw_fd(), link.as_ptr()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Access time from the entry's pax `atime` record, if any.
fn pax_atime<R: Read>(entry: &mut Entry<'_, R>) -> Option<FileTime> {
    let extensions = entry.pax_extensions().ok()??;
    for extension in extensions {
        let extension = extension.ok()?;
        if extension.key().ok()? == "atime" {
            return parse_pax_time(extension.value().ok()?);
        }
    }
    None
}

fn parse_pax_time(value: &str) -> Option<FileTime> {
    let (seconds, fraction) = value.split_once('.').unwrap_or((value, ""));
    let seconds: i64 = seconds.parse().ok()?;
    let digits: String = fraction.chars().take(9).collect();
    let nanos: u32 = if digits.is_empty() {
        0
    } else {
        format!("{digits:0<9}").parse().ok()?
    };
    Some(FileTime::from_unix_time(seconds, nanos))
}
