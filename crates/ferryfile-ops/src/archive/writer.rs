//! Streaming tar archive writer.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};

use ferryfile_core::{Compression, EngineConfig, OpError, ProgressCallback, ProgressInfo};
use ferryfile_scan::{PathScanner, SpecialFiles};

use crate::create::make_dir_parents;
use crate::progress::checkpoint;

/// Builds tar archives from files, symlinks and directory trees.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    compression: Compression,
    level: i32,
    chunk_size: usize,
    max_depth: usize,
}

impl ArchiveWriter {
    /// Create a writer producing zstd-compressed archives.
    pub fn new() -> Self {
        Self::from_config(&EngineConfig::default())
    }

    /// Create a writer from engine settings.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            compression: config.compression,
            level: config.compression_level,
            chunk_size: config.chunk_size.max(1),
            max_depth: config.max_depth,
        }
    }

    /// Set the output compression.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Write an archive of `sources` to `destination`.
    ///
    /// Entries are named relative to each source's parent directory.
    /// `progress` totals are grown by a scan of all sources before any
    /// output is written.
    pub fn create<P: AsRef<Path>>(
        &self,
        sources: &[P],
        destination: &Path,
        progress: &mut ProgressInfo,
        callback: &mut ProgressCallback<'_>,
    ) -> Result<(), OpError> {
        if sources.is_empty() {
            return Err(OpError::invalid("no sources to archive"));
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            make_dir_parents(parent)?;
        }

        let stats = PathScanner::new()
            .with_max_depth(self.max_depth)
            .with_special_files(SpecialFiles::Reject)
            .scan_all(sources)?;
        progress.grow_bytes_total(stats.total_bytes);
        progress.files_total = progress.files_total.saturating_add(stats.entry_count);

        let file = File::create(destination).map_err(|e| OpError::io("create", destination, e))?;
        match self.write_archive(sources, file, destination, progress, callback) {
            Ok(()) => {
                debug!(
                    destination = %destination.display(),
                    bytes = progress.bytes_done,
                    entries = progress.files_done,
                    "archive created"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(destination) {
                    warn!(
                        destination = %destination.display(),
                        error = %cleanup,
                        "failed to remove partial archive"
                    );
                }
                Err(err)
            }
        }
    }

    fn write_archive<P: AsRef<Path>>(
        &self,
        sources: &[P],
        file: File,
        destination: &Path,
        progress: &mut ProgressInfo,
        callback: &mut ProgressCallback<'_>,
    ) -> Result<(), OpError> {
        let sink = ArchiveSink::open(file, self.compression, self.level)
            .map_err(|e| OpError::io("open", destination, e))?;
        let mut builder = Builder::new(sink);

        for source in sources {
            let source = source.as_ref();
            let name = archive_root_name(source)?;
            self.append_entry(&mut builder, source, &name, progress, callback, 0)?;
        }

        let sink = builder
            .into_inner()
            .map_err(|e| OpError::archive("finish tar stream", e))?;
        let file = sink
            .finish()
            .map_err(|e| OpError::archive("finish compressed stream", e))?;
        file.sync_all()
            .map_err(|e| OpError::io("fsync", destination, e))
    }

    fn append_entry<W: Write>(
        &self,
        builder: &mut Builder<W>,
        path: &Path,
        name: &Path,
        progress: &mut ProgressInfo,
        callback: &mut ProgressCallback<'_>,
        depth: usize,
    ) -> Result<(), OpError> {
        if depth > self.max_depth {
            return Err(OpError::DepthExceeded {
                path: path.to_path_buf(),
            });
        }

        let metadata = fs::symlink_metadata(path).map_err(|e| OpError::io("lstat", path, e))?;
        progress.set_current_path(path);
        checkpoint(progress, callback)?;

        let file_type = metadata.file_type();
        let mut header = entry_header(&metadata);

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            prepare_entry(builder, &mut header, &metadata, name, None)?;
            builder
                .append(&header, io::empty())
                .map_err(|e| OpError::archive("write directory entry", e))?;
            progress.add_files(1);

            let mut children = fs::read_dir(path)
                .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
                .map_err(|e| OpError::io("readdir", path, e))?;
            children.sort_by_key(|entry| entry.file_name());

            for child in children {
                let child_name = child.file_name();
                self.append_entry(
                    builder,
                    &path.join(&child_name),
                    &name.join(&child_name),
                    progress,
                    callback,
                    depth + 1,
                )?;
            }
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| OpError::io("readlink", path, e))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            prepare_entry(builder, &mut header, &metadata, name, Some(target.as_path()))?;
            builder
                .append(&header, io::empty())
                .map_err(|e| OpError::archive("write symlink entry", e))?;
            progress.add_files(1);
        } else if file_type.is_file() {
            let len = metadata.len();
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NOFOLLOW)
                .open(path)
                .map_err(|e| OpError::io("open", path, e))?;

            header.set_entry_type(EntryType::Regular);
            header.set_size(len);
            prepare_entry(builder, &mut header, &metadata, name, None)?;

            let mut reader = ProgressReader {
                inner: file.take(len),
                progress: &mut *progress,
                callback: &mut *callback,
                chunk_size: self.chunk_size as u64,
                pending: 0,
                read: 0,
                cancelled: false,
            };
            let result = builder.append(&header, &mut reader);
            if reader.cancelled {
                return Err(OpError::Cancelled);
            }
            result.map_err(|e| OpError::io("read", path, e))?;
            if reader.read != len {
                return Err(OpError::io(
                    "read",
                    path,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while archiving"),
                ));
            }
            progress.add_files(1);
        } else {
            return Err(OpError::UnsupportedFileType {
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Output stream, compressed or not.
enum ArchiveSink {
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
    Plain(BufWriter<File>),
}

impl ArchiveSink {
    /// Wrap `file` in the requested compression, falling back to a plain
    /// stream when the encoder cannot be set up.
    fn open(file: File, compression: Compression, level: i32) -> io::Result<Self> {
        match compression {
            Compression::None => Ok(Self::Plain(BufWriter::new(file))),
            Compression::Zstd => {
                match zstd::stream::write::Encoder::new(BufWriter::new(file.try_clone()?), level) {
                    Ok(encoder) => Ok(Self::Zstd(encoder)),
                    Err(err) => {
                        warn!(error = %err, "zstd encoder unavailable, writing uncompressed tar");
                        Ok(Self::Plain(BufWriter::new(file)))
                    }
                }
            }
        }
    }

    /// Flush every layer and hand back the underlying file.
    fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Self::Zstd(encoder) => encoder.finish()?,
            Self::Plain(buffered) => buffered,
        };
        buffered.into_inner().map_err(|e| e.into_error())
    }
}

impl Write for ArchiveSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Zstd(encoder) => encoder.write(buf),
            Self::Plain(buffered) => buffered.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Zstd(encoder) => encoder.flush(),
            Self::Plain(buffered) => buffered.flush(),
        }
    }
}

/// Reader that reports file data to the progress callback every
/// `chunk_size` bytes.
struct ProgressReader<'a, 'cb, R> {
    inner: R,
    progress: &'a mut ProgressInfo,
    callback: &'a mut ProgressCallback<'cb>,
    chunk_size: u64,
    pending: u64,
    read: u64,
    cancelled: bool,
}

impl<R: Read> ProgressReader<'_, '_, R> {
    fn report(&mut self) -> io::Result<()> {
        self.progress.add_bytes(self.pending);
        self.pending = 0;
        if checkpoint(self.progress, self.callback).is_err() {
            self.cancelled = true;
            return Err(io::Error::other("cancelled"));
        }
        Ok(())
    }
}

impl<R: Read> Read for ProgressReader<'_, '_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        self.pending += n as u64;
        if self.pending >= self.chunk_size || (n == 0 && self.pending > 0) {
            self.report()?;
        }
        Ok(n)
    }
}

fn entry_header(metadata: &Metadata) -> Header {
    let mut header = Header::new_ustar();
    header.set_mode(metadata.mode() & 0o7777);
    header.set_uid(u64::from(metadata.uid()));
    header.set_gid(u64::from(metadata.gid()));
    header.set_mtime(metadata.mtime().max(0) as u64);
    header
}

/// Set the entry's names and checksum.
///
/// The access time, and any name or link target too long for the ustar
/// fields, go into a pax extension record written just before the entry.
fn prepare_entry<W: Write>(
    builder: &mut Builder<W>,
    header: &mut Header,
    metadata: &Metadata,
    name: &Path,
    link: Option<&Path>,
) -> Result<(), OpError> {
    let mut records: Vec<(&str, Vec<u8>)> = Vec::new();
    if metadata.atime() >= 0 {
        let atime = format!("{}.{:09}", metadata.atime(), metadata.atime_nsec());
        records.push(("atime", atime.into_bytes()));
    }

    if header.set_path(name).is_err() {
        let bytes = name.as_os_str().as_bytes();
        if let Some(ustar) = header.as_ustar_mut() {
            ustar.prefix.fill(0);
        }
        copy_truncated(&mut header.as_old_mut().name, bytes);
        records.push(("path", bytes.to_vec()));
    }
    if let Some(target) = link {
        if header.set_link_name(target).is_err() {
            let bytes = target.as_os_str().as_bytes();
            copy_truncated(&mut header.as_old_mut().linkname, bytes);
            records.push(("linkpath", bytes.to_vec()));
        }
    }

    if !records.is_empty() {
        builder
            .append_pax_extensions(records.iter().map(|(key, value)| (*key, value.as_slice())))
            .map_err(|e| OpError::archive("write pax header", e))?;
    }
    header.set_cksum();
    Ok(())
}

/// Fill a fixed header field with as much of `value` as fits.
fn copy_truncated(field: &mut [u8], value: &[u8]) {
    field.fill(0);
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
}

/// Name of a source at the archive root.
fn archive_root_name(source: &Path) -> Result<PathBuf, OpError> {
    if let Some(name) = source.file_name() {
        return Ok(PathBuf::from(name));
    }
    let resolved = fs::canonicalize(source).map_err(|e| OpError::io("resolve", source, e))?;
    resolved
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| OpError::invalid(format!("cannot archive {}", source.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_sources_rejected() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out.tar.zst");
        let sources: [&Path; 0] = [];

        let err = ArchiveWriter::new()
            .create(&sources, &dest, &mut ProgressInfo::default(), &mut |_| true)
            .unwrap_err();

        assert_eq!(err.code(), libc::EINVAL);
        assert!(!dest.exists());
    }

    #[test]
    fn test_plain_archive_entry_names() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();
        fs::write(src.join("sub/b.txt"), b"abc").unwrap();
        let dest = temp.path().join("out/plain.tar");

        let mut progress = ProgressInfo::default();
        ArchiveWriter::new()
            .with_compression(Compression::None)
            .create(&[&src], &dest, &mut progress, &mut |_| true)
            .unwrap();

        let mut archive = tar::Archive::new(File::open(&dest).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["src", "src/a.txt", "src/sub", "src/sub/b.txt"]);
        assert_eq!(progress.bytes_done, 8);
        assert_eq!(progress.bytes_total, 8);
        assert_eq!(progress.files_done, progress.files_total);
    }

    #[test]
    fn test_cancel_removes_output() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("big.bin");
        fs::write(&src, vec![7u8; 1 << 20]).unwrap();
        let dest = temp.path().join("big.tar.zst");

        let mut calls = 0;
        let err = ArchiveWriter::new()
            .create(&[&src], &dest, &mut ProgressInfo::default(), &mut |_| {
                calls += 1;
                calls < 3
            })
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
    }

    #[test]
    fn test_special_file_rejected_before_output() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir(&dir).unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(dir.join("sock")).unwrap();
        let dest = temp.path().join("out.tar.zst");

        let err = ArchiveWriter::new()
            .create(&[&dir], &dest, &mut ProgressInfo::default(), &mut |_| true)
            .unwrap_err();

        assert_eq!(err.code(), libc::ENOTSUP);
        assert!(!dest.exists());
    }

    #[test]
    fn test_long_names_use_pax_records() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let segment = "d".repeat(60);
        let deep = src.join(&segment).join(&segment).join(&segment).join(&segment);
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("leaf.txt"), b"leaf").unwrap();
        let target = "t".repeat(150);
        std::os::unix::fs::symlink(&target, src.join("link")).unwrap();
        let dest = temp.path().join("long.tar");

        ArchiveWriter::new()
            .with_compression(Compression::None)
            .create(&[&src], &dest, &mut ProgressInfo::default(), &mut |_| true)
            .unwrap();

        let raw = fs::read(&dest).unwrap();
        assert!(!raw.windows(13).any(|w| w == b"././@LongLink"));

        let long_name = format!("src/{segment}/{segment}/{segment}/{segment}/leaf.txt");
        let mut archive = tar::Archive::new(File::open(&dest).unwrap());
        let mut found_leaf = false;
        let mut found_link = false;
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            if path == long_name {
                found_leaf = true;
            }
            if path == "src/link" {
                let link = entry.link_name().unwrap().unwrap();
                assert_eq!(link.to_string_lossy(), target);
                found_link = true;
            }
        }
        assert!(found_leaf && found_link);
    }
}
