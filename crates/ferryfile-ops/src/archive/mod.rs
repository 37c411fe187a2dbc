//! Tar archive creation and extraction.
//!
//! Archives are POSIX ustar streams with pax records for access times,
//! zstd-compressed by default. Extraction accepts zstd, gzip, xz, bzip2 or
//! plain tar, detected from the stream's magic bytes.

mod path;
mod reader;
mod writer;

use std::path::Path;

use ferryfile_core::{OpError, ProgressCallback, ProgressInfo};

pub use path::sanitize_entry_path;
pub use reader::{ArchiveReader, StreamFormat};
pub use writer::ArchiveWriter;

/// Create a zstd-compressed tar archive at `destination` from `sources`
/// using default settings.
///
/// Each source is stored under its own file name. A failed or cancelled
/// run removes the partial output.
pub fn create_tar_zst<P: AsRef<Path>>(
    sources: &[P],
    destination: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
) -> Result<(), OpError> {
    ArchiveWriter::new().create(sources, destination, progress, callback)
}

/// Extract a tar archive into `destination`, which must not exist yet.
///
/// A failed or cancelled run removes the partially extracted tree.
pub fn extract_tar_zst(
    archive: &Path,
    destination: &Path,
    progress: &mut ProgressInfo,
    callback: &mut ProgressCallback<'_>,
) -> Result<(), OpError> {
    ArchiveReader::new().extract(archive, destination, progress, callback)
}
