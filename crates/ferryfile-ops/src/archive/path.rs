//! Entry path sanitization.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use ferryfile_core::OpError;

/// Turn a stored entry path into a relative path that stays inside the
/// extraction root.
///
/// Absolute paths and `..` components are rejected. `.` and empty
/// components are dropped, so the result may be empty.
pub fn sanitize_entry_path(raw: &[u8]) -> Result<PathBuf, OpError> {
    let unsafe_path = || OpError::UnsafeArchivePath {
        entry: String::from_utf8_lossy(raw).into_owned(),
    };

    if raw.first() == Some(&b'/') {
        return Err(unsafe_path());
    }

    let mut sanitized = PathBuf::new();
    for component in raw.split(|b| *b == b'/') {
        match component {
            b"" | b"." => continue,
            b".." => return Err(unsafe_path()),
            name if name.contains(&0) => return Err(unsafe_path()),
            name => sanitized.push(OsStr::from_bytes(name)),
        }
    }

    Ok(sanitized)
}
