//! Directory creation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ferryfile_core::OpError;

/// Create a directory and any missing parents.
///
/// Succeeds when the directory already exists. Fails with
/// [`OpError::NotADirectory`] if an intermediate component is not a
/// directory and [`OpError::AlreadyExists`] if the final one is not.
pub fn make_dir_parents(path: &Path) -> Result<(), OpError> {
    if path.as_os_str().is_empty() {
        return Err(OpError::invalid("empty directory path"));
    }

    let mut current = PathBuf::new();
    let mut components = path.components().peekable();
    while let Some(component) = components.next() {
        current.push(component);
        let last = components.peek().is_none();

        match fs::metadata(&current) {
            Ok(metadata) if metadata.is_dir() => continue,
            Ok(_) if last => return Err(OpError::AlreadyExists { path: current }),
            Ok(_) => return Err(OpError::NotADirectory { path: current }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(OpError::io("stat", current, e)),
        }

        match fs::create_dir(&current) {
            Ok(()) => {}
            // Lost a race with another creator.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && current.is_dir() => {}
            Err(e) => return Err(OpError::io("mkdir", current, e)),
        }
    }

    Ok(())
}
