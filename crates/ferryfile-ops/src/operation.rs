//! File operation requests.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::progress::OperationType;

/// A user-level request: one kind of work over a selection of sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOpRequest {
    /// What to do with the sources.
    pub kind: OperationType,
    /// Paths to operate on, processed in order.
    pub sources: Vec<PathBuf>,
    /// Target directory for copy/move, output file for archive creation,
    /// output directory for extraction. Unused by delete.
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// Accepted for compatibility; symlinks are never followed.
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Accepted for compatibility; existing destinations are never replaced.
    #[serde(default)]
    pub overwrite_existing: bool,
}

impl FileOpRequest {
    fn new(kind: OperationType, sources: Vec<PathBuf>, destination: Option<PathBuf>) -> Self {
        Self {
            kind,
            sources,
            destination,
            follow_symlinks: false,
            overwrite_existing: false,
        }
    }

    /// Create a copy request into the `destination` directory.
    pub fn copy(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::new(OperationType::Copy, sources, Some(destination))
    }

    /// Create a move request into the `destination` directory.
    pub fn move_to(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::new(OperationType::Move, sources, Some(destination))
    }

    /// Create a delete request.
    pub fn delete(targets: Vec<PathBuf>) -> Self {
        Self::new(OperationType::Delete, targets, None)
    }

    /// Create an archive creation request writing to `archive`.
    pub fn create_archive(sources: Vec<PathBuf>, archive: PathBuf) -> Self {
        Self::new(OperationType::CreateArchive, sources, Some(archive))
    }

    /// Create an extraction request for `archive` into `destination`.
    pub fn extract_archive(archive: PathBuf, destination: PathBuf) -> Self {
        Self::new(OperationType::ExtractArchive, vec![archive], Some(destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_partial_json() {
        let request: FileOpRequest =
            serde_json::from_str(r#"{"kind": "Delete", "sources": ["/tmp/a", "/tmp/b"]}"#)
                .unwrap();

        assert_eq!(request, FileOpRequest::delete(vec!["/tmp/a".into(), "/tmp/b".into()]));
    }

    #[test]
    fn test_extract_request_shape() {
        let request = FileOpRequest::extract_archive("/tmp/a.tar.zst".into(), "/tmp/out".into());

        assert_eq!(request.kind, OperationType::ExtractArchive);
        assert_eq!(request.sources.len(), 1);
        assert_eq!(request.destination.as_deref(), Some(std::path::Path::new("/tmp/out")));
    }
}
