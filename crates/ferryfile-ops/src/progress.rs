//! Progress reporting types for file operations.

use serde::{Deserialize, Serialize};

use ferryfile_core::{ErrorInfo, OpError, ProgressCallback, ProgressInfo};

/// The type of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Copy,
    Move,
    Delete,
    CreateArchive,
    ExtractArchive,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
            Self::CreateArchive => write!(f, "Create archive"),
            Self::ExtractArchive => write!(f, "Extract archive"),
        }
    }
}

/// How a finished operation should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Every source was processed.
    Succeeded,
    /// Some sources finished before a later one failed.
    PartiallyFailed,
    /// Nothing was completed.
    Failed,
    /// The user stopped the operation.
    Cancelled,
}

/// Terminal result of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationComplete {
    /// The type of operation.
    pub operation_type: OperationType,
    /// Whether the whole operation succeeded.
    pub success: bool,
    /// The error that stopped the operation.
    pub error: Option<ErrorInfo>,
    /// Number of top-level sources in the request.
    pub sources_total: usize,
    /// Number of top-level sources fully processed.
    pub sources_completed: usize,
    /// Bytes processed across completed work.
    pub bytes_processed: u64,
}

impl OperationComplete {
    pub(crate) fn new(operation_type: OperationType, sources_total: usize) -> Self {
        Self {
            operation_type,
            success: false,
            error: None,
            sources_total,
            sources_completed: 0,
            bytes_processed: 0,
        }
    }

    pub(crate) fn succeed(mut self) -> Self {
        self.success = true;
        self.error = None;
        self
    }

    pub(crate) fn fail(mut self, err: &OpError) -> Self {
        self.success = false;
        self.error = Some(ErrorInfo::from(err));
        self
    }

    /// The message shown for a failed operation, empty on success.
    pub fn error_message(&self) -> &str {
        self.error.as_ref().map(|e| e.message.as_str()).unwrap_or("")
    }

    /// Classify the result for presentation.
    pub fn outcome(&self) -> Outcome {
        if self.success {
            Outcome::Succeeded
        } else if self.error.as_ref().is_some_and(ErrorInfo::is_cancelled) {
            Outcome::Cancelled
        } else if self.sources_completed > 0 {
            Outcome::PartiallyFailed
        } else {
            Outcome::Failed
        }
    }

    /// Get a human-readable summary of the operation.
    pub fn summary(&self) -> String {
        let action = match self.operation_type {
            OperationType::Copy => "Copied",
            OperationType::Move => "Moved",
            OperationType::Delete => "Deleted",
            OperationType::CreateArchive => "Archived",
            OperationType::ExtractArchive => "Extracted",
        };

        match self.outcome() {
            Outcome::Succeeded => format!("{} {} items", action, self.sources_completed),
            Outcome::Cancelled => format!(
                "{} cancelled after {} of {} items",
                self.operation_type, self.sources_completed, self.sources_total
            ),
            Outcome::PartiallyFailed => format!(
                "{} {} of {} items, then failed: {}",
                action,
                self.sources_completed,
                self.sources_total,
                self.error_message()
            ),
            Outcome::Failed => format!("{} failed: {}", self.operation_type, self.error_message()),
        }
    }
}

/// Report a snapshot to the callback and turn a `false` answer into a
/// cancellation error.
pub(crate) fn checkpoint(
    progress: &ProgressInfo,
    callback: &mut ProgressCallback<'_>,
) -> Result<(), OpError> {
    if callback(&progress.clamped()) {
        Ok(())
    } else {
        Err(OpError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let done = OperationComplete::new(OperationType::Copy, 2).succeed();
        assert_eq!(done.outcome(), Outcome::Succeeded);

        let failed = OperationComplete::new(OperationType::Copy, 2)
            .fail(&OpError::invalid("bad destination"));
        assert_eq!(failed.outcome(), Outcome::Failed);
        assert!(failed.summary().contains("bad destination"));

        let mut partial = OperationComplete::new(OperationType::Delete, 3);
        partial.sources_completed = 1;
        let partial = partial.fail(&OpError::invalid("boom"));
        assert_eq!(partial.outcome(), Outcome::PartiallyFailed);

        let cancelled = OperationComplete::new(OperationType::Move, 1).fail(&OpError::Cancelled);
        assert_eq!(cancelled.outcome(), Outcome::Cancelled);
        assert_eq!(cancelled.error_message(), "Operation cancelled");
    }

    #[test]
    fn test_checkpoint_passes_clamped_snapshot() {
        let mut progress = ProgressInfo::new(1, 4);
        progress.add_files(3);
        progress.add_bytes(9);

        let mut seen = None;
        let result = checkpoint(&progress, &mut |info| {
            seen = Some(info.clone());
            false
        });

        assert!(matches!(result, Err(OpError::Cancelled)));
        let seen = seen.unwrap();
        assert_eq!((seen.files_done, seen.bytes_done), (1, 4));
    }
}
