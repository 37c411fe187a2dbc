//! High-level operation executor with unified result handling.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ferryfile_core::{CancelFlag, EngineConfig, OpError, ProgressCallback, ProgressInfo};

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::batch::{BatchKind, abort_reason, run_batch};
use crate::operation::FileOpRequest;
use crate::progress::{OperationComplete, OperationType};

/// Unified result type for all operations.
#[derive(Debug, Clone)]
pub enum OperationResult {
    /// Progress update.
    Progress(ProgressInfo),
    /// The operation completed. Always the last message of a request.
    Complete(OperationComplete),
}

/// Runs one request at a time on a blocking worker thread.
#[derive(Debug, Clone, Default)]
pub struct OperationExecutor {
    config: EngineConfig,
    cancel: CancelFlag,
    busy: Arc<AtomicBool>,
}

impl OperationExecutor {
    /// Create a new executor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor with the given engine settings.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The engine settings used for every request.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Request cancellation of the running operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle to the cancellation flag, e.g. for a signal handler.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Whether an operation is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a request on a blocking worker.
    ///
    /// Returns a receiver yielding progress snapshots followed by exactly
    /// one [`OperationResult::Complete`]. Fails with [`OpError::Busy`] if a
    /// request is already running. Must be called from within a Tokio
    /// runtime.
    pub fn start(
        &self,
        request: FileOpRequest,
    ) -> Result<mpsc::Receiver<OperationResult>, OpError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OpError::Busy);
        }
        self.cancel.reset();

        let (tx, rx) = mpsc::channel(self.config.channel_size.max(1));
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let guard = BusyGuard(Arc::clone(&self.busy));

        debug!(operation = %request.kind, sources = request.sources.len(), "starting operation");
        tokio::task::spawn_blocking(move || {
            let mut emit = |info: ProgressInfo| {
                // Receiver dropped: nobody is listening, stop the work.
                if tx.blocking_send(OperationResult::Progress(info)).is_err() {
                    cancel.cancel();
                }
            };
            let complete = execute(&request, &config, &cancel, &mut emit);

            // Free the executor before the final message so a caller
            // reacting to it can start the next request.
            drop(guard);
            let _ = tx.blocking_send(OperationResult::Complete(complete));
        });

        Ok(rx)
    }
}

/// Clears the busy flag when the worker finishes, even by panicking.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run a request to completion on the current thread.
///
/// `emit` receives monotonic progress snapshots; the returned value is the
/// terminal result.
pub fn execute(
    request: &FileOpRequest,
    config: &EngineConfig,
    cancel: &CancelFlag,
    emit: &mut dyn FnMut(ProgressInfo),
) -> OperationComplete {
    if let Some(kind) = BatchKind::from_operation(request.kind) {
        return run_batch(kind, request, config, cancel, emit);
    }

    match request.kind {
        OperationType::ExtractArchive => {
            run_archive(request, cancel, emit, |destination, progress, callback| {
                let [archive] = request.sources.as_slice() else {
                    return Err(OpError::invalid("extraction takes exactly one archive"));
                };
                ArchiveReader::from_config(config).extract(archive, destination, progress, callback)
            })
        }
        _ => run_archive(request, cancel, emit, |destination, progress, callback| {
            ArchiveWriter::from_config(config).create(
                &request.sources,
                destination,
                progress,
                callback,
            )
        }),
    }
}

fn run_archive<F>(
    request: &FileOpRequest,
    cancel: &CancelFlag,
    emit: &mut dyn FnMut(ProgressInfo),
    operation: F,
) -> OperationComplete
where
    F: FnOnce(&Path, &mut ProgressInfo, &mut ProgressCallback<'_>) -> Result<(), OpError>,
{
    let mut complete = OperationComplete::new(request.kind, request.sources.len());
    let Some(destination) = request.destination.as_deref() else {
        return complete.fail(&OpError::invalid(format!(
            "{} needs a destination",
            request.kind
        )));
    };

    let mut progress = ProgressInfo::default();
    let result = {
        let mut callback = |info: &ProgressInfo| {
            emit(info.clone());
            !cancel.is_cancelled()
        };
        operation(destination, &mut progress, &mut callback)
    };
    complete.bytes_processed = progress.bytes_done;

    match result {
        Ok(()) => {
            emit(progress.clamped());
            complete.sources_completed = complete.sources_total;
            info!(
                operation = %request.kind,
                destination = %destination.display(),
                bytes = complete.bytes_processed,
                "archive operation finished"
            );
            complete.succeed()
        }
        Err(err) => {
            let err = abort_reason(err, cancel);
            if !err.is_cancelled() {
                warn!(operation = %request.kind, error = %err, "archive operation failed");
            }
            complete.fail(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_executor_streams_then_completes() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.txt");
        fs::write(&src, b"hello").unwrap();
        let dest = temp.path().join("out");

        let executor = OperationExecutor::new();
        let mut rx = executor
            .start(FileOpRequest::copy(vec![src], dest.clone()))
            .unwrap();

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        let Some(OperationResult::Complete(complete)) = results.pop() else {
            panic!("last message must be the completion");
        };
        assert!(complete.success, "{}", complete.summary());
        assert!(results.iter().all(|r| matches!(r, OperationResult::Progress(_))));
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"hello");
        assert!(!executor.is_busy());
    }

    #[tokio::test]
    async fn test_executor_rejects_concurrent_request() {
        let executor = OperationExecutor::new();
        executor.busy.store(true, Ordering::SeqCst);

        let err = executor.start(FileOpRequest::delete(vec![])).unwrap_err();

        assert_eq!(err.code(), libc::EBUSY);
    }

    #[test]
    fn test_extract_requires_single_archive() {
        let request = FileOpRequest {
            sources: vec!["/a.tar".into(), "/b.tar".into()],
            ..FileOpRequest::extract_archive("/a.tar".into(), "/out".into())
        };

        let complete = execute(
            &request,
            &EngineConfig::default(),
            &CancelFlag::new(),
            &mut |_| {},
        );

        assert!(!complete.success);
        assert!(complete.error_message().contains("exactly one archive"));
    }
}
