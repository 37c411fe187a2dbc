//! Batch orchestration: many sources, one progress stream.
//!
//! Every source is scanned into a [`SourcePlan`] before anything is
//! touched. Plans then run strictly in order, and each primitive's local
//! progress is translated into batch-wide totals by a
//! [`ProgressAggregator`], which never lets a reported count go backwards.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use ferryfile_core::{CancelFlag, EngineConfig, OpError, ProgressCallback, ProgressInfo};
use ferryfile_scan::{PathScanner, PathStats, SpecialFiles};

use crate::copy::{CopyOptions, copy_path_with};
use crate::create::make_dir_parents;
use crate::delete::delete_path_with;
use crate::move_op::{MoveOptions, move_path_with};
use crate::operation::FileOpRequest;
use crate::progress::{OperationComplete, OperationType};

/// The primitive a batch runs for each source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Copy,
    Move,
    Delete,
}

impl BatchKind {
    /// The batch kind for an operation type, if it is a batch operation.
    pub fn from_operation(operation: OperationType) -> Option<Self> {
        match operation {
            OperationType::Copy => Some(Self::Copy),
            OperationType::Move => Some(Self::Move),
            OperationType::Delete => Some(Self::Delete),
            OperationType::CreateArchive | OperationType::ExtractArchive => None,
        }
    }

    /// The operation type reported for this batch.
    pub fn operation_type(self) -> OperationType {
        match self {
            Self::Copy => OperationType::Copy,
            Self::Move => OperationType::Move,
            Self::Delete => OperationType::Delete,
        }
    }

    fn needs_destination(self) -> bool {
        !matches!(self, Self::Delete)
    }

    /// Progress units a source is worth: its entry count for deletes, one
    /// per source otherwise.
    fn work_units(self, stats: &PathStats) -> u64 {
        match self {
            Self::Delete => stats.entry_count.max(1),
            Self::Copy | Self::Move => 1,
        }
    }

    /// Deletes report entries only.
    fn work_bytes(self, stats: &PathStats) -> u64 {
        match self {
            Self::Delete => 0,
            Self::Copy | Self::Move => stats.total_bytes,
        }
    }

    /// Special files fail the scan whenever the source may be copied, since
    /// the copy primitive cannot reproduce them.
    fn special_files(self, source: &Path, destination_dir: Option<&Path>) -> SpecialFiles {
        match self {
            Self::Delete => SpecialFiles::Count,
            Self::Copy => SpecialFiles::Reject,
            Self::Move => match destination_dir {
                Some(dir) if same_device(source, dir) => SpecialFiles::Count,
                _ => SpecialFiles::Reject,
            },
        }
    }

    /// Fresh per-source progress for a plan.
    fn local_progress(self, plan: &SourcePlan) -> ProgressInfo {
        match self {
            Self::Delete => ProgressInfo::new(plan.stats.entry_count, 0),
            Self::Copy | Self::Move => {
                ProgressInfo::new(plan.stats.entry_count, plan.stats.total_bytes)
            }
        }
    }

    /// Run the primitive for one plan.
    pub fn run(
        self,
        plan: &SourcePlan,
        progress: &mut ProgressInfo,
        callback: &mut ProgressCallback<'_>,
        config: &EngineConfig,
    ) -> Result<(), OpError> {
        match self {
            Self::Delete => delete_path_with(&plan.source, progress, callback, config.max_depth),
            Self::Copy | Self::Move => {
                let destination = plan
                    .destination
                    .as_deref()
                    .ok_or_else(|| OpError::invalid("missing destination"))?;
                if self == Self::Copy {
                    copy_path_with(
                        &plan.source,
                        destination,
                        progress,
                        callback,
                        &CopyOptions::from(config),
                    )
                } else {
                    move_path_with(
                        &plan.source,
                        destination,
                        progress,
                        callback,
                        &MoveOptions::from(config),
                    )
                }
            }
        }
    }
}

/// Precomputed work for one source of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    /// The source path.
    pub source: PathBuf,
    /// Where the source ends up, for copy and move.
    pub destination: Option<PathBuf>,
    /// Scanned totals of the source.
    pub stats: PathStats,
    /// Progress units this source contributes to `files_total`.
    pub work_units: u64,
    /// Bytes this source contributes to `bytes_total`.
    pub work_bytes: u64,
}

/// Scan every source and compute its destination.
///
/// Fails before any mutation if a source cannot be scanned, or if a
/// destination would land on or inside its own source.
pub fn build_plans(
    kind: BatchKind,
    sources: &[PathBuf],
    destination: Option<&Path>,
    config: &EngineConfig,
    cancel: &CancelFlag,
) -> Result<Vec<SourcePlan>, OpError> {
    let scanner = PathScanner::new().with_max_depth(config.max_depth);
    let move_options = MoveOptions::from(config);
    let mut plans = Vec::with_capacity(sources.len());

    for source in sources {
        if cancel.is_cancelled() {
            return Err(OpError::Cancelled);
        }

        let policy = if kind == BatchKind::Move && move_options.force_copy_fallback {
            SpecialFiles::Reject
        } else {
            kind.special_files(source, destination)
        };
        let stats = scanner.clone().with_special_files(policy).scan(source)?;
        let target = if kind.needs_destination() {
            let dir = destination.ok_or_else(|| {
                OpError::invalid(format!("{} needs a destination", kind.operation_type()))
            })?;
            let name = source.file_name().ok_or_else(|| {
                OpError::invalid(format!("source has no file name: {}", source.display()))
            })?;
            let target = dir.join(name);
            check_destination(source, &target)?;
            Some(target)
        } else {
            None
        };

        plans.push(SourcePlan {
            source: source.clone(),
            destination: target,
            stats,
            work_units: kind.work_units(&stats),
            work_bytes: kind.work_bytes(&stats),
        });
    }

    Ok(plans)
}

/// Whether `source` and the nearest existing ancestor of `dir` share a
/// filesystem, so that a rename cannot fail with `EXDEV`.
fn same_device(source: &Path, dir: &Path) -> bool {
    let Ok(source_meta) = fs::symlink_metadata(source) else {
        return false;
    };
    dir.ancestors()
        .find_map(|ancestor| fs::metadata(ancestor).ok())
        .is_some_and(|meta| meta.dev() == source_meta.dev())
}

/// Reject a destination equal to, or nested inside, its source.
fn check_destination(source: &Path, target: &Path) -> Result<(), OpError> {
    let source_abs = std::path::absolute(source).map_err(|e| OpError::io("resolve", source, e))?;
    let target_abs = std::path::absolute(target).map_err(|e| OpError::io("resolve", target, e))?;

    if source_abs == target_abs {
        return Err(OpError::SameFile {
            path: target.to_path_buf(),
        });
    }
    if target_abs.starts_with(&source_abs) {
        return Err(OpError::invalid(format!(
            "cannot place {} inside itself",
            source.display()
        )));
    }
    Ok(())
}

/// Translates per-source progress into one monotonic batch snapshot.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    completed_units: u64,
    completed_bytes: u64,
    last: ProgressInfo,
}

impl ProgressAggregator {
    /// Sum the totals of all plans.
    pub fn new(plans: &[SourcePlan]) -> Self {
        let (files_total, bytes_total) = plans.iter().fold((0u64, 0u64), |(files, bytes), plan| {
            (
                files.saturating_add(plan.work_units),
                bytes.saturating_add(plan.work_bytes),
            )
        });

        Self {
            completed_units: 0,
            completed_bytes: 0,
            last: ProgressInfo::new(files_total, bytes_total),
        }
    }

    /// The latest batch snapshot.
    pub fn snapshot(&self) -> &ProgressInfo {
        &self.last
    }

    /// Batch snapshot for a local snapshot of the plan in flight.
    pub fn translate(&mut self, plan: &SourcePlan, local: &ProgressInfo) -> ProgressInfo {
        let files = self
            .completed_units
            .saturating_add(local.files_done.min(plan.work_units));
        let bytes = self
            .completed_bytes
            .saturating_add(local.bytes_done.min(plan.work_bytes));

        self.advance(files, bytes);
        self.last.current_path = local.current_path.clone();
        self.last.clone()
    }

    /// Batch snapshot after `plan` has fully succeeded.
    pub fn complete(&mut self, plan: &SourcePlan) -> ProgressInfo {
        self.completed_units = self.completed_units.saturating_add(plan.work_units);
        self.completed_bytes = self.completed_bytes.saturating_add(plan.work_bytes);
        self.advance(self.completed_units, self.completed_bytes);
        self.last.clone()
    }

    fn advance(&mut self, files: u64, bytes: u64) {
        let files = files.min(self.last.files_total);
        let bytes = bytes.min(self.last.bytes_total);
        self.last.files_done = self.last.files_done.max(files);
        self.last.bytes_done = self.last.bytes_done.max(bytes);
    }
}

/// Map an abort to a cancellation when the flag caused it.
pub(crate) fn abort_reason(err: OpError, cancel: &CancelFlag) -> OpError {
    if cancel.is_cancelled() {
        OpError::Cancelled
    } else {
        err
    }
}

/// Run a copy, move or delete request as one batch.
///
/// Every snapshot passed to `emit` is monotonic. The batch stops at the
/// first failing source; sources already processed are not rolled back.
pub fn run_batch(
    kind: BatchKind,
    request: &FileOpRequest,
    config: &EngineConfig,
    cancel: &CancelFlag,
    emit: &mut dyn FnMut(ProgressInfo),
) -> OperationComplete {
    let mut complete = OperationComplete::new(kind.operation_type(), request.sources.len());

    if request.follow_symlinks || request.overwrite_existing {
        debug!(
            follow_symlinks = request.follow_symlinks,
            overwrite_existing = request.overwrite_existing,
            "ignoring request flags: symlinks are never followed and destinations never replaced"
        );
    }

    match run_plans(kind, request, config, cancel, emit, &mut complete) {
        Ok(()) => {
            info!(
                operation = %kind.operation_type(),
                sources = complete.sources_completed,
                bytes = complete.bytes_processed,
                "batch finished"
            );
            complete.succeed()
        }
        Err(err) => {
            let err = abort_reason(err, cancel);
            if err.is_cancelled() {
                info!(operation = %kind.operation_type(), "batch cancelled");
            } else {
                warn!(operation = %kind.operation_type(), error = %err, "batch failed");
            }
            complete.fail(&err)
        }
    }
}

fn run_plans(
    kind: BatchKind,
    request: &FileOpRequest,
    config: &EngineConfig,
    cancel: &CancelFlag,
    emit: &mut dyn FnMut(ProgressInfo),
    complete: &mut OperationComplete,
) -> Result<(), OpError> {
    if request.sources.is_empty() {
        emit(ProgressInfo::default());
        return Ok(());
    }

    let destination = request.destination.as_deref();
    if kind.needs_destination() && destination.is_none() {
        return Err(OpError::invalid(format!(
            "{} needs a destination",
            kind.operation_type()
        )));
    }
    let plans = build_plans(kind, &request.sources, destination, config, cancel)?;
    if let Some(dir) = destination.filter(|_| kind.needs_destination()) {
        make_dir_parents(dir)?;
    }

    let mut aggregator = ProgressAggregator::new(&plans);
    emit(aggregator.snapshot().clone());

    for plan in &plans {
        let mut local = kind.local_progress(plan);
        let result = {
            let mut callback = |info: &ProgressInfo| {
                emit(aggregator.translate(plan, info));
                !cancel.is_cancelled()
            };
            kind.run(plan, &mut local, &mut callback, config)
        };
        complete.bytes_processed = aggregator.snapshot().bytes_done;
        result?;

        emit(aggregator.complete(plan));
        complete.bytes_processed = aggregator.snapshot().bytes_done;
        complete.sources_completed += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(work_units: u64, work_bytes: u64) -> SourcePlan {
        SourcePlan {
            source: PathBuf::from("/src"),
            destination: None,
            stats: PathStats {
                total_bytes: work_bytes,
                entry_count: work_units,
            },
            work_units,
            work_bytes,
        }
    }

    #[test]
    fn test_aggregator_translates_and_clamps() {
        let plans = [plan(1, 100), plan(1, 50)];
        let mut aggregator = ProgressAggregator::new(&plans);
        assert_eq!(aggregator.snapshot().files_total, 2);
        assert_eq!(aggregator.snapshot().bytes_total, 150);

        let mut local = ProgressInfo::new(3, 100);
        local.files_done = 3;
        local.bytes_done = 400;
        let snap = aggregator.translate(&plans[0], &local);
        assert_eq!((snap.files_done, snap.bytes_done), (1, 100));

        let snap = aggregator.complete(&plans[0]);
        assert_eq!((snap.files_done, snap.bytes_done), (1, 100));

        local.bytes_done = 20;
        let snap = aggregator.translate(&plans[1], &local);
        assert_eq!(snap.bytes_done, 120);

        let snap = aggregator.complete(&plans[1]);
        assert!(snap.is_complete());
    }

    #[test]
    fn test_aggregator_never_goes_backwards() {
        let plans = [plan(4, 0)];
        let mut aggregator = ProgressAggregator::new(&plans);

        let mut local = ProgressInfo::new(4, 0);
        local.files_done = 3;
        aggregator.translate(&plans[0], &local);
        local.files_done = 1;
        let snap = aggregator.translate(&plans[0], &local);

        assert_eq!(snap.files_done, 3);
    }

    #[test]
    fn test_special_file_policy_per_kind() {
        let temp = tempfile::TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        fs::write(&source, b"a").unwrap();
        let dest = temp.path().join("not/yet/created");

        assert_eq!(BatchKind::Copy.special_files(&source, Some(&dest)), SpecialFiles::Reject);
        assert_eq!(BatchKind::Delete.special_files(&source, None), SpecialFiles::Count);
        // Same filesystem: the rename path never copies.
        assert_eq!(BatchKind::Move.special_files(&source, Some(&dest)), SpecialFiles::Count);
    }

    #[test]
    fn test_aggregator_saturates() {
        let plans = [plan(u64::MAX, u64::MAX), plan(5, 5)];
        let aggregator = ProgressAggregator::new(&plans);

        assert_eq!(aggregator.snapshot().files_total, u64::MAX);
        assert_eq!(aggregator.snapshot().bytes_total, u64::MAX);
    }

    #[test]
    fn test_destination_inside_source_rejected() {
        let err = check_destination(Path::new("/data/dir"), Path::new("/data/dir/sub/dir"))
            .unwrap_err();
        assert_eq!(err.code(), libc::EINVAL);

        let err = check_destination(Path::new("/data/a"), Path::new("/data/a")).unwrap_err();
        assert!(matches!(err, OpError::SameFile { .. }));

        check_destination(Path::new("/data/a"), Path::new("/data/ab")).unwrap();
    }
}
