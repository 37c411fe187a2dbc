//! Filesystem operation engine for ferryfile.
//!
//! This crate provides the recursive copy, move and delete primitives,
//! atomic whole-file writes, tar archive creation and extraction, and the
//! batch orchestrator that turns a multi-source request into one
//! aggregated progress stream. Every primitive takes a progress callback
//! whose `false` return cancels the operation.

mod archive;
mod batch;
mod copy;
mod create;
mod delete;
mod executor;
mod file;
mod move_op;
mod operation;
mod progress;

pub use archive::{
    ArchiveReader, ArchiveWriter, StreamFormat, create_tar_zst, extract_tar_zst,
    sanitize_entry_path,
};
pub use batch::{BatchKind, ProgressAggregator, SourcePlan, build_plans, run_batch};
pub use copy::{CopyOptions, copy_path, copy_path_with};
pub use create::make_dir_parents;
pub use delete::{delete_path, delete_path_with};
pub use executor::{OperationExecutor, OperationResult, execute};
pub use file::{read_file_all, set_permissions, write_file_atomic};
pub use move_op::{MoveOptions, move_path, move_path_with};
pub use operation::FileOpRequest;
pub use progress::{OperationComplete, OperationType, Outcome};

// Re-export core types for convenience
pub use ferryfile_core::{
    CancelFlag, Compression, EngineConfig, ErrorInfo, OpError, ProgressCallback, ProgressInfo,
};
