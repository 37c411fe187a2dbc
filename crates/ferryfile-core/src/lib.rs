//! Core types for ferryfile.
//!
//! This crate provides the value types shared by the scanner, the
//! filesystem operation engine and the archive engine: the error model,
//! progress snapshots, cancellation handles and engine configuration.

mod config;
mod error;
mod progress;

pub use config::{Compression, EngineConfig, EngineConfigBuilder, EngineConfigBuilderError};
pub use error::{ErrorInfo, OpError};
pub use progress::{CancelFlag, ProgressCallback, ProgressInfo};

/// Default maximum recursion depth for tree walks.
pub const MAX_RECURSION_DEPTH: usize = 128;

/// Default read/write buffer size for streamed file data.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
