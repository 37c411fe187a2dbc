//! Path scanning for ferryfile.
//!
//! Walks a path without following symlinks and computes the byte and
//! entry totals used to seed progress before an operation starts.
//!
//! # Example
//!
//! ```rust,no_run
//! use ferryfile_scan::PathScanner;
//!
//! let stats = PathScanner::new().scan("/path/to/tree").unwrap();
//! println!("{} bytes in {} entries", stats.total_bytes, stats.entry_count);
//! ```

mod scanner;

pub use scanner::{PathScanner, PathStats, SpecialFiles};

// Re-export core types for convenience
pub use ferryfile_core::{MAX_RECURSION_DEPTH, OpError};
