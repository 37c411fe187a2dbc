//! ferry - recursive copy, move, delete and tar archiving with progress.
//!
//! Usage:
//!   ferry copy <SOURCES>... <DEST_DIR>     Copy into a directory
//!   ferry move <SOURCES>... <DEST_DIR>     Move into a directory
//!   ferry delete <TARGETS>...              Delete files and trees
//!   ferry pack <SOURCES>... -o <ARCHIVE>   Create a tar.zst archive
//!   ferry unpack <ARCHIVE> <DEST_DIR>      Extract an archive
//!   ferry scan <PATH>...                   Show byte and entry totals
//!   ferry --help                           Show help

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ferryfile_core::{Compression, EngineConfig, ProgressInfo};
use ferryfile_ops::{FileOpRequest, OperationExecutor, OperationResult, Outcome};
use ferryfile_scan::PathScanner;

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Copy, move, delete and archive file trees with progress",
    long_about = "ferry performs recursive filesystem operations with one \
                  aggregated progress display. Symlinks are never followed and \
                  existing destinations are never overwritten. Press Ctrl-C to \
                  cancel a running operation."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Read/write buffer size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Maximum recursion depth
    #[arg(long, global = true)]
    max_depth: Option<usize>,

    /// Preserve file ownership when permitted
    #[arg(long, global = true)]
    preserve_ownership: bool,

    /// Print the final result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Copy sources into a destination directory
    Copy {
        /// Files or directories to copy
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Destination directory (created if missing)
        destination: PathBuf,
    },

    /// Move sources into a destination directory
    Move {
        /// Files or directories to move
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Destination directory (created if missing)
        destination: PathBuf,
    },

    /// Delete files and directory trees
    Delete {
        /// Paths to delete
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },

    /// Create a tar archive
    Pack {
        /// Files or directories to archive
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Output archive path
        #[arg(short, long)]
        output: PathBuf,

        /// Write an uncompressed tar
        #[arg(long)]
        no_compress: bool,

        /// Zstandard compression level (1-22)
        #[arg(short, long, default_value = "3")]
        level: i32,
    },

    /// Extract a tar archive into a new directory
    Unpack {
        /// Archive to extract (zstd, gzip, xz, bzip2 or plain tar)
        archive: PathBuf,

        /// Destination directory (must not exist)
        destination: PathBuf,
    },

    /// Show total bytes and entries under paths
    Scan {
        /// Paths to scan
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut builder = EngineConfig::builder();
    builder.preserve_ownership(cli.preserve_ownership);
    if let Some(chunk_size) = cli.chunk_size {
        builder.chunk_size(chunk_size);
    }
    if let Some(max_depth) = cli.max_depth {
        builder.max_depth(max_depth);
    }

    let request = match cli.command {
        Command::Copy {
            sources,
            destination,
        } => FileOpRequest::copy(sources, destination),
        Command::Move {
            sources,
            destination,
        } => FileOpRequest::move_to(sources, destination),
        Command::Delete { targets } => FileOpRequest::delete(targets),
        Command::Pack {
            sources,
            output,
            no_compress,
            level,
        } => {
            builder.compression_level(level);
            if no_compress {
                builder.compression(Compression::None);
            }
            FileOpRequest::create_archive(sources, output)
        }
        Command::Unpack {
            archive,
            destination,
        } => FileOpRequest::extract_archive(archive, destination),
        Command::Scan { paths } => {
            let config = builder.build().context("Invalid configuration")?;
            return run_scan(&paths, &config);
        }
    };

    let config = builder.build().context("Invalid configuration")?;
    run_request(request, config, cli.json).await
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one request on the executor and render its progress.
async fn run_request(request: FileOpRequest, config: EngineConfig, json: bool) -> Result<()> {
    let executor = OperationExecutor::with_config(config);
    let cancel = executor.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let kind = request.kind;
    debug!(
        operation = %kind,
        sources = request.sources.len(),
        destination = ?request.destination,
        "starting request"
    );
    let mut rx = executor.start(request).map_err(|e| eyre!(e))?;
    let mut complete = None;

    while let Some(result) = rx.recv().await {
        match result {
            OperationResult::Progress(info) => render_progress(&info),
            OperationResult::Complete(done) => complete = Some(done),
        }
    }
    eprintln!();

    let complete = complete.ok_or_else(|| eyre!("{kind} worker stopped without a result"))?;
    debug!(outcome = ?complete.outcome(), "request finished");
    if json {
        println!("{}", serde_json::to_string_pretty(&complete)?);
    } else {
        println!("{}", complete.summary());
    }

    match complete.outcome() {
        Outcome::Succeeded => Ok(()),
        Outcome::Cancelled => bail!("cancelled"),
        Outcome::PartiallyFailed | Outcome::Failed => {
            bail!("{}", complete.error_message())
        }
    }
}

/// Redraw the single progress line on stderr.
fn render_progress(info: &ProgressInfo) {
    let mut line = format!(
        "\r{:>5.1}%  {} / {}  {} / {} entries",
        info.percentage(),
        format_size(info.bytes_done),
        format_size(info.bytes_total),
        info.files_done,
        info.files_total,
    );
    if let Some(name) = info.current_path.file_name() {
        line.push_str("  ");
        line.push_str(&truncate(&name.to_string_lossy(), 40));
    }

    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "{line:<100}");
    let _ = stderr.flush();
}

/// Scan paths and print their totals.
fn run_scan(paths: &[PathBuf], config: &EngineConfig) -> Result<()> {
    let scanner = PathScanner::new().with_max_depth(config.max_depth);
    for path in paths {
        let stats = scanner
            .scan(path)
            .with_context(|| format!("Failed to scan {}", path.display()))?;
        println!(
            "{:>12}  {:>10} entries  {}",
            format_size(stats.total_bytes),
            stats.entry_count,
            path.display()
        );
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
