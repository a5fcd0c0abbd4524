//! # arqvist CLI - Track the state of sequencing data directories
//!
//! Command-line front end for the arqvist library.
//!
//! ## Usage
//! ```bash
//! # Snapshot a run directory
//! arqvist init /data/run42 --exclude '**/*.tmp'
//!
//! # What changed since the snapshot?
//! arqvist status /data/run42
//!
//! # Verify a copy on the archive filesystem (owner/group ignored)
//! arqvist diff /data/run42 -t /archive/run42
//!
//! # Accept the current state, keeping the old snapshot in history
//! arqvist update /data/run42
//!
//! # Size, ownership, permission and external-link report
//! arqvist info /data/run42
//! ```
//!
//! `status` and `diff` exit with 0 when nothing differs, 1 when something
//! does, and 2 on error.

use anyhow::Context;
use arqvist::utils::format_bytes;
use arqvist::{
    ArqvistError, ChangeKind, CompareOptions, DiffResult, ProgressCallback, ProgressInfo, RecordDiff,
    PermissionFlags, ScanError, Snapshot, SnapshotSummary, Tracker, TrackerBuilder,
};
use clap::{Args, Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// arqvist - snapshot, verify and diff sequencing data directories
#[derive(Parser)]
#[command(name = "arqvist")]
#[command(version)]
#[command(about = "Snapshot, verify and diff the state of sequencing data directories")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a directory and start tracking it
    Init {
        /// Directory to track (defaults to current)
        path: Option<PathBuf>,

        /// Glob pattern of paths to leave out (repeatable)
        #[arg(short, long = "exclude")]
        exclude: Vec<String>,

        /// Number of hashing workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List paths that differ from the snapshot
    #[command(alias = "st")]
    Status(CompareArgs),

    /// Show per-attribute differences from the snapshot
    Diff(CompareArgs),

    /// Rescan and replace the snapshot, keeping the old one in history
    Update {
        /// Tracked directory (defaults to the one containing the current directory)
        path: Option<PathBuf>,
    },

    /// Show the current snapshot and its history
    Log {
        /// Tracked directory (defaults to the one containing the current directory)
        path: Option<PathBuf>,
    },

    /// Report size, ownership, permissions and external links of the snapshot
    Info {
        /// Tracked directory (defaults to the one containing the current directory)
        path: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct CompareArgs {
    /// Tracked directory (defaults to the one containing the current directory)
    path: Option<PathBuf>,

    /// Compare a relocated copy instead of the tracked directory
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Compare ownership even when checking a relocated copy
    #[arg(long)]
    strict: bool,

    /// Ignore permission bits
    #[arg(long)]
    ignore_permissions: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl CompareArgs {
    fn options(&self) -> CompareOptions {
        let options = if self.target.is_some() && !self.strict {
            CompareOptions::relocation()
        } else {
            CompareOptions::strict()
        };
        if self.ignore_permissions {
            options.without_permissions()
        } else {
            options
        }
    }
}

/// What a successful command found
enum Outcome {
    Clean,
    Differences,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Differences) => ExitCode::from(1),
        Err(e) => {
            let message = match e.downcast_ref::<ArqvistError>() {
                Some(err) => err.user_message(),
                None => format!("{:#}", e),
            };
            eprintln!("{}: {}", "Error".red().bold(), message);
            ExitCode::from(2)
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over `-v`
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<Outcome> {
    match cli.command {
        Commands::Init { path, exclude, workers } => cmd_init(path, exclude, workers),
        Commands::Status(args) => cmd_status(args),
        Commands::Diff(args) => cmd_diff(args),
        Commands::Update { path } => cmd_update(path),
        Commands::Log { path } => cmd_log(path),
        Commands::Info { path, json } => cmd_info(path, json),
    }
}

/// Open the tracker at `path`, or discover it from the current directory
fn open_tracker(path: Option<PathBuf>) -> anyhow::Result<Tracker> {
    let tracker = match path {
        Some(path) => Tracker::open(path)?,
        None => {
            let cwd = std::env::current_dir().context("cannot determine current directory")?;
            Tracker::discover(cwd)?
        }
    };
    Ok(tracker)
}

/// Spinner on stderr; hidden automatically when stderr is not a terminal
fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressCallback {
    let pb = pb.clone();
    Arc::new(move |info: ProgressInfo| {
        pb.set_message(format!(
            "{} {}/{} ({})",
            info.operation,
            info.processed,
            info.total.unwrap_or(0),
            format_bytes(info.bytes_processed)
        ));
    })
}

/// Snapshot a directory and create its marker directory
fn cmd_init(path: Option<PathBuf>, exclude: Vec<String>, workers: Option<usize>) -> anyhow::Result<Outcome> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    println!("{}", "Scanning directory...".blue().bold());

    let start = Instant::now();
    let pb = spinner("Walking tree...");

    let mut builder = TrackerBuilder::new()
        .exclude_patterns(exclude)
        .progress(progress_callback(&pb));
    if let Some(workers) = workers {
        builder = builder.hash_workers(workers);
    }
    let result = builder.init(&root);
    pb.finish_and_clear();
    let tracker = result?;
    let snapshot = tracker.baseline()?;

    println!("{} Tracking {}", "✓".green().bold(), tracker.root().display().to_string().cyan());
    print_snapshot_summary(&snapshot);
    println!("  Time: {}", format_duration(round_duration(start.elapsed())).to_string().cyan());
    print_scan_warnings(&snapshot.errors);

    Ok(Outcome::Clean)
}

/// One line per path that is not unchanged
fn cmd_status(args: CompareArgs) -> anyhow::Result<Outcome> {
    let result = compare(&args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(outcome_of(&result));
    }

    for entry in result.changed() {
        println!("{}: {}", entry_label(entry), entry.path);
    }
    print_scan_warnings(&result.target_errors);
    print_result_footer(&result);

    Ok(outcome_of(&result))
}

/// Per-attribute details for every path that is not unchanged
fn cmd_diff(args: CompareArgs) -> anyhow::Result<Outcome> {
    let result = compare(&args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(outcome_of(&result));
    }

    for entry in result.changed() {
        print_record_diff(entry);
    }
    print_scan_warnings(&result.target_errors);
    print_result_footer(&result);

    Ok(outcome_of(&result))
}

fn compare(args: &CompareArgs) -> anyhow::Result<DiffResult> {
    let tracker = open_tracker(args.path.clone())?;
    let pb = spinner("Scanning...");
    let tracker = tracker.with_progress(progress_callback(&pb));
    let result = tracker.status(args.target.as_deref(), args.options());
    pb.finish_and_clear();
    Ok(result?)
}

fn outcome_of(result: &DiffResult) -> Outcome {
    if result.has_differences() {
        Outcome::Differences
    } else {
        Outcome::Clean
    }
}

/// Rescan and supersede the manifest
fn cmd_update(path: Option<PathBuf>) -> anyhow::Result<Outcome> {
    let tracker = open_tracker(path)?;
    let start = Instant::now();
    let pb = spinner("Scanning...");
    let tracker = tracker.with_progress(progress_callback(&pb));
    let result = tracker.update();
    pb.finish_and_clear();
    let outcome = result?;

    if !outcome.superseded {
        println!("{} {} is already up to date", "✓".green().bold(), tracker.root().display());
        return Ok(Outcome::Clean);
    }

    let summary = outcome.changes.summary();
    println!("{} Updated snapshot of {}", "✓".green().bold(), tracker.root().display().to_string().cyan());
    println!(
        "  Changed: {} ({} modified, {} added, {} removed)",
        summary.total_changed().to_string().yellow(),
        summary.modified,
        summary.added,
        summary.removed
    );
    print_snapshot_summary(&outcome.snapshot);
    println!("  Time: {}", format_duration(round_duration(start.elapsed())).to_string().cyan());
    print_scan_warnings(&outcome.snapshot.errors);

    Ok(Outcome::Clean)
}

/// Current manifest followed by history, newest first
fn cmd_log(path: Option<PathBuf>) -> anyhow::Result<Outcome> {
    let tracker = open_tracker(path)?;
    let current = tracker.baseline()?;

    println!("{} {}", "Tracked directory:".bold(), tracker.root().display().to_string().cyan());
    println!("\n{} {}", "●".green().bold(), "current".green().bold());
    print_snapshot_summary(&current);

    let history = tracker.history()?;
    for entry in history.iter().rev() {
        println!("\n{} {}", "○".yellow(), entry.label.yellow());
        match entry.load() {
            Ok(snapshot) => print_snapshot_summary(&snapshot),
            Err(e) => println!("  {}", format!("unreadable: {}", e).red()),
        }
    }
    if history.is_empty() {
        println!("\n{}", "No superseded snapshots".dimmed());
    }

    Ok(Outcome::Clean)
}

/// Directory report of the current snapshot
fn cmd_info(path: Option<PathBuf>, json: bool) -> anyhow::Result<Outcome> {
    let tracker = open_tracker(path)?;
    let summary = tracker.baseline()?.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(Outcome::Clean);
    }

    println!("{} {}", "Dir:".bold(), tracker.root().display().to_string().cyan());
    println!(
        "  Taken: {}",
        summary.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
    );
    println!(
        "  Size: {} in {} files ({} directories, {} symlinks)",
        format_bytes(summary.total_size).cyan(),
        summary.file_count,
        summary.directory_count,
        summary.symlink_count
    );
    println!("  Users: {}", join_ids(&summary.owners));
    println!("  Groups: {}", join_ids(&summary.groups));
    for (label, dated) in [("Oldest", &summary.oldest), ("Newest", &summary.newest)] {
        if let Some(dated) = dated {
            println!(
                "  {}: {} {}",
                label,
                dated.modified_time.format("%Y-%m-%d %H:%M:%S UTC"),
                dated.relative_path
            );
        }
    }

    if !summary.directories.is_empty() {
        println!("\n{}", "Top-level subdirectories:".bold());
        for dir in &summary.directories {
            println!(
                "  - {}/\t{} files\t{}\tusers {}\t{}",
                dir.name.cyan(),
                dir.file_count,
                format_bytes(dir.total_size),
                join_ids(&dir.owners),
                permission_flags(&dir.permissions)
            );
        }
    }

    print_permission_report(&summary);

    println!("\n{} {}", "Temp files:".bold(), summary.temp_files.len());
    for path in &summary.temp_files {
        println!("  - {}", path.dimmed());
    }

    if !summary.external_links.is_empty() {
        println!("\n{}", "Symlinks pointing outside:".bold());
        for link in &summary.external_links {
            println!("  - {} -> {}", link.relative_path, link.target.yellow());
        }
        println!("  Related directories: {}", summary.external_directories().join(", "));
    }
    if summary.unreadable > 0 {
        println!("\n  Unreadable entries: {}", summary.unreadable.to_string().red());
    }

    Ok(Outcome::Clean)
}

fn print_permission_report(summary: &SnapshotSummary) {
    let yes_no = |count: usize| {
        if count > 0 {
            format!("yes ({})", count).red()
        } else {
            "no".green()
        }
    };
    println!("\n{}", "File permissions:".bold());
    println!("  - unreadable by owner: {}", yes_no(summary.permissions.owner_unreadable));
    println!("  - unreadable by group: {}", yes_no(summary.permissions.group_unreadable));
    println!("  - unwritable by group: {}", yes_no(summary.permissions.group_unwritable));
}

/// Compact `u`/`r`/`w` flag string, `-` when nothing is flagged
fn permission_flags(flags: &PermissionFlags) -> String {
    if flags.is_clear() {
        return "-".to_string();
    }
    let mut out = String::new();
    if flags.owner_unreadable > 0 {
        out.push('u');
    }
    if flags.group_unreadable > 0 {
        out.push('r');
    }
    if flags.group_unwritable > 0 {
        out.push('w');
    }
    out
}

fn join_ids(ids: &std::collections::BTreeSet<u32>) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn print_snapshot_summary(snapshot: &Snapshot) {
    println!(
        "  Taken: {} on {}",
        snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan(),
        snapshot.host.cyan()
    );
    println!(
        "  Entries: {} ({} files, {})",
        snapshot.len().to_string().cyan(),
        snapshot.file_count(),
        format_bytes(snapshot.total_size())
    );
    if !snapshot.errors.is_empty() {
        println!("  Unreadable: {}", snapshot.errors.len().to_string().red());
    }
}

fn print_record_diff(entry: &RecordDiff) {
    println!("{}: {}", entry_label(entry), entry.path.bold());
    for change in &entry.changes {
        println!(
            "  {}: {} != {} {}",
            change.attribute,
            change.target.yellow(),
            change.baseline,
            "(cached)".dimmed()
        );
    }
}

fn print_scan_warnings(errors: &[ScanError]) {
    for error in errors {
        let path = if error.relative_path.is_empty() {
            "<root>"
        } else {
            error.relative_path.as_str()
        };
        eprintln!(
            "{}: could not read {} ({}): {}",
            "warning".yellow().bold(),
            path,
            error.kind,
            error.message
        );
    }
}

fn print_result_footer(result: &DiffResult) {
    let summary = result.summary();
    if summary.total_changed() == 0 {
        println!("{} No differences ({} paths checked)", "✓".green().bold(), result.entries.len());
        return;
    }

    let target = result.target_root.display().to_string();
    println!(
        "\n{} paths differ in {} ({} modified, {} added, {} removed, {} type, {} permission, {} ownership)",
        summary.total_changed().to_string().yellow().bold(),
        target.cyan(),
        summary.modified,
        summary.added,
        summary.removed,
        summary.type_changed,
        summary.permission_changed,
        summary.ownership_changed
    );
    if summary.unreadable > 0 {
        println!(
            "{} of them could not be read on one side; rerun with sufficient permissions",
            summary.unreadable.to_string().red()
        );
    }
}

/// Change kind, marked when the other side could not be read
fn entry_label(entry: &RecordDiff) -> String {
    if entry.unreadable {
        format!("{} {}", colored_kind(entry.kind), "(unreadable)".red())
    } else {
        colored_kind(entry.kind).to_string()
    }
}

fn colored_kind(kind: ChangeKind) -> ColoredString {
    match kind {
        ChangeKind::Unchanged => kind.as_str().normal(),
        ChangeKind::Added => kind.as_str().green(),
        ChangeKind::Removed => kind.as_str().red(),
        ChangeKind::Modified | ChangeKind::TypeChanged => kind.as_str().yellow(),
        ChangeKind::PermissionChanged | ChangeKind::OwnershipChanged => kind.as_str().magenta(),
    }
}

/// Drop sub-millisecond noise from durations shown to the user
fn round_duration(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
