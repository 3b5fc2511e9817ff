use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use path_batch_core::{
    build_report, load_report, progress_fn, write_report, DiscoverOptions, EngineState,
    FsHooks, FsOperation, ProcessEngine, ProgressEvent, RunSummary, WalkSource,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "path-batch",
    version,
    about = "Apply a filesystem operation to a batch of paths with classified retries."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover paths, run the operation, then retry failures by classification.
    Run(RunArgs),
    /// Discover and load paths without touching them.
    Plan(PlanArgs),
    /// Summarize a saved batch report.
    Report(ReportArgs),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CliOperation {
    List,
    Delete,
    Copy,
    Move,
}

#[derive(Debug, Args)]
struct DiscoverArgs {
    /// One or more root paths to process.
    #[arg(
        long = "paths",
        value_name = "PATH",
        num_args = 1..,
        action = ArgAction::Append,
        required = true
    )]
    paths: Vec<PathBuf>,

    /// Maximum traversal depth (root is depth 0).
    #[arg(long)]
    max_depth: Option<usize>,

    /// Exclude glob patterns or plain substrings (repeatable).
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1.., action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Also process directories, after their contents.
    #[arg(long)]
    include_dirs: bool,

    /// Follow symbolic links while walking.
    #[arg(long)]
    follow_links: bool,
}

impl DiscoverArgs {
    fn into_options(self) -> DiscoverOptions {
        DiscoverOptions {
            roots: self.paths,
            max_depth: self.max_depth,
            excludes: self.exclude,
            include_directories: self.include_dirs,
            follow_links: self.follow_links,
        }
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    discover: DiscoverArgs,

    /// Operation applied to each path.
    #[arg(long, default_value = "list")]
    op: CliOperation,

    /// Destination directory for `copy` and `move`.
    #[arg(long, value_name = "DIR")]
    dest: Option<PathBuf>,

    /// Compare blake3 digests after each copy.
    #[arg(long)]
    verify: bool,

    /// Extra passes over the error list after the first run.
    #[arg(long, default_value_t = 3)]
    retry_passes: usize,

    /// Optional JSON report output file.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Log every attempted path.
    #[arg(long)]
    progress: bool,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[command(flatten)]
    discover: DiscoverArgs,

    /// Print every loaded path.
    #[arg(long)]
    show: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Report file written by `run --report`.
    #[arg(long, value_name = "FILE")]
    input: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_batch_command(args),
        Commands::Plan(args) => run_plan_command(args),
        Commands::Report(args) => run_report_command(args),
    }
}

fn build_operation(op: CliOperation, dest: Option<PathBuf>, verify: bool) -> Result<FsOperation> {
    let operation = match (op, dest) {
        (CliOperation::List, None) => FsOperation::List,
        (CliOperation::Delete, None) => FsOperation::Delete,
        (CliOperation::List | CliOperation::Delete, Some(_)) => {
            bail!("--dest only applies to copy and move")
        }
        (CliOperation::Copy, Some(dest)) => FsOperation::Copy { dest, verify },
        (CliOperation::Move, Some(dest)) => FsOperation::Move { dest },
        (CliOperation::Copy | CliOperation::Move, None) => {
            bail!("--dest is required for {op:?}")
        }
    };
    if verify && !matches!(operation, FsOperation::Copy { .. }) {
        bail!("--verify only applies to copy");
    }
    Ok(operation)
}

fn run_batch_command(args: RunArgs) -> Result<()> {
    let RunArgs {
        discover,
        op,
        dest,
        verify,
        retry_passes,
        report,
        progress,
    } = args;

    let operation = build_operation(op, dest, verify)?;
    let op_name = operation.name();
    let source = WalkSource::new(discover.into_options())?;
    let mut engine = ProcessEngine::new(source, FsHooks::new(operation));
    if progress {
        engine = engine.with_observer(progress_fn(|event: &ProgressEvent| {
            info!(
                "[{:?} #{}] {} ({} remaining)",
                event.phase,
                event.attempted + 1,
                event.current_path,
                human_bytes(event.remaining_size)
            );
        }));
    }

    let load = engine.load_paths()?;
    if !load.loaded {
        bail!("path discovery failed: {}", load.error);
    }
    println!(
        "Loaded {} path(s), {}.",
        load.item_count,
        human_bytes(load.total_size)
    );

    let mut runs: Vec<RunSummary> = Vec::new();
    runs.push(engine.start()?);
    for _ in 0..retry_passes {
        if engine.state() == EngineState::Faulted || engine.error_list()?.is_empty() {
            break;
        }
        runs.push(engine.start()?);
    }

    for run in &runs {
        let target = run
            .retry_target
            .as_ref()
            .map(|target| format!(" target {target}"))
            .unwrap_or_default();
        println!(
            "- {:?}{}: {} attempted, {} succeeded, {} failed{}",
            run.phase,
            target,
            run.attempted,
            run.succeeded,
            run.failed,
            if run.aborted { " (aborted)" } else { "" }
        );
    }

    let errors = engine.error_list()?;
    let state = engine.process_state()?;
    println!(
        "{} {}: {} of {} done, {} path(s) pending, {} error(s).",
        op_name,
        if engine.state() == EngineState::Faulted {
            "stopped"
        } else {
            "finished"
        },
        human_bytes(engine.progress()?.completed_size()),
        human_bytes(state.initial_total_size),
        engine.queue()?.len(),
        errors.len()
    );
    for entry in errors.iter().take(20) {
        println!(
            "  {} [{}]",
            entry.item().path().display(),
            entry.classification()
        );
    }
    if errors.len() > 20 {
        println!("  ... {} more", errors.len() - 20);
    }

    if let Some(output) = report {
        let batch_report = build_report(&engine, Some(op_name), &runs)?;
        write_report(&batch_report, &output)?;
        println!("Report written to {}", output.display());
    }

    if engine.state() == EngineState::Faulted {
        bail!("batch stopped: {}", engine.error()?);
    }
    Ok(())
}

fn run_plan_command(args: PlanArgs) -> Result<()> {
    let source = WalkSource::new(args.discover.into_options())?;
    let mut engine = ProcessEngine::new(source, FsHooks::new(FsOperation::List));
    let load = engine.load_paths()?;
    if !load.loaded {
        bail!("path discovery failed: {}", load.error);
    }

    println!(
        "Plan: {} path(s), {} total. Nothing was modified.",
        load.item_count,
        human_bytes(load.total_size)
    );
    if args.show {
        for item in engine.queue()?.iter() {
            let size = item
                .size()
                .map(human_bytes)
                .unwrap_or_else(|| "dir".to_string());
            println!("- {} ({size})", item.path().display());
        }
    }

    engine.dispose();
    Ok(())
}

fn run_report_command(args: ReportArgs) -> Result<()> {
    let report = load_report(&args.input)
        .with_context(|| format!("failed to open report {}", args.input.display()))?;

    println!(
        "Report v{} generated {} ({})",
        report.report_version,
        report.generated_at,
        report.operation.as_deref().unwrap_or("unknown operation")
    );
    println!(
        "Engine {:?}, error {}; {} of {} remaining across {} initial path(s).",
        report.engine_state,
        report.state.error,
        human_bytes(report.state.actual_remaining_size),
        human_bytes(report.state.initial_total_size),
        report.state.initial_item_count
    );
    println!(
        "{} pending, {} error(s), {} run(s).",
        report.pending.len(),
        report.errors.len(),
        report.runs.len()
    );
    for group in &report.error_groups {
        println!(
            "- {}: {} item(s), {}",
            group.classification,
            group.items,
            human_bytes(group.bytes)
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{build_operation, human_bytes, CliOperation};
    use path_batch_core::FsOperation;

    #[test]
    fn copy_and_move_require_destination() {
        assert!(build_operation(CliOperation::Copy, None, false).is_err());
        assert!(build_operation(CliOperation::Move, None, false).is_err());
        assert_eq!(
            build_operation(CliOperation::Copy, Some(PathBuf::from("out")), true)
                .expect("copy op"),
            FsOperation::Copy {
                dest: PathBuf::from("out"),
                verify: true
            }
        );
    }

    #[test]
    fn destination_is_rejected_for_list_and_delete() {
        let dest = Some(PathBuf::from("out"));
        assert!(build_operation(CliOperation::List, dest.clone(), false).is_err());
        assert!(build_operation(CliOperation::Delete, dest, false).is_err());
        assert_eq!(
            build_operation(CliOperation::Move, Some(PathBuf::from("out")), false)
                .expect("move op"),
            FsOperation::Move {
                dest: PathBuf::from("out")
            }
        );
    }

    #[test]
    fn verify_is_rejected_outside_copy() {
        assert!(build_operation(CliOperation::Delete, None, true).is_err());
        assert_eq!(
            build_operation(CliOperation::List, None, false).expect("list op"),
            FsOperation::List
        );
    }

    #[test]
    fn human_bytes_scales_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512.0 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
    }
}
