//! `cargo-relay` - command-line front end for the replication engine.
//!
//! Owns every external collaborator the engine itself stays agnostic to:
//! argument parsing, the TOML configuration surface, the `tracing`
//! subscriber sink, and process exit codes.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    Catalog, DestImporter, FileFilter, Job, JobEditOptions, JobOptions, JobRunner, Progress,
    ProgressCallback,
};
use tracing::Span;

#[derive(Parser, Debug)]
#[command(name = "cargo-relay", version, about = "Resumable, integrity-checked file replication")]
struct Cli {
    /// Path to the catalog database (created if absent).
    #[arg(long, global = true, value_name = "PATH", default_value = "cargo-relay.sqlite3")]
    catalog: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new job. Idempotent: re-running with the same name is a no-op.
    Init(InitArgs),
    /// Edit mutable attributes of an existing job (or all jobs).
    Edit(EditArgs),
    /// Run a job to completion (or as far as free space allows).
    Run(RunArgs),
    /// Reconcile a pre-existing destination tree with the catalog, without copying.
    Import(ImportArgs),
    /// Delete archived versions older than the job's configured prune age.
    Prune(PruneArgs),
    /// Print catalog state for a job.
    List(ListArgs),
    /// Initialize and run every job named in a TOML batch file.
    Batch(BatchArgs),
}

#[derive(clap::Args, Debug)]
struct InitArgs {
    job_name: String,
    src_dir: String,
    dst_dir: String,
    #[arg(long, default_value = "cargo")]
    mid_dir: String,
    #[arg(long, default_value_t = 0.0)]
    reserved_gib: f64,
    #[arg(long)]
    sync_deletions: bool,
    #[arg(long, default_value_t = 30.0)]
    prune_age_days: f64,
    #[arg(long)]
    hostname: Option<String>,
}

#[derive(clap::Args, Debug)]
struct EditArgs {
    /// Job to edit, or "--all" to edit every job.
    job_name: Option<String>,
    #[arg(long)]
    all: bool,
    #[arg(long)]
    mid_dir: Option<String>,
    #[arg(long)]
    reserved_gib: Option<f64>,
    #[arg(long)]
    sync_deletions: Option<bool>,
    #[arg(long)]
    prune_age_days: Option<f64>,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    job_name: String,
    /// Force destination-directory creation even if this host is not the
    /// job's recorded source host.
    #[arg(long)]
    same_system: bool,
}

#[derive(clap::Args, Debug)]
struct ImportArgs {
    job_name: String,
}

#[derive(clap::Args, Debug)]
struct PruneArgs {
    job_name: String,
    /// Unlink destination files immediately for rows marked for removal,
    /// instead of archiving them, and drop their catalog rows.
    #[arg(long)]
    delete_now: bool,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    job_name: String,
    #[arg(long, value_enum, default_value = "all")]
    filter: ListFilter,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ListFilter {
    All,
    Pending,
    Staged,
    Done,
}

impl From<ListFilter> for FileFilter {
    fn from(f: ListFilter) -> Self {
        match f {
            ListFilter::All => FileFilter::All,
            ListFilter::Pending => FileFilter::NotYetAtDestination,
            ListFilter::Staged => FileFilter::AtStaging,
            ListFilter::Done => FileFilter::AtDestination,
        }
    }
}

#[derive(clap::Args, Debug)]
struct BatchArgs {
    config_path: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Out-of-space is the one engine error the spec gives a distinct, non-zero
/// exit status to; everything else is a generic failure.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<engine::Error>().is_some_and(|e| matches!(e, engine::Error::OutOfSpace { .. })) {
        3
    } else {
        1
    }
}

fn run(cli: &Cli) -> Result<()> {
    let span = tracing::info_span!("cargo-relay");
    let catalog = Catalog::open(&cli.catalog, span.clone())
        .with_context(|| format!("opening catalog at {}", cli.catalog.display()))?;

    match &cli.command {
        Command::Init(args) => cmd_init(&catalog, args),
        Command::Edit(args) => cmd_edit(&catalog, args),
        Command::Run(args) => cmd_run(&catalog, args, span),
        Command::Import(args) => cmd_import(&catalog, args, span),
        Command::Prune(args) => cmd_prune(&catalog, args, span),
        Command::List(args) => cmd_list(&catalog, args),
        Command::Batch(args) => cmd_batch(&catalog, args, span),
    }
}

fn cmd_init(catalog: &Catalog, args: &InitArgs) -> Result<()> {
    let opts = JobOptions {
        job_name: args.job_name.clone(),
        src_dir: args.src_dir.clone(),
        dst_dir: args.dst_dir.clone(),
        mid_dir: args.mid_dir.clone(),
        reserved_gib: args.reserved_gib,
        sync_deletions: args.sync_deletions,
        prune_age_days: args.prune_age_days,
        hostname: args.hostname.clone(),
    };
    let job = opts.into_job(local_hostname)?;
    catalog.upsert_job(&job)?;
    println!("job '{}' ready (src={}, dst={})", job.name, job.src_dir, job.dst_dir);
    Ok(())
}

fn cmd_edit(catalog: &Catalog, args: &EditArgs) -> Result<()> {
    let edit: engine::JobEdit = JobEditOptions {
        mid_dir: args.mid_dir.clone(),
        reserved_gib: args.reserved_gib,
        sync_deletions: args.sync_deletions,
        prune_age_days: args.prune_age_days,
    }
    .into();

    if args.all {
        catalog.edit_all_jobs(&edit)?;
        println!("updated all jobs");
        return Ok(());
    }
    let name = args
        .job_name
        .as_deref()
        .context("either a job name or --all is required")?;
    catalog.edit_job(name, &edit)?;
    println!("updated job '{name}'");
    Ok(())
}

fn cmd_run(catalog: &Catalog, args: &RunArgs, span: Span) -> Result<()> {
    let progress = CliProgress::new();
    let runner = JobRunner::new(catalog, span);
    runner.start_job(&args.job_name, args.same_system, &progress)?;
    Ok(())
}

fn cmd_import(catalog: &Catalog, args: &ImportArgs, span: Span) -> Result<()> {
    let job = catalog.get_job(&args.job_name)?;
    let importer = DestImporter::new(catalog, span);
    let imported = importer.import_destination(&job)?;
    println!("imported {imported} file(s) already present at destination");
    Ok(())
}

fn cmd_prune(catalog: &Catalog, args: &PruneArgs, span: Span) -> Result<()> {
    let job = catalog.get_job(&args.job_name)?;
    for record in catalog.list_files(&job.name, FileFilter::All)? {
        let agent = engine::FileAgent::new(catalog, job.clone(), record.rel_path.clone(), span.clone())?;
        if record.progress == Progress::MarkedForRemoval {
            agent.sync_deletions(args.delete_now)?;
        }
        agent.prune_versions(job.prune_age_days)?;
    }
    println!("pruned job '{}'", job.name);
    Ok(())
}

fn cmd_list(catalog: &Catalog, args: &ListArgs) -> Result<()> {
    let records = catalog.list_files(&args.job_name, args.filter.into())?;
    for record in &records {
        println!(
            "{:<10} {:>10} {}  {}",
            record.progress, record.size, &record.checksum[..16], record.rel_path
        );
    }
    println!("{} file(s)", records.len());
    Ok(())
}

fn cmd_batch(catalog: &Catalog, args: &BatchArgs, span: Span) -> Result<()> {
    let text = std::fs::read_to_string(&args.config_path)
        .with_context(|| format!("reading {}", args.config_path.display()))?;
    let batch: engine::BatchConfig = toml::from_str(&text)
        .with_context(|| format!("parsing {}", args.config_path.display()))?;
    if batch.jobs.is_empty() {
        bail!("batch file {} has no [[job]] entries", args.config_path.display());
    }

    let progress = CliProgress::new();
    for opts in batch.jobs {
        let name = opts.job_name.clone();
        let job = opts.into_job(local_hostname)?;
        catalog.upsert_job(&job)?;
        let runner = JobRunner::new(catalog, span.clone());
        if let Err(err) = runner.start_job(&name, false, &progress) {
            eprintln!("job '{name}' failed: {err}");
        }
    }
    Ok(())
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Human-readable progress reporting to stderr.
struct CliProgress {
    start_time: Instant,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;
        if hours > 0 {
            format!("{hours}h {mins}m {secs}s")
        } else if mins > 0 {
            format!("{mins}m {secs}s")
        } else {
            format!("{secs}s")
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_job_started(&self, job: &Job) {
        eprintln!("job '{}': src={} dst={}", job.name, job.src_dir, job.dst_dir);
    }

    fn on_file_hop_started(&self, _job: &Job, file: &engine::FileRecord) {
        eprintln!("  {} -> advancing ({})", file.rel_path, file.progress);
    }

    fn on_file_hop_completed(&self, _job: &Job, rel_path: &str, progress: Progress) {
        eprintln!("  {rel_path} -> {progress}");
    }

    fn on_job_completed(&self, job: &Job) {
        eprintln!(
            "job '{}' finished in {}",
            job.name,
            Self::format_duration(self.start_time.elapsed())
        );
    }
}
