//! CLI entry point: load a CSV and a rule file, clean in parallel, write the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cleanstream::ingestion::{load_metadata_from_path, read_csv_from_path, write_csv_to_path};
use cleanstream::pipeline::{Pipeline, PipelineOptions, TracingObserver};
use cleanstream::worker::DuplicateDetection;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Partitioned, worker-count independent CSV cleaning",
    long_about = "Cleans a CSV file with the rules in a JSON rule file.\n\n\
                  The table is split across workers; the output is identical for any worker count.\n\n\
                  EXAMPLES:\n  \
                  cleanstream dirty_data.csv metadata.json -w 8 --identity id"
)]
struct Args {
    /// CSV file to clean
    #[arg(default_value = "dirty_data.csv")]
    input: PathBuf,

    /// JSON rule file (`cleaning_config` + `dictionaries`)
    #[arg(default_value = "metadata.json")]
    metadata: PathBuf,

    /// Number of workers (defaults to available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Where to write the cleaned CSV
    #[arg(short, long, default_value = "clean_cleanstream.csv")]
    output: PathBuf,

    /// Column excluded from duplicate detection (repeatable)
    #[arg(long = "identity", value_name = "COL")]
    identity: Vec<String>,

    /// Treat equal fingerprints as duplicates without comparing row contents
    #[arg(long)]
    fingerprint_only: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let table = read_csv_from_path(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let metadata = load_metadata_from_path(&args.metadata)
        .with_context(|| format!("failed to load rules from {}", args.metadata.display()))?;
    info!(
        rows = table.row_count(),
        columns = table.schema.len(),
        rules = metadata.rules.len(),
        "inputs loaded"
    );

    let mut opts = PipelineOptions::default();
    if let Some(n) = args.workers {
        opts = opts.with_workers(n);
    }
    opts.identity_columns = args.identity;
    if args.fingerprint_only {
        opts = opts.with_duplicates(DuplicateDetection::Fingerprint);
    }

    let pipeline = Pipeline::new(opts)?.with_observer(Arc::new(TracingObserver));
    let out = pipeline.run(&table, &metadata.rules, &metadata.dictionaries)?;

    write_csv_to_path(&out.table, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!("{}", out.report);
    println!("cleaned data written to {}", args.output.display());
    Ok(())
}
