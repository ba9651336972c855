//! CLI entry point for the equality index tool.
//!
//! Provides subcommands for computing the blended state/city ranking and for
//! inspecting how a single source was normalized and weighted.

use anyhow::{Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use equality_index::config::{
    CatalogPaths, DEFAULT_PRINT_TARGETS, RunOptions, WeightingStrategy,
};
use equality_index::output::{
    RunSummary, log_ranking, lookup, output_path, render_lookup, write_rankings, write_summary,
};
use equality_index::pipeline::run;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "equality_index")]
#[command(about = "Blend third-party equality rankings into one 0-10 score", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand that scores sources.
#[derive(Args)]
struct ScoringArgs {
    /// Directory holding utils/, sources/ and processed_data/
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Weighting strategy
    #[arg(short, long, value_enum, default_value_t = WeightingStrategy::Type)]
    strategy: WeightingStrategy,

    /// Keep raw CompScores instead of rescaling each source to span 0-10
    #[arg(long, default_value_t = false)]
    no_normalize: bool,

    /// Legacy strategy: use P=5 for city rows and P=4 for state rows
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    set_p_by_city: bool,

    /// Subtype strategy: disable repetition discounting
    #[arg(long, default_value_t = false)]
    ignore_subtypes: bool,

    /// Do not rescale W by active sources per group
    #[arg(long, default_value_t = false)]
    no_repetition_scaling: bool,

    /// Debug-level logging and a full ranking dump
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl ScoringArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            normalize_all: !self.no_normalize,
            set_p_by_city: self.set_p_by_city,
            strategy: self.strategy,
            ignore_subtypes: self.ignore_subtypes,
            repetition_scaling: !self.no_repetition_scaling,
            verbose: self.verbose,
            ..RunOptions::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the rankings and write the output table
    Run {
        #[command(flatten)]
        scoring: ScoringArgs,

        /// Directory the output CSV is written to
        #[arg(short, long, default_value = "data/outputs")]
        output_dir: PathBuf,

        /// Output filename prefix
        #[arg(short, long, default_value = "equality_index")]
        prefix: String,

        /// Entity to print after the run (city, "City, ST" or state); repeatable
        #[arg(long = "print", value_name = "NAME", default_values = DEFAULT_PRINT_TARGETS)]
        print: Vec<String>,

        /// Optional: write a JSON run summary to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Log the derived records (CompScore, P, S, W, PSW, M) of one source
    Inspect {
        #[command(flatten)]
        scoring: ScoringArgs,

        /// Source id, as listed in source_ratings.json
        #[arg(value_name = "SOURCE")]
        source: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let cli = Cli::parse();
    let verbose = match &cli.command {
        Commands::Run { scoring, .. } | Commands::Inspect { scoring, .. } => scoring.verbose,
    };
    let _file_guard = init_logging(verbose);

    match cli.command {
        Commands::Run {
            scoring,
            output_dir,
            prefix,
            print,
            summary,
        } => {
            let options = RunOptions {
                print_targets: print,
                filename_prefix: prefix,
                ..scoring.options()
            };
            let paths = CatalogPaths::from_data_dir(&scoring.data_dir);
            let (config, mut report) = run(&paths, options)?;

            let path = output_path(&output_dir, &config.options);
            write_rankings(&report.ranking, &path)?;

            if config.options.verbose {
                log_ranking(&report.ranking);
            }

            if !config.options.print_targets.is_empty() {
                let rows = lookup(
                    &report.ranking,
                    &config.options.print_targets,
                    &config.catalog,
                    &mut report.diagnostics,
                );
                if !rows.is_empty() {
                    info!("Selected entities\n{}", render_lookup(&report.ranking, &rows));
                }
            }

            if let Some(summary_path) = summary {
                write_summary(&RunSummary::new(&config, &report), &summary_path)?;
            }

            if !report.diagnostics.is_empty() {
                warn!(
                    issues = report.diagnostics.len(),
                    "Run completed with recoverable issues"
                );
            }
            info!(path = %path.display(), "Finished");
        }
        Commands::Inspect { scoring, source } => {
            let paths = CatalogPaths::from_data_dir(&scoring.data_dir);
            let (_, report) = run(&paths, scoring.options())?;

            let Some(table) = report.table(&source) else {
                bail!("source '{source}' was not loaded, see warnings above");
            };

            info!(source = %table.id, kind = ?table.kind, rows = table.records.len(), "Source");
            for record in table.records.values() {
                info!(
                    entity = %record.key,
                    raw = ?record.raw,
                    comp_score = ?record.comp_score,
                    p = record.weights.p,
                    s = record.weights.s,
                    w = record.weights.w,
                    psw = record.weights.psw,
                    m = ?record.m,
                    "Record"
                );
            }
        }
    }

    Ok(())
}

/// Colored stderr + JSON rolling log file. The returned guard must stay alive
/// for the file writer to flush.
fn init_logging(verbose: bool) -> WorkerGuard {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/equality_index.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("equality_index.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(stderr_level.into())
                .with_env_var("RUST_LOG")
                .from_env_lossy(),
        );

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .with_env_var("RUST_LOG_JSON")
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    file_guard
}
