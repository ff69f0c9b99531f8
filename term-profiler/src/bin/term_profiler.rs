//! Term Profiler command line
//!
//! `profile` analyzes a set of files and prints the dataset JSON.
//! `group` groups one file, optionally by columns of related files, and
//! prints the grouping JSON. Exit codes: 12 schema drift under `--drift strict`,
//! 13 when cardinality protection skipped the grouping.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use datafusion::prelude::SessionContext;
use term_profiler::logging::setup::{init_logging, LoggingConfig};
use term_profiler::prelude::*;
use term_profiler::sources;
use tracing::{error, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Profile files, compare schemas and detect relationships
    Profile {
        /// Files or glob patterns
        #[arg(required = true)]
        files: Vec<String>,

        /// Detect relationships between the files
        #[arg(long)]
        relationships: bool,

        /// Relationship hints file (JSON)
        #[arg(long)]
        hints: Option<PathBuf>,

        /// Schema drift policy: strict, warn or ignore
        #[arg(long, default_value = "warn")]
        drift: DriftPolicy,

        /// Compare all files as partitions of a single dataset
        #[arg(long)]
        single_dataset: bool,

        /// Print the relationship graph as Mermaid instead of JSON
        #[arg(long)]
        mermaid: bool,
    },
    /// Group the rows of a file
    Group {
        file: PathBuf,

        /// Grouping columns, comma separated
        #[arg(long, required = true, value_delimiter = ',')]
        by: Vec<String>,

        /// Statistics level: count, basic or full
        #[arg(long, default_value = "count")]
        stats: StatsLevel,

        #[arg(long, default_value_t = term_profiler::grouping::DEFAULT_MAX_GROUPS)]
        max_groups: usize,

        /// Allow `entity.column` grouping columns from related files
        #[arg(long)]
        cross_file: bool,

        /// Related files used for cross-file grouping
        #[arg(long = "with", num_args = 1..)]
        with_files: Vec<String>,

        /// Relationship hints file (JSON)
        #[arg(long)]
        hints: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let logging = if args.verbose {
        LoggingConfig::development()
    } else {
        LoggingConfig::default().with_level(Level::WARN).with_profiler_level(Level::INFO)
    };
    if let Err(e) = init_logging(logging.with_json_format(args.log_json)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let code = match run(args.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };
    process::exit(code.code());
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Profile {
            files,
            relationships,
            hints,
            drift,
            single_dataset,
            mermaid,
        } => {
            let ctx = SessionContext::new();
            let paths = sources::expand_globs(&files)?;
            let profiles = profile_files(&ctx, &DataFusionProfiler::default(), &paths).await?;
            let hints = load_hints(hints.as_deref())?;

            let config = AnalysisConfig::default()
                .with_drift_policy(drift)
                .with_single_dataset(single_dataset)
                .with_relationships(relationships || hints.is_some());
            let analysis = DatasetAnalyzer::new(config).analyze(profiles, hints.as_ref())?;
            for warning in &analysis.warnings {
                eprintln!("Warning: {warning}");
            }
            if mermaid {
                println!("{}", analysis.graph.to_mermaid());
            } else {
                println!("{}", analysis.to_json()?);
            }
            Ok(ExitCode::Success)
        }
        Command::Group {
            file,
            by,
            stats,
            max_groups,
            cross_file,
            with_files,
            hints,
        } => {
            let ctx = SessionContext::new();
            let base = sources::file_id(&file);

            let spec = GroupingSpec::new(by)
                .with_stats_level(stats)
                .with_max_groups(max_groups)
                .with_cross_file(cross_file);
            let engine = GroupingEngine::default();

            let result = if cross_file {
                let mut paths = vec![file.clone()];
                if !with_files.is_empty() {
                    let related = sources::expand_globs(&with_files)?;
                    paths.extend(related.into_iter().filter(|p| sources::file_id(p) != base));
                }
                let profiles = profile_files(&ctx, &DataFusionProfiler::default(), &paths).await?;
                let hints = load_hints(hints.as_deref())?;
                let config = AnalysisConfig::default().with_drift_policy(DriftPolicy::Ignore);
                let analysis = DatasetAnalyzer::new(config).analyze(profiles, hints.as_ref())?;
                engine
                    .group(&ctx, GroupingSource::cross_file(&base, &analysis.graph), &spec)
                    .await?
            } else {
                sources::register_file(&ctx, &file, &base).await?;
                engine.group(&ctx, GroupingSource::file(&base), &spec).await?
            };

            if let Some(warning) = &result.warning {
                eprintln!("Warning: {warning}");
            }
            println!("{}", result.to_json()?);
            Ok(result.exit_code())
        }
    }
}

fn load_hints(path: Option<&Path>) -> Result<Option<HintsDocument>> {
    path.map(HintsDocument::from_path).transpose()
}
