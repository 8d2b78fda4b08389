//! dbt model generator entry point.
//!
//! Reads a mapping document, resolves both schemas and writes a dbt project.
//! Logs and per-table issue detail go to stderr; stdout carries only
//! `--dry-run` model text, `--output-json` reports and `list-tables` output.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dbt_model_generator::constants::{EXIT_FATAL, MAX_CONCURRENCY};
use dbt_model_generator::mapping::MappingSet;
use dbt_model_generator::report;
use dbt_model_generator::schema::{
    DatabricksSchemaProvider, MssqlSchemaProvider, SchemaProvider, SharedProvider,
    SnapshotSchemaProvider,
};
use dbt_model_generator::{
    parse_mapping_file, DatabricksConfig, GeneratorConfig, GeneratorError, Pipeline, ProjectConfig,
    ProjectEmitter, RunReport, SqlServerConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dbt-model-generator")]
#[command(about = "Generate dbt models that load SQL Server tables into Databricks")]
#[command(version)]
struct Cli {
    /// Log format: text or json
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Log verbosity for this crate: trace, debug, info, warn, error
    #[arg(long, global = true)]
    verbosity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Source,
    Destination,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the mapping and write the dbt project
    Generate {
        /// Mapping document (YAML or JSON)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Output directory for the dbt project
        #[arg(short, long, required_unless_present = "dry_run")]
        output: Option<PathBuf>,

        /// Serve the source schema from a JSON snapshot instead of SQL Server
        #[arg(long)]
        source_snapshot: Option<PathBuf>,

        /// Serve the destination schema from a JSON snapshot instead of Databricks
        #[arg(long)]
        destination_snapshot: Option<PathBuf>,

        /// Override the number of concurrent schema lookups
        #[arg(long)]
        concurrency: Option<usize>,

        /// Parse generated models and withhold those that fail
        #[arg(long)]
        check_syntax: bool,

        /// Print models to stdout instead of writing them
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Validate the mapping against both schemas without writing anything
    Validate {
        /// Mapping document (YAML or JSON)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Serve the source schema from a JSON snapshot instead of SQL Server
        #[arg(long)]
        source_snapshot: Option<PathBuf>,

        /// Serve the destination schema from a JSON snapshot instead of Databricks
        #[arg(long)]
        destination_snapshot: Option<PathBuf>,

        /// Print the run report as JSON to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// List the tables a provider can see
    ListTables {
        /// Which provider to query
        #[arg(long, value_enum)]
        side: Side,

        /// Only list tables in this schema
        #[arg(long)]
        filter: Option<String>,

        /// Serve the schema from a JSON snapshot instead of a live connection
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbosity.as_deref());

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(hint) = e.downcast_ref::<GeneratorError>().and_then(|g| g.suggestion()) {
                eprintln!("Hint: {hint}");
            }
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(command: Commands) -> Result<u8> {
    match command {
        Commands::Generate {
            mapping,
            output,
            source_snapshot,
            destination_snapshot,
            concurrency,
            check_syntax,
            dry_run,
            output_json,
        } => {
            let mappings = load_mapping(&mapping)?;

            let mut config = GeneratorConfig::from_env();
            if let Some(n) = concurrency {
                config.concurrency = n.clamp(1, MAX_CONCURRENCY);
            }
            config.check_syntax |= check_syntax;

            let report = run_pipeline(
                &mappings,
                &config,
                source_snapshot.as_deref(),
                destination_snapshot.as_deref(),
            )
            .await?;

            let project = mappings.project.apply(ProjectConfig::from_env());
            let emitter = ProjectEmitter::new(
                output.clone().unwrap_or_default(),
                project,
                mappings.source_location.clone(),
            );

            if dry_run {
                for (path, content) in emitter.render(&report.models)? {
                    println!("-- {}\n{}", path.display(), content);
                }
            } else if let Some(output) = output {
                let summary = emitter.emit(&report.models)?;
                info!(
                    "Wrote {} of {} file(s) under {}",
                    summary.written.len(),
                    summary.total(),
                    output.display()
                );
            }

            finish(&report, output_json)
        }

        Commands::Validate {
            mapping,
            source_snapshot,
            destination_snapshot,
            output_json,
        } => {
            let mappings = load_mapping(&mapping)?;
            let mut config = GeneratorConfig::from_env();
            // Syntax problems are part of what validation reports.
            config.check_syntax = true;

            let report = run_pipeline(
                &mappings,
                &config,
                source_snapshot.as_deref(),
                destination_snapshot.as_deref(),
            )
            .await?;
            finish(&report, output_json)
        }

        Commands::ListTables {
            side,
            filter,
            snapshot,
        } => {
            let provider = match side {
                Side::Source => source_provider(snapshot.as_deref())?,
                Side::Destination => destination_provider(snapshot.as_deref())?,
            };
            let tables = provider
                .list_tables(filter.as_deref())
                .await
                .map_err(GeneratorError::from)?;
            for table in tables {
                println!("{table}");
            }
            Ok(dbt_model_generator::constants::EXIT_SUCCESS)
        }
    }
}

fn load_mapping(path: &Path) -> Result<MappingSet> {
    let mappings = parse_mapping_file(path)?;
    info!(
        "Loaded {} table mapping(s) from {}",
        mappings.tables.len(),
        path.display()
    );
    Ok(mappings)
}

async fn run_pipeline(
    mappings: &MappingSet,
    config: &GeneratorConfig,
    source_snapshot: Option<&Path>,
    destination_snapshot: Option<&Path>,
) -> Result<RunReport> {
    let source = source_provider(source_snapshot)?;
    let destination = destination_provider(destination_snapshot)?;
    let pipeline = Pipeline::from_config(source, destination, config);
    Ok(pipeline.run(mappings).await)
}

fn source_provider(snapshot: Option<&Path>) -> Result<SharedProvider> {
    Ok(match snapshot {
        Some(path) => Arc::new(SnapshotSchemaProvider::from_file(path)?),
        None => {
            let config = SqlServerConfig::from_env().context("SQL Server source is not configured")?;
            Arc::new(MssqlSchemaProvider::new(config))
        }
    })
}

fn destination_provider(snapshot: Option<&Path>) -> Result<SharedProvider> {
    Ok(match snapshot {
        Some(path) => Arc::new(SnapshotSchemaProvider::from_file(path)?),
        None => {
            let config =
                DatabricksConfig::from_env().context("Databricks destination is not configured")?;
            Arc::new(DatabricksSchemaProvider::new(config)?)
        }
    })
}

/// Print the report and pick the exit code.
fn finish(report: &RunReport, output_json: bool) -> Result<u8> {
    eprint!("{}", report::render_text(report));
    if output_json {
        println!("{}", report::render_json(report)?);
    }
    Ok(report.exit_code())
}

/// Initialize tracing subscriber with stderr output.
///
/// `RUST_LOG` wins over `--verbosity`.
fn init_logging(format: LogFormat, verbosity: Option<&str>) {
    let default_directive = match verbosity {
        Some(level) => format!("warn,dbt_model_generator={}", level.to_lowercase()),
        None => "warn,dbt_model_generator=info".to_string(),
    };
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}
