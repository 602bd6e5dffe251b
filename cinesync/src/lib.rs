use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cinegraph::{
    config::SyncConfig,
    import::ImportReport,
    models::DnaTagId,
    postprocess::PassReport,
    schema::SchemaReport,
    source::SqliteSource,
    store::MemoryStore,
    CineGraph, RunSummary,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value as JsonValue};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Runs the cinesync command line interface.
pub async fn run_cli() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("No subcommand provided. Use --help to see available commands.");
        return Ok(());
    };

    tokio::select! {
        result = execute(command) => {
            let output = result?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ = signal::ctrl_c() => {
            warn!("Interrupted; writes already acknowledged by the store are kept");
        }
    }
    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Creates or reconciles collections, the graph, indexes and views
    Schema(ConnectionArgs),
    /// Imports reference tables, movies and shows
    Import(ImportArgs),
    /// Runs the enrichment passes over an already imported graph
    PostProcess(PostProcessArgs),
    /// Schema, every import, then the enrichment passes
    Run(ConnectionArgs),
}

#[derive(Args, Clone)]
pub struct ConnectionArgs {
    /// SQLite database to read from
    #[arg(long, env = "CINEGRAPH_SOURCE_PATH")]
    pub source: Option<PathBuf>,
    /// ArangoDB endpoint
    #[arg(long, env = "CINEGRAPH_STORE_URL")]
    pub store_url: Option<String>,
    /// Target database
    #[arg(long, env = "CINEGRAPH_DATABASE")]
    pub database: Option<String>,
    /// Named graph holding the edge definitions
    #[arg(long, env = "CINEGRAPH_GRAPH_NAME")]
    pub graph: Option<String>,
    /// Rows read from the source per page
    #[arg(long)]
    pub page_size: Option<usize>,
    /// Write into an in-process store instead of ArangoDB
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Import a single group of tables instead of all of them
    #[arg(long, value_enum)]
    pub only: Option<ImportTarget>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ImportTarget {
    Static,
    Movies,
    Shows,
}

#[derive(Args, Clone)]
pub struct PostProcessArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Limit vector backfill to these tags, given as `category:value`
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<DnaTagId>,
}

fn parse_tag(raw: &str) -> Result<DnaTagId, String> {
    match raw.split_once(':') {
        Some((category, value)) if !category.trim().is_empty() && !value.trim().is_empty() => {
            Ok(DnaTagId::new(category.trim(), value.trim()))
        }
        _ => Err(format!("expected category:value, got '{raw}'")),
    }
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Environment configuration with the command line flags applied on top.
pub fn resolve_config(args: &ConnectionArgs) -> anyhow::Result<SyncConfig> {
    let mut config = SyncConfig::from_env().context("failed to read configuration")?;
    if let Some(source) = &args.source {
        config.source_path = source.clone();
    }
    if let Some(url) = &args.store_url {
        config.store_url = url.clone();
    }
    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    if let Some(graph) = &args.graph {
        config.graph_name = graph.clone();
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

pub fn build_pipeline(args: &ConnectionArgs) -> anyhow::Result<CineGraph> {
    let config = resolve_config(args)?;
    if args.dry_run {
        let source = SqliteSource::open(&config.source_path).with_context(|| {
            format!("failed to open source {}", config.source_path.display())
        })?;
        info!("Dry run: writing into an in-process store");
        return Ok(CineGraph::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(source),
        ));
    }
    CineGraph::connect(config).context("failed to connect pipeline")
}

async fn execute(command: Command) -> anyhow::Result<JsonValue> {
    match command {
        Command::Schema(args) => {
            let pipeline = build_pipeline(&args)?;
            let report = pipeline.sync_schema().await?;
            Ok(schema_json(&report))
        }
        Command::Import(args) => {
            let pipeline = build_pipeline(&args.connection)?;
            if args.connection.dry_run {
                pipeline.sync_schema().await?;
            }
            let reports = match args.only {
                Some(ImportTarget::Static) => pipeline.import_static().await?,
                Some(ImportTarget::Movies) => vec![pipeline.import_movies().await?],
                Some(ImportTarget::Shows) => vec![pipeline.import_shows().await?],
                None => {
                    let mut reports = pipeline.import_static().await?;
                    reports.push(pipeline.import_movies().await?);
                    reports.push(pipeline.import_shows().await?);
                    reports
                }
            };
            Ok(JsonValue::Array(reports.iter().map(import_json).collect()))
        }
        Command::PostProcess(args) => {
            let pipeline = build_pipeline(&args.connection)?;
            if args.connection.dry_run {
                pipeline.sync_schema().await?;
            }
            let tags: BTreeSet<DnaTagId> = args.tags.into_iter().collect();
            let passes = pipeline.post_process(Some(tags)).await;
            Ok(JsonValue::Array(passes.iter().map(pass_json).collect()))
        }
        Command::Run(args) => {
            let pipeline = build_pipeline(&args)?;
            let summary = pipeline.run().await?;
            Ok(summary_json(&summary))
        }
    }
}

fn schema_json(report: &SchemaReport) -> JsonValue {
    json!({
        "created": report.created,
        "replaced": report.replaced,
        "unchanged": report.unchanged,
        "warnings": report.warnings,
    })
}

fn import_json(report: &ImportReport) -> JsonValue {
    json!({
        "label": report.label,
        "rows_read": report.rows_read,
        "rows_skipped": report.rows_skipped,
        "imported": report.imported,
        "edges_deferred": report.edges_deferred,
        "renamed": report.renamed,
        "written": report.written,
        "dna_tags": report.dna_tags.len(),
    })
}

fn pass_json(report: &PassReport) -> JsonValue {
    match &report.result {
        Ok(stats) => json!({
            "pass": report.name,
            "examined": stats.examined,
            "updated": stats.updated,
            "skipped": stats.skipped,
        }),
        Err(error) => json!({ "pass": report.name, "error": error }),
    }
}

pub fn summary_json(summary: &RunSummary) -> JsonValue {
    json!({
        "schema": schema_json(&summary.schema),
        "imports": summary.imports.iter().map(import_json).collect::<Vec<_>>(),
        "passes": summary.passes.iter().map(pass_json).collect::<Vec<_>>(),
    })
}
