pub mod batch;
pub mod collections;
pub mod config;
pub mod errors;
pub mod import;
pub mod models;
pub mod postprocess;
pub mod processors;
pub mod schema;
pub mod source;
pub mod store;
pub mod utils;

use std::collections::BTreeSet;
use std::sync::Arc;

use log::info;

use crate::config::SyncConfig;
use crate::errors::Result;
use crate::import::{BatchImportEngine, EngineSettings, ImportReport, PrimaryImporter, StaticImporter};
use crate::models::DnaTagId;
use crate::postprocess::{
    LinkEnrichment, PassReport, PostProcessContext, PostProcessor, UserInteractions, VectorBackfill,
};
use crate::schema::{GraphSchema, SchemaManager, SchemaReport};
use crate::source::{RelationalSource, SqliteSource};
use crate::store::{ArangoStore, GraphStore};

/// The synchronization pipeline.
///
/// `CineGraph` wires a relational source and a graph store together and
/// exposes each stage separately:
/// - `sync_schema` reconciles collections, the graph, indexes and views.
/// - `import_static`, `import_movies` and `import_shows` decompose source rows
///   into vertices and edges.
/// - `post_process` runs the enrichment passes.
///
/// `run` does all of it in that order.
///
/// # Example
///
/// ```rust,no_run
/// use cinegraph::{CineGraph, config::SyncConfig};
///
/// #[tokio::main]
/// async fn main() -> cinegraph::errors::Result<()> {
///     let config = SyncConfig::from_env()?;
///     let pipeline = CineGraph::connect(config)?;
///     let summary = pipeline.run().await?;
///     println!("{} movies", summary.imports[2].imported);
///     Ok(())
/// }
/// ```
pub struct CineGraph {
    pub config: SyncConfig,
    pub store: Arc<dyn GraphStore>,
    pub source: Arc<dyn RelationalSource>,
    pub engine: Arc<BatchImportEngine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub schema: SchemaReport,
    pub imports: Vec<ImportReport>,
    pub passes: Vec<PassReport>,
}

impl CineGraph {
    pub fn new(config: SyncConfig, store: Arc<dyn GraphStore>, source: Arc<dyn RelationalSource>) -> Self {
        let engine = Arc::new(BatchImportEngine::new(
            Arc::clone(&store),
            EngineSettings::from(&config),
        ));
        Self {
            config,
            store,
            source,
            engine,
        }
    }

    /// Opens the SQLite source read-only and the ArangoDB store over HTTP.
    pub fn connect(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(SqliteSource::open(&config.source_path)?);
        let store = Arc::new(ArangoStore::new(&config)?);
        Ok(Self::new(config, store, source))
    }

    pub async fn sync_schema(&self) -> Result<SchemaReport> {
        SchemaManager::new(Arc::clone(&self.store))
            .sync_all(&GraphSchema::declared(&self.config.graph_name))
            .await
    }

    /// Countries, then languages.
    pub async fn import_static(&self) -> Result<Vec<ImportReport>> {
        let mut reports = Vec::new();
        for importer in [StaticImporter::countries(), StaticImporter::languages()] {
            reports.push(
                importer
                    .run(&self.engine, self.source.as_ref(), self.config.page_size)
                    .await?,
            );
        }
        Ok(reports)
    }

    pub async fn import_movies(&self) -> Result<ImportReport> {
        PrimaryImporter::movies()
            .run(&self.engine, self.source.as_ref(), self.config.page_size)
            .await
    }

    pub async fn import_shows(&self) -> Result<ImportReport> {
        PrimaryImporter::shows()
            .run(&self.engine, self.source.as_ref(), self.config.page_size)
            .await
    }

    /// Runs every enrichment pass. Vector backfill is limited to `dna_tags`
    /// when given, and otherwise looks for tags without a vector.
    pub async fn post_process(&self, dna_tags: Option<BTreeSet<DnaTagId>>) -> Vec<PassReport> {
        let vectors = match dna_tags {
            Some(tags) if !tags.is_empty() => VectorBackfill::for_tags(tags),
            _ => VectorBackfill::discover(),
        };
        let passes: Vec<Box<dyn PostProcessor>> = vec![
            Box::new(vectors),
            Box::new(LinkEnrichment),
            Box::new(UserInteractions),
        ];
        let ctx = PostProcessContext {
            engine: Arc::clone(&self.engine),
            source: Arc::clone(&self.source),
            config: self.config.clone(),
        };
        postprocess::run_all(&ctx, &passes).await
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let schema = self.sync_schema().await?;
        let mut imports = self.import_static().await?;
        imports.push(self.import_movies().await?);
        imports.push(self.import_shows().await?);

        let touched: BTreeSet<DnaTagId> = imports
            .iter()
            .flat_map(|report| report.dna_tags.iter().cloned())
            .collect();
        let passes = self.post_process(Some(touched)).await;

        let failed = passes.iter().filter(|p| !p.succeeded()).count();
        info!(
            "sync finished: {} imports, {} post-process passes ({} failed)",
            imports.len(),
            passes.len(),
            failed
        );
        Ok(RunSummary {
            schema,
            imports,
            passes,
        })
    }
}
