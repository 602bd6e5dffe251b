//! Declared graph schema and its reconciliation against the store.

use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde_json::json;

use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::store::{CollectionKind, EdgeDefinition, GraphStore, IndexSpec, ViewSpec};

pub const SEARCH_VIEW: &str = "media_search";

static DECLARED_INDEXES: Lazy<Vec<(VertexKind, IndexSpec)>> = Lazy::new(|| {
    let mut indexes = vec![
        (
            VertexKind::Movie,
            IndexSpec::persistent("movie_tmdb_id", &["tmdb_id"]).unique().sparse(),
        ),
        (
            VertexKind::Show,
            IndexSpec::persistent("show_tmdb_id", &["tmdb_id"]).unique().sparse(),
        ),
        (
            VertexKind::Person,
            IndexSpec::persistent("person_tmdb_id", &["tmdb_id"]),
        ),
        (
            VertexKind::DnaTag,
            IndexSpec::persistent("dna_tag_identity", &["category", "value"]).unique(),
        ),
        (
            VertexKind::User,
            IndexSpec::persistent("user_id", &["user_id"]).unique(),
        ),
        (
            VertexKind::StreamingAvailability,
            IndexSpec::persistent("streaming_availability_url", &["url"]).sparse(),
        ),
    ];
    for kind in VertexKind::ALL.iter().copied().filter(|k| k.is_satellite()) {
        let name = format!("{}_parent_key", kind.name().to_ascii_lowercase());
        indexes.push((kind, IndexSpec::persistent(&name, &["parent_key"])));
    }
    indexes
});

/// Everything the pipeline expects to exist in the store.
#[derive(Debug, Clone)]
pub struct GraphSchema {
    pub graph_name: String,
    pub vertices: Vec<VertexKind>,
    pub edges: Vec<EdgeDefinition>,
    pub indexes: Vec<(VertexKind, IndexSpec)>,
    pub views: Vec<ViewSpec>,
}

impl GraphSchema {
    pub fn declared(graph_name: &str) -> Self {
        Self {
            graph_name: graph_name.to_string(),
            vertices: VertexKind::ALL.to_vec(),
            edges: EdgeKind::ALL.iter().map(|kind| edge_definition(*kind)).collect(),
            indexes: DECLARED_INDEXES.clone(),
            views: vec![search_view()],
        }
    }
}

pub fn edge_definition(kind: EdgeKind) -> EdgeDefinition {
    let (from, to) = kind.endpoints();
    EdgeDefinition {
        collection: kind.name().to_string(),
        from: from.iter().map(|v| v.name().to_string()).collect(),
        to: to.iter().map(|v| v.name().to_string()).collect(),
    }
}

fn search_view() -> ViewSpec {
    let fields = json!({
        "title": { "analyzers": ["text_en"] },
        "original_title": { "analyzers": ["text_en"] },
        "overview": { "analyzers": ["text_en"] },
    });
    let link = json!({
        "includeAllFields": false,
        "storeValues": "none",
        "fields": fields,
    });
    let links: serde_json::Map<String, serde_json::Value> = [VertexKind::Movie, VertexKind::Show]
        .iter()
        .map(|kind| (kind.name().to_string(), link.clone()))
        .collect();
    ViewSpec {
        name: SEARCH_VIEW.to_string(),
        kind: "arangosearch".to_string(),
        properties: json!({ "links": links }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Created,
    Unchanged,
    Replaced,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SchemaReport {
    pub created: usize,
    pub unchanged: usize,
    pub replaced: usize,
    pub warnings: Vec<String>,
}

impl SchemaReport {
    fn count(&mut self, outcome: Reconciled) {
        match outcome {
            Reconciled::Created => self.created += 1,
            Reconciled::Unchanged => self.unchanged += 1,
            Reconciled::Replaced => self.replaced += 1,
        }
    }
}

pub struct SchemaManager {
    store: Arc<dyn GraphStore>,
}

impl SchemaManager {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn ensure_collection(&self, name: &str, kind: CollectionKind) -> Result<Reconciled> {
        match self.store.collection(name).await? {
            Some(existing) => {
                if existing.kind != kind {
                    warn!(
                        "collection '{}' exists as {:?}, expected {:?}",
                        name, existing.kind, kind
                    );
                }
                Ok(Reconciled::Unchanged)
            }
            None => {
                self.store.create_collection(name, kind).await?;
                debug!("created collection '{}'", name);
                Ok(Reconciled::Created)
            }
        }
    }

    /// Creates the graph, or brings the live edge definitions in line with
    /// `definitions`. Endpoint lists are compared as sets.
    pub async fn ensure_graph(&self, name: &str, definitions: &[EdgeDefinition]) -> Result<Vec<Reconciled>> {
        let Some(live) = self.store.graph(name).await? else {
            self.store.create_graph(name, definitions).await?;
            info!("created graph '{}' with {} edge definitions", name, definitions.len());
            return Ok(vec![Reconciled::Created; definitions.len()]);
        };

        let mut outcomes = Vec::with_capacity(definitions.len());
        for declared in definitions {
            let current = live
                .edge_definitions
                .iter()
                .find(|d| d.collection == declared.collection);
            let outcome = match current {
                Some(current) if current.same_endpoints(declared) => Reconciled::Unchanged,
                Some(_) => {
                    self.store.replace_edge_definition(name, declared).await?;
                    info!("replaced edge definition '{}'", declared.collection);
                    Reconciled::Replaced
                }
                None => {
                    self.store.add_edge_definition(name, declared).await?;
                    info!("added edge definition '{}'", declared.collection);
                    Reconciled::Created
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Creates `spec` unless an equivalent index exists. An index holding the
    /// same name with a different definition is left alone and reported.
    pub async fn ensure_index(&self, collection: &str, spec: &IndexSpec) -> Result<(Reconciled, Option<String>)> {
        let existing = self.store.indexes(collection).await?;
        if existing.iter().any(|i| i.spec.equivalent(spec)) {
            return Ok((Reconciled::Unchanged, None));
        }
        if let Some(clash) = existing.iter().find(|i| i.spec.name == spec.name) {
            let warning = format!(
                "index '{}' on '{}' differs from the declared definition (fields {:?}, unique {}, sparse {}); left as is",
                spec.name, collection, clash.spec.fields, clash.spec.unique, clash.spec.sparse
            );
            warn!("{}", warning);
            return Ok((Reconciled::Unchanged, Some(warning)));
        }
        self.store.create_index(collection, spec).await?;
        debug!("created index '{}' on '{}'", spec.name, collection);
        Ok((Reconciled::Created, None))
    }

    pub async fn ensure_view(&self, spec: &ViewSpec) -> Result<Reconciled> {
        if self.store.view(&spec.name).await?.is_some() {
            self.store.replace_view_properties(spec).await?;
            return Ok(Reconciled::Replaced);
        }
        self.store.create_view(spec).await?;
        Ok(Reconciled::Created)
    }

    pub async fn sync_all(&self, schema: &GraphSchema) -> Result<SchemaReport> {
        let mut report = SchemaReport::default();

        for kind in &schema.vertices {
            report.count(self.ensure_collection(kind.name(), CollectionKind::Document).await?);
        }
        for definition in &schema.edges {
            report.count(self.ensure_collection(&definition.collection, CollectionKind::Edge).await?);
        }
        for outcome in self.ensure_graph(&schema.graph_name, &schema.edges).await? {
            report.count(outcome);
        }
        for (kind, spec) in &schema.indexes {
            let (outcome, warning) = self.ensure_index(kind.name(), spec).await?;
            report.count(outcome);
            report.warnings.extend(warning);
        }
        for view in &schema.views {
            report.count(self.ensure_view(view).await?);
        }

        info!(
            "schema '{}': {} created, {} replaced, {} unchanged",
            schema.graph_name, report.created, report.replaced, report.unchanged
        );
        Ok(report)
    }
}
