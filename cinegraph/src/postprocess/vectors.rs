use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;

use super::{PassStats, PostProcessContext, PostProcessor};
use crate::collections::VertexKind;
use crate::errors::Result;
use crate::models::DnaTagId;
use crate::source::SqlParam;
use crate::store::{Document, ScanFilter, ScanQuery};
use crate::utils::batch::chunked;

/// Source rows match a tag with surrounding whitespace ignored on both sides.
const MATCH_TAG: &str = "(TRIM(category, char(32, 9, 10, 13)) = ? AND TRIM(value, char(32, 9, 10, 13)) = ?)";

/// Copies embedding vectors from `dna_tag_vectors` onto `DnaTag` vertices.
pub struct VectorBackfill {
    tags: Option<Vec<DnaTagId>>,
}

impl VectorBackfill {
    /// Backfills every tag that has no vector yet.
    pub fn discover() -> Self {
        Self { tags: None }
    }

    /// Backfills exactly `tags` (typically the tags an import touched).
    pub fn for_tags(tags: impl IntoIterator<Item = DnaTagId>) -> Self {
        Self {
            tags: Some(tags.into_iter().collect()),
        }
    }

    async fn targets(&self, ctx: &PostProcessContext) -> Result<Vec<(String, DnaTagId)>> {
        let store = ctx.engine.store();
        let collection = VertexKind::DnaTag.name();

        if let Some(tags) = &self.tags {
            let keyed: Vec<(String, DnaTagId)> = tags.iter().map(|t| (t.key(), t.clone())).collect();
            let keys: Vec<String> = keyed.iter().map(|(k, _)| k.clone()).collect();
            let existing: std::collections::HashSet<String> =
                store.existing_keys(collection, &keys).await?.into_iter().collect();
            return Ok(keyed.into_iter().filter(|(k, _)| existing.contains(k)).collect());
        }

        let mut found = Vec::new();
        let mut after_key = None;
        loop {
            let page = store
                .scan(
                    collection,
                    &ScanQuery {
                        filter: ScanFilter::MissingField("vector".to_string()),
                        after_key: after_key.clone(),
                        limit: ctx.config.vector_batch_size,
                    },
                )
                .await?;
            let Some(last) = page.last().and_then(|d| d.get("_key")).and_then(Value::as_str) else {
                break;
            };
            after_key = Some(last.to_string());
            let full = page.len() == ctx.config.vector_batch_size;
            for doc in &page {
                let field = |name: &str| doc.get(name).and_then(Value::as_str).map(str::to_string);
                if let (Some(key), Some(category), Some(value)) = (field("_key"), field("category"), field("value")) {
                    found.push((key, DnaTagId::new(category, value)));
                }
            }
            if !full {
                break;
            }
        }
        Ok(found)
    }
}

/// Parses `[0.1, 0.2]`, `{0.1,0.2}`, `(0.1 0.2)` or bare `0.1 0.2`.
pub fn parse_vector(raw: &str) -> Option<Vec<f64>> {
    let trimmed = raw.trim();
    let inner = [('[', ']'), ('{', '}'), ('(', ')')]
        .iter()
        .find_map(|(open, close)| trimmed.strip_prefix(*open)?.strip_suffix(*close))
        .unwrap_or(trimmed);
    let values = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f64>>>()?;
    (!values.is_empty()).then_some(values)
}

fn vector_of(value: Option<&Value>) -> Option<Vec<f64>> {
    match value? {
        Value::String(raw) => parse_vector(raw),
        Value::Array(items) => {
            let values = items.iter().map(Value::as_f64).collect::<Option<Vec<f64>>>()?;
            (!values.is_empty()).then_some(values)
        }
        _ => None,
    }
}

#[async_trait]
impl PostProcessor for VectorBackfill {
    fn name(&self) -> &'static str {
        "dna_vectors"
    }

    async fn run(&self, ctx: &PostProcessContext) -> Result<PassStats> {
        let targets = self.targets(ctx).await?;
        let mut stats = PassStats {
            examined: targets.len(),
            ..PassStats::default()
        };
        if targets.is_empty() {
            info!("no DnaTag vertices need vectors");
            return Ok(stats);
        }

        for chunk in chunked(&targets, ctx.config.vector_batch_size) {
            let clause = vec![MATCH_TAG; chunk.len()].join(" OR ");
            let sql = format!("SELECT category, value, vector FROM dna_tag_vectors WHERE {clause}");
            let params: Vec<SqlParam> = chunk
                .iter()
                .flat_map(|(_, tag)| [SqlParam::from(tag.category.trim()), SqlParam::from(tag.value.trim())])
                .collect();

            let mut vectors: HashMap<(String, String), Vec<f64>> = HashMap::new();
            for row in ctx.source.query(&sql, &params).await? {
                let (Some(category), Some(value)) = (row.str("category"), row.str("value")) else {
                    continue;
                };
                match vector_of(row.get("vector")) {
                    Some(vector) => {
                        vectors.insert((category.to_string(), value.to_string()), vector);
                    }
                    None => debug!("unparseable vector for {}/{}", category, value),
                }
            }

            let mut patches = Vec::new();
            for (key, tag) in chunk {
                match vectors.remove(&(tag.category.trim().to_string(), tag.value.trim().to_string())) {
                    Some(vector) => {
                        let mut patch = Document::new();
                        patch.insert("_key".to_string(), Value::String(key.clone()));
                        patch.insert("vector".to_string(), Value::from(vector));
                        patches.push(patch);
                    }
                    None => stats.skipped += 1,
                }
            }
            if patches.is_empty() {
                continue;
            }
            let written = ctx
                .engine
                .update_many(VertexKind::DnaTag.name(), patches)
                .await?;
            stats.updated += written.written();
            stats.skipped += written.missing;
        }
        Ok(stats)
    }
}
