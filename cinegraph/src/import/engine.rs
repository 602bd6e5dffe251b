use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde_json::Value;

use super::diagnose;
use crate::batch::Batch;
use crate::collections::{EdgeKind, VertexKind};
use crate::config::SyncConfig;
use crate::errors::{EdgeOffender, KeyOffender, Result, StoreError, StructuralError, SyncError};
use crate::models::DnaTagId;
use crate::processors::RowProcessor;
use crate::source::{PagedQuery, RelationalSource};
use crate::store::{Document, GraphStore, ItemResult, WriteMode, codes};
use crate::utils::batch::{chunked, dedup_by_key};
use crate::utils::key::{sanitize_document_key, sanitize_for_edge};

const RESERVED_FIELDS: &[&str] = &["_key", "_from", "_to"];

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub batch_size: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl From<&SyncConfig> for EngineSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.store_batch_size.max(1),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpsertStats {
    pub submitted: usize,
    pub created: usize,
    pub replaced: usize,
    /// Update-mode patches whose target document does not exist.
    pub missing: usize,
    /// Bulk requests sent, retries included.
    pub attempts: u32,
    pub deduplicated: usize,
}

impl UpsertStats {
    pub fn written(&self) -> usize {
        self.created + self.replaced
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportReport {
    pub label: String,
    pub rows_read: usize,
    pub rows_skipped: usize,
    /// Primary documents written.
    pub imported: usize,
    pub written: BTreeMap<String, usize>,
    /// Self-edges dropped because their target is not in the store yet.
    pub edges_deferred: usize,
    /// Stored primaries replaced because their row now has another title.
    pub renamed: usize,
    pub dna_tags: BTreeSet<DnaTagId>,
}

impl ImportReport {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, collection: &str, stats: &UpsertStats) {
        *self.written.entry(collection.to_string()).or_default() += stats.written();
    }

    pub fn written_to(&self, collection: &str) -> usize {
        self.written.get(collection).copied().unwrap_or(0)
    }
}

/// Batched, idempotent writes into the graph store.
///
/// Every write goes through the same pipeline: normalize datetimes, stamp
/// `updated_at`, sanitize and validate keys, dedup by sanitized key, then
/// submit in chunks. Transient failures are retried with a fixed delay; only the items
/// that failed are resubmitted. Structural failures are diagnosed and never
/// retried.
pub struct BatchImportEngine {
    store: Arc<dyn GraphStore>,
    settings: EngineSettings,
}

impl BatchImportEngine {
    pub fn new(store: Arc<dyn GraphStore>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Streams `query` page by page through `processor` and flushes each
    /// page: primaries, satellite vertices, edges, then self-edges between
    /// primaries.
    pub async fn execute_import(
        &self,
        source: &dyn RelationalSource,
        query: &PagedQuery,
        processor: &dyn RowProcessor,
        label: &str,
    ) -> Result<ImportReport> {
        let mut report = ImportReport::new(label);
        let mut pages = query.pages(source);
        while let Some(rows) = pages.next_page().await? {
            let mut primaries = Vec::with_capacity(rows.len());
            let mut batch = Batch::new();
            for row in &rows {
                report.rows_read += 1;
                match processor.process_row(row) {
                    Ok(processed) => {
                        primaries.push(processed.primary);
                        batch.merge(processed.batch);
                    }
                    Err(err) => {
                        report.rows_skipped += 1;
                        warn!("[{}] skipping row: {}", label, err);
                    }
                }
            }
            self.flush(processor.collection(), primaries, batch, &mut report)
                .await?;
            debug!("[{}] page done, {} rows so far", label, report.rows_read);
        }
        info!(
            "[{}] imported {} of {} rows ({} skipped, {} renamed, {} self-edges deferred)",
            label, report.imported, report.rows_read, report.rows_skipped, report.renamed, report.edges_deferred
        );
        Ok(report)
    }

    async fn flush(
        &self,
        primary: VertexKind,
        primaries: Vec<Document>,
        batch: Batch,
        report: &mut ImportReport,
    ) -> Result<()> {
        let parts = batch.into_parts();
        report.dna_tags.extend(parts.dna_tags);

        let mut repointed: BTreeMap<EdgeKind, Vec<Document>> = BTreeMap::new();
        if !primaries.is_empty() {
            let retired = self.retire_renamed(primary, &primaries).await?;
            report.renamed += retired.renamed;
            repointed = retired.repointed;
            let stats = self.upsert_many(primary.name(), primaries).await?;
            report.imported += stats.written();
            report.record(primary.name(), &stats);
        }

        for (kind, docs) in parts.vertices {
            if docs.is_empty() {
                continue;
            }
            let stats = self.upsert_many(kind.name(), docs).await?;
            report.record(kind.name(), &stats);
        }

        let mut self_edges = Vec::new();
        for (kind, docs) in parts.edges {
            if docs.is_empty() {
                continue;
            }
            if kind.is_self_edge() {
                self_edges.push((kind, docs));
                continue;
            }
            let stats = self.upsert_many(kind.name(), docs).await?;
            report.record(kind.name(), &stats);
        }

        // Edges moved off renamed vertices already point at stored targets.
        for (kind, docs) in repointed {
            let stats = self.upsert_many(kind.name(), docs).await?;
            report.record(kind.name(), &stats);
        }

        for (kind, docs) in self_edges {
            let total = docs.len();
            let ready = self.with_existing_targets(docs).await?;
            report.edges_deferred += total - ready.len();
            if ready.is_empty() {
                continue;
            }
            let stats = self.upsert_many(kind.name(), ready).await?;
            report.record(kind.name(), &stats);
        }
        Ok(())
    }

    async fn with_existing_targets(&self, edges: Vec<Document>) -> Result<Vec<Document>> {
        let mut wanted: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for edge in &edges {
            if let Some((collection, key)) = edge.get("_to").and_then(Value::as_str).and_then(|id| id.split_once('/')) {
                wanted.entry(collection.to_string()).or_default().push(key.to_string());
            }
        }
        let mut present: HashSet<String> = HashSet::new();
        for (collection, mut keys) in wanted {
            keys.sort();
            keys.dedup();
            for key in self.store.existing_keys(&collection, &keys).await? {
                present.insert(format!("{collection}/{key}"));
            }
        }
        Ok(edges
            .into_iter()
            .filter(|edge| {
                edge.get("_to")
                    .and_then(Value::as_str)
                    .is_some_and(|id| present.contains(id))
            })
            .collect())
    }

    /// Creates or wholesale-replaces `documents` in `collection`.
    pub async fn upsert_many(&self, collection: &str, documents: Vec<Document>) -> Result<UpsertStats> {
        self.write(collection, documents, WriteMode::Replace).await
    }

    /// Merges `patches` into existing documents. Patches for documents that
    /// do not exist are counted in [`UpsertStats::missing`].
    pub async fn update_many(&self, collection: &str, patches: Vec<Document>) -> Result<UpsertStats> {
        self.write(collection, patches, WriteMode::Update).await
    }

    /// Removes `keys` from `collection`, retrying transient failures.
    /// Keys that are not stored are ignored.
    pub async fn delete_many(&self, collection: &str, keys: Vec<String>) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.store.delete_documents(collection, &keys).await {
                Ok(removed) => return Ok(removed),
                Err(err) if err.is_transient() => self.back_off(collection, attempt, err).await?,
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn write(&self, collection: &str, mut documents: Vec<Document>, mode: WriteMode) -> Result<UpsertStats> {
        let mut stats = UpsertStats::default();
        if documents.is_empty() {
            return Ok(stats);
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let is_edge = EdgeKind::from_name(collection).is_some();
        let mut bad_keys: Vec<KeyOffender> = Vec::new();
        let mut bad_edges: Vec<EdgeOffender> = Vec::new();

        for doc in documents.iter_mut() {
            let original = prepare_document(doc, &now);
            let sanitized = doc.get("_key").and_then(Value::as_str);
            if let Some(offender) = diagnose::key_offender(original.as_deref(), sanitized) {
                bad_keys.push(offender);
            }
            if is_edge && (mode == WriteMode::Replace || doc.contains_key("_from") || doc.contains_key("_to")) {
                bad_edges.extend(diagnose::edge_offenders(doc));
            }
        }
        if !bad_keys.is_empty() {
            return Err(StructuralError::IllegalKey {
                collection: collection.to_string(),
                offenders: bad_keys,
            }
            .into());
        }
        if !bad_edges.is_empty() {
            return Err(StructuralError::MalformedEdge {
                collection: collection.to_string(),
                offenders: bad_edges,
            }
            .into());
        }

        // Keys only collide once sanitized.
        stats.deduplicated = dedup_by_key(&mut documents);
        stats.submitted = documents.len();
        for chunk in chunked(&documents, self.settings.batch_size) {
            self.submit(collection, chunk, mode, &mut stats).await?;
        }
        debug!(
            "{} '{}': {} created, {} replaced, {} missing, {} attempts",
            if mode == WriteMode::Replace { "upsert" } else { "update" },
            collection,
            stats.created,
            stats.replaced,
            stats.missing,
            stats.attempts
        );
        Ok(stats)
    }

    async fn submit(
        &self,
        collection: &str,
        chunk: &[Document],
        mode: WriteMode,
        stats: &mut UpsertStats,
    ) -> Result<()> {
        let mut pending: Vec<Document> = chunk.to_vec();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            stats.attempts += 1;

            let results = match self.store.write_documents(collection, &pending, mode).await {
                Ok(results) => results,
                Err(err) if err.is_transient() => {
                    self.back_off(collection, attempt, err).await?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let mut retry: Vec<Document> = Vec::new();
            let mut last_transient: Option<StoreError> = None;
            let mut unique_violated = false;
            let mut bad_keys: Vec<KeyOffender> = Vec::new();
            let mut bad_edges: Vec<EdgeOffender> = Vec::new();

            for (position, result) in results.into_iter().enumerate() {
                let (index, key, code, message) = match result {
                    ItemResult::Written { replaced: true, .. } => {
                        stats.replaced += 1;
                        continue;
                    }
                    ItemResult::Written { .. } => {
                        stats.created += 1;
                        continue;
                    }
                    ItemResult::Failed {
                        index,
                        key,
                        code,
                        message,
                    } => (index, key, code, message),
                };
                let doc = pending.get(index).or_else(|| pending.get(position));
                let error = StoreError::api(None, code, message.clone());

                match code {
                    Some(codes::DOCUMENT_NOT_FOUND) if mode == WriteMode::Update => stats.missing += 1,
                    _ if error.is_transient() => {
                        if let Some(doc) = doc {
                            retry.push(doc.clone());
                        }
                        last_transient = Some(error);
                    }
                    Some(codes::UNIQUE_CONSTRAINT_VIOLATED) => unique_violated = true,
                    Some(c) if codes::is_illegal_key(c) => bad_keys.push(KeyOffender {
                        original: key.clone(),
                        sanitized: key.unwrap_or_default(),
                        reason: message,
                    }),
                    Some(codes::INVALID_EDGE_ATTRIBUTE) => match doc {
                        Some(doc) => bad_edges.extend(diagnose::rejected_edge(doc, &message)),
                        None => bad_edges.push(EdgeOffender {
                            key,
                            field: "_from",
                            value: None,
                            reason: message,
                        }),
                    },
                    _ => {
                        return Err(SyncError::Store(StoreError::api(
                            None,
                            code,
                            format!(
                                "{}/{}: {}",
                                collection,
                                key.as_deref().unwrap_or("?"),
                                message
                            ),
                        )));
                    }
                }
            }

            if unique_violated {
                let diagnosis = diagnose::unique_violation(self.store.as_ref(), collection, &pending).await?;
                return Err(diagnosis.into());
            }
            if !bad_keys.is_empty() {
                return Err(StructuralError::IllegalKey {
                    collection: collection.to_string(),
                    offenders: bad_keys,
                }
                .into());
            }
            if !bad_edges.is_empty() {
                return Err(StructuralError::MalformedEdge {
                    collection: collection.to_string(),
                    offenders: bad_edges,
                }
                .into());
            }

            let Some(last) = last_transient else {
                return Ok(());
            };
            self.back_off(collection, attempt, last).await?;
            pending = retry;
        }
    }

    async fn back_off(&self, collection: &str, attempt: u32, error: StoreError) -> Result<()> {
        if attempt >= self.settings.retry_attempts {
            return Err(SyncError::RetriesExhausted {
                collection: collection.to_string(),
                attempts: attempt,
                last: error,
            });
        }
        warn!(
            "transient failure writing '{}' (attempt {}/{}): {}; retrying in {:?}",
            collection, attempt, self.settings.retry_attempts, error, self.settings.retry_delay
        );
        tokio::time::sleep(self.settings.retry_delay).await;
        Ok(())
    }
}

/// Normalizes datetimes, stamps `updated_at` and sanitizes the reserved
/// fields in place. Returns the `_key` as it was before sanitizing.
fn prepare_document(doc: &mut Document, now: &str) -> Option<String> {
    for (field, value) in doc.iter_mut() {
        if !RESERVED_FIELDS.contains(&field.as_str()) {
            normalize_value(value);
        }
    }
    doc.insert("updated_at".to_string(), Value::String(now.to_string()));

    let original = doc.get("_key").and_then(Value::as_str).map(str::to_string);
    if let Some(key) = &original {
        doc.insert("_key".to_string(), Value::String(sanitize_document_key(key)));
    }
    for field in ["_from", "_to"] {
        let sanitized = doc.get(field).and_then(Value::as_str).map(sanitize_for_edge);
        if let Some(sanitized) = sanitized {
            doc.insert(field.to_string(), Value::String(sanitized));
        }
    }
    original
}

/// RFC 3339 datetime strings become canonical UTC
/// (`YYYY-MM-DDTHH:MM:SS.sssZ`), at any depth.
pub fn normalize_value(value: &mut Value) {
    match value {
        Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                *text = parsed
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_value),
        Value::Object(map) => map.values_mut().for_each(normalize_value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionKind, MemoryStore};
    use crate::store::memory::InjectedFailure;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            batch_size: 2,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    async fn engine_with(collections: &[(&str, CollectionKind)]) -> (Arc<MemoryStore>, BatchImportEngine) {
        let store = Arc::new(MemoryStore::new());
        for (name, kind) in collections {
            store.create_collection(name, *kind).await.unwrap();
        }
        let engine = BatchImportEngine::new(store.clone(), settings());
        (store, engine)
    }

    #[test]
    fn datetimes_are_normalized_recursively() {
        let mut value = json!({
            "released": "1999-03-31T01:00:00+02:00",
            "nested": [{"at": "2024-05-01T10:00:00Z"}],
            "plain_date": "1999-03-31",
            "title": "The Matrix",
        });
        normalize_value(&mut value);
        assert_eq!(value["released"], "1999-03-30T23:00:00.000Z");
        assert_eq!(value["nested"][0]["at"], "2024-05-01T10:00:00.000Z");
        assert_eq!(value["plain_date"], "1999-03-31");
        assert_eq!(value["title"], "The Matrix");
    }

    #[test]
    fn reserved_fields_are_sanitized_not_normalized() {
        let mut edge = doc(json!({
            "_key": "a b",
            "_from": "Movies/The Matrix (1999)!",
            "_to": "Genre/action",
        }));
        let original = prepare_document(&mut edge, "2024-01-01T00:00:00.000Z");
        assert_eq!(original.as_deref(), Some("a b"));
        assert_eq!(edge["_key"], "ab");
        assert_eq!(edge["_from"], "Movies/TheMatrix1999");
        assert_eq!(edge["updated_at"], "2024-01-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn chunks_and_counts_replacements() -> anyhow::Result<()> {
        let (store, engine) = engine_with(&[("Genre", CollectionKind::Document)]).await;
        let docs = vec![
            doc(json!({"_key": "action", "name": "Action"})),
            doc(json!({"_key": "drama", "name": "Drama"})),
            doc(json!({"_key": "action", "name": "Action!"})),
            doc(json!({"_key": "sci-fi", "name": "Sci-Fi"})),
        ];
        let first = engine.upsert_many("Genre", docs.clone()).await?;
        assert_eq!(first.submitted, 3);
        assert_eq!(first.deduplicated, 1);
        assert_eq!(first.created, 3);
        assert_eq!(first.attempts, 2);

        let second = engine.upsert_many("Genre", docs).await?;
        assert_eq!(second.replaced, 3);
        assert_eq!(store.documents("Genre")?[0]["name"], "Action!");
        Ok(())
    }

    #[tokio::test]
    async fn keys_are_deduplicated_once_sanitized() -> anyhow::Result<()> {
        let (store, engine) = engine_with(&[("Keyword", CollectionKind::Document)]).await;
        let stats = engine
            .upsert_many(
                "Keyword",
                vec![
                    doc(json!({"_key": "a b", "name": "first"})),
                    doc(json!({"_key": "ab", "name": "second"})),
                ],
            )
            .await?;
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(store.write_log()?[0].documents, 1);
        assert_eq!(store.documents("Keyword")?[0]["name"], "second");
        Ok(())
    }

    #[tokio::test]
    async fn deletes_are_retried_and_ignore_missing_keys() -> anyhow::Result<()> {
        let (store, engine) = engine_with(&[("Genre", CollectionKind::Document)]).await;
        store.seed("Genre", doc(json!({"_key": "action"})))?;
        store.inject(InjectedFailure::Request {
            collection: "Genre".into(),
            error: StoreError::api(Some(503), None, "service unavailable"),
        })?;
        let removed = engine
            .delete_many("Genre", vec!["action".into(), "drama".into()])
            .await?;
        assert_eq!(removed, 1);
        assert_eq!(store.count("Genre").await?, 0);
        assert_eq!(engine.delete_many("Genre", Vec::new()).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn illegal_keys_are_rejected_before_submission() -> anyhow::Result<()> {
        let (store, engine) = engine_with(&[("Genre", CollectionKind::Document)]).await;
        let err = engine
            .upsert_many("Genre", vec![doc(json!({"_key": "???"})), doc(json!({"name": "no key"}))])
            .await
            .unwrap_err();
        let SyncError::Structural(StructuralError::IllegalKey { offenders, .. }) = err else {
            panic!("expected an illegal key error, got {err}");
        };
        assert_eq!(offenders.len(), 2);
        assert_eq!(offenders[0].original.as_deref(), Some("???"));
        assert!(store.write_log()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_edges_are_rejected_before_submission() -> anyhow::Result<()> {
        let (_store, engine) = engine_with(&[("has_genre", CollectionKind::Edge)]).await;
        let err = engine
            .upsert_many("has_genre", vec![doc(json!({"_key": "e1", "_from": "the_matrix_603", "_to": "Genre/action"}))])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Structural(StructuralError::MalformedEdge { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn only_failed_items_are_retried() -> anyhow::Result<()> {
        let (store, engine) = engine_with(&[("Genre", CollectionKind::Document)]).await;
        store.inject(InjectedFailure::Item {
            collection: "Genre".into(),
            key: "drama".into(),
            code: codes::CONFLICT,
            message: "write-write conflict".into(),
        })?;
        let stats = engine
            .upsert_many(
                "Genre",
                vec![doc(json!({"_key": "action"})), doc(json!({"_key": "drama"}))],
            )
            .await?;
        assert_eq!(stats.created, 2);
        assert_eq!(stats.attempts, 2);
        let log = store.write_log()?;
        assert_eq!(log[1].documents, 1);
        Ok(())
    }

    #[tokio::test]
    async fn request_failures_exhaust_retries() -> anyhow::Result<()> {
        let (store, engine) = engine_with(&[("Genre", CollectionKind::Document)]).await;
        for _ in 0..3 {
            store.inject(InjectedFailure::Request {
                collection: "Genre".into(),
                error: StoreError::transport("connection reset"),
            })?;
        }
        let err = engine
            .upsert_many("Genre", vec![doc(json!({"_key": "action"}))])
            .await
            .unwrap_err();
        let SyncError::RetriesExhausted { attempts, last, .. } = err else {
            panic!("expected exhausted retries, got {err}");
        };
        assert_eq!(attempts, 3);
        assert!(last.transport);
        Ok(())
    }

    #[tokio::test]
    async fn updates_count_missing_documents() -> anyhow::Result<()> {
        let (store, engine) = engine_with(&[("DnaTag", CollectionKind::Document)]).await;
        store.seed("DnaTag", doc(json!({"_key": "mood_dark", "category": "mood"})))?;
        let stats = engine
            .update_many(
                "DnaTag",
                vec![
                    doc(json!({"_key": "mood_dark", "vector": [0.1, 0.2]})),
                    doc(json!({"_key": "mood_light", "vector": [0.3]})),
                ],
            )
            .await?;
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.missing, 1);
        let stored = store.document("DnaTag", "mood_dark").await?.unwrap();
        assert_eq!(stored["category"], "mood");
        assert_eq!(stored["vector"], json!([0.1, 0.2]));
        Ok(())
    }
}
