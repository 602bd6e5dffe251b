use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    CollectionInfo, CollectionKind, Document, EdgeDefinition, GraphInfo, GraphStore, IndexInfo,
    IndexSpec, IndexType, ItemResult, ScanFilter, ScanQuery, StoreResult, ViewInfo, ViewSpec,
    WriteMode, codes,
};
use crate::errors::StoreError;
use crate::utils::key::{is_legal_document_key, is_legal_edge_ref};

/// A failure the store reports instead of performing the next matching write.
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    /// The whole bulk write or delete request for `collection` fails.
    Request { collection: String, error: StoreError },
    /// Only the document `key` in `collection` fails.
    Item {
        collection: String,
        key: String,
        code: i64,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub collection: String,
    pub mode: WriteMode,
    pub documents: usize,
}

struct MemoryCollection {
    kind: CollectionKind,
    documents: BTreeMap<String, Document>,
    indexes: Vec<IndexInfo>,
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, MemoryCollection>,
    graphs: BTreeMap<String, GraphInfo>,
    views: BTreeMap<String, ViewInfo>,
    failures: VecDeque<InjectedFailure>,
    writes: Vec<WriteRecord>,
    next_index_id: u64,
}

/// In-process graph store. Validates keys, edge attributes and unique
/// indexes the way the server does, so it can stand in for it in tests and
/// dry runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    enforce_endpoints: bool,
}

fn not_found(what: &str, name: &str) -> StoreError {
    StoreError::api(
        Some(404),
        Some(codes::DATA_SOURCE_NOT_FOUND),
        format!("{what} '{name}' not found"),
    )
}

fn duplicate(what: &str, name: &str) -> StoreError {
    StoreError::api(
        Some(409),
        Some(codes::DUPLICATE_NAME),
        format!("{what} '{name}' already exists"),
    )
}

fn field_values(doc: &Document, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| doc.get(f).cloned().unwrap_or(Value::Null))
        .collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edge writes fail with `DOCUMENT_NOT_FOUND` when `_from` or `_to` does
    /// not exist yet.
    pub fn with_endpoint_checks() -> Self {
        Self {
            enforce_endpoints: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::api(None, None, "memory store lock poisoned"))
    }

    pub fn inject(&self, failure: InjectedFailure) -> StoreResult<()> {
        self.lock()?.failures.push_back(failure);
        Ok(())
    }

    pub fn write_log(&self) -> StoreResult<Vec<WriteRecord>> {
        Ok(self.lock()?.writes.clone())
    }

    pub fn keys(&self, collection: &str) -> StoreResult<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .map(|c| c.documents.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn documents(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Writes a document directly, bypassing validation and failure injection.
    pub fn seed(&self, collection: &str, document: Document) -> StoreResult<()> {
        let mut state = self.lock()?;
        let target = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| not_found("collection", collection))?;
        let key = document
            .get("_key")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::api(Some(400), Some(codes::ILLEGAL_KEY), "missing _key"))?
            .to_string();
        target.documents.insert(key, document);
        Ok(())
    }
}

impl State {
    fn take_request_failure(&mut self, collection: &str) -> Option<StoreError> {
        let pos = self.failures.iter().position(|f| {
            matches!(f, InjectedFailure::Request { collection: c, .. } if c == collection)
        })?;
        match self.failures.remove(pos) {
            Some(InjectedFailure::Request { error, .. }) => Some(error),
            _ => None,
        }
    }

    fn take_item_failure(&mut self, collection: &str, key: &str) -> Option<(i64, String)> {
        let pos = self.failures.iter().position(|f| {
            matches!(f, InjectedFailure::Item { collection: c, key: k, .. } if c == collection && k == key)
        })?;
        match self.failures.remove(pos) {
            Some(InjectedFailure::Item { code, message, .. }) => Some((code, message)),
            _ => None,
        }
    }

    fn document_exists(&self, id: &str) -> bool {
        id.split_once('/')
            .and_then(|(collection, key)| {
                self.collections
                    .get(collection)
                    .map(|c| c.documents.contains_key(key))
            })
            .unwrap_or(false)
    }

    fn write_one(
        &mut self,
        collection: &str,
        doc: &Document,
        mode: WriteMode,
        enforce_endpoints: bool,
    ) -> std::result::Result<(String, bool), (Option<String>, i64, String)> {
        let key = match doc.get("_key").and_then(Value::as_str) {
            Some(key) => key.to_string(),
            None => return Err((None, codes::ILLEGAL_KEY, "missing _key".to_string())),
        };
        if !is_legal_document_key(&key) {
            return Err((Some(key), codes::ILLEGAL_KEY, "illegal document key".to_string()));
        }
        if let Some((code, message)) = self.take_item_failure(collection, &key) {
            return Err((Some(key), code, message));
        }

        let kind = match self.collections.get(collection) {
            Some(c) => c.kind,
            None => return Err((Some(key), codes::DATA_SOURCE_NOT_FOUND, "collection not found".to_string())),
        };

        let existing = self
            .collections
            .get(collection)
            .and_then(|c| c.documents.get(&key))
            .cloned();
        let merged = match (mode, existing.as_ref()) {
            (WriteMode::Replace, _) => doc.clone(),
            (WriteMode::Update, Some(stored)) => {
                let mut merged = stored.clone();
                for (field, value) in doc {
                    merged.insert(field.clone(), value.clone());
                }
                merged
            }
            (WriteMode::Update, None) => {
                return Err((Some(key), codes::DOCUMENT_NOT_FOUND, "document not found".to_string()));
            }
        };

        if kind == CollectionKind::Edge {
            for field in ["_from", "_to"] {
                let value = merged.get(field).and_then(Value::as_str);
                match value {
                    Some(id) if is_legal_edge_ref(id) => {
                        if enforce_endpoints && !self.document_exists(id) {
                            return Err((
                                Some(key),
                                codes::DOCUMENT_NOT_FOUND,
                                format!("{field} vertex '{id}' not found"),
                            ));
                        }
                    }
                    _ => {
                        return Err((
                            Some(key),
                            codes::INVALID_EDGE_ATTRIBUTE,
                            format!("invalid edge attribute {field}"),
                        ));
                    }
                }
            }
        }

        let Some(target) = self.collections.get_mut(collection) else {
            return Err((Some(key), codes::DATA_SOURCE_NOT_FOUND, "collection not found".to_string()));
        };
        for index in target.indexes.iter().filter(|i| i.spec.unique) {
            if index.spec.kind != IndexType::Persistent {
                continue;
            }
            let values = field_values(&merged, &index.spec.fields);
            if index.spec.sparse && values.iter().any(Value::is_null) {
                continue;
            }
            let clash = target.documents.iter().any(|(other_key, other)| {
                other_key != &key && field_values(other, &index.spec.fields) == values
            });
            if clash {
                return Err((
                    Some(key),
                    codes::UNIQUE_CONSTRAINT_VIOLATED,
                    format!(
                        "unique constraint violated - in index {} of type persistent over {:?}",
                        index.spec.name, index.spec.fields
                    ),
                ));
            }
        }

        let replaced = target.documents.insert(key.clone(), merged).is_some();
        Ok((key, replaced))
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn collection(&self, name: &str) -> StoreResult<Option<CollectionInfo>> {
        let state = self.lock()?;
        Ok(state.collections.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            kind: c.kind,
        }))
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> StoreResult<CollectionInfo> {
        let mut state = self.lock()?;
        if state.collections.contains_key(name) {
            return Err(duplicate("collection", name));
        }
        state.next_index_id += 1;
        let mut indexes = vec![IndexInfo {
            id: format!("{name}/0"),
            spec: IndexSpec {
                name: "primary".to_string(),
                kind: IndexType::Primary,
                fields: vec!["_key".to_string()],
                unique: true,
                sparse: false,
            },
        }];
        if kind == CollectionKind::Edge {
            indexes.push(IndexInfo {
                id: format!("{name}/1"),
                spec: IndexSpec {
                    name: "edge".to_string(),
                    kind: IndexType::Edge,
                    fields: vec!["_from".to_string(), "_to".to_string()],
                    unique: false,
                    sparse: false,
                },
            });
        }
        state.collections.insert(
            name.to_string(),
            MemoryCollection {
                kind,
                documents: BTreeMap::new(),
                indexes,
            },
        );
        Ok(CollectionInfo {
            name: name.to_string(),
            kind,
        })
    }

    async fn graph(&self, name: &str) -> StoreResult<Option<GraphInfo>> {
        Ok(self.lock()?.graphs.get(name).cloned())
    }

    async fn create_graph(&self, name: &str, definitions: &[EdgeDefinition]) -> StoreResult<GraphInfo> {
        let mut state = self.lock()?;
        if state.graphs.contains_key(name) {
            return Err(duplicate("graph", name));
        }
        let graph = GraphInfo {
            name: name.to_string(),
            edge_definitions: definitions.to_vec(),
        };
        state.graphs.insert(name.to_string(), graph.clone());
        Ok(graph)
    }

    async fn add_edge_definition(&self, graph: &str, definition: &EdgeDefinition) -> StoreResult<()> {
        let mut state = self.lock()?;
        let info = state
            .graphs
            .get_mut(graph)
            .ok_or_else(|| StoreError::api(Some(404), Some(codes::GRAPH_NOT_FOUND), "graph not found"))?;
        if info
            .edge_definitions
            .iter()
            .any(|d| d.collection == definition.collection)
        {
            return Err(duplicate("edge definition", &definition.collection));
        }
        info.edge_definitions.push(definition.clone());
        Ok(())
    }

    async fn replace_edge_definition(&self, graph: &str, definition: &EdgeDefinition) -> StoreResult<()> {
        let mut state = self.lock()?;
        let info = state
            .graphs
            .get_mut(graph)
            .ok_or_else(|| StoreError::api(Some(404), Some(codes::GRAPH_NOT_FOUND), "graph not found"))?;
        let slot = info
            .edge_definitions
            .iter_mut()
            .find(|d| d.collection == definition.collection)
            .ok_or_else(|| not_found("edge definition", &definition.collection))?;
        *slot = definition.clone();
        Ok(())
    }

    async fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexInfo>> {
        let state = self.lock()?;
        state
            .collections
            .get(collection)
            .map(|c| c.indexes.clone())
            .ok_or_else(|| not_found("collection", collection))
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> StoreResult<IndexInfo> {
        let mut state = self.lock()?;
        state.next_index_id += 1;
        let id = state.next_index_id;
        let target = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| not_found("collection", collection))?;
        if let Some(existing) = target.indexes.iter().find(|i| i.spec.equivalent(spec)) {
            return Ok(existing.clone());
        }
        let info = IndexInfo {
            id: format!("{collection}/{id}"),
            spec: spec.clone(),
        };
        target.indexes.push(info.clone());
        Ok(info)
    }

    async fn view(&self, name: &str) -> StoreResult<Option<ViewInfo>> {
        Ok(self.lock()?.views.get(name).cloned())
    }

    async fn create_view(&self, spec: &ViewSpec) -> StoreResult<ViewInfo> {
        let mut state = self.lock()?;
        if state.views.contains_key(&spec.name) {
            return Err(duplicate("view", &spec.name));
        }
        let view = ViewInfo {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            properties: spec.properties.clone(),
        };
        state.views.insert(spec.name.clone(), view.clone());
        Ok(view)
    }

    async fn replace_view_properties(&self, spec: &ViewSpec) -> StoreResult<ViewInfo> {
        let mut state = self.lock()?;
        let view = state
            .views
            .get_mut(&spec.name)
            .ok_or_else(|| not_found("view", &spec.name))?;
        view.properties = spec.properties.clone();
        Ok(view.clone())
    }

    async fn write_documents(
        &self,
        collection: &str,
        documents: &[Document],
        mode: WriteMode,
    ) -> StoreResult<Vec<ItemResult>> {
        let mut state = self.lock()?;
        if !state.collections.contains_key(collection) {
            return Err(not_found("collection", collection));
        }
        if let Some(error) = state.take_request_failure(collection) {
            return Err(error);
        }
        state.writes.push(WriteRecord {
            collection: collection.to_string(),
            mode,
            documents: documents.len(),
        });

        let results = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                match state.write_one(collection, doc, mode, self.enforce_endpoints) {
                    Ok((key, replaced)) => ItemResult::Written { key, replaced },
                    Err((key, code, message)) => ItemResult::Failed {
                        index,
                        key,
                        code: Some(code),
                        message,
                    },
                }
            })
            .collect();
        Ok(results)
    }

    async fn document(&self, collection: &str, key: &str) -> StoreResult<Option<Document>> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|c| c.documents.get(key).cloned()))
    }

    async fn delete_documents(&self, collection: &str, keys: &[String]) -> StoreResult<usize> {
        let mut state = self.lock()?;
        if let Some(error) = state.take_request_failure(collection) {
            return Err(error);
        }
        let target = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| not_found("collection", collection))?;
        Ok(keys
            .iter()
            .filter(|key| target.documents.remove(key.as_str()).is_some())
            .count())
    }

    async fn existing_keys(&self, collection: &str, keys: &[String]) -> StoreResult<Vec<String>> {
        let state = self.lock()?;
        let target = state
            .collections
            .get(collection)
            .ok_or_else(|| not_found("collection", collection))?;
        Ok(keys
            .iter()
            .filter(|k| target.documents.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn find_by_fields(
        &self,
        collection: &str,
        fields: &[String],
        values: &[Vec<Value>],
    ) -> StoreResult<Vec<Document>> {
        let state = self.lock()?;
        let target = state
            .collections
            .get(collection)
            .ok_or_else(|| not_found("collection", collection))?;
        Ok(target
            .documents
            .values()
            .filter(|doc| {
                let actual = field_values(doc, fields);
                values.iter().any(|wanted| wanted == &actual)
            })
            .cloned()
            .collect())
    }

    async fn scan(&self, collection: &str, query: &ScanQuery) -> StoreResult<Vec<Document>> {
        let state = self.lock()?;
        let target = state
            .collections
            .get(collection)
            .ok_or_else(|| not_found("collection", collection))?;
        let present = |doc: &Document, field: &str| doc.get(field).is_some_and(|v| !v.is_null());
        Ok(target
            .documents
            .iter()
            .filter(|(key, _)| query.after_key.as_ref().is_none_or(|after| *key > after))
            .map(|(_, doc)| doc)
            .filter(|doc| match &query.filter {
                ScanFilter::All => true,
                ScanFilter::HasField(field) => present(doc, field),
                ScanFilter::MissingField(field) => !present(doc, field),
            })
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        let state = self.lock()?;
        state
            .collections
            .get(collection)
            .map(|c| c.documents.len() as u64)
            .ok_or_else(|| not_found("collection", collection))
    }
}
