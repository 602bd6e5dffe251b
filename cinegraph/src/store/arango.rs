use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use url::Url;

use super::{
    CollectionInfo, CollectionKind, Document, EdgeDefinition, GraphInfo, GraphStore, IndexInfo,
    IndexSpec, IndexType, ItemResult, ScanFilter, ScanQuery, StoreResult, ViewInfo, ViewSpec,
    WriteMode, codes,
};
use crate::config::SyncConfig;
use crate::errors::{Result, StoreError, SyncError};

const CURSOR_BATCH_SIZE: usize = 1000;

/// ArangoDB over its HTTP API, scoped to one database.
pub struct ArangoStore {
    client: Client,
    base: Url,
    username: String,
    password: Option<String>,
}

impl ArangoStore {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let mut base = Url::parse(&config.store_url)
            .map_err(|err| SyncError::Config(format!("invalid store url: {err}")))?;
        base.set_path(&format!("/_db/{}/", config.database));
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> StoreResult<RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|err| StoreError::api(None, None, format!("bad request path '{path}': {err}")))?;
        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.username, self.password.as_ref()))
    }

    async fn send(&self, builder: RequestBuilder) -> StoreResult<Value> {
        match self.send_optional(builder).await? {
            Some(body) => Ok(body),
            None => Err(StoreError::api(Some(404), None, "not found")),
        }
    }

    /// Like `send`, but maps a 404 to `None`.
    async fn send_optional(&self, builder: RequestBuilder) -> StoreResult<Option<Value>> {
        let response = builder
            .send()
            .await
            .map_err(|err| StoreError::transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| StoreError::transport(err.to_string()))?;
        let body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status.is_success() {
            return Ok(Some(body));
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Err(error_from_body(status, &body))
    }

    async fn query(&self, aql: &str, bind_vars: Value) -> StoreResult<Vec<Value>> {
        debug!("AQL: {}", aql);
        let builder = self.request(Method::POST, "_api/cursor")?.json(&json!({
            "query": aql,
            "bindVars": bind_vars,
            "batchSize": CURSOR_BATCH_SIZE,
        }));
        let mut body = self.send(builder).await?;
        let mut results = Vec::new();
        loop {
            if let Some(Value::Array(items)) = body.get_mut("result").map(Value::take) {
                results.extend(items);
            }
            let has_more = body.get("hasMore").and_then(Value::as_bool).unwrap_or(false);
            let cursor_id = body.get("id").and_then(Value::as_str).map(str::to_string);
            match (has_more, cursor_id) {
                (true, Some(id)) => {
                    let builder = self.request(Method::PUT, &format!("_api/cursor/{id}"))?;
                    body = self.send(builder).await?;
                }
                _ => break,
            }
        }
        Ok(results)
    }
}

fn error_from_body(status: StatusCode, body: &Value) -> StoreError {
    let code = body.get("errorNum").and_then(Value::as_i64);
    let message = body
        .get("errorMessage")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    StoreError::api(Some(status.as_u16()), code, message)
}

fn parse_edge_definitions(raw: Option<&Value>) -> Vec<EdgeDefinition> {
    raw.cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn parse_index(raw: &Value) -> IndexInfo {
    let fields = raw
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    IndexInfo {
        id: raw.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        spec: IndexSpec {
            name: raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            kind: IndexType::parse(raw.get("type").and_then(Value::as_str).unwrap_or_default()),
            fields,
            unique: raw.get("unique").and_then(Value::as_bool).unwrap_or(false),
            sparse: raw.get("sparse").and_then(Value::as_bool).unwrap_or(false),
        },
    }
}

fn parse_view(raw: Value) -> ViewInfo {
    ViewInfo {
        name: raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        kind: raw.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
        properties: raw,
    }
}

fn view_body(spec: &ViewSpec) -> Value {
    let mut body = match &spec.properties {
        Value::Object(props) => props.clone(),
        _ => serde_json::Map::new(),
    };
    body.insert("name".into(), Value::String(spec.name.clone()));
    body.insert("type".into(), Value::String(spec.kind.clone()));
    Value::Object(body)
}

fn parse_item(index: usize, raw: &Value) -> ItemResult {
    if raw.get("error").and_then(Value::as_bool).unwrap_or(false) {
        return ItemResult::Failed {
            index,
            key: raw.get("_key").and_then(Value::as_str).map(str::to_string),
            code: raw.get("errorNum").and_then(Value::as_i64),
            message: raw
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
    }
    ItemResult::Written {
        key: raw.get("_key").and_then(Value::as_str).unwrap_or_default().to_string(),
        replaced: raw.get("_oldRev").is_some(),
    }
}

/// `d.@f0 == v[0] AND d.@f1 == v[1] ...` with matching bind vars.
fn field_match_clause(fields: &[String], bind: &mut serde_json::Map<String, Value>) -> String {
    fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            bind.insert(format!("f{i}"), Value::String(field.clone()));
            format!("d.@f{i} == v[{i}]")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn scan_aql(query: &ScanQuery, bind: &mut serde_json::Map<String, Value>) -> String {
    let mut aql = String::from("FOR d IN @@col");
    if let Some(after) = &query.after_key {
        aql.push_str(" FILTER d._key > @after");
        bind.insert("after".into(), Value::String(after.clone()));
    }
    match &query.filter {
        ScanFilter::All => {}
        ScanFilter::HasField(field) => {
            aql.push_str(" FILTER d.@field != null");
            bind.insert("field".into(), Value::String(field.clone()));
        }
        ScanFilter::MissingField(field) => {
            aql.push_str(" FILTER d.@field == null");
            bind.insert("field".into(), Value::String(field.clone()));
        }
    }
    aql.push_str(" SORT d._key LIMIT @limit RETURN d");
    bind.insert("limit".into(), Value::from(query.limit as u64));
    aql
}

#[async_trait]
impl GraphStore for ArangoStore {
    async fn collection(&self, name: &str) -> StoreResult<Option<CollectionInfo>> {
        let builder = self.request(Method::GET, &format!("_api/collection/{name}"))?;
        Ok(self.send_optional(builder).await?.map(|body| CollectionInfo {
            name: name.to_string(),
            kind: CollectionKind::from_type_code(body.get("type").and_then(Value::as_u64).unwrap_or(2)),
        }))
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> StoreResult<CollectionInfo> {
        let builder = self
            .request(Method::POST, "_api/collection")?
            .json(&json!({ "name": name, "type": kind.type_code() }));
        self.send(builder).await?;
        Ok(CollectionInfo {
            name: name.to_string(),
            kind,
        })
    }

    async fn graph(&self, name: &str) -> StoreResult<Option<GraphInfo>> {
        let builder = self.request(Method::GET, &format!("_api/gharial/{name}"))?;
        Ok(self.send_optional(builder).await?.map(|body| GraphInfo {
            name: name.to_string(),
            edge_definitions: parse_edge_definitions(
                body.get("graph").and_then(|g| g.get("edgeDefinitions")),
            ),
        }))
    }

    async fn create_graph(&self, name: &str, definitions: &[EdgeDefinition]) -> StoreResult<GraphInfo> {
        let builder = self
            .request(Method::POST, "_api/gharial")?
            .json(&json!({ "name": name, "edgeDefinitions": definitions }));
        self.send(builder).await?;
        Ok(GraphInfo {
            name: name.to_string(),
            edge_definitions: definitions.to_vec(),
        })
    }

    async fn add_edge_definition(&self, graph: &str, definition: &EdgeDefinition) -> StoreResult<()> {
        let builder = self
            .request(Method::POST, &format!("_api/gharial/{graph}/edge"))?
            .json(definition);
        self.send(builder).await.map(|_| ())
    }

    async fn replace_edge_definition(&self, graph: &str, definition: &EdgeDefinition) -> StoreResult<()> {
        let builder = self
            .request(
                Method::PUT,
                &format!("_api/gharial/{graph}/edge/{}", definition.collection),
            )?
            .json(definition);
        self.send(builder).await.map(|_| ())
    }

    async fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexInfo>> {
        let builder = self
            .request(Method::GET, "_api/index")?
            .query(&[("collection", collection)]);
        let body = self.send(builder).await?;
        Ok(body
            .get("indexes")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_index).collect())
            .unwrap_or_default())
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> StoreResult<IndexInfo> {
        let builder = self
            .request(Method::POST, "_api/index")?
            .query(&[("collection", collection)])
            .json(&json!({
                "type": spec.kind.as_str(),
                "name": spec.name,
                "fields": spec.fields,
                "unique": spec.unique,
                "sparse": spec.sparse,
            }));
        let body = self.send(builder).await?;
        Ok(parse_index(&body))
    }

    async fn view(&self, name: &str) -> StoreResult<Option<ViewInfo>> {
        let builder = self.request(Method::GET, &format!("_api/view/{name}/properties"))?;
        Ok(self.send_optional(builder).await?.map(parse_view))
    }

    async fn create_view(&self, spec: &ViewSpec) -> StoreResult<ViewInfo> {
        let builder = self.request(Method::POST, "_api/view")?.json(&view_body(spec));
        Ok(parse_view(self.send(builder).await?))
    }

    async fn replace_view_properties(&self, spec: &ViewSpec) -> StoreResult<ViewInfo> {
        let builder = self
            .request(Method::PUT, &format!("_api/view/{}/properties", spec.name))?
            .json(&spec.properties);
        Ok(parse_view(self.send(builder).await?))
    }

    async fn write_documents(
        &self,
        collection: &str,
        documents: &[Document],
        mode: WriteMode,
    ) -> StoreResult<Vec<ItemResult>> {
        let path = format!("_api/document/{collection}");
        let builder = match mode {
            WriteMode::Replace => self
                .request(Method::POST, &path)?
                .query(&[("overwriteMode", "replace")]),
            WriteMode::Update => self
                .request(Method::PATCH, &path)?
                .query(&[("keepNull", "true"), ("mergeObjects", "true")]),
        };
        let body = self.send(builder.json(documents)).await?;
        let items = body.as_array().ok_or_else(|| {
            StoreError::api(None, None, format!("unexpected bulk response: {body}"))
        })?;
        if items.len() != documents.len() {
            return Err(StoreError::api(
                None,
                None,
                format!(
                    "bulk response has {} results for {} documents",
                    items.len(),
                    documents.len()
                ),
            ));
        }
        Ok(items
            .iter()
            .enumerate()
            .map(|(index, raw)| parse_item(index, raw))
            .collect())
    }

    async fn document(&self, collection: &str, key: &str) -> StoreResult<Option<Document>> {
        let builder = self.request(Method::GET, &format!("_api/document/{collection}/{key}"))?;
        Ok(self
            .send_optional(builder)
            .await?
            .and_then(|body| body.as_object().cloned()))
    }

    async fn delete_documents(&self, collection: &str, keys: &[String]) -> StoreResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self
            .query(
                "FOR d IN @@col FILTER d._key IN @keys REMOVE d IN @@col RETURN OLD._key",
                json!({ "@col": collection, "keys": keys }),
            )
            .await?;
        Ok(removed.len())
    }

    async fn existing_keys(&self, collection: &str, keys: &[String]) -> StoreResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .query(
                "FOR d IN @@col FILTER d._key IN @keys RETURN d._key",
                json!({ "@col": collection, "keys": keys }),
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn find_by_fields(
        &self,
        collection: &str,
        fields: &[String],
        values: &[Vec<Value>],
    ) -> StoreResult<Vec<Document>> {
        if fields.is_empty() || values.is_empty() {
            return Ok(Vec::new());
        }
        let mut bind = serde_json::Map::new();
        let clause = field_match_clause(fields, &mut bind);
        bind.insert("@col".into(), Value::String(collection.to_string()));
        bind.insert("values".into(), json!(values));
        let aql = format!("FOR d IN @@col FOR v IN @values FILTER {clause} RETURN DISTINCT d");
        let rows = self.query(&aql, Value::Object(bind)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(doc) => Some(doc),
                _ => None,
            })
            .collect())
    }

    async fn scan(&self, collection: &str, query: &ScanQuery) -> StoreResult<Vec<Document>> {
        let mut bind = serde_json::Map::new();
        let aql = scan_aql(query, &mut bind);
        bind.insert("@col".into(), Value::String(collection.to_string()));
        let rows = self.query(&aql, Value::Object(bind)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(doc) => Some(doc),
                _ => None,
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        let builder = self.request(Method::GET, &format!("_api/collection/{collection}/count"))?;
        match self.send_optional(builder).await? {
            Some(body) => Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0)),
            None => Err(StoreError::api(
                Some(404),
                Some(codes::DATA_SOURCE_NOT_FOUND),
                format!("collection '{collection}' not found"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_database_scoped_urls() {
        let store = ArangoStore::new(&SyncConfig::default()).unwrap();
        let builder = store.request(Method::GET, "_api/collection/Movie").unwrap();
        let request = builder.build().unwrap();
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8529/_db/media/_api/collection/Movie"
        );
    }

    #[test]
    fn item_results_distinguish_errors_and_replacements() {
        let failed = parse_item(
            1,
            &json!({"error": true, "errorNum": 1210, "errorMessage": "unique constraint violated"}),
        );
        assert!(matches!(failed, ItemResult::Failed { index: 1, code: Some(1210), .. }));
        let replaced = parse_item(0, &json!({"_key": "a", "_rev": "2", "_oldRev": "1"}));
        assert_eq!(
            replaced,
            ItemResult::Written {
                key: "a".into(),
                replaced: true
            }
        );
    }

    #[test]
    fn api_errors_carry_error_number() {
        let err = error_from_body(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({"error": true, "errorNum": 1478, "errorMessage": "backend unavailable"}),
        );
        assert_eq!(err.code, Some(1478));
        assert!(err.is_transient());
    }

    #[test]
    fn scan_query_binds_filters() {
        let mut bind = serde_json::Map::new();
        let aql = scan_aql(
            &ScanQuery {
                filter: ScanFilter::MissingField("vector".into()),
                after_key: Some("k".into()),
                limit: 10,
            },
            &mut bind,
        );
        assert!(aql.contains("d._key > @after"));
        assert!(aql.contains("d.@field == null"));
        assert_eq!(bind["field"], "vector");
        assert_eq!(bind["limit"], 10);
    }

    #[test]
    fn field_clause_matches_each_position() {
        let mut bind = serde_json::Map::new();
        let clause = field_match_clause(&["category".into(), "value".into()], &mut bind);
        assert_eq!(clause, "d.@f0 == v[0] AND d.@f1 == v[1]");
        assert_eq!(bind["f1"], "value");
    }
}
