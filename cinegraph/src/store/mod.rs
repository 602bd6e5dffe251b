//! Graph store connector.
//!
//! `GraphStore` is the seam between the import engine and the document/graph
//! database. `arango` talks to a real server over HTTP, `memory` keeps
//! everything in process and reports the same error codes.

pub mod arango;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StoreError;

pub use arango::ArangoStore;
pub use memory::MemoryStore;

pub type Document = serde_json::Map<String, Value>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error numbers reported by the store.
pub mod codes {
    pub const LOCK_TIMEOUT: i64 = 18;
    pub const CONFLICT: i64 = 1200;
    pub const DOCUMENT_NOT_FOUND: i64 = 1202;
    pub const DATA_SOURCE_NOT_FOUND: i64 = 1203;
    pub const ILLEGAL_KEY_ALT: i64 = 1205;
    pub const DUPLICATE_NAME: i64 = 1207;
    pub const UNIQUE_CONSTRAINT_VIOLATED: i64 = 1210;
    pub const ILLEGAL_KEY: i64 = 1221;
    pub const INVALID_EDGE_ATTRIBUTE: i64 = 1233;
    pub const CLUSTER_TIMEOUT: i64 = 1457;
    pub const CLUSTER_BACKEND_UNAVAILABLE: i64 = 1478;
    pub const NOT_LEADER: i64 = 1496;
    pub const SERVICE_UNAVAILABLE: i64 = 503;
    pub const GRAPH_NOT_FOUND: i64 = 1924;

    pub fn is_transient(code: i64) -> bool {
        matches!(
            code,
            LOCK_TIMEOUT
                | CONFLICT
                | CLUSTER_TIMEOUT
                | CLUSTER_BACKEND_UNAVAILABLE
                | NOT_LEADER
                | SERVICE_UNAVAILABLE
        )
    }

    pub fn is_illegal_key(code: i64) -> bool {
        code == ILLEGAL_KEY || code == ILLEGAL_KEY_ALT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    Document,
    Edge,
}

impl CollectionKind {
    pub fn type_code(self) -> u8 {
        match self {
            CollectionKind::Document => 2,
            CollectionKind::Edge => 3,
        }
    }

    pub fn from_type_code(code: u64) -> Self {
        if code == 3 {
            CollectionKind::Edge
        } else {
            CollectionKind::Document
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub kind: CollectionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub collection: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
}

impl EdgeDefinition {
    /// Endpoint lists are compared as sets; order carries no meaning.
    pub fn same_endpoints(&self, other: &EdgeDefinition) -> bool {
        let set = |v: &[String]| v.iter().cloned().collect::<BTreeSet<_>>();
        set(&self.from) == set(&other.from) && set(&self.to) == set(&other.to)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphInfo {
    pub name: String,
    pub edge_definitions: Vec<EdgeDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Persistent,
    Primary,
    Edge,
    Other,
}

impl IndexType {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexType::Persistent => "persistent",
            IndexType::Primary => "primary",
            IndexType::Edge => "edge",
            IndexType::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            // older servers report persistent indexes as skiplist or hash
            "persistent" | "skiplist" | "hash" => IndexType::Persistent,
            "primary" => IndexType::Primary,
            "edge" => IndexType::Edge,
            _ => IndexType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub kind: IndexType,
    pub fields: Vec<String>,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexSpec {
    pub fn persistent(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: IndexType::Persistent,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
            sparse: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Same definition, ignoring the name.
    pub fn equivalent(&self, other: &IndexSpec) -> bool {
        self.kind == other.kind
            && self.fields == other.fields
            && self.unique == other.unique
            && self.sparse == other.sparse
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub id: String,
    pub spec: IndexSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSpec {
    pub name: String,
    pub kind: String,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewInfo {
    pub name: String,
    pub kind: String,
    pub properties: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create, or replace the stored document wholesale.
    Replace,
    /// Merge attributes into an existing document; missing documents fail
    /// with `DOCUMENT_NOT_FOUND`.
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemResult {
    Written { key: String, replaced: bool },
    Failed {
        index: usize,
        key: Option<String>,
        code: Option<i64>,
        message: String,
    },
}

impl ItemResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ItemResult::Written { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanFilter {
    All,
    HasField(String),
    MissingField(String),
}

/// Keyset page over a collection ordered by `_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanQuery {
    pub filter: ScanFilter,
    pub after_key: Option<String>,
    pub limit: usize,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn collection(&self, name: &str) -> StoreResult<Option<CollectionInfo>>;

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> StoreResult<CollectionInfo>;

    async fn graph(&self, name: &str) -> StoreResult<Option<GraphInfo>>;

    async fn create_graph(&self, name: &str, definitions: &[EdgeDefinition]) -> StoreResult<GraphInfo>;

    async fn add_edge_definition(&self, graph: &str, definition: &EdgeDefinition) -> StoreResult<()>;

    async fn replace_edge_definition(&self, graph: &str, definition: &EdgeDefinition) -> StoreResult<()>;

    async fn indexes(&self, collection: &str) -> StoreResult<Vec<IndexInfo>>;

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> StoreResult<IndexInfo>;

    async fn view(&self, name: &str) -> StoreResult<Option<ViewInfo>>;

    async fn create_view(&self, spec: &ViewSpec) -> StoreResult<ViewInfo>;

    async fn replace_view_properties(&self, spec: &ViewSpec) -> StoreResult<ViewInfo>;

    /// Bulk write. Returns one result per input document, in input order.
    /// A request-level failure is returned as `Err`.
    async fn write_documents(
        &self,
        collection: &str,
        documents: &[Document],
        mode: WriteMode,
    ) -> StoreResult<Vec<ItemResult>>;

    async fn document(&self, collection: &str, key: &str) -> StoreResult<Option<Document>>;

    /// Removes the documents with `keys`, ignoring keys that do not exist.
    /// Returns how many were removed.
    async fn delete_documents(&self, collection: &str, keys: &[String]) -> StoreResult<usize>;

    /// The subset of `keys` that exist in `collection`.
    async fn existing_keys(&self, collection: &str, keys: &[String]) -> StoreResult<Vec<String>>;

    /// Documents whose `fields` equal any of the value tuples in `values`.
    async fn find_by_fields(
        &self,
        collection: &str,
        fields: &[String],
        values: &[Vec<Value>],
    ) -> StoreResult<Vec<Document>>;

    async fn scan(&self, collection: &str, query: &ScanQuery) -> StoreResult<Vec<Document>>;

    async fn count(&self, collection: &str) -> StoreResult<u64>;
}
