use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Graph store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("giving up on '{collection}' after {attempts} attempts: {last}")]
    RetriesExhausted {
        collection: String,
        attempts: u32,
        last: StoreError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Malformed source row: {0}")]
    MalformedRow(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// An error reported by the graph store, either for a whole request or for a
/// single item of a bulk operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", describe_store_error(.transport, .http_status, .code, .message))]
pub struct StoreError {
    pub http_status: Option<u16>,
    pub code: Option<i64>,
    pub message: String,
    /// No response was received (connect failure, timeout, reset).
    pub transport: bool,
}

impl StoreError {
    pub fn api(http_status: Option<u16>, code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            http_status,
            code,
            message: message.into(),
            transport: false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            code: None,
            message: message.into(),
            transport: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        if self.transport {
            return true;
        }
        if self.http_status == Some(503) {
            return true;
        }
        self.code
            .map(crate::store::codes::is_transient)
            .unwrap_or(false)
    }
}

fn describe_store_error(transport: &bool, http_status: &Option<u16>, code: &Option<i64>, message: &str) -> String {
    if *transport {
        return format!("transport failure: {message}");
    }
    match (*http_status, *code) {
        (Some(status), Some(code)) => format!("[http {status} / code {code}] {message}"),
        (None, Some(code)) => format!("[code {code}] {message}"),
        (Some(status), None) => format!("[http {status}] {message}"),
        (None, None) => message.to_string(),
    }
}

/// Data or key-generation defects. These are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralError {
    #[error("unique constraint violated in '{collection}':{}", render_lines(.collisions))]
    UniqueViolation {
        collection: String,
        collisions: Vec<UniqueCollision>,
    },

    #[error("illegal document keys in '{collection}':{}", render_lines(.offenders))]
    IllegalKey {
        collection: String,
        offenders: Vec<KeyOffender>,
    },

    #[error("malformed edges in '{collection}':{}", render_lines(.offenders))]
    MalformedEdge {
        collection: String,
        offenders: Vec<EdgeOffender>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniqueCollision {
    pub index: String,
    pub fields: Vec<String>,
    pub values: Vec<Value>,
    pub keys: Vec<String>,
    pub stored: bool,
}

impl fmt::Display for UniqueCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(Value::to_string).collect();
        write!(
            f,
            "index '{}' [{}] = [{}] claimed by keys {} ({})",
            self.index,
            self.fields.join(", "),
            values.join(", "),
            self.keys.join(", "),
            if self.stored { "batch vs store" } else { "within batch" }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyOffender {
    pub original: Option<String>,
    pub sanitized: String,
    pub reason: String,
}

impl fmt::Display for KeyOffender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "original {:?} -> sanitized {:?}: {}",
            self.original, self.sanitized, self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeOffender {
    pub key: Option<String>,
    pub field: &'static str,
    pub value: Option<Value>,
    pub reason: String,
}

impl fmt::Display for EdgeOffender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self
            .value
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "<missing>".to_string());
        write!(
            f,
            "edge {:?} {} = {}: {}",
            self.key, self.field, value, self.reason
        )
    }
}

fn render_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("\n  - {}", item))
        .collect::<String>()
}
