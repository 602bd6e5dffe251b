//! Relational source connector.

pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::{Result, SyncError};

pub use sqlite::SqliteSource;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlParam {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Int(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::Int(i),
                None => n.as_f64().map(SqlParam::Real).unwrap_or(SqlParam::Null),
            },
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

/// One result row, column name to JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    values: Map<String, Value>,
}

impl SourceRow {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Non-null value of `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column).filter(|v| !v.is_null())
    }

    pub fn str(&self, column: &str) -> Option<&str> {
        self.get(column)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Integers, integral floats and numeric strings.
    pub fn i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        match self.get(column)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// A JSON sub-structure. Text columns are parsed; text that is not JSON
    /// yields `None`.
    pub fn json(&self, column: &str) -> Option<Value> {
        match self.get(column)? {
            Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return None;
                }
                serde_json::from_str::<Value>(trimmed)
                    .ok()
                    .filter(|v| !v.is_null())
            }
            other => Some(other.clone()),
        }
    }

    pub fn parse_json<T: DeserializeOwned>(&self, column: &str) -> Result<Option<T>> {
        match self.json(column) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| SyncError::MalformedRow(format!("column '{column}': {err}"))),
            None => Ok(None),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

impl From<Value> for SourceRow {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }
}

#[async_trait]
pub trait RelationalSource: Send + Sync {
    /// Runs a read-only parameterized statement.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SourceRow>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pagination {
    /// `WHERE column > ? ORDER BY column LIMIT ?`
    Keyset { column: String },
    /// `LIMIT ? OFFSET ?`
    Offset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagedQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub pagination: Pagination,
    pub page_size: usize,
}

impl PagedQuery {
    pub fn keyset(sql: impl Into<String>, column: impl Into<String>, page_size: usize) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            pagination: Pagination::Keyset {
                column: column.into(),
            },
            page_size: page_size.max(1),
        }
    }

    pub fn offset(sql: impl Into<String>, page_size: usize) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            pagination: Pagination::Offset,
            page_size: page_size.max(1),
        }
    }

    pub fn with_params(mut self, params: Vec<SqlParam>) -> Self {
        self.params = params;
        self
    }

    fn page_sql(&self, has_cursor: bool) -> String {
        match &self.pagination {
            Pagination::Keyset { column } if has_cursor => format!(
                "SELECT * FROM ({}) AS page WHERE page.{column} > ? ORDER BY page.{column} LIMIT ?",
                self.sql
            ),
            Pagination::Keyset { column } => format!(
                "SELECT * FROM ({}) AS page ORDER BY page.{column} LIMIT ?",
                self.sql
            ),
            Pagination::Offset => format!("SELECT * FROM ({}) AS page LIMIT ? OFFSET ?", self.sql),
        }
    }

    pub fn pages<'a>(&'a self, source: &'a dyn RelationalSource) -> PageStream<'a> {
        PageStream {
            source,
            query: self,
            cursor: None,
            offset: 0,
            done: false,
        }
    }
}

pub struct PageStream<'a> {
    source: &'a dyn RelationalSource,
    query: &'a PagedQuery,
    cursor: Option<SqlParam>,
    offset: usize,
    done: bool,
}

impl PageStream<'_> {
    /// The next non-empty page, or `None` once the query is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<SourceRow>>> {
        if self.done {
            return Ok(None);
        }
        let limit = self.query.page_size as i64;
        let mut params = self.query.params.clone();
        let sql = match &self.query.pagination {
            Pagination::Keyset { .. } => {
                if let Some(cursor) = &self.cursor {
                    params.push(cursor.clone());
                }
                params.push(SqlParam::Int(limit));
                self.query.page_sql(self.cursor.is_some())
            }
            Pagination::Offset => {
                params.push(SqlParam::Int(limit));
                params.push(SqlParam::Int(self.offset as i64));
                self.query.page_sql(false)
            }
        };

        let rows = self.source.query(&sql, &params).await?;
        if rows.len() < self.query.page_size {
            self.done = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        match &self.query.pagination {
            Pagination::Keyset { column } => {
                let last = rows
                    .last()
                    .and_then(|row| row.get(column))
                    .ok_or_else(|| {
                        SyncError::InvalidArg(format!("keyset column '{column}' missing from page"))
                    })?;
                self.cursor = Some(SqlParam::from_json(last));
            }
            Pagination::Offset => self.offset += rows.len(),
        }
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_accessors_are_lenient() {
        let row = SourceRow::from(json!({
            "tmdb_id": "603",
            "runtime": 136.0,
            "title": "  The Matrix ",
            "genres": "[{\"id\": 28, \"name\": \"Action\"}]",
            "broken": "{not json",
            "empty": null,
        }));
        assert_eq!(row.i64("tmdb_id"), Some(603));
        assert_eq!(row.i64("runtime"), Some(136));
        assert_eq!(row.str("title"), Some("The Matrix"));
        assert_eq!(row.json("genres").unwrap()[0]["name"], "Action");
        assert_eq!(row.json("broken"), None);
        assert!(row.get("empty").is_none());
    }

    #[test]
    fn page_sql_per_pagination_mode() {
        let keyset = PagedQuery::keyset("SELECT * FROM movies", "id", 2);
        assert_eq!(
            keyset.page_sql(true),
            "SELECT * FROM (SELECT * FROM movies) AS page WHERE page.id > ? ORDER BY page.id LIMIT ?"
        );
        let offset = PagedQuery::offset("SELECT * FROM countries", 10);
        assert!(offset.page_sql(false).ends_with("LIMIT ? OFFSET ?"));
    }
}
