use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde_json::{Map, Number, Value};

use super::{RelationalSource, SourceRow, SqlParam};
use crate::errors::{Result, SyncError};

pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSource {
    /// Opens an existing database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SyncError::Other(anyhow!("sqlite connection lock poisoned")))?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

fn to_sql_value(param: &SqlParam) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match param {
        SqlParam::Null => Sql::Null,
        SqlParam::Int(i) => Sql::Integer(*i),
        SqlParam::Real(f) => Sql::Real(*f),
        SqlParam::Text(s) => Sql::Text(s.clone()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

fn run_query(conn: &Connection, sql: &str, params: &[SqlParam]) -> Result<Vec<SourceRow>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql_value)))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            values.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(SourceRow::new(values));
    }
    Ok(out)
}

#[async_trait]
impl RelationalSource for SqliteSource {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SourceRow>> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| SyncError::Other(anyhow!("sqlite connection lock poisoned")))?;
            run_query(&conn, &sql, &params)
        })
        .await
        .map_err(|err| SyncError::Other(anyhow!("sqlite query task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PagedQuery;

    fn fixture() -> Result<SqliteSource> {
        let source = SqliteSource::open_in_memory()?;
        source.execute_batch(
            "CREATE TABLE movies (id INTEGER PRIMARY KEY, title TEXT, rating REAL, poster BLOB);
             INSERT INTO movies VALUES (1, 'Alien', 8.5, x'0102');
             INSERT INTO movies VALUES (2, 'Heat', NULL, NULL);
             INSERT INTO movies VALUES (3, 'Ran', 8.2, NULL);",
        )?;
        Ok(source)
    }

    #[tokio::test]
    async fn converts_column_types() -> anyhow::Result<()> {
        let source = fixture()?;
        let rows = source
            .query("SELECT * FROM movies WHERE id = ?", &[SqlParam::Int(1)])
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str("title"), Some("Alien"));
        assert_eq!(rows[0].f64("rating"), Some(8.5));
        assert_eq!(rows[0].str("poster"), Some("AQI="));
        Ok(())
    }

    #[tokio::test]
    async fn keyset_pages_cover_every_row_once() -> anyhow::Result<()> {
        let source = fixture()?;
        let query = PagedQuery::keyset("SELECT * FROM movies", "id", 2);
        let mut pages = query.pages(&source);
        let mut ids = Vec::new();
        let mut page_count = 0;
        while let Some(page) = pages.next_page().await? {
            page_count += 1;
            ids.extend(page.iter().filter_map(|r| r.i64("id")));
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(page_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn offset_pages_cover_every_row_once() -> anyhow::Result<()> {
        let source = fixture()?;
        let query = PagedQuery::offset("SELECT * FROM movies ORDER BY id", 1);
        let mut pages = query.pages(&source);
        let mut titles = Vec::new();
        while let Some(page) = pages.next_page().await? {
            titles.extend(page.iter().filter_map(|r| r.str("title").map(str::to_string)));
        }
        assert_eq!(titles, vec!["Alien", "Heat", "Ran"]);
        Ok(())
    }
}
