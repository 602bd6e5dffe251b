use std::path::Path;
use std::sync::Arc;

use cinegraph::CineGraph;
use cinegraph::config::SyncConfig;
use cinegraph::source::SqliteSource;
use cinegraph::store::MemoryStore;
use rusqlite::Connection;
use tempfile::TempDir;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE countries (iso_3166_1 TEXT PRIMARY KEY, english_name TEXT, native_name TEXT);
CREATE TABLE languages (iso_639_1 TEXT PRIMARY KEY, english_name TEXT, name TEXT);
CREATE TABLE movies (
    id INTEGER PRIMARY KEY,
    tmdb_id INTEGER,
    title TEXT,
    original_title TEXT,
    overview TEXT,
    release_date TEXT,
    runtime INTEGER,
    updated_at TEXT,
    genres TEXT,
    keywords TEXT,
    dna TEXT,
    credits TEXT,
    streaming_offers TEXT,
    recommendations TEXT,
    production_countries TEXT,
    original_language TEXT,
    release_dates TEXT
);
CREATE TABLE shows (
    id INTEGER PRIMARY KEY,
    tmdb_id INTEGER,
    name TEXT,
    overview TEXT,
    genres TEXT,
    seasons TEXT,
    created_by TEXT,
    content_ratings TEXT
);
CREATE TABLE dna_tag_vectors (category TEXT, value TEXT, vector TEXT);
CREATE TABLE streaming_offer_details (
    url TEXT PRIMARY KEY,
    price REAL,
    currency TEXT,
    quality TEXT,
    valid_from TEXT,
    valid_until TEXT
);
CREATE TABLE user_favorites (id INTEGER PRIMARY KEY, user_id TEXT, username TEXT, media_type TEXT, tmdb_id INTEGER, created_at TEXT);
CREATE TABLE user_scores (id INTEGER PRIMARY KEY, user_id TEXT, media_type TEXT, tmdb_id INTEGER, score REAL, created_at TEXT);
CREATE TABLE user_wishlist (id INTEGER PRIMARY KEY, user_id TEXT, media_type TEXT, tmdb_id INTEGER, created_at TEXT);
CREATE TABLE user_watch_history (id INTEGER PRIMARY KEY, user_id TEXT, media_type TEXT, tmdb_id INTEGER, watched_at TEXT, progress REAL, created_at TEXT);
"#;

pub const REFERENCE_SQL: &str = r#"
INSERT INTO countries VALUES ('US', 'United States of America', 'United States'), ('DE', 'Germany', 'Deutschland');
INSERT INTO languages VALUES ('en', 'English', 'English'), ('de', 'German', 'Deutsch');
"#;

pub const MATRIX_SQL: &str = r#"
INSERT INTO movies VALUES (
    1, 603, 'The Matrix', 'The Matrix', 'A hacker learns the truth.', '1999-03-30', 136,
    '2024-05-01T10:00:00+02:00',
    '[{"id": 28, "name": "Action"}, {"id": 878, "name": "Sci-Fi"}]',
    '{"keywords": [{"id": 310, "name": "artificial intelligence"}]}',
    '[{"category": "mood", "value": "tense", "weight": 0.8}, {"category": "theme", "value": "simulation"}]',
    '{"cast": [{"id": 6384, "name": "Keanu Reeves", "character": "Neo", "order": 0}],
      "crew": [{"id": 9339, "name": "Lana Wachowski", "job": "Director", "department": "Directing"}]}',
    '[{"service": "Netflix", "country": "US", "offer_type": "flatrate", "quality": "HD", "url": "https://www.netflix.com/title/603"}]',
    '{"results": [{"id": 604, "title": "The Matrix Reloaded"}, {"id": 100, "title": "Not Imported"}]}',
    '[{"iso_3166_1": "US", "name": "United States of America"}]',
    'en',
    '{"results": [{"iso_3166_1": "DE", "release_dates": [{"certification": "16", "release_date": "1999-06-17T00:00:00.000Z", "type": 3}]}]}'
);
INSERT INTO movies VALUES (
    2, 604, 'The Matrix Reloaded', 'The Matrix Reloaded', 'Neo returns.', '2003-05-15', 138,
    NULL,
    '[{"id": 28, "name": "Action"}]',
    NULL, NULL, NULL, NULL,
    '{"results": [{"id": 603, "title": "The Matrix"}]}',
    NULL, 'en', NULL
);
INSERT INTO shows VALUES (
    1, 95396, 'Severance', 'Office workers split their memories.',
    '[{"id": 18, "name": "Drama"}]',
    '[{"season_number": 1, "episode_count": 9}]',
    '[{"id": 1223786, "name": "Dan Erickson"}]',
    '{"results": [{"iso_3166_1": "DE", "rating": "16"}]}'
);
"#;

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub config: SyncConfig,
    pub store: Arc<MemoryStore>,
    pub pipeline: CineGraph,
}

impl TestContext {
    /// Appends rows to the fixture database.
    #[allow(dead_code)]
    pub fn insert(&self, sql: &str) -> anyhow::Result<()> {
        let conn = Connection::open(&self.config.source_path)?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

fn write_fixture(path: &Path, data_sql: &str) -> anyhow::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(REFERENCE_SQL)?;
    conn.execute_batch(data_sql)?;
    Ok(())
}

/// The Matrix fixture over a plain in-memory store.
#[allow(dead_code)]
pub fn init_test_context() -> anyhow::Result<TestContext> {
    init_test_context_with(MemoryStore::new(), MATRIX_SQL)
}

pub fn init_test_context_with(store: MemoryStore, data_sql: &str) -> anyhow::Result<TestContext> {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp_dir = tempfile::tempdir()?;
    let source_path = temp_dir.path().join("media.sqlite");
    write_fixture(&source_path, data_sql)?;

    let mut config = SyncConfig::new(&source_path);
    config.retry_attempts = 3;
    config.retry_delay_ms = 1;
    config.page_size = 10;

    let store = Arc::new(store);
    let source = Arc::new(SqliteSource::open(&source_path)?);
    let pipeline = CineGraph::new(config.clone(), store.clone(), source);

    Ok(TestContext {
        temp_dir,
        config,
        store,
        pipeline,
    })
}
