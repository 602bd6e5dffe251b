use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{Result, SyncError};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub store_url: String,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    pub graph_name: String,
    pub request_timeout_secs: u64,
    pub source_path: PathBuf,
    pub page_size: usize,
    pub store_batch_size: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub vector_batch_size: usize,
    pub link_page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:8529".to_string(),
            database: "media".to_string(),
            username: "root".to_string(),
            password: None,
            graph_name: "media_graph".to_string(),
            request_timeout_secs: 60,
            source_path: PathBuf::from("media.sqlite"),
            page_size: 500,
            store_batch_size: 1000,
            retry_attempts: 5,
            retry_delay_ms: 2000,
            vector_batch_size: 100,
            link_page_size: 500,
        }
    }
}

impl SyncConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            ..Self::default()
        }
    }

    /// Reads `CINEGRAPH_*` variables (after loading `.env` if present) on top
    /// of the defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CINEGRAPH_STORE_URL") {
            cfg.store_url = v;
        }
        if let Ok(v) = std::env::var("CINEGRAPH_DATABASE") {
            cfg.database = v;
        }
        if let Ok(v) = std::env::var("CINEGRAPH_USERNAME") {
            cfg.username = v;
        }
        if let Ok(v) = std::env::var("CINEGRAPH_PASSWORD") {
            if !v.is_empty() {
                cfg.password = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CINEGRAPH_GRAPH_NAME") {
            cfg.graph_name = v;
        }
        if let Ok(v) = std::env::var("CINEGRAPH_SOURCE_PATH") {
            cfg.source_path = PathBuf::from(v);
        }
        cfg.request_timeout_secs = env_number("CINEGRAPH_REQUEST_TIMEOUT_SECS", cfg.request_timeout_secs)?;
        cfg.page_size = env_number("CINEGRAPH_PAGE_SIZE", cfg.page_size)?;
        cfg.store_batch_size = env_number("CINEGRAPH_STORE_BATCH_SIZE", cfg.store_batch_size)?;
        cfg.retry_attempts = env_number("CINEGRAPH_RETRY_ATTEMPTS", cfg.retry_attempts)?;
        cfg.retry_delay_ms = env_number("CINEGRAPH_RETRY_DELAY_MS", cfg.retry_delay_ms)?;
        cfg.vector_batch_size = env_number("CINEGRAPH_VECTOR_BATCH_SIZE", cfg.vector_batch_size)?;
        cfg.link_page_size = env_number("CINEGRAPH_LINK_PAGE_SIZE", cfg.link_page_size)?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.store_batch_size == 0 {
            return Err(SyncError::Config(
                "page_size and store_batch_size must be positive".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(SyncError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.vector_batch_size == 0 || self.link_page_size == 0 {
            return Err(SyncError::Config(
                "vector_batch_size and link_page_size must be positive".to_string(),
            ));
        }
        url::Url::parse(&self.store_url)
            .map_err(|err| SyncError::Config(format!("invalid store url '{}': {err}", self.store_url)))?;
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_number<T: std::str::FromStr>(name: &str, current: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| SyncError::Config(format!("{name} must be a number, got '{raw}'"))),
        Err(_) => Ok(current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SyncConfig::new("/tmp/source.sqlite");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.source_path, PathBuf::from("/tmp/source.sqlite"));
        assert_eq!(cfg.retry_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = SyncConfig {
            store_batch_size: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: SyncConfig =
            serde_json::from_str(r#"{"graph_name": "g", "page_size": 10}"#).unwrap();
        assert_eq!(cfg.graph_name, "g");
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.store_batch_size, 1000);
    }
}
