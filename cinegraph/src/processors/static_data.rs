use serde_json::Value;

use super::{ProcessedRow, RowProcessor};
use crate::batch::Batch;
use crate::collections::VertexKind;
use crate::errors::{Result, SyncError};
use crate::source::SourceRow;
use crate::utils::key::make_key;

/// Reference data rows (countries, languages) mapped one-to-one to vertices
/// keyed by their code column.
pub struct StaticProcessor {
    kind: VertexKind,
    key_column: &'static str,
}

impl StaticProcessor {
    pub fn new(kind: VertexKind, key_column: &'static str) -> Self {
        Self { kind, key_column }
    }

    /// ISO 3166-1 countries.
    pub fn countries() -> Self {
        Self::new(VertexKind::Country, "iso_3166_1")
    }

    /// ISO 639-1 languages.
    pub fn languages() -> Self {
        Self::new(VertexKind::Language, "iso_639_1")
    }

    pub fn key_column(&self) -> &'static str {
        self.key_column
    }
}

impl RowProcessor for StaticProcessor {
    fn collection(&self) -> VertexKind {
        self.kind
    }

    fn process_row(&self, row: &SourceRow) -> Result<ProcessedRow> {
        let key = row
            .str(self.key_column)
            .map(|code| make_key(&[code.into()]))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                SyncError::MalformedRow(format!(
                    "{} row without '{}'",
                    self.kind, self.key_column
                ))
            })?;

        let mut primary = row
            .as_map()
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect::<serde_json::Map<_, _>>();
        primary.insert("_key".to_string(), Value::String(key));

        Ok(ProcessedRow {
            primary,
            batch: Batch::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn country_rows_are_keyed_by_lowercase_iso() {
        let row = SourceRow::from(json!({
            "iso_3166_1": "US",
            "english_name": "United States of America",
            "native_name": null,
        }));
        let processed = StaticProcessor::countries().process_row(&row).unwrap();
        assert_eq!(processed.primary["_key"], "us");
        assert_eq!(processed.primary["english_name"], "United States of America");
        assert!(!processed.primary.contains_key("native_name"));
        assert!(processed.batch.is_empty());
    }

    #[test]
    fn missing_code_is_malformed() {
        let row = SourceRow::from(json!({"english_name": "Nowhere"}));
        let err = StaticProcessor::languages().process_row(&row).unwrap_err();
        assert!(matches!(err, SyncError::MalformedRow(_)));
    }
}
