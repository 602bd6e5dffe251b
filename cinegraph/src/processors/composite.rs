use std::collections::HashSet;

use serde_json::Value;

use super::dna::DnaProcessor;
use super::location::LocationProcessor;
use super::media::MediaProcessor;
use super::metadata::MetadataProcessor;
use super::person::PersonProcessor;
use super::production::ProductionProcessor;
use super::recommendation::RecommendationProcessor;
use super::release::ReleaseProcessor;
use super::score::ScoreProcessor;
use super::season::SeasonProcessor;
use super::streaming::StreamingProcessor;
use super::taxonomy::TagProcessor;
use super::translation::TranslationProcessor;
use super::{ProcessedRow, RowProcessor, SatelliteProcessor};
use crate::batch::{Batch, DocRef};
use crate::collections::VertexKind;
use crate::errors::{Result, SyncError};
use crate::source::SourceRow;
use crate::store::Document;
use crate::utils::key::make_key;

/// Identity of a primary row plus its pass-through scalar attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryRecord {
    pub tmdb_id: i64,
    pub title: String,
    pub attributes: Document,
}

impl PrimaryRecord {
    /// Rows without `tmdb_id` or a title are rejected; keys are never
    /// derived from the source's internal row id.
    pub fn from_row(row: &SourceRow, title_column: &str, excluded: &HashSet<&str>) -> Result<Self> {
        let tmdb_id = row
            .i64("tmdb_id")
            .ok_or_else(|| SyncError::MalformedRow(format!("missing tmdb_id (row id {:?})", row.get("id"))))?;
        let title = row
            .str(title_column)
            .ok_or_else(|| SyncError::MalformedRow(format!("missing {title_column} for tmdb_id {tmdb_id}")))?
            .to_string();

        let mut attributes = Document::new();
        for (column, value) in row.as_map() {
            if value.is_null() || excluded.contains(column.as_str()) {
                continue;
            }
            let name = match column.as_str() {
                "id" => "source_id",
                "updated_at" => "source_updated_at",
                other => other,
            };
            attributes.insert(name.to_string(), value.clone());
        }
        Ok(Self {
            tmdb_id,
            title,
            attributes,
        })
    }

    pub fn key(&self) -> String {
        make_key(&[self.title.as_str().into(), self.tmdb_id.into()])
    }
}

struct PrimaryProcessor {
    kind: VertexKind,
    title_column: &'static str,
    satellites: Vec<Box<dyn SatelliteProcessor>>,
    decomposed: HashSet<&'static str>,
}

impl PrimaryProcessor {
    fn new(kind: VertexKind, title_column: &'static str) -> Self {
        let satellites: Vec<Box<dyn SatelliteProcessor>> = vec![
            Box::new(TagProcessor::genres()),
            Box::new(TagProcessor::keywords()),
            Box::new(TagProcessor::tropes()),
            Box::new(DnaProcessor),
            Box::new(MediaProcessor),
            Box::new(MetadataProcessor),
            Box::new(TranslationProcessor),
            Box::new(LocationProcessor),
            Box::new(StreamingProcessor),
            Box::new(ScoreProcessor),
            Box::new(PersonProcessor),
            Box::new(SeasonProcessor),
            Box::new(RecommendationProcessor),
            Box::new(ProductionProcessor),
            Box::new(ReleaseProcessor),
        ];
        let decomposed = satellites
            .iter()
            .flat_map(|s| s.columns().iter().copied())
            .collect();
        Self {
            kind,
            title_column,
            satellites,
            decomposed,
        }
    }

    fn process_row(&self, row: &SourceRow) -> Result<ProcessedRow> {
        let record = PrimaryRecord::from_row(row, self.title_column, &self.decomposed)?;
        let key = record.key();
        if key.is_empty() {
            return Err(SyncError::MalformedRow(format!(
                "title {:?} yields an empty key",
                record.title
            )));
        }
        let parent = DocRef::new(self.kind, key.clone());

        let mut batch = Batch::new();
        for satellite in &self.satellites {
            batch.merge(satellite.process(row, &parent)?);
        }

        let mut primary = record.attributes;
        primary.insert("tmdb_id".to_string(), Value::from(record.tmdb_id));
        primary.insert("title".to_string(), Value::String(record.title));
        for (field, value) in batch.primary_fields() {
            primary.insert(field.clone(), value.clone());
        }
        primary.insert("_key".to_string(), Value::String(key));

        Ok(ProcessedRow { primary, batch })
    }
}

/// `movies` rows to `Movie` vertices.
pub struct MovieProcessor(PrimaryProcessor);

impl MovieProcessor {
    pub fn new() -> Self {
        Self(PrimaryProcessor::new(VertexKind::Movie, "title"))
    }
}

impl Default for MovieProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RowProcessor for MovieProcessor {
    fn collection(&self) -> VertexKind {
        VertexKind::Movie
    }

    fn process_row(&self, row: &SourceRow) -> Result<ProcessedRow> {
        self.0.process_row(row)
    }
}

/// `shows` rows to `Show` vertices. The show's `name` also lands in `title`.
pub struct ShowProcessor(PrimaryProcessor);

impl ShowProcessor {
    pub fn new() -> Self {
        Self(PrimaryProcessor::new(VertexKind::Show, "name"))
    }
}

impl Default for ShowProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RowProcessor for ShowProcessor {
    fn collection(&self) -> VertexKind {
        VertexKind::Show
    }

    fn process_row(&self, row: &SourceRow) -> Result<ProcessedRow> {
        self.0.process_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::EdgeKind;
    use serde_json::json;

    fn matrix_row() -> SourceRow {
        SourceRow::from(json!({
            "id": 1,
            "tmdb_id": 603,
            "title": "The Matrix",
            "runtime": 136,
            "overview": null,
            "genres": r#"[{"id": 28, "name": "Action"}, {"id": 878, "name": "Sci-Fi"}]"#,
            "credits": r#"{"cast": [{"id": 6384, "name": "Keanu Reeves", "character": "Neo"}]}"#,
            "release_dates": r#"{"results": [{"iso_3166_1": "DE", "release_dates": [{"certification": "16", "type": 3}]}]}"#,
            "updated_at": "2024-05-01T10:00:00Z",
        }))
    }

    #[test]
    fn decomposed_columns_leave_the_primary() {
        let processed = MovieProcessor::new().process_row(&matrix_row()).unwrap();
        let primary = &processed.primary;

        assert_eq!(primary["_key"], "the_matrix_603");
        assert_eq!(primary["tmdb_id"], 603);
        assert_eq!(primary["source_id"], 1);
        assert_eq!(primary["source_updated_at"], "2024-05-01T10:00:00Z");
        assert_eq!(primary["max_age_rating"], 16);
        for column in ["genres", "credits", "release_dates", "id", "updated_at", "overview"] {
            assert!(!primary.contains_key(column), "{column} should be gone");
        }

        let batch = &processed.batch;
        assert_eq!(batch.vertices(VertexKind::Genre).len(), 2);
        assert_eq!(batch.edges(EdgeKind::HasGenre).len(), 2);
        assert_eq!(batch.vertices(VertexKind::Person).len(), 1);
    }

    #[test]
    fn processing_is_deterministic() {
        let processor = MovieProcessor::new();
        let first = processor.process_row(&matrix_row()).unwrap();
        let second = processor.process_row(&matrix_row()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn shows_take_their_title_from_name() {
        let row = SourceRow::from(json!({"id": 9, "tmdb_id": 95396, "name": "Severance"}));
        let processed = ShowProcessor::new().process_row(&row).unwrap();
        assert_eq!(processed.primary["_key"], "severance_95396");
        assert_eq!(processed.primary["title"], "Severance");
        assert_eq!(processed.primary["name"], "Severance");
    }

    #[test]
    fn rows_without_tmdb_id_are_malformed() {
        let row = SourceRow::from(json!({"id": 5, "title": "Untitled"}));
        let err = MovieProcessor::new().process_row(&row).unwrap_err();
        assert!(matches!(err, SyncError::MalformedRow(_)));
    }
}
