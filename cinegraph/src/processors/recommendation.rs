use serde::Deserialize;
use serde_json::json;

use super::{SatelliteProcessor, clean, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::EdgeKind;
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Deserialize)]
struct RawRelated {
    #[serde(default, alias = "tmdb_id")]
    id: Option<i64>,
    #[serde(default, alias = "name")]
    title: Option<String>,
}

/// Links a title to the titles it recommends or resembles. Targets live in
/// the same collection as the parent and may not be imported yet.
pub struct RecommendationProcessor;

const COLUMNS: &[(&str, EdgeKind)] = &[
    ("recommendations", EdgeKind::TmdbRecommends),
    ("similar", EdgeKind::TmdbSimilarTo),
];

impl SatelliteProcessor for RecommendationProcessor {
    fn name(&self) -> &'static str {
        "recommendations"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["recommendations", "similar"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        for (column, edge) in COLUMNS {
            let related: Vec<RawRelated> = parse_list(row, column, &["results"]);
            for (rank, item) in related.iter().enumerate() {
                let (Some(id), Some(title)) = (item.id, clean(item.title.as_deref())) else {
                    continue;
                };
                let key = make_key(&[title.into(), id.into()]);
                if key.is_empty() || key == parent.key {
                    continue;
                }
                let target = DocRef::new(parent.kind, key);
                batch.add_edge(*edge, parent, &target, &[], json!({ "rank": rank }))?;
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::VertexKind;

    #[test]
    fn self_edges_point_into_the_parent_collection() {
        let row = SourceRow::from(json!({
            "recommendations": {"results": [
                {"id": 604, "title": "The Matrix Reloaded"},
                {"id": 605},
            ]},
            "similar": [{"id": 603, "title": "The Matrix"}, {"id": 27205, "title": "Inception"}],
        }));
        let parent = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let batch = RecommendationProcessor.process(&row, &parent).unwrap();

        let recs = batch.edges(EdgeKind::TmdbRecommends);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0]["_to"], "Movie/the_matrix_reloaded_604");
        let similar = batch.edges(EdgeKind::TmdbSimilarTo);
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0]["_to"], "Movie/inception_27205");
        assert_eq!(similar[0]["rank"], 1);
        assert_eq!(batch.vertex_count(), 0);
    }
}
