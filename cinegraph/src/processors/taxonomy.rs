use serde::Serialize;
use serde_json::Value;

use super::{SatelliteProcessor, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::models::TagInput;
use crate::source::SourceRow;
use crate::utils::key::make_key;

/// Controlled-vocabulary vertex. Shared by every title carrying the label.
#[derive(Debug, Serialize)]
pub struct TagVertex<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<i64>,
}

pub struct TagProcessor {
    name: &'static str,
    columns: &'static [&'static str],
    wrappers: &'static [&'static str],
    vertex: VertexKind,
    edge: EdgeKind,
}

impl TagProcessor {
    pub fn genres() -> Self {
        Self {
            name: "genres",
            columns: &["genres"],
            wrappers: &["genres"],
            vertex: VertexKind::Genre,
            edge: EdgeKind::HasGenre,
        }
    }

    pub fn keywords() -> Self {
        Self {
            name: "keywords",
            columns: &["keywords"],
            wrappers: &["keywords", "results"],
            vertex: VertexKind::Keyword,
            edge: EdgeKind::HasKeyword,
        }
    }

    pub fn tropes() -> Self {
        Self {
            name: "tropes",
            columns: &["tropes"],
            wrappers: &["tropes", "results"],
            vertex: VertexKind::Trope,
            edge: EdgeKind::HasTrope,
        }
    }
}

impl SatelliteProcessor for TagProcessor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn columns(&self) -> &'static [&'static str] {
        self.columns
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        for column in self.columns {
            for tag in parse_list::<TagInput>(row, column, self.wrappers) {
                let Some(name) = tag.name() else { continue };
                let key = make_key(&[name.into()]);
                if key.is_empty() {
                    continue;
                }
                let vertex = TagVertex {
                    name,
                    tmdb_id: tag.id(),
                };
                let target = batch.add_vertex(self.vertex, key, &vertex)?;
                batch.add_edge(self.edge, parent, &target, &[], Value::Null)?;
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn genres_become_shared_vertices() {
        let row = SourceRow::from(json!({
            "genres": r#"[{"id": 28, "name": "Action"}, {"id": 878, "name": "Sci-Fi"}]"#,
        }));
        let parent = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let batch = TagProcessor::genres().process(&row, &parent).unwrap();

        let keys: Vec<_> = batch
            .vertices(VertexKind::Genre)
            .iter()
            .map(|d| d["_key"].clone())
            .collect();
        assert_eq!(keys, vec![json!("action"), json!("sci-fi")]);
        assert!(batch.vertices(VertexKind::Genre)[0].get("parent_key").is_none());
        assert_eq!(batch.edges(EdgeKind::HasGenre).len(), 2);
    }

    #[test]
    fn keywords_accept_wrapped_labels() {
        let row = SourceRow::from(json!({
            "keywords": {"results": ["dystopia", {"name": "simulated reality"}, {"id": 9}]},
        }));
        let parent = DocRef::new(VertexKind::Show, "severance_95396");
        let batch = TagProcessor::keywords().process(&row, &parent).unwrap();
        assert_eq!(batch.vertices(VertexKind::Keyword).len(), 2);
        assert_eq!(batch.vertices(VertexKind::Keyword)[1]["_key"], "simulated_reality");
    }
}
