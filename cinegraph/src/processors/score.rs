use serde::Serialize;
use serde_json::Value;

use super::SatelliteProcessor;
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Serialize)]
pub struct ScoreVertex<'a> {
    pub parent_key: &'a str,
    pub source: &'a str,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

struct RawScore {
    source: String,
    value: f64,
    vote_count: Option<i64>,
    max: Option<f64>,
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn from_object(source: &str, obj: &Value) -> Option<RawScore> {
    let value = obj
        .get("value")
        .or_else(|| obj.get("score"))
        .and_then(number)?;
    Some(RawScore {
        source: source.to_string(),
        value,
        vote_count: obj
            .get("vote_count")
            .or_else(|| obj.get("votes"))
            .and_then(Value::as_i64),
        max: obj.get("max").and_then(number),
    })
}

// `[{"source": "imdb", "value": 8.7}]` or `{"imdb": 8.7, "rt": {"value": 88}}`.
fn scores(raw: Option<Value>) -> Vec<RawScore> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let source = item.get("source").and_then(Value::as_str)?;
                from_object(source, item)
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(source, value)| match value {
                Value::Object(_) => from_object(source, value),
                other => number(other).map(|value| RawScore {
                    source: source.clone(),
                    value,
                    vote_count: None,
                    max: None,
                }),
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub struct ScoreProcessor;

impl SatelliteProcessor for ScoreProcessor {
    fn name(&self) -> &'static str {
        "scores"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["scores"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        for score in scores(row.json("scores")) {
            let source = score.source.trim();
            if source.is_empty() {
                continue;
            }
            let key = make_key(&[parent.key.as_str().into(), source.into()]);
            let vertex = ScoreVertex {
                parent_key: &parent.key,
                source,
                value: score.value,
                vote_count: score.vote_count,
                max: score.max,
            };
            let target = batch.add_vertex(VertexKind::Score, key, &vertex)?;
            batch.add_edge(EdgeKind::HasScore, parent, &target, &[], Value::Null)?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn both_score_shapes() {
        let parent = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let row = SourceRow::from(json!({
            "scores": r#"[{"source": "IMDb", "value": 8.7, "vote_count": 2000000}, {"source": "x"}]"#,
        }));
        let batch = ScoreProcessor.process(&row, &parent).unwrap();
        let scores = batch.vertices(VertexKind::Score);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0]["_key"], "the_matrix_603_imdb");
        assert_eq!(scores[0]["vote_count"], 2000000);

        let row = SourceRow::from(json!({"scores": {"metacritic": "73", "rotten_tomatoes": {"value": "83%"}}}));
        let batch = ScoreProcessor.process(&row, &parent).unwrap();
        assert_eq!(batch.vertices(VertexKind::Score).len(), 2);
        assert_eq!(batch.vertices(VertexKind::Score)[1]["value"], 83.0);
    }
}
