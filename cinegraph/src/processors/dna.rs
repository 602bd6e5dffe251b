use serde::Serialize;
use serde_json::{Value, json};

use super::SatelliteProcessor;
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::models::DnaTagId;
use crate::source::SourceRow;

#[derive(Debug, Serialize)]
pub struct DnaTagVertex<'a> {
    pub category: &'a str,
    pub value: &'a str,
}

struct DnaEntry {
    category: String,
    value: String,
    weight: Option<f64>,
}

pub struct DnaProcessor;

// Accepts `[{"category", "value", "weight"?}]` as well as
// `{"mood": ["dark", "tense"], "setting": "space"}`.
fn entries(raw: Option<Value>) -> Vec<DnaEntry> {
    let mut out = Vec::new();
    match raw {
        Some(Value::Array(items)) => {
            for item in items {
                let category = item.get("category").and_then(Value::as_str);
                let value = item
                    .get("value")
                    .or_else(|| item.get("tag"))
                    .and_then(Value::as_str);
                if let (Some(category), Some(value)) = (category, value) {
                    out.push(DnaEntry {
                        category: category.trim().to_string(),
                        value: value.trim().to_string(),
                        weight: item
                            .get("weight")
                            .or_else(|| item.get("score"))
                            .and_then(Value::as_f64),
                    });
                }
            }
        }
        Some(Value::Object(map)) => {
            for (category, values) in map {
                let values = match values {
                    Value::Array(values) => values,
                    single @ Value::String(_) => vec![single],
                    _ => continue,
                };
                for value in values.iter().filter_map(Value::as_str) {
                    out.push(DnaEntry {
                        category: category.trim().to_string(),
                        value: value.trim().to_string(),
                        weight: None,
                    });
                }
            }
        }
        _ => {}
    }
    out.retain(|e| !e.category.is_empty() && !e.value.is_empty());
    out
}

impl SatelliteProcessor for DnaProcessor {
    fn name(&self) -> &'static str {
        "dna"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["dna"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        for entry in entries(row.json("dna")) {
            let id = DnaTagId::new(entry.category, entry.value);
            let key = id.key();
            if key.is_empty() {
                continue;
            }
            let tag = batch.add_vertex(
                VertexKind::DnaTag,
                key,
                &DnaTagVertex {
                    category: &id.category,
                    value: &id.value,
                },
            )?;
            let attributes = match entry.weight {
                Some(weight) => json!({ "weight": weight }),
                None => Value::Null,
            };
            batch.add_edge(EdgeKind::HasDnaTag, parent, &tag, &[], attributes)?;
            batch.note_dna_tag(id);
        }
        Ok(batch)
    }
}
