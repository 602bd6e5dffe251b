use std::collections::HashSet;

use serde_json::Value;

use super::{SatelliteProcessor, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::models::CodeInput;
use crate::source::SourceRow;
use crate::utils::key::make_key;

/// Country and language edges. The `Country` and `Language` vertices
/// themselves come from the reference tables.
pub struct LocationProcessor;

fn link_codes(
    batch: &mut Batch,
    parent: &DocRef,
    codes: impl IntoIterator<Item = String>,
    target: VertexKind,
    edge: EdgeKind,
) -> Result<()> {
    let mut seen = HashSet::new();
    for code in codes {
        let key = make_key(&[code.as_str().into()]);
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }
        batch.add_edge(edge, parent, &DocRef::new(target, key), &[], Value::Null)?;
    }
    Ok(())
}

fn codes_of(row: &SourceRow, columns: &[&str]) -> Vec<String> {
    columns
        .iter()
        .flat_map(|column| parse_list::<CodeInput>(row, column, &[]))
        .filter_map(|input| input.code().map(str::to_string))
        .collect()
}

impl SatelliteProcessor for LocationProcessor {
    fn name(&self) -> &'static str {
        "locations"
    }

    fn columns(&self) -> &'static [&'static str] {
        &[
            "production_countries",
            "origin_country",
            "spoken_languages",
            "original_language",
        ]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();

        link_codes(
            &mut batch,
            parent,
            codes_of(row, &["production_countries", "origin_country"]),
            VertexKind::Country,
            EdgeKind::OriginatesFromCountry,
        )?;
        link_codes(
            &mut batch,
            parent,
            codes_of(row, &["spoken_languages"]),
            VertexKind::Language,
            EdgeKind::HasSpokenLanguage,
        )?;
        link_codes(
            &mut batch,
            parent,
            row.str("original_language").map(str::to_string),
            VertexKind::Language,
            EdgeKind::HasOriginalLanguage,
        )?;

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emits_edges_only() {
        let row = SourceRow::from(json!({
            "production_countries": r#"[{"iso_3166_1": "US", "name": "United States of America"}, {"iso_3166_1": "AU"}]"#,
            "origin_country": r#"["US"]"#,
            "spoken_languages": r#"[{"iso_639_1": "en", "english_name": "English", "name": "English"}]"#,
            "original_language": "en",
        }));
        let parent = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let batch = LocationProcessor.process(&row, &parent).unwrap();

        assert_eq!(batch.vertex_count(), 0);
        let countries: Vec<_> = batch
            .edges(EdgeKind::OriginatesFromCountry)
            .iter()
            .map(|e| e["_to"].clone())
            .collect();
        assert_eq!(countries, vec![json!("Country/us"), json!("Country/au")]);
        assert_eq!(batch.edges(EdgeKind::HasSpokenLanguage)[0]["_to"], "Language/en");
        assert_eq!(batch.edges(EdgeKind::HasOriginalLanguage).len(), 1);
    }
}
