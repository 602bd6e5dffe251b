use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SatelliteProcessor, clean, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Deserialize)]
struct RawAlternativeTitle {
    #[serde(default)]
    iso_3166_1: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    backdrop_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AlternativeTitleVertex<'a> {
    pub parent_key: &'a str,
    pub title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_type: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct MovieSeriesVertex<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backdrop_path: Option<&'a str>,
}

/// Alternative titles and movie series membership.
pub struct MetadataProcessor;

impl SatelliteProcessor for MetadataProcessor {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["alternative_titles", "belongs_to_collection"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();

        let titles: Vec<RawAlternativeTitle> =
            parse_list(row, "alternative_titles", &["titles", "results"]);
        for alt in &titles {
            let Some(title) = clean(alt.title.as_deref()) else { continue };
            let country = clean(alt.iso_3166_1.as_deref());
            let title_type = clean(alt.kind.as_deref());
            let key = make_key(&[
                parent.key.as_str().into(),
                country.into(),
                title.into(),
                title_type.into(),
            ]);
            let vertex = AlternativeTitleVertex {
                parent_key: &parent.key,
                title,
                country,
                title_type,
            };
            let target = batch.add_vertex(VertexKind::AlternativeTitle, key, &vertex)?;
            batch.add_edge(EdgeKind::HasAlternativeTitle, parent, &target, &[], Value::Null)?;
        }

        if parent.kind == VertexKind::Movie {
            if let Some(series) = row.parse_json::<RawCollection>("belongs_to_collection")? {
                if let Some(name) = clean(series.name.as_deref()) {
                    let key = make_key(&[name.into(), series.id.into()]);
                    let vertex = MovieSeriesVertex {
                        name,
                        tmdb_id: series.id,
                        poster_path: clean(series.poster_path.as_deref()),
                        backdrop_path: clean(series.backdrop_path.as_deref()),
                    };
                    let target = batch.add_vertex(VertexKind::MovieSeries, key, &vertex)?;
                    batch.add_edge(EdgeKind::BelongsToMovieSeries, parent, &target, &[], Value::Null)?;
                }
            }
        }

        Ok(batch)
    }
}
