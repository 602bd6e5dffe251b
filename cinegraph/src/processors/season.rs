use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SatelliteProcessor, clean, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Deserialize)]
struct RawSeason {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    season_number: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    air_date: Option<String>,
    #[serde(default)]
    episode_count: Option<i64>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    vote_average: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SeasonVertex<'a> {
    pub parent_key: &'a str,
    pub season_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_date: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_average: Option<f64>,
}

pub struct SeasonProcessor;

impl SatelliteProcessor for SeasonProcessor {
    fn name(&self) -> &'static str {
        "seasons"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["seasons"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        if parent.kind != VertexKind::Show {
            return Ok(batch);
        }
        let seasons: Vec<RawSeason> = parse_list(row, "seasons", &["seasons"]);
        for season in &seasons {
            let Some(number) = season.season_number else { continue };
            let key = make_key(&[parent.key.as_str().into(), number.into()]);
            let vertex = SeasonVertex {
                parent_key: &parent.key,
                season_number: number,
                tmdb_id: season.id,
                name: clean(season.name.as_deref()),
                overview: clean(season.overview.as_deref()),
                air_date: clean(season.air_date.as_deref()),
                episode_count: season.episode_count,
                poster_path: clean(season.poster_path.as_deref()),
                vote_average: season.vote_average,
            };
            let target = batch.add_vertex(VertexKind::Season, key, &vertex)?;
            batch.add_edge(EdgeKind::HasSeason, parent, &target, &[], Value::Null)?;
        }
        Ok(batch)
    }
}
