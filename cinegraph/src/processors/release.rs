use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{SatelliteProcessor, clean, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Deserialize)]
struct RawReleaseDate {
    #[serde(default)]
    certification: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<Value>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    iso_639_1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReleaseCountry {
    #[serde(default)]
    iso_3166_1: Option<String>,
    #[serde(default)]
    release_dates: Vec<RawReleaseDate>,
}

#[derive(Debug, Deserialize)]
struct RawContentRating {
    #[serde(default)]
    iso_3166_1: Option<String>,
    #[serde(default, alias = "certification")]
    rating: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseEventVertex<'a> {
    pub parent_key: &'a str,
    pub country: &'a str,
    pub release_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_type_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certification: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct AgeClassificationVertex<'a> {
    pub parent_key: &'a str,
    pub country: &'a str,
    pub certification: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_age: Option<u32>,
}

struct ReleaseEvent<'a> {
    country: &'a str,
    date: Option<&'a str>,
    release_type: String,
    release_type_id: Option<i64>,
    certification: Option<&'a str>,
    note: Option<&'a str>,
    language: Option<&'a str>,
}

/// Numeric certifications: digits with an optional trailing `+` ("16", "12+").
pub fn numeric_certification(certification: &str) -> Option<u32> {
    let trimmed = certification.trim();
    let digits = trimmed.strip_suffix('+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn release_type_name(id: i64) -> &'static str {
    match id {
        1 => "premiere",
        2 => "theatrical_limited",
        3 => "theatrical",
        4 => "digital",
        5 => "physical",
        6 => "tv",
        _ => "other",
    }
}

fn release_type(raw: Option<&Value>) -> (String, Option<i64>) {
    match raw {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(id) => (release_type_name(id).to_string(), Some(id)),
            None => ("other".to_string(), None),
        },
        Some(Value::String(s)) if !s.trim().is_empty() => match s.trim().parse::<i64>() {
            Ok(id) => (release_type_name(id).to_string(), Some(id)),
            Err(_) => (s.trim().to_lowercase(), None),
        },
        _ => ("other".to_string(), None),
    }
}

/// Release events and age classifications. The strictest numeric
/// certification per country is denormalized onto the primary.
pub struct ReleaseProcessor;

impl ReleaseProcessor {
    fn emit(
        &self,
        batch: &mut Batch,
        parent: &DocRef,
        event: &ReleaseEvent<'_>,
        strictest: &mut BTreeMap<String, u32>,
    ) -> Result<()> {
        let country_key = make_key(&[event.country.into()]);
        if country_key.is_empty() {
            return Ok(());
        }
        let key = make_key(&[
            parent.key.as_str().into(),
            event.country.into(),
            event.date.into(),
            event.release_type.as_str().into(),
        ]);
        let vertex = ReleaseEventVertex {
            parent_key: &parent.key,
            country: event.country,
            release_type: &event.release_type,
            release_type_id: event.release_type_id,
            release_date: event.date,
            certification: event.certification,
            note: event.note,
            language: event.language,
        };
        let release = batch.add_vertex(VertexKind::ReleaseEvent, key, &vertex)?;
        batch.add_edge(EdgeKind::HasReleaseEvent, parent, &release, &[], Value::Null)?;
        let country = DocRef::new(VertexKind::Country, country_key.clone());
        batch.add_edge(EdgeKind::ReleasedInCountry, &release, &country, &[], Value::Null)?;

        let Some(certification) = event.certification else { return Ok(()) };
        let minimum_age = numeric_certification(certification);
        let classification_key = make_key(&[
            parent.key.as_str().into(),
            event.country.into(),
            certification.into(),
        ]);
        if classification_key.is_empty() {
            return Ok(());
        }
        let classification = batch.add_vertex(
            VertexKind::AgeClassification,
            classification_key,
            &AgeClassificationVertex {
                parent_key: &parent.key,
                country: event.country,
                certification,
                minimum_age,
            },
        )?;
        batch.add_edge(
            EdgeKind::HasAgeClassification,
            &release,
            &classification,
            &[],
            Value::Null,
        )?;
        batch.add_edge(
            EdgeKind::ClassifiedInCountry,
            &classification,
            &country,
            &[],
            Value::Null,
        )?;

        if let Some(age) = minimum_age {
            let slot = strictest.entry(event.country.to_uppercase()).or_insert(age);
            *slot = (*slot).max(age);
        }
        Ok(())
    }
}

impl SatelliteProcessor for ReleaseProcessor {
    fn name(&self) -> &'static str {
        "releases"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["release_dates", "content_ratings"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        let mut strictest: BTreeMap<String, u32> = BTreeMap::new();

        let countries: Vec<RawReleaseCountry> = parse_list(row, "release_dates", &["results"]);
        for entry in &countries {
            let Some(country) = clean(entry.iso_3166_1.as_deref()) else { continue };
            for date in &entry.release_dates {
                let (release_type, release_type_id) = release_type(date.kind.as_ref());
                let event = ReleaseEvent {
                    country,
                    date: clean(date.release_date.as_deref()),
                    release_type,
                    release_type_id,
                    certification: clean(date.certification.as_deref()),
                    note: clean(date.note.as_deref()),
                    language: clean(date.iso_639_1.as_deref()),
                };
                self.emit(&mut batch, parent, &event, &mut strictest)?;
            }
        }

        let ratings: Vec<RawContentRating> = parse_list(row, "content_ratings", &["results"]);
        for rating in &ratings {
            let Some(country) = clean(rating.iso_3166_1.as_deref()) else { continue };
            let event = ReleaseEvent {
                country,
                date: None,
                release_type: "rating".to_string(),
                release_type_id: None,
                certification: clean(rating.rating.as_deref()),
                note: None,
                language: None,
            };
            self.emit(&mut batch, parent, &event, &mut strictest)?;
        }

        if let Some(max) = strictest.values().copied().max() {
            batch.set_primary_field("age_ratings", json!(strictest));
            batch.set_primary_field("max_age_rating", json!(max));
        }
        Ok(batch)
    }
}
