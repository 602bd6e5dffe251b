use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SatelliteProcessor, clean, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Default, Deserialize)]
struct RawTranslationData {
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    tagline: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTranslation {
    #[serde(default)]
    iso_639_1: Option<String>,
    #[serde(default)]
    iso_3166_1: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    english_name: Option<String>,
    #[serde(default)]
    data: Option<RawTranslationData>,
}

#[derive(Debug, Serialize)]
pub struct TranslationVertex<'a> {
    pub parent_key: &'a str,
    pub language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub english_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagline: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<&'a str>,
}

pub struct TranslationProcessor;

impl SatelliteProcessor for TranslationProcessor {
    fn name(&self) -> &'static str {
        "translations"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["translations"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        let translations: Vec<RawTranslation> = parse_list(row, "translations", &["translations"]);
        for translation in &translations {
            let Some(language) = clean(translation.iso_639_1.as_deref()) else { continue };
            let country = clean(translation.iso_3166_1.as_deref());
            let key = make_key(&[parent.key.as_str().into(), language.into(), country.into()]);
            let empty = RawTranslationData::default();
            let data = translation.data.as_ref().unwrap_or(&empty);
            let vertex = TranslationVertex {
                parent_key: &parent.key,
                language,
                country,
                language_name: clean(translation.name.as_deref()),
                english_name: clean(translation.english_name.as_deref()),
                title: clean(data.title.as_deref()),
                overview: clean(data.overview.as_deref()),
                tagline: clean(data.tagline.as_deref()),
                homepage: clean(data.homepage.as_deref()),
            };
            let target = batch.add_vertex(VertexKind::Translation, key, &vertex)?;
            batch.add_edge(EdgeKind::HasTranslation, parent, &target, &[], Value::Null)?;

            let lang = DocRef::new(VertexKind::Language, make_key(&[language.into()]));
            batch.add_edge(EdgeKind::TranslationInLanguage, &target, &lang, &[], Value::Null)?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn translations_link_to_language() {
        let row = SourceRow::from(json!({
            "translations": {"translations": [
                {"iso_639_1": "de", "iso_3166_1": "DE", "name": "Deutsch",
                 "data": {"title": "Matrix", "overview": "..."}},
                {"iso_3166_1": "XX"},
            ]},
        }));
        let parent = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let batch = TranslationProcessor.process(&row, &parent).unwrap();
        let vertices = batch.vertices(VertexKind::Translation);
        assert_eq!(vertices.len(), 1);
        assert_eq!(vertices[0]["_key"], "the_matrix_603_de_de");
        assert_eq!(vertices[0]["title"], "Matrix");
        let edge = &batch.edges(EdgeKind::TranslationInLanguage)[0];
        assert_eq!(edge["_to"], "Language/de");
        assert_eq!(edge["_from"], "Translation/the_matrix_603_de_de");
    }
}
