use serde::{Deserialize, Serialize};

use crate::collections::VertexKind;
use crate::utils::key::make_key;

/// Natural identity of a semantic-DNA tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DnaTagId {
    pub category: String,
    pub value: String,
}

impl DnaTagId {
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
        }
    }

    /// Key of the `DnaTag` vertex for this identity.
    pub fn key(&self) -> String {
        make_key(&[self.category.as_str().into(), self.value.as_str().into()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaType {
    Movie,
    Show,
}

impl MediaType {
    /// Accepts `movie`, `tv`, `show` and `series`, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "movie" | "movies" | "film" => Some(MediaType::Movie),
            "tv" | "show" | "shows" | "series" => Some(MediaType::Show),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Show => "tv",
        }
    }

    pub fn vertex_kind(self) -> VertexKind {
        match self {
            MediaType::Movie => VertexKind::Movie,
            MediaType::Show => VertexKind::Show,
        }
    }
}

/// A tag given either as a bare label or as `{ "id": .., "name": .. }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagInput {
    Label(String),
    Object {
        #[serde(default)]
        id: Option<i64>,
        #[serde(default, alias = "label", alias = "tag")]
        name: Option<String>,
    },
}

impl TagInput {
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            TagInput::Label(label) => Some(label.as_str()),
            TagInput::Object { name, .. } => name.as_deref(),
        };
        name.map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            TagInput::Label(_) => None,
            TagInput::Object { id, .. } => *id,
        }
    }
}

/// An ISO code given either bare or inside an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CodeInput {
    Code(String),
    Object {
        #[serde(default, alias = "iso_3166_1", alias = "iso_639_1", alias = "code")]
        iso: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl CodeInput {
    pub fn code(&self) -> Option<&str> {
        let code = match self {
            CodeInput::Code(code) => Some(code.as_str()),
            CodeInput::Object { iso, .. } => iso.as_deref(),
        };
        code.map(str::trim).filter(|c| !c.is_empty())
    }
}
