use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{SatelliteProcessor, clean, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::{KeyPart, make_key};

#[derive(Debug, Deserialize)]
struct RawCredit {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    character: Option<String>,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    job: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    credit_id: Option<String>,
    #[serde(default)]
    profile_path: Option<String>,
    #[serde(default)]
    gender: Option<i64>,
    #[serde(default)]
    known_for_department: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCredits {
    #[serde(default)]
    cast: Vec<serde_json::Value>,
    #[serde(default)]
    crew: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PersonVertex<'a> {
    pub name: &'a str,
    pub tmdb_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_for_department: Option<&'a str>,
}

/// Cast and crew. Show creators count as crew with job `Creator`.
pub struct PersonProcessor;

fn typed(items: Vec<serde_json::Value>) -> Vec<RawCredit> {
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

struct PersonPass<'a> {
    batch: Batch,
    parent: &'a DocRef,
    seen: HashSet<String>,
}

impl PersonPass<'_> {
    /// The person vertex is queued the first time a person shows up.
    fn person(&mut self, credit: &RawCredit) -> Result<Option<DocRef>> {
        let (Some(tmdb_id), Some(name)) = (credit.id, clean(credit.name.as_deref())) else {
            return Ok(None);
        };
        let key = make_key(&[name.into(), tmdb_id.into()]);
        if key.is_empty() {
            return Ok(None);
        }
        if !self.seen.insert(key.clone()) {
            return Ok(Some(DocRef::new(VertexKind::Person, key)));
        }
        let vertex = PersonVertex {
            name,
            tmdb_id,
            profile_path: clean(credit.profile_path.as_deref()),
            gender: credit.gender,
            known_for_department: clean(credit.known_for_department.as_deref()),
        };
        self.batch.add_vertex(VertexKind::Person, key, &vertex).map(Some)
    }

    fn cast(&mut self, credit: &RawCredit) -> Result<()> {
        let Some(person) = self.person(credit)? else { return Ok(()) };
        let character = clean(credit.character.as_deref());
        let discriminator = [match character {
            Some(c) => KeyPart::Text(c),
            None => KeyPart::from(credit.credit_id.as_deref()),
        }];
        self.batch.add_edge(
            EdgeKind::AppearedIn,
            &person,
            self.parent,
            &discriminator,
            json!({
                "character": character,
                "order": credit.order,
                "credit_id": clean(credit.credit_id.as_deref()),
            }),
        )
    }

    fn crew(&mut self, credit: &RawCredit, job_override: Option<&str>) -> Result<()> {
        let Some(person) = self.person(credit)? else { return Ok(()) };
        let job = job_override.or(clean(credit.job.as_deref()));
        let department = clean(credit.department.as_deref());
        self.batch.add_edge(
            EdgeKind::WorkedOn,
            &person,
            self.parent,
            &[job.into(), department.into()],
            json!({
                "job": job,
                "department": department,
                "credit_id": clean(credit.credit_id.as_deref()),
            }),
        )
    }
}

impl SatelliteProcessor for PersonProcessor {
    fn name(&self) -> &'static str {
        "persons"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["credits", "created_by"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let credits = row.parse_json::<RawCredits>("credits")?.unwrap_or_default();
        let mut pass = PersonPass {
            batch: Batch::new(),
            parent,
            seen: HashSet::new(),
        };

        for credit in typed(credits.cast) {
            pass.cast(&credit)?;
        }
        for credit in typed(credits.crew) {
            pass.crew(&credit, None)?;
        }
        for creator in parse_list::<RawCredit>(row, "created_by", &[]) {
            pass.crew(&creator, Some("Creator"))?;
        }
        Ok(pass.batch)
    }
}
