use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SatelliteProcessor, clean, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Deserialize)]
struct RawCompany {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    logo_path: Option<String>,
    #[serde(default)]
    origin_country: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompanyVertex<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_country: Option<&'a str>,
}

/// Production companies and, for shows, broadcasting networks.
pub struct ProductionProcessor;

fn company_vertices(
    batch: &mut Batch,
    row: &SourceRow,
    column: &str,
    kind: VertexKind,
) -> Result<Vec<DocRef>> {
    let companies: Vec<RawCompany> = parse_list(row, column, &[column]);
    let mut refs = Vec::with_capacity(companies.len());
    for company in &companies {
        let Some(name) = clean(company.name.as_deref()) else { continue };
        let key = make_key(&[name.into(), company.id.into()]);
        let vertex = CompanyVertex {
            name,
            tmdb_id: company.id,
            logo_path: clean(company.logo_path.as_deref()),
            origin_country: clean(company.origin_country.as_deref()),
        };
        refs.push(batch.add_vertex(kind, key, &vertex)?);
    }
    Ok(refs)
}

impl SatelliteProcessor for ProductionProcessor {
    fn name(&self) -> &'static str {
        "production"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["production_companies", "networks"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();

        for company in company_vertices(&mut batch, row, "production_companies", VertexKind::ProductionCompany)? {
            batch.add_edge(EdgeKind::ProducedBy, parent, &company, &[], Value::Null)?;
        }

        if parent.kind == VertexKind::Show {
            for network in company_vertices(&mut batch, row, "networks", VertexKind::Network)? {
                batch.add_edge(EdgeKind::NetworkFor, &network, parent, &[], Value::Null)?;
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
    fn companies_and_networks() {
        let row = SourceRow::from(json!({
            "production_companies": r#"[{"id": 174, "name": "Warner Bros. Pictures", "origin_country": "US"}]"#,
            "networks": r#"[{"id": 2552, "name": "Apple TV+"}]"#,
        }));
        let parent = DocRef::new(VertexKind::Show, "severance_95396");
        let batch = ProductionProcessor.process(&row, &parent).unwrap();

        assert_eq!(
            batch.vertices(VertexKind::ProductionCompany)[0]["_key"],
            "warner_bros_pictures_174"
        );
        let network_edge = &batch.edges(EdgeKind::NetworkFor)[0];
        assert_eq!(network_edge["_from"], "Network/apple_tv_2552");
        assert_eq!(network_edge["_to"], "Show/severance_95396");
    }

    #[test]
    fn movies_ignore_networks() {
        let row = SourceRow::from(json!({"networks": [{"id": 1, "name": "HBO"}]}));
        let parent = DocRef::new(VertexKind::Movie, "m_1");
        assert!(ProductionProcessor.process(&row, &parent).unwrap().is_empty());
    }
}
