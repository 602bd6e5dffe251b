use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{SatelliteProcessor, clean, list_items};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::make_key;

#[derive(Debug, Default, Deserialize)]
struct RawOffer {
    #[serde(default, alias = "provider_name", alias = "service_name")]
    service: Option<String>,
    #[serde(default, alias = "provider_id")]
    service_id: Option<i64>,
    #[serde(default, alias = "iso_3166_1")]
    country: Option<String>,
    #[serde(default, alias = "monetization_type", alias = "type")]
    offer_type: Option<String>,
    #[serde(default, alias = "presentation_type")]
    quality: Option<String>,
    #[serde(default, alias = "link")]
    url: Option<String>,
    #[serde(default, alias = "retail_price")]
    price: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    logo_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StreamingServiceVertex<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_path: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct StreamingAvailabilityVertex<'a> {
    pub parent_key: &'a str,
    pub service: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<&'a str>,
}

const PROVIDER_GROUPS: &[&str] = &["flatrate", "free", "ads", "rent", "buy"];

pub struct StreamingProcessor;

// Two shapes: a flat list of offers, or the per-country provider map
// `{"US": {"link": .., "flatrate": [{"provider_name": ..}], "rent": [..]}}`
// (optionally wrapped in `results`).
fn offers(raw: Option<Value>) -> Vec<RawOffer> {
    let raw = match raw {
        Some(Value::Object(mut map)) if map.contains_key("results") => map.remove("results"),
        other => other,
    };
    match raw {
        Some(items @ Value::Array(_)) => list_items(Some(items), &[])
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Some(Value::Object(countries)) => {
            let mut out = Vec::new();
            for (country, groups) in countries {
                let link = groups.get("link").and_then(Value::as_str).map(str::to_string);
                for group in PROVIDER_GROUPS {
                    for item in list_items(groups.get(*group).cloned(), &[]) {
                        let Ok(mut offer) = serde_json::from_value::<RawOffer>(item) else {
                            continue;
                        };
                        if offer.country.is_none() {
                            offer.country = Some(country.clone());
                        }
                        if offer.offer_type.is_none() {
                            offer.offer_type = Some(group.to_string());
                        }
                        if offer.url.is_none() {
                            offer.url = link.clone();
                        }
                        out.push(offer);
                    }
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

impl SatelliteProcessor for StreamingProcessor {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["streaming_offers"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        for offer in offers(row.json("streaming_offers")) {
            let Some(service) = clean(offer.service.as_deref()) else { continue };
            let service_key = make_key(&[service.into()]);
            if service_key.is_empty() {
                continue;
            }
            let country = clean(offer.country.as_deref());
            let offer_type = clean(offer.offer_type.as_deref());
            let quality = clean(offer.quality.as_deref());

            let service_ref = batch.add_vertex(
                VertexKind::StreamingService,
                service_key,
                &StreamingServiceVertex {
                    name: service,
                    service_id: offer.service_id,
                    logo_path: clean(offer.logo_path.as_deref()),
                },
            )?;

            let key = make_key(&[
                parent.key.as_str().into(),
                service.into(),
                country.into(),
                offer_type.into(),
                quality.into(),
            ]);
            let availability = batch.add_vertex(
                VertexKind::StreamingAvailability,
                key,
                &StreamingAvailabilityVertex {
                    parent_key: &parent.key,
                    service,
                    country,
                    offer_type,
                    quality,
                    url: clean(offer.url.as_deref()),
                    price: offer.price,
                    currency: clean(offer.currency.as_deref()),
                },
            )?;

            batch.add_edge(
                EdgeKind::HasStreamingAvailability,
                parent,
                &availability,
                &[],
                json!({ "offer_type": offer_type }),
            )?;
            batch.add_edge(EdgeKind::AvailableOn, &availability, &service_ref, &[], Value::Null)?;
            if let Some(country) = country {
                let country_ref = DocRef::new(VertexKind::Country, make_key(&[country.into()]));
                batch.add_edge(EdgeKind::AvailableInCountry, &availability, &country_ref, &[], Value::Null)?;
            }
        }
        Ok(batch)
    }
}
