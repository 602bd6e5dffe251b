use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::debug;
use serde_json::Value;

use super::{PassStats, PostProcessContext, PostProcessor};
use crate::collections::VertexKind;
use crate::errors::Result;
use crate::source::{SourceRow, SqlParam};
use crate::store::{Document, ScanFilter, ScanQuery};

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// ISO-8601 to epoch milliseconds. Values without an offset are read as UTC.
pub fn iso_to_epoch_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn detail_patch(key: &str, detail: &SourceRow) -> Option<Document> {
    let mut patch = Document::new();
    if let Some(price) = detail.f64("price") {
        patch.insert("price".to_string(), Value::from(price));
    }
    for field in ["currency", "quality"] {
        if let Some(value) = detail.str(field) {
            patch.insert(field.to_string(), Value::String(value.to_string()));
        }
    }
    for field in ["valid_from", "valid_until"] {
        if let Some(ms) = detail.str(field).and_then(iso_to_epoch_ms) {
            patch.insert(field.to_string(), Value::from(ms));
        }
    }
    if patch.is_empty() {
        return None;
    }
    patch.insert("_key".to_string(), Value::String(key.to_string()));
    Some(patch)
}

/// Joins streaming offers with `streaming_offer_details` on their canonical
/// URL and merges price, currency, quality and the validity window.
pub struct LinkEnrichment;

#[async_trait]
impl PostProcessor for LinkEnrichment {
    fn name(&self) -> &'static str {
        "offer_links"
    }

    async fn run(&self, ctx: &PostProcessContext) -> Result<PassStats> {
        let store = ctx.engine.store();
        let collection = VertexKind::StreamingAvailability.name();
        let page_size = ctx.config.link_page_size;
        let mut stats = PassStats::default();
        let mut after_key: Option<String> = None;

        loop {
            let page = store
                .scan(
                    collection,
                    &ScanQuery {
                        filter: ScanFilter::HasField("url".to_string()),
                        after_key: after_key.clone(),
                        limit: page_size,
                    },
                )
                .await?;
            let Some(last) = page.last().and_then(|d| d.get("_key")).and_then(Value::as_str) else {
                break;
            };
            after_key = Some(last.to_string());
            stats.examined += page.len();

            let offers: Vec<(&str, &str)> = page
                .iter()
                .filter_map(|doc| {
                    let key = doc.get("_key").and_then(Value::as_str)?;
                    let url = doc.get("url").and_then(Value::as_str)?;
                    Some((key, url))
                })
                .collect();
            let urls: BTreeSet<&str> = offers.iter().map(|(_, url)| *url).collect();

            let placeholders = vec!["?"; urls.len()].join(", ");
            let sql = format!(
                "SELECT url, price, currency, quality, valid_from, valid_until \
                 FROM streaming_offer_details WHERE url IN ({placeholders})"
            );
            let params: Vec<SqlParam> = urls.iter().map(|url| SqlParam::from(*url)).collect();
            let details: HashMap<String, SourceRow> = ctx
                .source
                .query(&sql, &params)
                .await?
                .into_iter()
                .filter_map(|row| row.str("url").map(str::to_string).map(|url| (url, row)))
                .collect();

            let mut patches = Vec::new();
            for (key, url) in &offers {
                match details.get(*url).and_then(|detail| detail_patch(key, detail)) {
                    Some(patch) => patches.push(patch),
                    None => stats.skipped += 1,
                }
            }
            stats.skipped += page.len() - offers.len();
            if !patches.is_empty() {
                let written = ctx.engine.update_many(collection, patches).await?;
                stats.updated += written.written();
                stats.skipped += written.missing;
            }
            debug!("offer links: {} examined so far", stats.examined);

            if page.len() < page_size {
                break;
            }
        }
        Ok(stats)
    }
}
