//! Entity processors.
//!
//! A satellite processor turns the columns it owns into satellite vertices
//! and edges hanging off one primary vertex. The composite processors run
//! every satellite processor over a row and assemble the primary document.

pub mod composite;
pub mod dna;
pub mod location;
pub mod media;
pub mod metadata;
pub mod person;
pub mod production;
pub mod recommendation;
pub mod release;
pub mod score;
pub mod season;
pub mod static_data;
pub mod streaming;
pub mod taxonomy;
pub mod translation;

use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::batch::{Batch, DocRef};
use crate::collections::VertexKind;
use crate::errors::Result;
use crate::source::SourceRow;
use crate::store::Document;

pub use composite::{MovieProcessor, ShowProcessor};
pub use static_data::StaticProcessor;

pub trait SatelliteProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Columns this processor decomposes; they are removed from the primary.
    fn columns(&self) -> &'static [&'static str];

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRow {
    pub primary: Document,
    pub batch: Batch,
}

/// Maps one source row to a document of `collection` plus everything
/// decomposed from it.
pub trait RowProcessor: Send + Sync {
    fn collection(&self) -> VertexKind;

    fn process_row(&self, row: &SourceRow) -> Result<ProcessedRow>;
}

/// Items of a list column: a bare array, or an object holding the array
/// under one of `wrappers` (`{"results": [...]}`).
pub(crate) fn list_items(value: Option<Value>, wrappers: &[&str]) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => wrappers
            .iter()
            .find_map(|w| match map.remove(*w) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Typed items of a list column. Items that do not fit `T` are skipped.
pub(crate) fn parse_list<T: DeserializeOwned>(row: &SourceRow, column: &str, wrappers: &[&str]) -> Vec<T> {
    list_items(row.json(column), wrappers)
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                debug!("skipping malformed item in '{}': {}", column, err);
                None
            }
        })
        .collect()
}

pub(crate) fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
