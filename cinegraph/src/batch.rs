//! Per-row output of the entity processors.
//!
//! A `Batch` is a plain value: processors build a fresh one per call and the
//! composite processor merges them. Nothing is shared between rows.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::collections::{EdgeKind, VertexKind};
use crate::errors::{Result, SyncError};
use crate::models::DnaTagId;
use crate::store::Document;
use crate::utils::key::{KeyPart, document_id, edge_key};

/// Reference to a vertex by collection and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub kind: VertexKind,
    pub key: String,
}

impl DocRef {
    pub fn new(kind: VertexKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn id(&self) -> String {
        document_id(self.kind.name(), &self.key)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Batch {
    vertices: BTreeMap<VertexKind, Vec<Document>>,
    edges: BTreeMap<EdgeKind, Vec<Document>>,
    primary_fields: Document,
    dna_tags: BTreeSet<DnaTagId>,
}

/// A batch taken apart for flushing.
#[derive(Debug, Default)]
pub struct BatchParts {
    pub vertices: BTreeMap<VertexKind, Vec<Document>>,
    pub edges: BTreeMap<EdgeKind, Vec<Document>>,
    pub primary_fields: Document,
    pub dna_tags: BTreeSet<DnaTagId>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `record` as a vertex of `kind` under `key`.
    pub fn add_vertex<T: Serialize>(&mut self, kind: VertexKind, key: String, record: &T) -> Result<DocRef> {
        if key.is_empty() {
            return Err(SyncError::InvalidArg(format!("empty key for {kind} vertex")));
        }
        let mut doc = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            other => {
                return Err(SyncError::InvalidArg(format!(
                    "{kind} record must serialize to an object, got {other}"
                )));
            }
        };
        doc.insert("_key".to_string(), Value::String(key.clone()));
        self.vertices.entry(kind).or_default().push(doc);
        Ok(DocRef::new(kind, key))
    }

    /// Queues an edge. The edge key is derived from the label, both
    /// endpoints and `discriminator`.
    pub fn add_edge(
        &mut self,
        kind: EdgeKind,
        from: &DocRef,
        to: &DocRef,
        discriminator: &[KeyPart<'_>],
        attributes: Value,
    ) -> Result<()> {
        if !kind.allows(from.kind, to.kind) {
            return Err(SyncError::InvalidArg(format!(
                "{kind} does not connect {} to {}",
                from.kind, to.kind
            )));
        }
        let from_id = from.id();
        let to_id = to.id();
        let mut doc = match attributes {
            Value::Object(map) => map,
            Value::Null => Document::new(),
            other => {
                return Err(SyncError::InvalidArg(format!(
                    "{kind} attributes must be an object, got {other}"
                )));
            }
        };
        doc.insert(
            "_key".to_string(),
            Value::String(edge_key(kind.name(), &from_id, &to_id, discriminator)),
        );
        doc.insert("_from".to_string(), Value::String(from_id));
        doc.insert("_to".to_string(), Value::String(to_id));
        self.edges.entry(kind).or_default().push(doc);
        Ok(())
    }

    /// A field denormalized onto the primary vertex.
    pub fn set_primary_field(&mut self, name: &str, value: Value) {
        self.primary_fields.insert(name.to_string(), value);
    }

    pub fn note_dna_tag(&mut self, tag: DnaTagId) {
        self.dna_tags.insert(tag);
    }

    pub fn merge(&mut self, other: Batch) {
        for (kind, docs) in other.vertices {
            self.vertices.entry(kind).or_default().extend(docs);
        }
        for (kind, docs) in other.edges {
            self.edges.entry(kind).or_default().extend(docs);
        }
        self.primary_fields.extend(other.primary_fields);
        self.dna_tags.extend(other.dna_tags);
    }

    pub fn vertices(&self, kind: VertexKind) -> &[Document] {
        self.vertices.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges(&self, kind: EdgeKind) -> &[Document] {
        self.edges.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn primary_fields(&self) -> &Document {
        &self.primary_fields
    }

    pub fn dna_tags(&self) -> &BTreeSet<DnaTagId> {
        &self.dna_tags
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.values().map(Vec::len).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0 && self.edge_count() == 0 && self.primary_fields.is_empty()
    }

    pub fn into_parts(self) -> BatchParts {
        BatchParts {
            vertices: self.vertices,
            edges: self.edges,
            primary_fields: self.primary_fields,
            dna_tags: self.dna_tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Tag<'a> {
        name: &'a str,
    }

    #[test]
    fn edges_reference_queued_vertices() {
        let movie = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let mut batch = Batch::new();
        let genre = batch
            .add_vertex(VertexKind::Genre, "action".into(), &Tag { name: "Action" })
            .unwrap();
        batch
            .add_edge(EdgeKind::HasGenre, &movie, &genre, &[], json!({}))
            .unwrap();

        let edge = &batch.edges(EdgeKind::HasGenre)[0];
        assert_eq!(edge["_from"], "Movie/the_matrix_603");
        assert_eq!(edge["_to"], "Genre/action");
        assert_eq!(batch.vertices(VertexKind::Genre)[0]["_key"], "action");
    }

    #[test]
    fn rejects_edges_outside_their_definition() {
        let genre = DocRef::new(VertexKind::Genre, "action");
        let movie = DocRef::new(VertexKind::Movie, "m");
        let mut batch = Batch::new();
        assert!(batch
            .add_edge(EdgeKind::HasGenre, &genre, &movie, &[], Value::Null)
            .is_err());
    }

    #[test]
    fn merge_concatenates_buffers() {
        let movie = DocRef::new(VertexKind::Movie, "m");
        let mut a = Batch::new();
        a.add_vertex(VertexKind::Genre, "drama".into(), &Tag { name: "Drama" }).unwrap();
        let mut b = Batch::new();
        let g = b.add_vertex(VertexKind::Genre, "crime".into(), &Tag { name: "Crime" }).unwrap();
        b.add_edge(EdgeKind::HasGenre, &movie, &g, &[], Value::Null).unwrap();
        b.set_primary_field("max_age_rating", json!(16));
        a.merge(b);
        assert_eq!(a.vertex_count(), 2);
        assert_eq!(a.edge_count(), 1);
        assert_eq!(a.primary_fields()["max_age_rating"], 16);
    }
}
