//! Turns opaque store rejections into reports that name the offending
//! documents.

use std::collections::{BTreeMap, HashSet};

use log::warn;
use serde_json::Value;

use crate::errors::{EdgeOffender, KeyOffender, Result, StructuralError, UniqueCollision};
use crate::store::{Document, GraphStore, IndexType};
use crate::utils::key::{is_legal_document_key, is_legal_edge_ref};

fn key_of(doc: &Document) -> Option<String> {
    doc.get("_key").and_then(Value::as_str).map(str::to_string)
}

/// Why `sanitized` cannot be stored as a document key, if it cannot.
pub fn key_offender(original: Option<&str>, sanitized: Option<&str>) -> Option<KeyOffender> {
    let reason = match sanitized {
        None => "missing _key",
        Some("") => "key is empty after sanitizing",
        Some(key) if !is_legal_document_key(key) => "key exceeds 254 characters or uses illegal characters",
        Some(_) => return None,
    };
    Some(KeyOffender {
        original: original.map(str::to_string),
        sanitized: sanitized.unwrap_or_default().to_string(),
        reason: reason.to_string(),
    })
}

/// Local `_from` / `_to` checks for one edge document.
pub fn edge_offenders(doc: &Document) -> Vec<EdgeOffender> {
    let key = key_of(doc);
    let mut offenders = Vec::new();
    for field in ["_from", "_to"] {
        let value = doc.get(field);
        let reason = match value {
            None | Some(Value::Null) => "missing",
            Some(Value::String(id)) if is_legal_edge_ref(id) => continue,
            Some(Value::String(_)) => "expected '<collection>/<key>' with exactly one '/'",
            Some(_) => "not a string",
        };
        offenders.push(EdgeOffender {
            key: key.clone(),
            field,
            value: value.cloned(),
            reason: reason.to_string(),
        });
    }
    offenders
}

/// Edge diagnosis for a document the store rejected. Falls back to the
/// store's message when the document looks fine locally.
pub fn rejected_edge(doc: &Document, store_message: &str) -> Vec<EdgeOffender> {
    let offenders = edge_offenders(doc);
    if !offenders.is_empty() {
        return offenders;
    }
    vec![EdgeOffender {
        key: key_of(doc),
        field: "_from",
        value: doc.get("_from").cloned(),
        reason: store_message.to_string(),
    }]
}

struct ValueGroup {
    values: Vec<Value>,
    keys: Vec<String>,
}

/// Replays every unique persistent index of `collection` against `documents`
/// and against the stored documents. Reports documents in the batch that
/// share indexed values, and batch documents whose indexed values are
/// already held by a stored document under another key.
pub async fn unique_violation(
    store: &dyn GraphStore,
    collection: &str,
    documents: &[Document],
) -> Result<StructuralError> {
    let indexes = store.indexes(collection).await?;
    let batch_keys: HashSet<String> = documents.iter().filter_map(key_of).collect();
    let mut collisions = Vec::new();

    for index in indexes
        .iter()
        .filter(|i| i.spec.unique && i.spec.kind == IndexType::Persistent)
    {
        let fields = &index.spec.fields;
        let mut groups: BTreeMap<String, ValueGroup> = BTreeMap::new();
        for doc in documents {
            let Some(key) = key_of(doc) else { continue };
            let values: Vec<Value> = fields
                .iter()
                .map(|f| doc.get(f).cloned().unwrap_or(Value::Null))
                .collect();
            if index.spec.sparse && values.iter().any(Value::is_null) {
                continue;
            }
            let signature = serde_json::to_string(&values)?;
            let group = groups.entry(signature).or_insert_with(|| ValueGroup {
                values,
                keys: Vec::new(),
            });
            if !group.keys.contains(&key) {
                group.keys.push(key);
            }
        }

        for group in groups.values().filter(|g| g.keys.len() > 1) {
            collisions.push(UniqueCollision {
                index: index.spec.name.clone(),
                fields: fields.clone(),
                values: group.values.clone(),
                keys: group.keys.clone(),
                stored: false,
            });
        }

        if groups.is_empty() {
            continue;
        }
        let tuples: Vec<Vec<Value>> = groups.values().map(|g| g.values.clone()).collect();
        for stored in store.find_by_fields(collection, fields, &tuples).await? {
            let Some(stored_key) = key_of(&stored) else { continue };
            if batch_keys.contains(&stored_key) {
                continue;
            }
            let values: Vec<Value> = fields
                .iter()
                .map(|f| stored.get(f).cloned().unwrap_or(Value::Null))
                .collect();
            let signature = serde_json::to_string(&values)?;
            if let Some(group) = groups.get(&signature) {
                let mut keys = group.keys.clone();
                keys.push(stored_key);
                collisions.push(UniqueCollision {
                    index: index.spec.name.clone(),
                    fields: fields.clone(),
                    values,
                    keys,
                    stored: true,
                });
            }
        }
    }

    if collisions.is_empty() {
        warn!(
            "unique violation in '{}' could not be reproduced from {} documents",
            collection,
            documents.len()
        );
    }
    Ok(StructuralError::UniqueViolation {
        collection: collection.to_string(),
        collisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CollectionKind, IndexSpec, MemoryStore};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn key_offenders() {
        assert!(key_offender(Some("the_matrix_603"), Some("the_matrix_603")).is_none());
        let empty = key_offender(Some("???"), Some("")).unwrap();
        assert_eq!(empty.original.as_deref(), Some("???"));
        assert!(key_offender(None, None).is_some());
    }

    #[test]
    fn edge_refs_are_checked_per_field() {
        let edge = doc(json!({"_key": "e", "_from": "Movie/a/b", "_to": 3}));
        let offenders = edge_offenders(&edge);
        assert_eq!(offenders.len(), 2);
        assert_eq!(offenders[0].field, "_from");
        assert_eq!(offenders[1].reason, "not a string");
        assert!(edge_offenders(&doc(json!({"_from": "Movie/a", "_to": "Genre/b"}))).is_empty());
    }

    #[tokio::test]
    async fn reports_batch_and_stored_collisions() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.create_collection("Movie", CollectionKind::Document).await?;
        store
            .create_index("Movie", &IndexSpec::persistent("movie_tmdb_id", &["tmdb_id"]).unique().sparse())
            .await?;
        store.seed("Movie", doc(json!({"_key": "matrix_603", "tmdb_id": 603})))?;

        let batch = vec![
            doc(json!({"_key": "the_matrix_603", "tmdb_id": 603})),
            doc(json!({"_key": "heat_949", "tmdb_id": 949})),
            doc(json!({"_key": "heat_1995_949", "tmdb_id": 949})),
            doc(json!({"_key": "untitled"})),
        ];
        let StructuralError::UniqueViolation { collisions, .. } =
            unique_violation(&store, "Movie", &batch).await?
        else {
            panic!("expected a unique violation");
        };

        assert_eq!(collisions.len(), 2);
        let within = collisions.iter().find(|c| !c.stored).unwrap();
        assert_eq!(within.keys, vec!["heat_949", "heat_1995_949"]);
        let stored = collisions.iter().find(|c| c.stored).unwrap();
        assert_eq!(stored.keys, vec!["the_matrix_603", "matrix_603"]);
        Ok(())
    }
}
