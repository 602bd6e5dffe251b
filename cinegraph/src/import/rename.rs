//! Retitled primaries.
//!
//! Primary keys are derived from the title, so a row whose title changed
//! arrives under a new key while the stored vertex still holds its
//! `tmdb_id`. Before the page is written the stale vertex is retired: edges
//! and satellites its row regenerates are removed, edges owned by other rows
//! are moved onto the new key.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use serde_json::Value;

use super::engine::BatchImportEngine;
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::store::Document;
use crate::utils::key::{KeyPart, document_id, edge_key, sanitize_document_key};

const TITLE_ID: &str = "tmdb_id";

const INTERACTION_RECORDS: &[VertexKind] = &[
    VertexKind::UserFavorite,
    VertexKind::UserScore,
    VertexKind::UserWishlist,
    VertexKind::UserWatchHistory,
];

#[derive(Debug, Default)]
pub struct Retired {
    /// Stored primaries replaced by a retitled row.
    pub renamed: usize,
    /// Edges owned by other rows, moved onto the new keys. They can only be
    /// written once the new primaries are stored.
    pub repointed: BTreeMap<EdgeKind, Vec<Document>>,
}

/// The key each title id arrives under. Ids claimed by two different keys
/// within the page are left out; the write reports them as a collision.
fn incoming_keys(primaries: &[Document]) -> BTreeMap<String, (Value, String)> {
    let mut incoming: BTreeMap<String, Option<(Value, String)>> = BTreeMap::new();
    for doc in primaries {
        let id = doc.get(TITLE_ID).filter(|v| !v.is_null());
        let key = doc.get("_key").and_then(Value::as_str).map(sanitize_document_key);
        let (Some(id), Some(key)) = (id, key) else {
            continue;
        };
        match incoming.entry(id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Some((id.clone(), key)));
            }
            Entry::Occupied(mut slot) => {
                if slot.get().as_ref().is_some_and(|(_, known)| *known != key) {
                    slot.insert(None);
                }
            }
        }
    }
    incoming
        .into_iter()
        .filter_map(|(id, slot)| slot.map(|found| (id, found)))
        .collect()
}

fn keys_of(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .filter_map(|d| d.get("_key").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn as_tuples(values: impl IntoIterator<Item = String>) -> Vec<Vec<Value>> {
    values.into_iter().map(|v| vec![Value::String(v)]).collect()
}

/// Moves one endpoint of `edge` to `new_id` and rekeys it the way the
/// processors key it.
fn repoint(kind: EdgeKind, mut edge: Document, field: &str, new_id: &str) -> Option<Document> {
    edge.insert(field.to_string(), Value::String(new_id.to_string()));
    let from = edge.get("_from").and_then(Value::as_str)?;
    let to = edge.get("_to").and_then(Value::as_str)?;
    let interaction = edge.get("interaction_key").and_then(Value::as_str);
    let discriminator: Vec<KeyPart<'_>> = interaction.map(KeyPart::from).into_iter().collect();
    let key = edge_key(kind.name(), from, to, &discriminator);
    edge.insert("_key".to_string(), Value::String(key));
    edge.remove("updated_at");
    Some(edge)
}

impl BatchImportEngine {
    pub(super) async fn retire_renamed(&self, primary: VertexKind, primaries: &[Document]) -> Result<Retired> {
        let mut retired = Retired::default();
        let incoming = incoming_keys(primaries);
        if incoming.is_empty() {
            return Ok(retired);
        }

        let values: Vec<Vec<Value>> = incoming.values().map(|(id, _)| vec![id.clone()]).collect();
        let stored = self
            .store()
            .find_by_fields(primary.name(), &[TITLE_ID.to_string()], &values)
            .await?;
        let mut renames: BTreeMap<String, String> = BTreeMap::new();
        for doc in &stored {
            let (Some(id), Some(old_key)) = (doc.get(TITLE_ID), doc.get("_key").and_then(Value::as_str)) else {
                continue;
            };
            match incoming.get(&id.to_string()) {
                Some((_, new_key)) if new_key != old_key => {
                    info!("{} '{}' is now '{}'", primary, old_key, new_key);
                    renames.insert(old_key.to_string(), new_key.clone());
                }
                _ => {}
            }
        }
        if renames.is_empty() {
            return Ok(retired);
        }

        let ids: BTreeMap<String, String> = renames
            .iter()
            .map(|(old, new)| (document_id(primary.name(), old), document_id(primary.name(), new)))
            .collect();
        let old_ids = as_tuples(ids.keys().cloned());

        for kind in EdgeKind::ALL.iter().copied() {
            let (froms, tos) = kind.endpoints();
            let mut stale: BTreeSet<String> = BTreeSet::new();
            let mut moved: Vec<Document> = Vec::new();

            if froms.contains(&primary) {
                for edge in self.store().find_by_fields(kind.name(), &["_from".to_string()], &old_ids).await? {
                    let Some(key) = edge.get("_key").and_then(Value::as_str).map(str::to_string) else {
                        continue;
                    };
                    let new_id = edge.get("_from").and_then(Value::as_str).and_then(|id| ids.get(id));
                    match new_id {
                        Some(new_id) if kind.is_interaction() => {
                            moved.extend(repoint(kind, edge.clone(), "_from", new_id));
                        }
                        _ => {}
                    }
                    stale.insert(key);
                }
            }
            if tos.contains(&primary) {
                for edge in self.store().find_by_fields(kind.name(), &["_to".to_string()], &old_ids).await? {
                    let Some(key) = edge.get("_key").and_then(Value::as_str).map(str::to_string) else {
                        continue;
                    };
                    let from_renamed = edge
                        .get("_from")
                        .and_then(Value::as_str)
                        .is_some_and(|id| ids.contains_key(id));
                    let new_id = edge.get("_to").and_then(Value::as_str).and_then(|id| ids.get(id));
                    // Recommendations from other titles survive the rename.
                    match new_id {
                        Some(new_id) if kind.is_self_edge() && !from_renamed => {
                            moved.extend(repoint(kind, edge.clone(), "_to", new_id));
                        }
                        _ => {}
                    }
                    stale.insert(key);
                }
            }

            if !stale.is_empty() {
                let removed = self.delete_many(kind.name(), stale.into_iter().collect()).await?;
                debug!("{}: {} edges of renamed titles removed", kind, removed);
            }
            if !moved.is_empty() {
                retired.repointed.entry(kind).or_default().extend(moved);
            }
        }

        let old_keys = as_tuples(renames.keys().cloned());
        for kind in VertexKind::ALL.iter().copied().filter(|k| k.is_satellite()) {
            let satellites = self
                .store()
                .find_by_fields(kind.name(), &["parent_key".to_string()], &old_keys)
                .await?;
            let keys = keys_of(&satellites);
            if keys.is_empty() {
                continue;
            }
            let satellite_ids = as_tuples(keys.iter().map(|k| document_id(kind.name(), k)));
            for edge in EdgeKind::ALL.iter().copied().filter(|e| e.endpoints().0.contains(&kind)) {
                let outgoing = self
                    .store()
                    .find_by_fields(edge.name(), &["_from".to_string()], &satellite_ids)
                    .await?;
                self.delete_many(edge.name(), keys_of(&outgoing)).await?;
            }
            self.delete_many(kind.name(), keys).await?;
        }

        for kind in INTERACTION_RECORDS {
            let records = self
                .store()
                .find_by_fields(kind.name(), &["primary_key".to_string()], &old_keys)
                .await?;
            let patches: Vec<Document> = records
                .iter()
                .filter_map(|record| {
                    let key = record.get("_key")?.clone();
                    let new_key = renames.get(record.get("primary_key")?.as_str()?)?;
                    let mut patch = Document::new();
                    patch.insert("_key".to_string(), key);
                    patch.insert("primary_key".to_string(), Value::String(new_key.clone()));
                    Some(patch)
                })
                .collect();
            if !patches.is_empty() {
                self.update_many(kind.name(), patches).await?;
            }
        }

        retired.renamed = self.delete_many(primary.name(), renames.into_keys().collect()).await?;
        Ok(retired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn ids_claimed_twice_in_a_page_are_not_renames() {
        let primaries = vec![
            doc(json!({"_key": "the_matrix_603", "tmdb_id": 603})),
            doc(json!({"_key": "matrix_redux_603", "tmdb_id": 603})),
            doc(json!({"_key": "the_matrix_603", "tmdb_id": 603})),
            doc(json!({"_key": "severance_95396", "tmdb_id": 95396})),
            doc(json!({"_key": "untitled", "tmdb_id": null})),
        ];
        let incoming = incoming_keys(&primaries);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming["95396"].1, "severance_95396");
    }

    #[test]
    fn repointed_edges_are_rekeyed() {
        let edge = doc(json!({
            "_key": "old",
            "_from": "Movie/the_matrix_603",
            "_to": "User/u1",
            "interaction_key": "u1_movie_603",
            "updated_at": "2024-01-01T00:00:00.000Z",
        }));
        let moved = repoint(EdgeKind::WatchedBy, edge, "_from", "Movie/matrix_603").unwrap();
        assert_eq!(moved["_from"], "Movie/matrix_603");
        assert_eq!(
            moved["_key"],
            edge_key("watched_by", "Movie/matrix_603", "User/u1", &["u1_movie_603".into()]).as_str()
        );
        assert!(moved.get("updated_at").is_none());
    }
}
