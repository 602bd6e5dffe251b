use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};

use super::{PassStats, PostProcessContext, PostProcessor};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::models::MediaType;
use crate::source::{PagedQuery, SourceRow};
use crate::store::Document;
use crate::utils::key::{KeyPart, make_key};

struct InteractionTable {
    table: &'static str,
    vertex: VertexKind,
    edge: EdgeKind,
    /// Columns copied onto the interaction vertex and edge.
    extra: &'static [&'static str],
    /// Part of the interaction identity besides user, media type and title.
    discriminator: Option<&'static str>,
}

const TABLES: &[InteractionTable] = &[
    InteractionTable {
        table: "user_favorites",
        vertex: VertexKind::UserFavorite,
        edge: EdgeKind::FavoritedBy,
        extra: &[],
        discriminator: None,
    },
    InteractionTable {
        table: "user_scores",
        vertex: VertexKind::UserScore,
        edge: EdgeKind::ScoredBy,
        extra: &["score"],
        discriminator: None,
    },
    InteractionTable {
        table: "user_wishlist",
        vertex: VertexKind::UserWishlist,
        edge: EdgeKind::WishlistedBy,
        extra: &[],
        discriminator: None,
    },
    InteractionTable {
        table: "user_watch_history",
        vertex: VertexKind::UserWatchHistory,
        edge: EdgeKind::WatchedBy,
        extra: &["watched_at", "progress"],
        discriminator: Some("watched_at"),
    },
];

struct Interaction {
    user_id: String,
    username: Option<String>,
    media: MediaType,
    tmdb_id: i64,
    row: SourceRow,
}

impl Interaction {
    fn from_row(row: SourceRow) -> Option<Self> {
        let user_id = row
            .str("user_id")
            .map(str::to_string)
            .or_else(|| row.i64("user_id").map(|id| id.to_string()))?;
        let media = row.str("media_type").and_then(MediaType::parse)?;
        let tmdb_id = row.i64("tmdb_id")?;
        Some(Self {
            username: row.str("username").map(str::to_string),
            user_id,
            media,
            tmdb_id,
            row,
        })
    }
}

/// Imports favorites, scores, wishlists and watch history. Edges run from
/// the title to the user and are only written when the title exists.
pub struct UserInteractions;

impl UserInteractions {
    async fn primaries(
        ctx: &PostProcessContext,
        wanted: &BTreeMap<MediaType, BTreeSet<i64>>,
    ) -> Result<HashMap<(MediaType, i64), String>> {
        let fields = vec!["tmdb_id".to_string()];
        let mut resolved = HashMap::new();
        for (media, ids) in wanted {
            let values: Vec<Vec<Value>> = ids.iter().map(|id| vec![Value::from(*id)]).collect();
            let found = ctx
                .engine
                .store()
                .find_by_fields(media.vertex_kind().name(), &fields, &values)
                .await?;
            for doc in found {
                let tmdb_id = doc.get("tmdb_id").and_then(Value::as_i64);
                let key = doc.get("_key").and_then(Value::as_str);
                if let (Some(tmdb_id), Some(key)) = (tmdb_id, key) {
                    resolved.insert((*media, tmdb_id), key.to_string());
                }
            }
        }
        Ok(resolved)
    }

    async fn import_page(
        ctx: &PostProcessContext,
        table: &InteractionTable,
        rows: Vec<SourceRow>,
        stats: &mut PassStats,
    ) -> Result<()> {
        let total = rows.len();
        let interactions: Vec<Interaction> = rows.into_iter().filter_map(Interaction::from_row).collect();
        stats.skipped += total - interactions.len();
        let mut wanted: BTreeMap<MediaType, BTreeSet<i64>> = BTreeMap::new();
        for interaction in &interactions {
            wanted.entry(interaction.media).or_default().insert(interaction.tmdb_id);
        }
        let primaries = Self::primaries(ctx, &wanted).await?;

        let mut batch = Batch::new();
        for interaction in &interactions {
            let user = batch.add_vertex(
                VertexKind::User,
                make_key(&[interaction.user_id.as_str().into()]),
                &json!({
                    "user_id": interaction.user_id,
                    "username": interaction.username,
                }),
            )?;

            let discriminator = table
                .discriminator
                .and_then(|column| interaction.row.str(column));
            let key = make_key(&[
                interaction.user_id.as_str().into(),
                interaction.media.as_str().into(),
                interaction.tmdb_id.into(),
                KeyPart::from(discriminator),
            ]);
            let primary_key = primaries.get(&(interaction.media, interaction.tmdb_id));

            let mut record = Document::new();
            record.insert("user_id".to_string(), Value::String(interaction.user_id.clone()));
            record.insert("media_type".to_string(), Value::String(interaction.media.as_str().to_string()));
            record.insert("tmdb_id".to_string(), Value::from(interaction.tmdb_id));
            if let Some(created) = interaction.row.get("created_at") {
                record.insert("created_at".to_string(), created.clone());
            }
            for column in table.extra {
                if let Some(value) = interaction.row.get(column) {
                    record.insert(column.to_string(), value.clone());
                }
            }
            if let Some(primary_key) = primary_key {
                record.insert("primary_key".to_string(), Value::String(primary_key.clone()));
            }
            let mut attributes = record.clone();
            attributes.retain(|field, _| table.extra.contains(&field.as_str()) || field == "created_at");
            attributes.insert("interaction_key".to_string(), Value::String(key.clone()));

            batch.add_vertex(table.vertex, key.clone(), &record)?;
            match primary_key {
                Some(primary_key) => {
                    let primary = DocRef::new(interaction.media.vertex_kind(), primary_key.clone());
                    // One edge per interaction row, not per (title, user).
                    batch.add_edge(
                        table.edge,
                        &primary,
                        &user,
                        &[key.as_str().into()],
                        Value::Object(attributes),
                    )?;
                }
                None => debug!(
                    "{}: no {} with tmdb_id {} yet, edge skipped",
                    table.table,
                    interaction.media.vertex_kind(),
                    interaction.tmdb_id
                ),
            }
        }

        let parts = batch.into_parts();
        for (kind, docs) in parts.vertices {
            let written = ctx.engine.upsert_many(kind.name(), docs).await?;
            if kind == table.vertex {
                stats.updated += written.written();
            }
        }
        for (kind, docs) in parts.edges {
            ctx.engine.upsert_many(kind.name(), docs).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PostProcessor for UserInteractions {
    fn name(&self) -> &'static str {
        "user_interactions"
    }

    async fn run(&self, ctx: &PostProcessContext) -> Result<PassStats> {
        let mut stats = PassStats::default();
        for table in TABLES {
            let query = PagedQuery::keyset(format!("SELECT * FROM {}", table.table), "id", ctx.config.page_size);
            let mut pages = query.pages(ctx.source.as_ref());
            while let Some(rows) = pages.next_page().await? {
                stats.examined += rows.len();
                Self::import_page(ctx, table, rows, &mut stats).await?;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_need_user_media_type_and_title() {
        let ok = SourceRow::from(json!({"user_id": 7, "media_type": "tv", "tmdb_id": "95396"}));
        let interaction = Interaction::from_row(ok).unwrap();
        assert_eq!(interaction.user_id, "7");
        assert_eq!(interaction.media, MediaType::Show);
        assert_eq!(interaction.tmdb_id, 95396);

        let unknown_media = SourceRow::from(json!({"user_id": "u1", "media_type": "book", "tmdb_id": 1}));
        assert!(Interaction::from_row(unknown_media).is_none());
        let no_title = SourceRow::from(json!({"user_id": "u1", "media_type": "movie"}));
        assert!(Interaction::from_row(no_title).is_none());
    }

    #[test]
    fn every_interaction_edge_points_at_users() {
        for table in TABLES {
            let (from, to) = table.edge.endpoints();
            assert!(from.contains(&VertexKind::Movie) && from.contains(&VertexKind::Show));
            assert_eq!(to, &[VertexKind::User]);
        }
    }
}
