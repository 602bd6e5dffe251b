mod common;

use cinegraph::postprocess::{PassReport, PassStats};
use cinegraph::store::GraphStore;
use common::{TestContext, init_test_context};
use serde_json::{Value, json};

const ENRICHMENT_SQL: &str = r#"
INSERT INTO dna_tag_vectors VALUES ('mood', 'tense', '[0.1, 0.2, 0.3]'), ('mood', 'calm', '[1.0]');
INSERT INTO streaming_offer_details VALUES
    ('https://www.netflix.com/title/603', 3.99, 'USD', '4K', '2024-01-01', '2024-12-31T23:59:59Z');
INSERT INTO user_favorites VALUES
    (1, 'u1', 'neo', 'movie', 603, '2024-01-05T12:00:00Z'),
    (2, 'u3', NULL, 'book', 1, NULL);
INSERT INTO user_scores VALUES (1, 'u1', 'tv', 95396, 9.0, '2024-01-06T12:00:00Z');
INSERT INTO user_wishlist VALUES (1, 'u2', 'movie', 999, '2024-01-07T12:00:00Z');
INSERT INTO user_watch_history VALUES (1, 'u1', 'movie', 603, '2024-02-01T20:00:00Z', 0.5, NULL);
"#;

fn enriched_context() -> anyhow::Result<TestContext> {
    let ctx = init_test_context()?;
    ctx.insert(ENRICHMENT_SQL)?;
    Ok(ctx)
}

fn stats_of<'a>(passes: &'a [PassReport], name: &str) -> &'a PassStats {
    let pass = passes
        .iter()
        .find(|p| p.name == name)
        .unwrap_or_else(|| panic!("no '{name}' pass"));
    match &pass.result {
        Ok(stats) => stats,
        Err(err) => panic!("'{name}' failed: {err}"),
    }
}

#[tokio::test]
async fn vectors_are_copied_onto_touched_tags() -> anyhow::Result<()> {
    let ctx = enriched_context()?;
    let summary = ctx.pipeline.run().await?;

    let stats = stats_of(&summary.passes, "dna_vectors");
    assert_eq!(stats.examined, 2);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.skipped, 1);

    let tense = ctx.store.document("DnaTag", "mood_tense").await?.expect("tag stored");
    assert_eq!(tense["vector"], json!([0.1, 0.2, 0.3]));
    let simulation = ctx
        .store
        .document("DnaTag", "theme_simulation")
        .await?
        .expect("tag stored");
    assert!(simulation.get("vector").is_none());
    assert!(ctx.store.document("DnaTag", "mood_calm").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn tags_without_vectors_are_discovered() -> anyhow::Result<()> {
    let ctx = enriched_context()?;
    ctx.pipeline.sync_schema().await?;
    ctx.pipeline.import_static().await?;
    ctx.pipeline.import_movies().await?;

    let passes = ctx.pipeline.post_process(None).await;
    let stats = stats_of(&passes, "dna_vectors");
    assert_eq!(stats.examined, 2);
    assert_eq!(stats.updated, 1);

    let again = ctx.pipeline.post_process(None).await;
    assert_eq!(stats_of(&again, "dna_vectors").examined, 1);
    Ok(())
}

#[tokio::test]
async fn padded_vector_rows_still_match_their_tag() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.insert("INSERT INTO dna_tag_vectors VALUES ('  mood', 'tense' || char(9), '[0.4, 0.6]');")?;
    let summary = ctx.pipeline.run().await?;

    assert_eq!(stats_of(&summary.passes, "dna_vectors").updated, 1);
    let tense = ctx.store.document("DnaTag", "mood_tense").await?.expect("tag stored");
    assert_eq!(tense["vector"], json!([0.4, 0.6]));
    Ok(())
}

#[tokio::test]
async fn offer_details_are_merged_by_url() -> anyhow::Result<()> {
    let ctx = enriched_context()?;
    let summary = ctx.pipeline.run().await?;

    let stats = stats_of(&summary.passes, "offer_links");
    assert_eq!(stats.examined, 1);
    assert_eq!(stats.updated, 1);

    let offer = ctx
        .store
        .document("StreamingAvailability", "the_matrix_603_netflix_us_flatrate_hd")
        .await?
        .expect("offer stored");
    assert_eq!(offer["price"], 3.99);
    assert_eq!(offer["currency"], "USD");
    assert_eq!(offer["quality"], "4K");
    assert_eq!(offer["valid_from"], 1_704_067_200_000i64);
    assert_eq!(offer["valid_until"], 1_735_689_599_000i64);
    assert_eq!(offer["service"], "Netflix");
    Ok(())
}

#[tokio::test]
async fn interactions_link_titles_to_users() -> anyhow::Result<()> {
    let ctx = enriched_context()?;
    let summary = ctx.pipeline.run().await?;

    let stats = stats_of(&summary.passes, "user_interactions");
    assert_eq!(stats.examined, 5);
    assert_eq!(stats.updated, 4);
    assert_eq!(stats.skipped, 1);

    assert_eq!(ctx.store.count("User").await?, 2);
    let favorites = ctx.store.documents("favorited_by")?;
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0]["_from"], "Movie/the_matrix_603");
    assert_eq!(favorites[0]["_to"], "User/u1");

    let scored = ctx.store.documents("scored_by")?;
    assert_eq!(scored[0]["_from"], "Show/severance_95396");
    assert_eq!(scored[0]["score"], 9.0);

    let wishlist = ctx.store.documents("UserWishlist")?;
    assert_eq!(wishlist.len(), 1);
    assert_eq!(wishlist[0]["tmdb_id"], 999);
    assert!(wishlist[0].get("primary_key").is_none());
    assert_eq!(ctx.store.count("wishlisted_by").await?, 0);

    let watched = ctx.store.documents("UserWatchHistory")?;
    assert_eq!(watched[0]["primary_key"], "the_matrix_603");
    assert_eq!(watched[0]["watched_at"], "2024-02-01T20:00:00.000Z");
    Ok(())
}

#[tokio::test]
async fn every_watch_of_a_title_gets_its_own_edge() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.insert(
        "INSERT INTO user_watch_history VALUES
            (1, 'u1', 'movie', 603, '2024-02-01T20:00:00Z', 1.0, NULL),
            (2, 'u1', 'movie', 603, '2024-03-01T20:00:00Z', 0.4, NULL);",
    )?;
    let summary = ctx.pipeline.run().await?;

    assert_eq!(stats_of(&summary.passes, "user_interactions").updated, 2);
    assert_eq!(ctx.store.count("UserWatchHistory").await?, 2);
    let watched = ctx.store.documents("watched_by")?;
    assert_eq!(watched.len(), 2);
    assert!(watched.iter().all(|e| e["_from"] == "Movie/the_matrix_603" && e["_to"] == "User/u1"));
    assert_ne!(watched[0]["_key"], watched[1]["_key"]);
    Ok(())
}

#[tokio::test]
async fn interactions_follow_a_renamed_title() -> anyhow::Result<()> {
    let ctx = enriched_context()?;
    ctx.pipeline.run().await?;
    ctx.insert("UPDATE movies SET title = 'The Matrix (Remastered)' WHERE tmdb_id = 603;")?;
    ctx.pipeline.import_movies().await?;

    let favorites = ctx.store.documents("favorited_by")?;
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0]["_from"], "Movie/the_matrix_remastered_603");
    let watched = ctx.store.documents("UserWatchHistory")?;
    assert_eq!(watched[0]["primary_key"], "the_matrix_remastered_603");

    ctx.pipeline.post_process(None).await;
    assert_eq!(ctx.store.count("favorited_by").await?, 1);
    assert_eq!(ctx.store.count("watched_by").await?, 1);
    Ok(())
}

#[tokio::test]
async fn a_failing_pass_does_not_stop_the_others() -> anyhow::Result<()> {
    let ctx = enriched_context()?;
    ctx.insert("DROP TABLE streaming_offer_details;")?;
    let summary = ctx.pipeline.run().await?;

    let links = summary
        .passes
        .iter()
        .find(|p| p.name == "offer_links")
        .expect("offer_links pass");
    assert!(!links.succeeded());
    assert_eq!(stats_of(&summary.passes, "user_interactions").updated, 4);

    let offer = ctx
        .store
        .document("StreamingAvailability", "the_matrix_603_netflix_us_flatrate_hd")
        .await?
        .expect("offer stored");
    assert_eq!(offer.get("price").and_then(Value::as_f64), None);
    Ok(())
}
