mod common;

use cinegraph::errors::{StoreError, StructuralError, SyncError};
use cinegraph::store::memory::InjectedFailure;
use cinegraph::store::{GraphStore, codes};
use common::init_test_context;
use serde_json::json;

fn movie_writes(ctx: &common::TestContext) -> anyhow::Result<Vec<usize>> {
    Ok(ctx
        .store
        .write_log()?
        .into_iter()
        .filter(|w| w.collection == "Movie")
        .map(|w| w.documents)
        .collect())
}

#[tokio::test]
async fn two_titles_claiming_one_id_are_diagnosed_without_retry() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.insert("INSERT INTO movies (id, tmdb_id, title) VALUES (3, 603, 'Matrix Redux');")?;
    ctx.pipeline.sync_schema().await?;
    ctx.pipeline.import_static().await?;

    let err = ctx.pipeline.import_movies().await.unwrap_err();
    let SyncError::Structural(StructuralError::UniqueViolation { collection, collisions }) = err else {
        panic!("expected a unique violation, got {err}");
    };
    assert_eq!(collection, "Movie");
    assert_eq!(collisions.len(), 1);
    let collision = &collisions[0];
    assert_eq!(collision.index, "movie_tmdb_id");
    assert_eq!(collision.values, vec![json!(603)]);
    assert!(!collision.stored);
    assert!(collision.keys.contains(&"the_matrix_603".to_string()));
    assert!(collision.keys.contains(&"matrix_redux_603".to_string()));

    assert_eq!(movie_writes(&ctx)?, vec![3]);
    Ok(())
}

#[tokio::test]
async fn stored_identity_collisions_are_diagnosed() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.pipeline.sync_schema().await?;
    ctx.pipeline.import_static().await?;
    let legacy = json!({"_key": "legacy_tense", "category": "mood", "value": "tense"});
    ctx.store
        .seed("DnaTag", legacy.as_object().cloned().unwrap_or_default())?;

    let err = ctx.pipeline.import_movies().await.unwrap_err();
    let SyncError::Structural(StructuralError::UniqueViolation { collection, collisions }) = err else {
        panic!("expected a unique violation, got {err}");
    };
    assert_eq!(collection, "DnaTag");
    let collision = collisions
        .iter()
        .find(|c| c.stored)
        .expect("collision with the stored tag");
    assert_eq!(collision.index, "dna_tag_identity");
    assert_eq!(collision.values, vec![json!("mood"), json!("tense")]);
    assert!(collision.keys.contains(&"mood_tense".to_string()));
    assert!(collision.keys.contains(&"legacy_tense".to_string()));
    Ok(())
}

#[tokio::test]
async fn a_stored_title_under_an_older_key_is_replaced() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.pipeline.sync_schema().await?;
    ctx.pipeline.import_static().await?;
    let legacy = json!({"_key": "matrix_legacy", "tmdb_id": 603, "title": "Matrix"});
    ctx.store
        .seed("Movie", legacy.as_object().cloned().unwrap_or_default())?;

    let report = ctx.pipeline.import_movies().await?;
    assert_eq!(report.renamed, 1);
    assert!(ctx.store.document("Movie", "matrix_legacy").await?.is_none());
    assert!(ctx.store.document("Movie", "the_matrix_603").await?.is_some());
    assert_eq!(movie_writes(&ctx)?, vec![2]);
    Ok(())
}

#[tokio::test]
async fn unavailable_store_requests_are_retried() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.pipeline.sync_schema().await?;
    ctx.pipeline.import_static().await?;
    ctx.store.inject(InjectedFailure::Request {
        collection: "Genre".to_string(),
        error: StoreError::api(Some(503), None, "service unavailable"),
    })?;

    let report = ctx.pipeline.import_movies().await?;
    assert_eq!(report.imported, 2);
    assert_eq!(report.written_to("Genre"), 2);
    assert_eq!(ctx.store.count("Genre").await?, 2);
    Ok(())
}

#[tokio::test]
async fn only_failed_items_are_resubmitted() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.pipeline.sync_schema().await?;
    ctx.pipeline.import_static().await?;
    ctx.store.inject(InjectedFailure::Item {
        collection: "Movie".to_string(),
        key: "the_matrix_603".to_string(),
        code: codes::CONFLICT,
        message: "write-write conflict".to_string(),
    })?;

    let report = ctx.pipeline.import_movies().await?;
    assert_eq!(report.imported, 2);
    assert_eq!(movie_writes(&ctx)?, vec![2, 1]);
    assert!(ctx.store.document("Movie", "the_matrix_603").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn persistent_transport_failures_exhaust_retries() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.pipeline.sync_schema().await?;
    for _ in 0..ctx.config.retry_attempts {
        ctx.store.inject(InjectedFailure::Request {
            collection: "Country".to_string(),
            error: StoreError::transport("connection reset"),
        })?;
    }

    let err = ctx.pipeline.import_static().await.unwrap_err();
    let SyncError::RetriesExhausted { collection, attempts, .. } = err else {
        panic!("expected exhausted retries, got {err}");
    };
    assert_eq!(collection, "Country");
    assert_eq!(attempts, ctx.config.retry_attempts);
    assert_eq!(ctx.store.count("Country").await?, 0);
    Ok(())
}

#[tokio::test]
async fn rows_without_a_title_id_are_skipped() -> anyhow::Result<()> {
    let ctx = init_test_context()?;
    ctx.insert("INSERT INTO movies (id, tmdb_id, title) VALUES (9, NULL, 'Orphan');")?;
    ctx.pipeline.sync_schema().await?;
    ctx.pipeline.import_static().await?;

    let report = ctx.pipeline.import_movies().await?;
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_skipped, 1);
    assert_eq!(ctx.store.count("Movie").await?, 2);
    Ok(())
}
