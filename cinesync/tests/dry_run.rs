use std::fs::File;

use cinegraph::store::GraphStore;
use cinesync::{build_pipeline, ConnectionArgs};
use tempfile::tempdir;

fn dry_run_args(source: std::path::PathBuf) -> ConnectionArgs {
    ConnectionArgs {
        source: Some(source),
        store_url: Some("http://localhost:8529".to_string()),
        database: None,
        graph: Some("dry_run_graph".to_string()),
        page_size: Some(50),
        dry_run: true,
    }
}

#[tokio::test]
async fn dry_run_syncs_schema_into_memory() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.sqlite");
    File::create(&path)?;

    let pipeline = build_pipeline(&dry_run_args(path))?;
    assert_eq!(pipeline.config.graph_name, "dry_run_graph");
    assert_eq!(pipeline.config.page_size, 50);

    let report = pipeline.sync_schema().await?;
    assert!(report.created > 0);
    assert!(pipeline.store.graph("dry_run_graph").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn dry_run_imports_fail_without_source_tables() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.sqlite");
    File::create(&path)?;

    let pipeline = build_pipeline(&dry_run_args(path))?;
    pipeline.sync_schema().await?;
    assert!(pipeline.import_movies().await.is_err());
    Ok(())
}

#[test]
fn missing_source_is_reported() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let result = build_pipeline(&dry_run_args(dir.path().join("absent.sqlite")));
    let message = format!("{:#}", result.err().expect("missing source must fail"));
    assert!(message.contains("absent.sqlite"));
    Ok(())
}

#[test]
fn invalid_store_urls_are_rejected() {
    let mut args = dry_run_args("unused.sqlite".into());
    args.store_url = Some("not a url".to_string());
    assert!(build_pipeline(&args).is_err());
}
