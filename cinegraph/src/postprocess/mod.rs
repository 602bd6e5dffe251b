//! Enrichment passes that run after the imports.
//!
//! Each pass reads the graph and the source independently and writes
//! partial updates; one failing pass does not stop the others.

pub mod interactions;
pub mod links;
pub mod vectors;

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};

use crate::config::SyncConfig;
use crate::errors::Result;
use crate::import::BatchImportEngine;
use crate::source::RelationalSource;

pub use interactions::UserInteractions;
pub use links::LinkEnrichment;
pub use vectors::VectorBackfill;

pub struct PostProcessContext {
    pub engine: Arc<BatchImportEngine>,
    pub source: Arc<dyn RelationalSource>,
    pub config: SyncConfig,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PassStats {
    pub examined: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub name: &'static str,
    pub result: std::result::Result<PassStats, String>,
}

impl PassReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &PostProcessContext) -> Result<PassStats>;
}

/// Runs every pass in order and collects one report per pass.
pub async fn run_all(ctx: &PostProcessContext, passes: &[Box<dyn PostProcessor>]) -> Vec<PassReport> {
    let mut reports = Vec::with_capacity(passes.len());
    for pass in passes {
        let result = match pass.run(ctx).await {
            Ok(stats) => {
                info!(
                    "post-process '{}': {} examined, {} updated, {} skipped",
                    pass.name(),
                    stats.examined,
                    stats.updated,
                    stats.skipped
                );
                Ok(stats)
            }
            Err(err) => {
                error!("post-process '{}' failed: {}", pass.name(), err);
                Err(err.to_string())
            }
        };
        reports.push(PassReport {
            name: pass.name(),
            result,
        });
    }
    reports
}
