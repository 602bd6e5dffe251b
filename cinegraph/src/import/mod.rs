//! Source-to-graph import: importers feed source pages through processors
//! into the batch engine.

pub mod diagnose;
pub mod engine;
pub mod importer;
mod rename;

pub use engine::{BatchImportEngine, EngineSettings, ImportReport, UpsertStats};
pub use importer::{PrimaryImporter, StaticImporter};
