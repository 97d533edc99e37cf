//! # porter-core
//!
//! Core functionality for porter - a streaming content-migration toolkit.
//!
//! porter ingests a tree of documents (markdown files, static HTML, or a
//! streaming XML export) and imports them into a target content store as
//! structured entities, rewriting every embedded URL so it resolves
//! correctly in the destination.
//!
//! ## Architecture
//!
//! The pipeline is built from four pieces:
//!
//! - **Entity readers** turn heterogeneous sources into a uniform,
//!   pull-based entity stream ([`EntityReader`], [`DirectoryTreeReader`],
//!   [`WxrReader`])
//! - **The attachment downloader** fetches referenced assets with bounded
//!   concurrency, idempotently and re-entrantly ([`AttachmentDownloader`])
//! - **The URL processor** locates and rewrites URLs embedded in markup
//!   without a DOM round-trip ([`UrlProcessor`])
//! - **The orchestrator** sequences them into a two-pass run — download all
//!   assets, then rewrite and persist content — so no entity is ever
//!   imported with a reference to an asset that has not landed
//!   ([`Migrator`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use porter_core::{MigrationConfig, Migrator, JsonLinesImporter, SourceSpec};
//! use std::path::PathBuf;
//!
//! # async fn run() -> porter_core::Result<()> {
//! let config = MigrationConfig {
//!     source: SourceSpec::MarkdownTree { root: PathBuf::from("./docs") },
//!     source_site_url: "https://legacy.example".into(),
//!     target_site_url: "https://new.example".into(),
//!     assets_base_url: "https://new.example/assets".into(),
//!     assets_dir: PathBuf::from("./assets"),
//!     concurrency: 5,
//!     poll_interval_ms: 50,
//!     continue_on_error: false,
//! };
//! let mut importer = JsonLinesImporter::new("./out")?;
//! let mut migrator = Migrator::new(config)?;
//! let summary = migrator.run(&mut importer).await?;
//! println!(
//!     "imported {} entities, fetched {} assets",
//!     summary.entities_imported, summary.assets_fetched
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`]. Per-item failures (one
//! fetch, one entity) are recorded in the [`MigrationSummary`] and the run
//! continues; structural failures (unreadable source, desynchronized
//! reader) abort the run. Nothing is retried automatically — retry is a
//! caller-level policy driven by the recorded failure lists.

/// Migration run configuration
pub mod config;
/// Bounded-concurrency, idempotent asset downloader
pub mod downloader;
/// Entity types and the ordered field map
pub mod entity;
/// Error types and result aliases
pub mod error;
/// Source document formats and field extraction
pub mod format;
/// The entity importer seam and bundled importers
pub mod importer;
/// Advisory lock guarding a migration run
pub mod lock;
/// The two-pass import orchestrator
pub mod migrate;
/// The entity reader contract
pub mod reader;
/// Directory-tree entity reader
pub mod tree_reader;
/// Streaming URL matcher/rewriter
pub mod urlproc;
/// Streaming XML export reader
pub mod wxr;

// Re-export commonly used types
pub use config::{MigrationConfig, SourceSpec};
pub use downloader::{
    AttachmentDownloader, DownloadTask, EnqueueOutcome, FetchFailure, RejectReason, SkipReason,
    deterministic_filename,
};
pub use entity::{Entity, EntityData, EntityKind};
pub use error::{Error, Result};
pub use format::{DocumentFields, SourceFormat};
pub use importer::{EntityId, EntityImporter, JsonLinesImporter, RecordingImporter};
pub use lock::MigrationLock;
pub use migrate::{
    AssetReference, EntityFailure, MigrationState, MigrationSummary, Migrator, SourceStream,
    entity_dialect,
};
pub use reader::{Cursor, EntityReader};
pub use tree_reader::DirectoryTreeReader;
pub use urlproc::{MarkupDialect, UrlProcessor, url_matches_origin};
pub use wxr::WxrReader;
