//! The two-pass import orchestrator.
//!
//! Import order never guarantees that an asset referenced by an early
//! entity has finished downloading by the time that entity would be
//! persisted — downloads are concurrent and unordered relative to the
//! entity stream. The orchestrator removes the hazard by splitting the run:
//!
//! 1. **`ScanningAssets`** — read entities, discover asset URLs in their
//!    markup, enqueue downloads. When the downloader is at capacity, entity
//!    consumption stalls (**`Draining`**) until a slot frees.
//! 2. **`Draining`** — after the reader finishes, poll until every transfer
//!    has succeeded or permanently failed.
//! 3. **`Rewriting`** — re-read the source with a fresh reader (entities are
//!    never cached across passes; sources may exceed memory), rewrite URLs,
//!    and hand each entity to the importer.
//!
//! `Failed` is reachable from every state; the whole run holds an advisory
//! lock on the assets directory, released on all exit paths. Abandoning the
//! run at any boundary is clean: fetched assets stay on disk for the next
//! run, and nothing counts as imported unless the importer accepted it.

use crate::config::{MigrationConfig, SourceSpec};
use crate::downloader::{
    AttachmentDownloader, EnqueueOutcome, FetchFailure, RejectReason, deterministic_filename,
};
use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::importer::EntityImporter;
use crate::lock::MigrationLock;
use crate::reader::EntityReader;
use crate::tree_reader::DirectoryTreeReader;
use crate::urlproc::{MarkupDialect, UrlProcessor, url_matches_origin};
use crate::wxr::WxrReader;
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Placeholder origin some static-site sources use for site-local files.
const SITE_PLACEHOLDER: &str = "http://@site";

/// Entity fields that carry markup and get URL processing.
const MARKUP_FIELDS: [&str; 2] = ["post_content", "post_excerpt"];

/// Bytes fed to a streaming reader per pump.
const FEED_CHUNK_SIZE: usize = 64 * 1024;

/// Where the orchestrator currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Pass 1: discovering and enqueueing assets.
    ScanningAssets,
    /// Waiting on the downloader.
    Draining,
    /// Pass 2: rewriting URLs and importing entities.
    Rewriting,
    /// Terminal: the run completed.
    Done,
    /// Terminal: the run aborted on a structural error.
    Failed,
}

/// One asset reference discovered by a dry-run scan.
#[derive(Debug, Clone, Serialize)]
pub struct AssetReference {
    /// Where the asset would be fetched from.
    pub source_url: String,
    /// The deterministic filename it would land under.
    pub target_filename: String,
    /// Source position of the first entity referencing it.
    pub source_identity: String,
}

/// An entity the importer rejected while `continue_on_error` was set.
#[derive(Debug, Clone, Serialize)]
pub struct EntityFailure {
    /// The entity's source position token.
    pub source_identity: String,
    /// The importer's error.
    pub error: String,
}

/// Final accounting for a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    /// Entities the importer accepted.
    pub entities_imported: u64,
    /// Assets fetched by this run (previously satisfied assets are not
    /// counted — idempotent re-runs report zero).
    pub assets_fetched: u64,
    /// Transfers that failed terminally; the caller decides whether to
    /// retry, substitute placeholders, or ignore.
    pub asset_failures: Vec<FetchFailure>,
    /// Entities rejected by the importer under `continue_on_error`.
    pub entity_failures: Vec<EntityFailure>,
}

/// One pass's entity stream: the reader plus, for streaming sources, its
/// byte source. Each pass opens a fresh stream; nothing is cached between
/// passes.
pub struct SourceStream {
    inner: StreamInner,
}

enum StreamInner {
    Tree(DirectoryTreeReader),
    Wxr { reader: WxrReader, file: File },
}

impl SourceStream {
    /// Opens a fresh stream over the configured source.
    pub fn open(spec: &SourceSpec) -> Result<Self> {
        let inner = match spec {
            SourceSpec::MarkdownTree { root } => StreamInner::Tree(DirectoryTreeReader::new(root)),
            SourceSpec::WxrExport { path } => {
                let file = File::open(path).map_err(|e| {
                    Error::Source(format!("cannot open export {}: {e}", path.display()))
                })?;
                StreamInner::Wxr {
                    reader: WxrReader::new(),
                    file,
                }
            },
        };
        Ok(Self { inner })
    }

    /// Produces the next entity, feeding the reader more bytes as needed.
    ///
    /// `Ok(None)` means the source is cleanly exhausted; a reader's sticky
    /// error is checked here, never silently swallowed by `is_finished`.
    pub fn next(&mut self) -> Result<Option<Entity>> {
        let mut stalls = 0_u8;
        loop {
            if self.as_reader().next_entity() {
                return self
                    .as_reader()
                    .entity()
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| Error::Source("reader produced no entity".to_string()));
            }
            if self.as_reader().is_finished() {
                return match self.as_reader().last_error() {
                    Some(Error::Source(message)) => Err(Error::Source(message.clone())),
                    Some(other) => Err(Error::Source(other.to_string())),
                    None => Ok(None),
                };
            }
            if !self.pump()? {
                stalls += 1;
                if stalls > 1 {
                    return Err(Error::Source(
                        "reader stalled before end of input".to_string(),
                    ));
                }
            }
        }
    }

    /// Feeds more bytes to a streaming reader. Returns `false` once the
    /// byte source is exhausted (and end-of-input has been signalled).
    fn pump(&mut self) -> Result<bool> {
        match &mut self.inner {
            StreamInner::Tree(_) => Ok(false),
            StreamInner::Wxr { reader, file } => {
                let mut chunk = vec![0_u8; FEED_CHUNK_SIZE];
                let n = file
                    .read(&mut chunk)
                    .map_err(|e| Error::Source(format!("cannot read export: {e}")))?;
                if n == 0 {
                    reader.input_finished();
                    Ok(false)
                } else {
                    reader.append_bytes(&chunk[..n]);
                    Ok(true)
                }
            },
        }
    }

    fn as_reader(&mut self) -> &mut dyn EntityReader {
        match &mut self.inner {
            StreamInner::Tree(reader) => reader,
            StreamInner::Wxr { reader, .. } => reader,
        }
    }
}

/// Drives one migration run through the two-pass state machine.
pub struct Migrator {
    config: MigrationConfig,
    source_site: Url,
    target_site: Url,
    assets_base: Url,
    downloader: AttachmentDownloader,
    state: MigrationState,
    entities_imported: u64,
    entity_failures: Vec<EntityFailure>,
}

impl Migrator {
    /// Builds a migrator for the given configuration.
    pub fn new(config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        let source_site = config.source_site()?;
        let target_site = config.target_site()?;
        let assets_base = config.assets_base()?;
        let downloader = AttachmentDownloader::new(&config.assets_dir, config.concurrency)?;
        Ok(Self {
            config,
            source_site,
            target_site,
            assets_base,
            downloader,
            state: MigrationState::ScanningAssets,
            entities_imported: 0,
            entity_failures: Vec::new(),
        })
    }

    /// Current position in the state machine.
    #[must_use]
    pub const fn state(&self) -> MigrationState {
        self.state
    }

    /// Entities imported so far; usable as a progress probe during a run.
    #[must_use]
    pub const fn entities_imported(&self) -> u64 {
        self.entities_imported
    }

    /// Runs the full migration, returning the final accounting or the
    /// first fatal error.
    pub async fn run(&mut self, importer: &mut dyn EntityImporter) -> Result<MigrationSummary> {
        let result = self.run_inner(importer).await;
        match &result {
            Ok(_) => self.state = MigrationState::Done,
            Err(error) => {
                warn!(error = %error, "migration failed");
                self.state = MigrationState::Failed;
            },
        }
        result
    }

    async fn run_inner(&mut self, importer: &mut dyn EntityImporter) -> Result<MigrationSummary> {
        let _lock = MigrationLock::acquire(&self.config.assets_dir)?;

        info!(source = ?self.config.source, "starting asset scan");
        self.state = MigrationState::ScanningAssets;
        let mut stream = SourceStream::open(&self.config.source)?;
        self.scan_pass(&mut stream).await?;

        info!("draining downloader");
        self.state = MigrationState::Draining;
        while self.downloader.poll() {
            tokio::time::sleep(self.poll_interval()).await;
        }
        info!(
            fetched = self.downloader.assets_fetched(),
            failed = self.downloader.failures().len(),
            "all transfers settled"
        );

        self.state = MigrationState::Rewriting;
        let mut stream = SourceStream::open(&self.config.source)?;
        self.rewrite_pass(&mut stream, importer).await?;

        Ok(MigrationSummary {
            entities_imported: self.entities_imported,
            assets_fetched: self.downloader.assets_fetched(),
            asset_failures: self.downloader.failures().to_vec(),
            entity_failures: std::mem::take(&mut self.entity_failures),
        })
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Pass 1: discover asset references and enqueue downloads, applying
    /// backpressure when the downloader is at capacity.
    async fn scan_pass(&mut self, source: &mut SourceStream) -> Result<()> {
        while let Some(entity) = source.next()? {
            self.scan_entity(&entity).await?;
        }
        Ok(())
    }

    async fn scan_entity(&mut self, entity: &Entity) -> Result<()> {
        for (source_url, target_filename) in self.asset_tasks(entity)? {
            self.enqueue_with_backpressure(source_url, target_filename)
                .await;
        }
        Ok(())
    }

    /// The download tasks one entity gives rise to.
    fn asset_tasks(&self, entity: &Entity) -> Result<Vec<(String, String)>> {
        let mut tasks = Vec::new();
        if entity.is_attachment_post() {
            if let Some(raw) = entity.str_field("attachment_url") {
                match Url::parse(raw) {
                    Ok(parsed) => {
                        tasks.push((parsed.as_str().to_string(), deterministic_filename(&parsed)));
                    },
                    Err(e) => warn!(url = raw, error = %e, "skipping unparseable attachment URL"),
                }
            }
            return Ok(tasks);
        }
        if entity.kind() != EntityKind::Post {
            return Ok(tasks);
        }

        let dialect = entity_dialect(entity);
        for field in MARKUP_FIELDS {
            let Some(markup) = entity.str_field(field) else {
                continue;
            };
            let mut processor =
                UrlProcessor::new(markup, dialect, Some(self.source_site.clone()));
            while processor.next_url() {
                if !self.is_asset_reference(&processor) {
                    continue;
                }
                let (Some(parsed), Some(raw)) = (processor.parsed_url(), processor.raw_url())
                else {
                    continue;
                };
                let source_url = self.asset_source_url(raw, parsed)?;
                tasks.push((source_url, deterministic_filename(parsed)));
            }
        }
        Ok(tasks)
    }

    /// Pass-1 discovery without downloading: every asset reference a run
    /// would enqueue, deduplicated by target filename. This is the dry-run
    /// surface.
    pub fn discover_assets(&self) -> Result<Vec<AssetReference>> {
        let mut stream = SourceStream::open(&self.config.source)?;
        let mut seen = std::collections::HashSet::new();
        let mut references = Vec::new();
        while let Some(entity) = stream.next()? {
            for (source_url, target_filename) in self.asset_tasks(&entity)? {
                if seen.insert(target_filename.clone()) {
                    references.push(AssetReference {
                        source_url,
                        target_filename,
                        source_identity: entity.source_identity().to_string(),
                    });
                }
            }
        }
        Ok(references)
    }

    /// Enqueues one transfer, polling the downloader whenever the queue is
    /// at capacity. This is the backpressure coupling between reader
    /// throughput and downloader capacity.
    async fn enqueue_with_backpressure(&mut self, source_url: String, target_filename: String) {
        loop {
            match self
                .downloader
                .enqueue_if_not_exists(&source_url, &target_filename)
            {
                EnqueueOutcome::Rejected(RejectReason::QueueFull) => {
                    self.state = MigrationState::Draining;
                    self.downloader.poll();
                    tokio::time::sleep(self.poll_interval()).await;
                    self.state = MigrationState::ScanningAssets;
                },
                EnqueueOutcome::Rejected(RejectReason::InvalidFilename(reason)) => {
                    warn!(url = source_url, reason, "asset target rejected");
                    return;
                },
                outcome => {
                    debug!(url = source_url, ?outcome, "asset scan enqueue");
                    return;
                },
            }
        }
    }

    /// Pass 2: rewrite URLs and hand entities to the importer.
    async fn rewrite_pass(
        &mut self,
        source: &mut SourceStream,
        importer: &mut dyn EntityImporter,
    ) -> Result<()> {
        while let Some(entity) = source.next()? {
            let rewritten = self.rewrite_entity(entity)?;
            let identity = rewritten.source_identity().to_string();
            match importer.import_entity(rewritten) {
                Ok(id) => {
                    self.entities_imported += 1;
                    debug!(identity, ?id, "entity imported");
                },
                Err(error) if self.config.continue_on_error => {
                    warn!(identity, error = %error, "entity rejected; continuing");
                    self.entity_failures.push(EntityFailure {
                        source_identity: identity,
                        error: error.to_string(),
                    });
                },
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Applies the rewrite policy to one entity: asset references point at
    /// their fetched location, other same-origin references are re-rooted
    /// on the target site, everything else is untouched.
    fn rewrite_entity(&self, mut entity: Entity) -> Result<Entity> {
        let mut data = entity.data().clone();

        if entity.is_attachment_post() {
            if let Some(raw) = entity.str_field("attachment_url") {
                if let Ok(parsed) = Url::parse(raw) {
                    let target = self.asset_target_url(&parsed)?;
                    data.insert(
                        "attachment_url".to_string(),
                        Value::String(target.into()),
                    );
                }
            }
        }

        if entity.kind() == EntityKind::Post {
            let dialect = entity_dialect(&entity);
            for field in MARKUP_FIELDS {
                let Some(markup) = entity.str_field(field) else {
                    continue;
                };
                if let Some(updated) = self.rewrite_markup(markup, dialect)? {
                    data.insert(field.to_string(), Value::String(updated));
                }
            }
            if let Some(guid) = entity.str_field("guid") {
                if let Ok(parsed) = Url::parse(guid) {
                    if url_matches_origin(&parsed, &self.source_site) {
                        data.insert(
                            "guid".to_string(),
                            Value::String(self.reroot(&parsed).into()),
                        );
                    }
                }
            }
        }

        entity.set_data(data);
        Ok(entity)
    }

    /// Rewrites one markup field, returning the new text when anything
    /// changed.
    fn rewrite_markup(&self, markup: &str, dialect: MarkupDialect) -> Result<Option<String>> {
        let mut processor = UrlProcessor::new(markup, dialect, Some(self.source_site.clone()));
        let mut changed = false;
        while processor.next_url() {
            if self.is_asset_reference(&processor) {
                let Some(parsed) = processor.parsed_url() else {
                    continue;
                };
                let target = self.asset_target_url(parsed)?;
                processor.rewrite_url_components(&target)?;
                changed = true;
            } else if processor
                .parsed_url()
                .is_some_and(|parsed| url_matches_origin(parsed, &self.source_site))
            {
                let Some(parsed) = processor.parsed_url() else {
                    continue;
                };
                let rerooted = self.reroot(parsed);
                processor.rewrite_url_components(&rerooted)?;
                changed = true;
            }
            // Anything else — foreign origins, unresolvable references —
            // is passed through unchanged, never fabricated.
        }
        Ok(changed.then(|| processor.updated_markup()))
    }

    /// Whether the current match is a local asset reference: an image
    /// `src` that is same-origin with the migrated-from site or uses the
    /// site placeholder.
    fn is_asset_reference(&self, processor: &UrlProcessor<'_>) -> bool {
        processor.tag() == Some("img")
            && processor.inspected_attribute_name() == Some("src")
            && (processor
                .raw_url()
                .is_some_and(|raw| raw.starts_with(SITE_PLACEHOLDER))
                || processor
                    .parsed_url()
                    .is_some_and(|parsed| url_matches_origin(parsed, &self.source_site)))
    }

    /// The URL a matched asset is fetched from. Placeholder references map
    /// to `file://` URLs under the source tree; everything else is fetched
    /// from its parsed URL.
    fn asset_source_url(&self, raw: &str, parsed: &Url) -> Result<String> {
        let Some(rest) = raw
            .strip_prefix(SITE_PLACEHOLDER)
            .map(|rest| rest.trim_start_matches('/'))
        else {
            return Ok(parsed.as_str().to_string());
        };
        let SourceSpec::MarkdownTree { root } = &self.config.source else {
            return Ok(parsed.as_str().to_string());
        };
        let absolute = std::path::absolute(root)
            .map_err(|e| Error::Source(format!("cannot resolve source root: {e}")))?;
        let url = Url::from_file_path(absolute.join(rest)).map_err(|()| {
            Error::InvalidUrl(format!("placeholder reference '{raw}' escapes the filesystem"))
        })?;
        Ok(url.into())
    }

    /// The final public URL of a fetched asset.
    fn asset_target_url(&self, source: &Url) -> Result<Url> {
        let filename = deterministic_filename(source);
        self.assets_base
            .join(&filename)
            .map_err(|e| Error::Rewrite(format!("cannot build asset URL for {filename}: {e}")))
    }

    /// Re-roots a same-origin URL onto the target site, keeping path,
    /// query, and fragment.
    fn reroot(&self, parsed: &Url) -> Url {
        let mut rerooted = self.target_site.clone();
        rerooted.set_path(parsed.path());
        rerooted.set_query(parsed.query());
        rerooted.set_fragment(parsed.fragment());
        rerooted
    }
}

/// The dialect a post's markup fields are scanned as.
pub fn entity_dialect(entity: &Entity) -> MarkupDialect {
    match entity.str_field("source_format") {
        Some("markdown") => MarkupDialect::Markdown,
        _ => MarkupDialect::Html,
    }
}
