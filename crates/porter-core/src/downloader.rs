//! Bounded-concurrency, idempotent, re-entrant asset downloader.
//!
//! Transfers run as tokio tasks; between [`poll`](AttachmentDownloader::poll)
//! calls up to the configured limit of them are logically in flight. `poll`
//! is the sole suspension point and never blocks: it reaps completed
//! transfers, starts queued ones up to the limit, and returns whether
//! anything is still outstanding.
//!
//! Idempotency is anchored on the deterministic target filename: enqueueing
//! a task whose target already exists on disk (from this run or any earlier
//! one) is a no-op, so a crashed import can be restarted from scratch
//! without re-fetching completed assets. Transfers land in a `.partial`
//! file and are renamed into place, so the existence check never observes a
//! torn download.

use crate::error::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// One queued or in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Where the asset bytes come from (`http`, `https`, or `file`).
    pub source_url: String,
    /// Deterministic file name the asset lands under in the assets
    /// directory.
    pub target_filename: String,
}

/// A transfer that permanently failed; recorded, never retried here.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FetchFailure {
    /// The task's source URL.
    pub source_url: String,
    /// The task's target filename.
    pub target_filename: String,
    /// Why the transfer failed.
    pub error: String,
}

/// Result of an enqueue attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The task was added to the pending queue.
    Queued,
    /// Nothing to do; the asset is already satisfied or being satisfied.
    Skipped(SkipReason),
    /// The task was not accepted. Not an error: capacity rejections are the
    /// backpressure signal and callers are expected to poll and retry.
    Rejected(RejectReason),
}

/// Why an enqueue was a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The target file already exists in the assets directory.
    AlreadyExists,
    /// A task for the same target is already pending or in flight.
    AlreadyQueued,
}

/// Why an enqueue was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The target filename failed validation.
    InvalidFilename(String),
    /// Pending plus in-flight transfers are at the configured bound.
    QueueFull,
}

struct TransferOutcome {
    task: DownloadTask,
    result: Result<u64>,
}

/// Bounded-concurrency asset fetch queue over a filesystem sink.
pub struct AttachmentDownloader {
    client: reqwest::Client,
    assets_dir: PathBuf,
    limit: usize,
    pending: VecDeque<DownloadTask>,
    in_flight: JoinSet<TransferOutcome>,
    /// Targets currently pending or in flight, for duplicate suppression.
    queued_targets: HashSet<String>,
    failures: Vec<FetchFailure>,
    fetched: u64,
}

impl AttachmentDownloader {
    /// Creates a downloader writing into `assets_dir` with at most `limit`
    /// simultaneous transfers.
    pub fn new(assets_dir: impl Into<PathBuf>, limit: usize) -> Result<Self> {
        let assets_dir = assets_dir.into();
        std::fs::create_dir_all(&assets_dir)
            .map_err(|e| Error::Storage(format!("cannot create assets dir: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("porter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            assets_dir,
            limit: limit.max(1),
            pending: VecDeque::new(),
            in_flight: JoinSet::new(),
            queued_targets: HashSet::new(),
            failures: Vec::new(),
            fetched: 0,
        })
    }

    /// The directory assets are written into.
    #[must_use]
    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// True when pending plus in-flight transfers have reached the
    /// configured bound. Producers use this to stall instead of queuing
    /// unbounded work.
    #[must_use]
    pub fn queue_full(&self) -> bool {
        self.pending.len() + self.in_flight.len() >= self.limit
    }

    /// Enqueues a transfer unless the target is already satisfied, already
    /// queued, invalid, or the queue is at capacity.
    ///
    /// Never raises for an individual task; every non-success is expressed
    /// in the returned [`EnqueueOutcome`].
    pub fn enqueue_if_not_exists(
        &mut self,
        source_url: &str,
        target_filename: &str,
    ) -> EnqueueOutcome {
        if let Err(reason) = validate_target_filename(target_filename) {
            return EnqueueOutcome::Rejected(RejectReason::InvalidFilename(reason));
        }
        if self.queue_full() {
            return EnqueueOutcome::Rejected(RejectReason::QueueFull);
        }
        if self.assets_dir.join(target_filename).exists() {
            debug!(target = target_filename, "asset already on disk, skipping");
            return EnqueueOutcome::Skipped(SkipReason::AlreadyExists);
        }
        if self.queued_targets.contains(target_filename) {
            return EnqueueOutcome::Skipped(SkipReason::AlreadyQueued);
        }

        self.queued_targets.insert(target_filename.to_string());
        self.pending.push_back(DownloadTask {
            source_url: source_url.to_string(),
            target_filename: target_filename.to_string(),
        });
        debug!(url = source_url, target = target_filename, "transfer queued");
        EnqueueOutcome::Queued
    }

    /// Advances all transfers by one scheduling step.
    ///
    /// Reaps completed transfers, records failures, and starts newly queued
    /// transfers up to the concurrency limit. Performs only
    /// currently-available non-blocking work and returns promptly; returns
    /// `false` once both the pending and in-flight sets are empty.
    ///
    /// Must be called from within a tokio runtime.
    pub fn poll(&mut self) -> bool {
        while let Some(joined) = self.in_flight.try_join_next() {
            match joined {
                Ok(outcome) => {
                    self.queued_targets.remove(&outcome.task.target_filename);
                    match outcome.result {
                        Ok(bytes) => {
                            self.fetched += 1;
                            info!(
                                url = outcome.task.source_url,
                                target = outcome.task.target_filename,
                                bytes,
                                "asset fetched"
                            );
                        },
                        Err(error) => {
                            warn!(
                                url = outcome.task.source_url,
                                error = %error,
                                "asset fetch failed"
                            );
                            self.failures.push(FetchFailure {
                                source_url: outcome.task.source_url,
                                target_filename: outcome.task.target_filename,
                                error: error.to_string(),
                            });
                        },
                    }
                },
                Err(join_error) => {
                    // A panicked transfer task; its target stays suppressed
                    // for the rest of this run.
                    warn!(error = %join_error, "transfer task aborted");
                    self.failures.push(FetchFailure {
                        source_url: String::new(),
                        target_filename: String::new(),
                        error: join_error.to_string(),
                    });
                },
            }
        }

        while self.in_flight.len() < self.limit {
            let Some(task) = self.pending.pop_front() else {
                break;
            };
            let client = self.client.clone();
            let assets_dir = self.assets_dir.clone();
            self.in_flight.spawn(async move {
                let result = transfer(&client, &assets_dir, &task).await;
                TransferOutcome { task, result }
            });
        }

        !(self.pending.is_empty() && self.in_flight.is_empty())
    }

    /// Transfers that failed terminally, in completion order.
    #[must_use]
    pub fn failures(&self) -> &[FetchFailure] {
        &self.failures
    }

    /// Number of assets fetched by this instance.
    #[must_use]
    pub const fn assets_fetched(&self) -> u64 {
        self.fetched
    }

    /// Number of transfers currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of transfers queued but not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Computes the deterministic target filename for a source URL: the
/// SHA-256 of the full URL string, keeping the URL path's extension.
///
/// Hashing the URL rather than the asset bytes means the name is known
/// before any download happens, is stable across runs and processes, and
/// never unifies distinct assets that live at different URLs.
#[must_use]
pub fn deterministic_filename(source_url: &Url) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(source_url.as_str().as_bytes());
    let mut name = digest.iter().fold(
        String::with_capacity(digest.len() * 2 + 8),
        |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        },
    );
    if let Some(extension) = url_path_extension(source_url) {
        name.push('.');
        name.push_str(&extension);
    }
    name
}

fn url_path_extension(url: &Url) -> Option<String> {
    let last_segment = url.path_segments()?.next_back()?;
    let (_, extension) = last_segment.rsplit_once('.')?;
    if extension.is_empty()
        || extension.len() > 8
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

fn validate_target_filename(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("empty filename".to_string());
    }
    if name.len() > 255 {
        return Err("filename too long".to_string());
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err("filename must not contain path separators".to_string());
    }
    Ok(())
}

async fn transfer(client: &reqwest::Client, assets_dir: &Path, task: &DownloadTask) -> Result<u64> {
    let url = Url::parse(&task.source_url)
        .map_err(|e| Error::InvalidUrl(format!("{}: {e}", task.source_url)))?;

    let bytes: Vec<u8> = match url.scheme() {
        "http" | "https" => {
            let response = client.get(url).send().await?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::NotFound(format!(
                    "asset not found at '{}'",
                    task.source_url
                )));
            }
            if !status.is_success() {
                match response.error_for_status() {
                    Ok(_) => {
                        return Err(Error::Other(format!(
                            "unexpected status {status} for '{}'",
                            task.source_url
                        )));
                    },
                    Err(err) => return Err(Error::Network(err)),
                }
            }
            response.bytes().await?.to_vec()
        },
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| Error::InvalidUrl(format!("bad file URL '{}'", task.source_url)))?;
            tokio::fs::read(&path).await.map_err(|e| {
                Error::NotFound(format!("local asset '{}': {e}", path.display()))
            })?
        },
        other => {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme '{other}' in '{}'",
                task.source_url
            )));
        },
    };

    let target = assets_dir.join(&task.target_filename);
    let partial = assets_dir.join(format!("{}.partial", task.target_filename));
    let byte_count = bytes.len() as u64;
    tokio::fs::write(&partial, bytes)
        .await
        .map_err(|e| Error::Storage(format!("cannot write {}: {e}", partial.display())))?;
    tokio::fs::rename(&partial, &target)
        .await
        .map_err(|e| Error::Storage(format!("cannot finalize {}: {e}", target.display())))?;
    Ok(byte_count)
}
