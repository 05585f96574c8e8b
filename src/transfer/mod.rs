//! Transfer engine
//!
//! Streams one remote blob to a planned local path. Content is written to a
//! hidden temporary file in the destination directory, hashed while it is
//! written, verified, synced and only then renamed into place, so the final
//! name is either absent or complete.
//!
//! ## Submodules
//!
//! - [`progress`]: background progress reporter

use crate::config::{Config, RetryConfig};
use crate::retry::{parse_retry_after, with_retry_counted};
use crate::types::{Event, LocalTarget, RemoteItem, SkipReason, TransferResult};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

mod progress;

use progress::{ProgressReporterParams, spawn_progress_reporter};

const USER_AGENT: &str = concat!("gyazo-drain/", env!("CARGO_PKG_VERSION"));

/// Fetches remote content into a local target
///
/// Never panics and never returns an error: every outcome is a
/// [`TransferResult`].
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Download `item` to `target`
    ///
    /// Cancelling `cancel` aborts the transfer; no file is left behind.
    async fn fetch(
        &self,
        item: &RemoteItem,
        target: &LocalTarget,
        cancel: &CancellationToken,
    ) -> TransferResult;
}

/// HTTP [`Transfer`] implementation
pub struct TransferEngine {
    client: reqwest::Client,
    retry: RetryConfig,
    idle_timeout: Duration,
    progress_interval: Duration,
    event_tx: broadcast::Sender<Event>,
}

/// Content written by one successful attempt
struct Written {
    bytes: u64,
    sha256: String,
}

impl TransferEngine {
    /// Build an engine from the download and retry settings
    pub fn new(config: &Config, event_tx: broadcast::Sender<Event>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.download.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry: config.retry.clone(),
            idle_timeout: config.download.idle_timeout,
            progress_interval: config.download.progress_interval,
            event_tx,
        })
    }

    /// One attempt: request, stream, verify, persist
    async fn fetch_once(&self, item: &RemoteItem, target: &LocalTarget) -> Result<Written> {
        let url = item.source_url.as_str();

        let response = tokio::time::timeout(self.idle_timeout, self.client.get(url).send())
            .await
            .map_err(|_| {
                Error::Transient(format!(
                    "no response from {} within {:?}",
                    url, self.idle_timeout
                ))
            })?
            .map_err(Error::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers(), url));
        }
        let total = response.content_length();

        let dir = target
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file_name = target
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Hidden, and removed on drop unless persisted
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".part")
            .tempfile_in(dir)?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let downloaded = Arc::new(AtomicU64::new(0));
        let stop_reporter = CancellationToken::new();
        let _reporter_guard = stop_reporter.clone().drop_guard();
        spawn_progress_reporter(ProgressReporterParams {
            id: item.id.clone(),
            total,
            downloaded: downloaded.clone(),
            interval: self.progress_interval,
            event_tx: self.event_tx.clone(),
            cancel_token: stop_reporter,
        });

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| {
                    Error::Transient(format!(
                        "body of {} stalled for {:?}",
                        url, self.idle_timeout
                    ))
                })?;
            let Some(chunk) = next else { break };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let received = downloaded.load(Ordering::Relaxed);
                    return Err(body_error(e, total, received, url));
                }
            };

            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            downloaded.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }

        let bytes = downloaded.load(Ordering::Relaxed);
        if bytes == 0 {
            return Err(Error::Verification(format!("empty body from {}", url)));
        }
        match total {
            Some(expected) if expected != bytes => {
                return Err(Error::Verification(format!(
                    "expected {} bytes from {}, got {}",
                    expected, url, bytes
                )));
            }
            _ => {}
        }

        file.flush().await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o644))
                .await?;
        }
        file.sync_all().await?;
        drop(file);

        temp_path
            .persist_noclobber(&target.path)
            .map_err(|e| Error::Io(e.error))?;
        sync_dir(dir)?;

        Ok(Written {
            bytes,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

#[async_trait]
impl Transfer for TransferEngine {
    #[tracing::instrument(skip_all, fields(item_id = %item.id))]
    async fn fetch(
        &self,
        item: &RemoteItem,
        target: &LocalTarget,
        cancel: &CancellationToken,
    ) -> TransferResult {
        if !item.has_source() {
            return TransferResult::Skipped {
                reason: SkipReason::EmptyUrl,
            };
        }

        let attempts = AtomicU32::new(0);
        let attempted = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            attempted = with_retry_counted(&self.retry, || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.fetch_once(item, target)
            }) => Some(attempted),
        };

        let (result, attempts) = match attempted {
            Some(attempted) => (attempted.result, attempted.attempts),
            None => (Err(Error::Cancelled), attempts.load(Ordering::Relaxed)),
        };

        match result {
            Ok(written) => {
                tracing::debug!(
                    path = %target.path.display(),
                    bytes = written.bytes,
                    attempts,
                    "Transfer verified"
                );
                TransferResult::Success {
                    bytes_written: written.bytes,
                    path: target.path.clone(),
                    sha256: written.sha256,
                }
            }
            Err(e) => {
                if matches!(e, Error::Cancelled) {
                    tracing::info!(attempts, "Transfer cancelled");
                } else {
                    tracing::warn!(error = %e, kind = %e.kind(), attempts, "Transfer failed");
                }
                TransferResult::Failed {
                    error_kind: e.kind(),
                    attempts,
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Map a non-success status of a blob request onto the error taxonomy
fn status_error(status: StatusCode, headers: &reqwest::header::HeaderMap, url: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Error::NotFound(format!("{} from {}", status, url))
        }
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
            retry_after: parse_retry_after(headers),
        },
        StatusCode::REQUEST_TIMEOUT => Error::Transient(format!("{} from {}", status, url)),
        s if s.is_server_error() => Error::Transient(format!("{} from {}", status, url)),
        s => Error::HttpStatus {
            status: s.as_u16(),
            url: url.to_string(),
        },
    }
}

/// Classify a failure while reading the body
///
/// A body that ends before its announced `Content-Length` is a short
/// download, not a network hiccup.
fn body_error(e: reqwest::Error, total: Option<u64>, received: u64, url: &str) -> Error {
    match total {
        Some(expected) if received < expected => Error::Verification(format!(
            "body of {} ended after {} of {} bytes: {}",
            url, received, expected, e
        )),
        _ => Error::from_reqwest(e),
    }
}

/// Make a rename inside `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
