//! Core types for gyazo-drain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ErrorKind;

/// Opaque, stable identifier of a remote item
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One remote image record
///
/// Immutable once listed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Remote identifier
    pub id: ItemId,
    /// Where the content can be fetched from; empty when the API withholds it
    pub source_url: String,
    /// Creation timestamp exactly as the API returned it
    pub created_at: String,
    /// Content type (`png`, `jpg`, or a MIME type such as `image/png`)
    pub content_type: String,
    /// Name of the application the capture was taken in
    pub app_label: Option<String>,
}

impl RemoteItem {
    /// Whether there is any content to fetch
    pub fn has_source(&self) -> bool {
        !self.source_url.trim().is_empty()
    }
}

/// Position in the paginated catalog (1-based page number)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(pub u32);

impl PageCursor {
    /// The first page
    pub fn first() -> Self {
        Self(1)
    }

    /// The page after this one
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Raw page number
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::first()
    }
}

impl std::fmt::Display for PageCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One batch of items returned by a single listing call
#[derive(Clone, Debug, Default)]
pub struct Page {
    /// Items on this page; empty means the catalog is exhausted
    pub items: Vec<RemoteItem>,
    /// Cursor of the following page, `None` once exhausted
    pub next_cursor: Option<PageCursor>,
}

impl Page {
    /// Whether this page signals catalog exhaustion
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of a remote delete that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The item was deleted by this call
    Deleted,
    /// The item was already gone (404); the goal state holds
    AlreadyGone,
}

/// Planned local destination for one item
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalTarget {
    /// Final path of the file
    pub path: PathBuf,
    /// Item this path was planned for
    pub expected_item_id: ItemId,
}

/// Why an item was not transferred
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The listing carried no fetchable URL (seen on non-premium accounts)
    EmptyUrl,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::EmptyUrl => f.write_str("empty-url"),
        }
    }
}

/// Outcome of one transfer attempt for one item
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransferResult {
    /// Content is durable under `path`
    Success {
        /// Bytes written to disk
        bytes_written: u64,
        /// Final path
        path: PathBuf,
        /// Hex SHA-256 of the content
        sha256: String,
    },
    /// Nothing was transferred
    Skipped {
        /// Why
        reason: SkipReason,
    },
    /// Transfer failed; no file is visible under the target name
    Failed {
        /// Classification of the last error
        error_kind: ErrorKind,
        /// Attempts spent (including the first)
        attempts: u32,
        /// Human-readable last error
        message: String,
    },
}

impl TransferResult {
    /// Whether the content is durable locally
    pub fn is_success(&self) -> bool {
        matches!(self, TransferResult::Success { .. })
    }
}

/// Durable proof that an item is safe to delete remotely
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Remote identifier
    pub item_id: ItemId,
    /// Where the content lives locally
    pub local_path: PathBuf,
    /// Content size in bytes
    pub bytes: u64,
    /// Hex SHA-256 of the content
    pub sha256: String,
    /// When the record was written
    pub completed_at: DateTime<Utc>,
}

/// Per-item lifecycle state
///
/// ```text
/// Listed -> Downloading -> Verified -> DeleteRequested -> Deleted
///                      \-> SkippedFinal                \-> DeleteFailed
///                      \-> DownloadFailed
/// ```
///
/// Items already in the completion log go straight from `Listed` to `Verified`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Seen in a catalog page
    Listed,
    /// Transfer in progress
    Downloading,
    /// Durable locally and recorded in the completion log
    Verified,
    /// Not transferable; remote copy left untouched
    SkippedFinal,
    /// Transfer failed; remote copy left untouched
    DownloadFailed,
    /// Remote delete issued
    DeleteRequested,
    /// Remote copy gone
    Deleted,
    /// Remote delete failed; local copy is durable, item reappears next run
    DeleteFailed,
}

impl ItemState {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Listed, Downloading)
                | (Listed, SkippedFinal)
                | (Listed, Verified)
                | (Downloading, Verified)
                | (Downloading, SkippedFinal)
                | (Downloading, DownloadFailed)
                | (Verified, DeleteRequested)
                | (DeleteRequested, Deleted)
                | (DeleteRequested, DeleteFailed)
        )
    }

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::SkippedFinal
                | ItemState::DownloadFailed
                | ItemState::Deleted
                | ItemState::DeleteFailed
        )
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemState::Listed => "listed",
            ItemState::Downloading => "downloading",
            ItemState::Verified => "verified",
            ItemState::SkippedFinal => "skipped",
            ItemState::DownloadFailed => "download_failed",
            ItemState::DeleteRequested => "delete_requested",
            ItemState::Deleted => "deleted",
            ItemState::DeleteFailed => "delete_failed",
        };
        f.write_str(s)
    }
}

/// Final state of one item after the pipeline is done with it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Remote identifier
    pub id: ItemId,
    /// Terminal state reached
    pub state: ItemState,
    /// Transfer result, `None` when the transfer was not needed
    pub transfer: Option<TransferResult>,
    /// Whether the item was already in the completion log when listed
    pub already_completed: bool,
}

/// Aggregate counters for one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRun {
    /// Distinct items seen in catalog pages
    pub total_listed: u64,
    /// Items transferred and verified in this run
    pub total_succeeded: u64,
    /// Items whose transfer failed
    pub total_failed: u64,
    /// Items skipped (no fetchable content)
    pub total_skipped: u64,
    /// Items found already completed by an earlier run (not re-downloaded)
    pub total_already_completed: u64,
    /// Remote deletes that succeeded (including already-gone)
    pub total_deleted: u64,
    /// Remote deletes that failed; the local copy is durable
    pub total_delete_failed: u64,
    /// In-flight transfers aborted by cancellation
    pub total_cancelled: u64,
    /// Catalog listing calls made
    pub pages: u64,
    /// Whether the run stopped early because of cancellation
    pub cancelled: bool,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the run ended
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationRun {
    /// Start a new run
    pub fn start() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Fold one item outcome into the counters
    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.total_listed += 1;

        match &outcome.transfer {
            Some(TransferResult::Success { .. }) => self.total_succeeded += 1,
            Some(TransferResult::Skipped { .. }) => self.total_skipped += 1,
            Some(TransferResult::Failed { error_kind, .. }) => {
                if *error_kind == ErrorKind::Cancelled {
                    self.total_cancelled += 1;
                } else {
                    self.total_failed += 1;
                }
            }
            None => {}
        }

        if outcome.already_completed {
            self.total_already_completed += 1;
        }

        match outcome.state {
            ItemState::Deleted => self.total_deleted += 1,
            ItemState::DeleteFailed => self.total_delete_failed += 1,
            _ => {}
        }
    }

    /// Stamp the end time
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

impl std::fmt::Display for MigrationRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "listed: {}, succeeded: {}, failed: {}, skipped: {}, already completed: {}, \
             deleted: {}, delete failed: {}",
            self.total_listed,
            self.total_succeeded,
            self.total_failed,
            self.total_skipped,
            self.total_already_completed,
            self.total_deleted,
            self.total_delete_failed,
        )?;
        if self.cancelled {
            write!(f, " (cancelled, {} in flight aborted)", self.total_cancelled)?;
        }
        Ok(())
    }
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A catalog page was listed
    PageListed {
        /// Page that was requested
        cursor: PageCursor,
        /// Items on the page
        items: usize,
        /// Items not yet handled in this run
        fresh: usize,
    },

    /// An item moved to a new lifecycle state
    ItemStateChanged {
        /// Item ID
        id: ItemId,
        /// New state
        state: ItemState,
    },

    /// Transfer progress update (advisory)
    Progress {
        /// Item ID
        id: ItemId,
        /// Bytes written so far
        downloaded: u64,
        /// Total size, when the server announced it
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// The run ended (drained, cancelled, or aborted)
    RunFinished {
        /// Final counters
        summary: MigrationRun,
    },
}
