//! Run loop: pagination, sweeps and bookkeeping.

use super::Migrator;
use crate::error::{Error, Result};
use crate::types::{Event, ItemId, ItemState, MigrationRun, Page, PageCursor, RemoteItem};
use futures::StreamExt;
use std::collections::HashSet;

/// How a processed page moves the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    /// Request the same cursor again (everything on it left the remote)
    Repeat,
    /// Move on to the given cursor
    Advance(PageCursor),
    /// Start a new sweep from the first page
    Restart,
    /// The catalog is drained
    Done,
}

/// Pagination state across sweeps
#[derive(Debug)]
struct Sweep {
    cursor: PageCursor,
    /// Remote deletes issued since the sweep started
    deleted: u64,
}

impl Sweep {
    fn new() -> Self {
        Self {
            cursor: PageCursor::first(),
            deleted: 0,
        }
    }

    /// Decide where to go after `page` was processed and `deleted` of its
    /// items left the remote
    ///
    /// Deleting shifts later items towards the front of the listing, so a page
    /// that emptied completely is requested again, and a sweep that deleted
    /// anything is followed by another one from the first page.
    fn step(&mut self, page: &Page, deleted: usize) -> NextStep {
        if page.is_empty() {
            if self.deleted > 0 && self.cursor != PageCursor::first() {
                self.cursor = PageCursor::first();
                self.deleted = 0;
                return NextStep::Restart;
            }
            return NextStep::Done;
        }

        self.deleted += deleted as u64;
        if deleted == page.items.len() {
            NextStep::Repeat
        } else {
            self.cursor = page.next_cursor.unwrap_or_else(|| self.cursor.next());
            NextStep::Advance(self.cursor)
        }
    }
}

impl Migrator {
    /// Drain the catalog
    ///
    /// Lists pages until an empty one comes back, processing up to
    /// `download.concurrency` items of a page at once; page N is fully
    /// resolved before page N+1 is requested. Every item that reaches
    /// `Verified` is recorded in the completion log before its remote delete.
    ///
    /// Returns the run summary when the catalog is drained or the run was
    /// cancelled (`cancelled = true`). Returns the error when something
    /// run-fatal happened (rejected credentials, completion log failure,
    /// listing that keeps failing); in-flight items are drained first.
    pub async fn run(&self) -> Result<MigrationRun> {
        let mut summary = MigrationRun::start();
        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut sweep = Sweep::new();
        let halt = self.cancel_token.child_token();

        tracing::info!(
            output_dir = %self.config.output_dir().display(),
            concurrency = self.config.download.concurrency,
            already_completed = self.tracker.len(),
            "Starting migration"
        );

        let fatal = loop {
            if self.cancel_token.is_cancelled() {
                break None;
            }

            let cursor = sweep.cursor;
            let listed = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break None,
                listed = self.catalog.list_page(cursor) => listed,
            };
            let page = match listed {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(page = %cursor, error = %e, "Listing failed");
                    break Some(e);
                }
            };
            summary.pages += 1;

            // Ids resolved earlier in this run are never processed again
            let fresh: Vec<RemoteItem> = page
                .items
                .iter()
                .filter(|item| seen.insert(item.id.clone()))
                .cloned()
                .collect();

            tracing::info!(
                page = %cursor,
                items = page.items.len(),
                fresh = fresh.len(),
                "Catalog page listed"
            );
            self.emit_event(Event::PageListed {
                cursor,
                items: page.items.len(),
                fresh: fresh.len(),
            });

            let (deleted, fatal) = self.process_page(fresh, &halt, &mut summary).await;
            if fatal.is_some() {
                break fatal;
            }
            if self.cancel_token.is_cancelled() {
                break None;
            }

            match sweep.step(&page, deleted) {
                NextStep::Done => {
                    tracing::info!("Catalog drained");
                    break None;
                }
                NextStep::Restart => {
                    tracing::info!("Deletes shifted the listing, starting a new sweep");
                }
                NextStep::Repeat => {
                    tracing::debug!(page = %cursor, "Page emptied, requesting it again");
                }
                NextStep::Advance(next) => {
                    tracing::debug!(page = %next, "Advancing to next page");
                }
            }
        };

        summary.cancelled = self.cancel_token.is_cancelled();
        summary.finish();
        self.emit_event(Event::RunFinished {
            summary: summary.clone(),
        });

        match fatal {
            Some(e) => {
                tracing::error!(error = %e, summary = %summary, "Migration aborted");
                Err(e)
            }
            None => {
                if summary.cancelled {
                    tracing::warn!(summary = %summary, "Migration cancelled");
                } else {
                    tracing::info!(summary = %summary, "Migration finished");
                }
                Ok(summary)
            }
        }
    }

    /// Process the fresh items of one page with bounded concurrency
    ///
    /// Returns how many of them left the remote and the first run-fatal error.
    /// After a fatal error no further item is dispatched, but items already in
    /// flight run to completion.
    async fn process_page(
        &self,
        items: Vec<RemoteItem>,
        halt: &tokio_util::sync::CancellationToken,
        summary: &mut MigrationRun,
    ) -> (usize, Option<Error>) {
        let concurrency = self.config.download.concurrency.max(1);
        let mut results = futures::stream::iter(items)
            .map(|item| self.process_item(item, halt))
            .buffer_unordered(concurrency);

        let mut deleted = 0;
        let mut fatal: Option<Error> = None;

        while let Some(processed) = results.next().await {
            if let Some(outcome) = processed.outcome {
                if outcome.state == ItemState::Deleted {
                    deleted += 1;
                }
                summary.record(&outcome);
            }
            if let Some(e) = processed.fatal {
                halt.cancel();
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
        }

        (deleted, fatal)
    }
}
