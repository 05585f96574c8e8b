//! Per-item processing: fetch, record, delete.

use super::{InFlightGuard, Migrator};
use crate::error::{Error, ErrorKind};
use crate::types::{ItemId, ItemOutcome, ItemState, RemoteItem, SkipReason, TransferResult};
use std::sync::PoisonError;
use tokio_util::sync::CancellationToken;

/// What processing one item produced
pub(super) struct Processed {
    /// Final state, `None` when the item was never dispatched
    pub outcome: Option<ItemOutcome>,
    /// Error that must end the run
    pub fatal: Option<Error>,
}

impl Processed {
    fn undispatched() -> Self {
        Self {
            outcome: None,
            fatal: None,
        }
    }

    fn done(outcome: ItemOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            fatal: None,
        }
    }
}

impl Migrator {
    /// Drive one item to a terminal state
    ///
    /// Items already in the completion log are not fetched again; they go
    /// straight to the delete step. A delete is only ever issued after the
    /// completion record is committed.
    pub(super) async fn process_item(&self, item: RemoteItem, halt: &CancellationToken) -> Processed {
        if halt.is_cancelled() {
            return Processed::undispatched();
        }

        let Some(_in_flight) = InFlightGuard::acquire(&self.in_flight, &item.id) else {
            tracing::warn!(item_id = %item.id, "Item already in flight, not dispatching again");
            return Processed::undispatched();
        };

        let id = item.id.clone();
        let state = self.announce(&id, ItemState::Listed);

        if self.tracker.is_completed(&id) {
            tracing::info!(item_id = %id, "Already migrated in an earlier run, deleting remote copy");
            let state = self.transition(&id, state, ItemState::Verified);
            return self.finish_with_delete(id, state, None, true).await;
        }

        if !item.has_source() {
            tracing::info!(item_id = %id, "No fetchable content, leaving remote copy in place");
            let state = self.transition(&id, state, ItemState::SkippedFinal);
            return Processed::done(ItemOutcome {
                id,
                state,
                transfer: Some(TransferResult::Skipped {
                    reason: SkipReason::EmptyUrl,
                }),
                already_completed: false,
            });
        }

        let target = self
            .resolver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&item);
        let state = self.transition(&id, state, ItemState::Downloading);

        let result = self.transfer.fetch(&item, &target, &self.cancel_token).await;

        match &result {
            TransferResult::Success {
                bytes_written,
                path,
                sha256,
            } => {
                if let Err(e) = self.tracker.record(&id, path, *bytes_written, sha256).await {
                    // The file is durable but unrecorded; the remote copy must stay
                    tracing::error!(item_id = %id, error = %e, "Failed to record completion");
                    let state = self.transition(&id, state, ItemState::DownloadFailed);
                    return Processed {
                        outcome: Some(ItemOutcome {
                            id,
                            state,
                            transfer: Some(result),
                            already_completed: false,
                        }),
                        fatal: Some(e),
                    };
                }

                tracing::info!(
                    item_id = %id,
                    path = %path.display(),
                    bytes = bytes_written,
                    "Downloaded and recorded"
                );
                let state = self.transition(&id, state, ItemState::Verified);
                self.finish_with_delete(id, state, Some(result), false).await
            }
            TransferResult::Skipped { reason } => {
                tracing::info!(item_id = %id, reason = %reason, "Transfer skipped");
                self.release(&target);
                let state = self.transition(&id, state, ItemState::SkippedFinal);
                Processed::done(ItemOutcome {
                    id,
                    state,
                    transfer: Some(result),
                    already_completed: false,
                })
            }
            TransferResult::Failed {
                error_kind,
                attempts,
                message,
            } => {
                if *error_kind != ErrorKind::Cancelled {
                    tracing::warn!(
                        item_id = %id,
                        kind = %error_kind,
                        attempts,
                        error = %message,
                        "Download failed, leaving remote copy in place"
                    );
                }
                self.release(&target);
                let state = self.transition(&id, state, ItemState::DownloadFailed);
                Processed::done(ItemOutcome {
                    id,
                    state,
                    transfer: Some(result),
                    already_completed: false,
                })
            }
        }
    }

    /// Issue the remote delete for a verified item
    async fn finish_with_delete(
        &self,
        id: ItemId,
        verified: ItemState,
        transfer: Option<TransferResult>,
        already_completed: bool,
    ) -> Processed {
        let requested = self.transition(&id, verified, ItemState::DeleteRequested);

        let (state, fatal) = match self.catalog.delete_item(&id).await {
            Ok(outcome) => {
                tracing::info!(item_id = %id, ?outcome, "Remote copy deleted");
                (self.transition(&id, requested, ItemState::Deleted), None)
            }
            Err(e) => {
                // The local copy is durable either way; the item shows up again next run
                tracing::warn!(item_id = %id, error = %e, "Remote delete failed");
                let state = self.transition(&id, requested, ItemState::DeleteFailed);
                (state, e.is_fatal().then_some(e))
            }
        };

        Processed {
            outcome: Some(ItemOutcome {
                id,
                state,
                transfer,
                already_completed,
            }),
            fatal,
        }
    }

    fn release(&self, target: &crate::types::LocalTarget) {
        self.resolver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(target);
    }
}
