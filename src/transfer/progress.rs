//! Background progress reporting for in-flight transfers.

use crate::types::{Event, ItemId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Parameters for spawning a progress reporter background task
pub(crate) struct ProgressReporterParams {
    /// Item being transferred
    pub id: ItemId,
    /// Size announced by the server, if any
    pub total: Option<u64>,
    /// Bytes written so far, updated by the transfer loop
    pub downloaded: Arc<AtomicU64>,
    /// Minimum time between two events
    pub interval: Duration,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Stops the reporter once the transfer ends
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Spawn a background task that periodically reports transfer progress.
///
/// Reports are advisory; a send with no subscribers is ignored.
pub(crate) fn spawn_progress_reporter(
    params: ProgressReporterParams,
) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        id,
        total,
        downloaded,
        interval,
        event_tx,
        cancel_token,
    } = params;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // The first tick is immediate, so every transfer reports at least once
                biased;
                _ = interval.tick() => {
                    event_tx
                        .send(Event::Progress {
                            id: id.clone(),
                            downloaded: downloaded.load(Ordering::Relaxed),
                            total,
                        })
                        .ok();
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}
