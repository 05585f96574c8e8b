//! Pipeline coordinator
//!
//! [`Migrator`] drives the whole drain: it pulls catalog pages, fans the items
//! of each page out to the transfer engine with bounded concurrency, records
//! every verified transfer in the completion log and only then asks the
//! catalog to delete the remote copy.
//!
//! - [`run`] - Pagination, sweeps and run-level bookkeeping
//! - [`item`] - Per-item state machine (fetch, record, delete)

mod item;
mod run;


use crate::catalog::{Catalog, HttpCatalog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::naming::NameResolver;
use crate::tracker::CompletionTracker;
use crate::transfer::{Transfer, TransferEngine};
use crate::types::{Event, ItemId, ItemState};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Buffer size of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Drains a remote catalog into a local directory (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Migrator {
    /// Static configuration
    config: Arc<Config>,
    /// Remote listing and deletion
    catalog: Arc<dyn Catalog>,
    /// Blob downloads
    transfer: Arc<dyn Transfer>,
    /// Durable record of migrated items
    tracker: Arc<CompletionTracker>,
    /// Plans collision-free local names
    resolver: Arc<Mutex<NameResolver>>,
    /// Items currently being processed; an id is never processed twice at once
    in_flight: Arc<Mutex<HashSet<ItemId>>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: broadcast::Sender<Event>,
    /// Run-level cancellation
    cancel_token: CancellationToken,
}

impl Migrator {
    /// Build a migrator talking to the configured HTTP API
    ///
    /// - Validates the configuration
    /// - Creates the output directory and checks that it is writable
    /// - Opens (or creates) the completion log
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        prepare_output_dir(config.output_dir()).await?;

        let tracker = CompletionTracker::open(&config.persistence.database_path).await?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let catalog = HttpCatalog::new(&config)?;
        let transfer = TransferEngine::new(&config, event_tx.clone())?;

        Ok(Self::assemble(
            config,
            Arc::new(catalog),
            Arc::new(transfer),
            Arc::new(tracker),
            event_tx,
        ))
    }

    /// Build a migrator from explicit collaborators
    ///
    /// Does not validate the configuration or touch the output directory.
    pub fn with_parts(
        config: Config,
        catalog: Arc<dyn Catalog>,
        transfer: Arc<dyn Transfer>,
        tracker: Arc<CompletionTracker>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self::assemble(config, catalog, transfer, tracker, event_tx)
    }

    fn assemble(
        config: Config,
        catalog: Arc<dyn Catalog>,
        transfer: Arc<dyn Transfer>,
        tracker: Arc<CompletionTracker>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let resolver = NameResolver::new(config.output_dir().clone());
        Self {
            config: Arc::new(config),
            catalog,
            transfer,
            tracker,
            resolver: Arc::new(Mutex::new(resolver)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            event_tx,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Subscribe to run events
    ///
    /// Slow subscribers may miss events (the channel is bounded); the run
    /// never waits for them.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that cancels the run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Stop dispatching and abort in-flight transfers
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The completion log
    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    /// Move `id` from `from` to `to` and announce it
    pub(crate) fn transition(&self, id: &ItemId, from: ItemState, to: ItemState) -> ItemState {
        debug_assert!(
            from.can_transition_to(to),
            "illegal item transition {from:?} -> {to:?}"
        );
        tracing::trace!(item_id = %id, from = %from, to = %to, "Item state changed");
        self.announce(id, to)
    }

    /// Announce that `id` is in `state`
    pub(crate) fn announce(&self, id: &ItemId, state: ItemState) -> ItemState {
        self.emit_event(Event::ItemStateChanged {
            id: id.clone(),
            state,
        });
        state
    }
}

/// Marks an id as in flight for as long as it lives
pub(crate) struct InFlightGuard {
    registry: Arc<Mutex<HashSet<ItemId>>>,
    id: ItemId,
}

impl InFlightGuard {
    /// Claim `id`, or `None` when it is already being processed
    pub(crate) fn acquire(registry: &Arc<Mutex<HashSet<ItemId>>>, id: &ItemId) -> Option<Self> {
        let inserted = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        inserted.then(|| Self {
            registry: Arc::clone(registry),
            id: id.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Create `dir` and prove it is writable
async fn prepare_output_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        Error::config(
            "output_dir",
            format!("cannot create output directory '{}': {}", dir.display(), e),
        )
    })?;

    let probe_dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(".write-probe")
            .tempfile_in(&probe_dir)
            .map(drop)
    })
    .await
    .map_err(|e| Error::Other(format!("write probe task failed: {}", e)))?
    .map_err(|e| {
        Error::config(
            "output_dir",
            format!("output directory '{}' is not writable: {}", dir.display(), e),
        )
    })
}
