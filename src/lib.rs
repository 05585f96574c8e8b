//! # gyazo-drain
//!
//! Drains a remote image-hosting account into a local directory.
//!
//! Images are listed page by page, downloaded with bounded concurrency under a
//! name derived from their metadata, recorded in a durable completion log, and
//! only then deleted remotely. The run repeats until the catalog is empty.
//!
//! ## Design Philosophy
//!
//! - **Never lose an image** - A remote delete is only issued after the local
//!   copy is synced to disk and its completion record is committed
//! - **Resumable** - Interrupted runs pick up where they left off; items already
//!   migrated are never downloaded twice
//! - **Library-first** - The binary is a thin wrapper around [`Migrator`]
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use gyazo_drain::{Config, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.api.access_token = Some("your-token".to_string());
//!
//!     let migrator = Migrator::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = migrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = migrator.run().await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote catalog client (list, delete)
pub mod catalog;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Local filename derivation
pub mod naming;
/// Pipeline coordinator
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable completion log
pub mod tracker;
/// Blob downloads
pub mod transfer;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use catalog::{Catalog, HttpCatalog};
pub use config::{ApiConfig, Config, DownloadConfig, PersistenceConfig, RetryConfig};
pub use error::{DatabaseError, Error, ErrorKind, Result};
pub use naming::{NameResolver, resolve_name};
pub use pipeline::Migrator;
pub use tracker::CompletionTracker;
pub use transfer::{Transfer, TransferEngine};
pub use types::{
    CompletionRecord, DeleteOutcome, Event, ItemId, ItemOutcome, ItemState, LocalTarget,
    MigrationRun, Page, PageCursor, RemoteItem, SkipReason, TransferResult,
};

/// Helper function to run a migration with graceful signal handling.
///
/// Runs [`Migrator::run`] while listening for a termination signal; on the
/// first signal the run is cancelled: dispatching stops, in-flight transfers
/// are aborted and the partial summary is returned with `cancelled = true`.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use gyazo_drain::{Config, Migrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let migrator = Migrator::new(config).await?;
///
///     // Run with automatic signal handling
///     let summary = run_with_shutdown(migrator).await?;
///     println!("{}", summary);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(migrator: Migrator) -> Result<MigrationRun> {
    let cancel_token = migrator.cancel_token();
    let watcher = tokio::spawn(async move {
        wait_for_signal().await;
        tracing::warn!("Shutdown requested, cancelling migration");
        cancel_token.cancel();
    });

    let result = migrator.run().await;
    watcher.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
