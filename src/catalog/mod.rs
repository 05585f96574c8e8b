//! Remote catalog access
//!
//! The [`Catalog`] trait is the seam between the pipeline and the image API:
//! list one page, delete one item. [`HttpCatalog`] is the production
//! implementation; tests substitute in-memory catalogs.

use crate::Result;
use crate::types::{DeleteOutcome, ItemId, Page, PageCursor};
use async_trait::async_trait;

mod http;

pub use http::HttpCatalog;

/// Paginated listing and deletion of remote items
///
/// Implementations absorb transient failures themselves (retry with backoff)
/// and only surface errors that the caller must act on.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch one page of items
    ///
    /// An empty page means the catalog is exhausted.
    async fn list_page(&self, cursor: PageCursor) -> Result<Page>;

    /// Delete one item
    ///
    /// Idempotent: an item that no longer exists yields
    /// [`DeleteOutcome::AlreadyGone`].
    async fn delete_item(&self, id: &ItemId) -> Result<DeleteOutcome>;
}
