//! HTTP catalog client for the image API

use super::Catalog;
use crate::config::{Config, RetryConfig};
use crate::retry::{parse_retry_after, with_retry};
use crate::types::{DeleteOutcome, ItemId, Page, PageCursor, RemoteItem};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;

const USER_AGENT: &str = concat!("gyazo-drain/", env!("CARGO_PKG_VERSION"));

/// One image record as the API returns it
#[derive(Debug, Deserialize)]
struct ApiImage {
    image_id: String,
    /// `null` or `""` for accounts without access to the original
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    metadata: Option<ApiMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMetadata {
    #[serde(default)]
    app: Option<String>,
}

impl From<ApiImage> for RemoteItem {
    fn from(image: ApiImage) -> Self {
        RemoteItem {
            id: ItemId(image.image_id),
            source_url: image.url.unwrap_or_default(),
            created_at: image.created_at,
            content_type: image.kind,
            app_label: image.metadata.and_then(|m| m.app),
        }
    }
}

/// [`Catalog`] backed by the remote HTTP API
///
/// Every call carries the bearer token and is bounded by the configured
/// request timeout. Transient failures are retried with backoff.
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
    token: String,
    per_page: u32,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCatalog")
            .field("base_url", &self.base_url)
            .field("per_page", &self.per_page)
            .finish_non_exhaustive()
    }
}

impl HttpCatalog {
    /// Build a client from the API and retry settings
    ///
    /// Fails with a configuration error when the token is missing.
    pub fn new(config: &Config) -> Result<Self> {
        let token = config.access_token()?.to_string();

        let client = reqwest::Client::builder()
            .timeout(config.api.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            token,
            per_page: config.api.per_page,
            retry: config.retry.clone(),
        })
    }

    fn images_url(&self) -> String {
        format!("{}/api/images", self.base_url)
    }

    fn image_url(&self, id: &ItemId) -> String {
        format!(
            "{}/api/images/{}",
            self.base_url,
            urlencoding::encode(id.as_str())
        )
    }

    async fn list_page_once(&self, cursor: PageCursor) -> Result<Page> {
        let url = self.images_url();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("page", cursor.get()), ("per_page", self.per_page)])
            .send()
            .await
            .map_err(Error::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers(), &url));
        }

        let images: Vec<ApiImage> = response.json().await.map_err(Error::from_reqwest)?;
        let items: Vec<RemoteItem> = images.into_iter().map(RemoteItem::from).collect();
        let next_cursor = (!items.is_empty()).then(|| cursor.next());

        Ok(Page { items, next_cursor })
    }

    async fn delete_item_once(&self, id: &ItemId) -> Result<DeleteOutcome> {
        let url = self.image_url(id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Error::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::AlreadyGone);
        }

        Err(status_error(status, response.headers(), &url))
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[tracing::instrument(skip(self), fields(page = %cursor))]
    async fn list_page(&self, cursor: PageCursor) -> Result<Page> {
        let page = with_retry(&self.retry, || self.list_page_once(cursor)).await?;
        tracing::debug!(items = page.items.len(), "Catalog page listed");
        Ok(page)
    }

    #[tracing::instrument(skip(self), fields(item_id = %id))]
    async fn delete_item(&self, id: &ItemId) -> Result<DeleteOutcome> {
        let outcome = with_retry(&self.retry, || self.delete_item_once(id)).await?;
        if outcome == DeleteOutcome::AlreadyGone {
            tracing::debug!("Item was already gone remotely");
        }
        Ok(outcome)
    }
}

/// Map a non-success status of a catalog call onto the error taxonomy
fn status_error(status: StatusCode, headers: &HeaderMap, url: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("{} from {}", status, url))
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
