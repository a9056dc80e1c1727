use crate::repository::{Statistics, UserUrl};
use async_trait::async_trait;
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// The repository facade consumed by transport layers.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens `original_url` for `owner` and returns the short URL.
    ///
    /// If the owner already has an active record for the URL, returns
    /// `Err(ConflictInsert)` carrying the existing short URL.
    async fn save_url(&self, original_url: &str, base_url: &str, owner: &str) -> Result<String>;

    /// Shortens a batch keyed by correlation id.
    ///
    /// Every entry resolves to its own short URL, new or pre-existing.
    /// Fails as a whole only when the batch itself is malformed.
    async fn save_urls(
        &self,
        batch: BTreeMap<String, String>,
        base_url: &str,
        owner: &str,
    ) -> Result<BTreeMap<String, String>>;

    /// Resolves a short code to its original URL.
    ///
    /// Returns `Err(NotFound)` for unknown codes and `Err(Gone)` for deleted ones.
    async fn get_url(&self, code: &str) -> Result<String>;

    /// Lists the non-deleted URLs owned by `owner`.
    async fn get_user_urls(&self, owner: &str) -> Result<Vec<UserUrl>>;

    /// Accepts a batch of codes for asynchronous soft deletion.
    ///
    /// Returns once the batch is queued. Codes that do not exist or belong to
    /// another user are skipped silently.
    async fn delete_urls(&self, codes: Vec<String>, owner: &str) -> Result<()>;

    /// Returns aggregate counts over the store.
    async fn statistics(&self) -> Result<Statistics>;

    /// Liveness probe for the backing store.
    async fn check_connection(&self) -> Result<()>;
}
