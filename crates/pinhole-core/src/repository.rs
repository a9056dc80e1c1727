use crate::error::Result;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A stored URL record in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// The original URL that was shortened.
    pub original_url: String,
    /// The user that shortened the URL.
    pub owner: String,
    /// The base URL the record was shortened under.
    pub base_url: String,
    /// When the record was created.
    pub created_at: Timestamp,
    /// Soft-delete marker. Only ever goes from `false` to `true`.
    pub deleted: bool,
}

impl UrlRecord {
    /// Creates an active record owned by `owner`.
    pub fn new(
        original_url: impl Into<String>,
        owner: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            original_url: original_url.into(),
            owner: owner.into(),
            base_url: base_url.into(),
            created_at: Timestamp::now(),
            deleted: false,
        }
    }

    /// Builds the short URL for this record under the base it was saved with.
    pub fn short_url(&self, code: &ShortCode) -> String {
        code.to_url(&self.base_url)
    }
}

/// A record together with its short code, as persisted in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUrl {
    pub code: ShortCode,
    pub record: UrlRecord,
}

/// One entry of a user's URL listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// All records, deleted ones included.
    pub urls: u64,
    /// Distinct owners.
    pub users: u64,
}

/// A read-only view of a repository.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the URL record for a given short code, deleted or not.
    /// Returns `None` if the code does not exist.
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>>;

    /// Returns every non-deleted record owned by `owner`, in no particular order.
    async fn list_active_by_owner(&self, owner: &str) -> Result<Vec<StoredUrl>>;

    /// Counts records and distinct owners.
    async fn statistics(&self) -> Result<Statistics>;

    /// Liveness probe for the backing store.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Inserts a new URL record.
    ///
    /// The check and the write are atomic. Returns `Err(CodeTaken)` if the code
    /// already exists, or `Err(Conflict)` carrying the existing short URL if the
    /// owner already has an active record for the same original URL.
    async fn insert(&self, code: &ShortCode, record: UrlRecord) -> Result<()>;

    /// Marks the record as deleted if it exists and belongs to `owner`.
    /// Returns `true` if the record changed state.
    async fn mark_deleted(&self, code: &ShortCode, owner: &str) -> Result<bool>;
}
