use async_trait::async_trait;
use parking_lot::RwLock;
use pinhole_core::error::{Result, StorageError};
use pinhole_core::repository::{ReadRepository, Repository, Statistics, StoredUrl, UrlRecord};
use pinhole_core::shortcode::ShortCode;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Store {
    records: HashMap<ShortCode, UrlRecord>,
    /// `(owner, original_url)` of every active record, mapped to its code.
    active: HashMap<(String, String), ShortCode>,
}

impl Store {
    fn active_key(record: &UrlRecord) -> (String, String) {
        (record.owner.clone(), record.original_url.clone())
    }
}

/// In-memory implementation of the Repository trait.
///
/// All records live behind one reader-writer lock. Writers hold it for the
/// whole check-then-write, so two saves of the same `(url, owner)` can never
/// both succeed. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    store: Arc<RwLock<Store>>,
}

impl InMemoryRepository {
    /// Creates a new, empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a repository from snapshot entries.
    ///
    /// Fails with `InvalidData` if a code appears twice or two active entries
    /// share the same owner and URL.
    pub fn from_snapshot(entries: Vec<StoredUrl>) -> Result<Self> {
        let mut store = Store::default();

        for StoredUrl { code, record } in entries {
            if !record.deleted {
                let key = Store::active_key(&record);
                if store.active.contains_key(&key) {
                    return Err(StorageError::InvalidData(format!(
                        "duplicate active url '{}' for owner '{}'",
                        record.original_url, record.owner
                    )));
                }
                store.active.insert(key, code.clone());
            }

            if store.records.insert(code.clone(), record).is_some() {
                return Err(StorageError::InvalidData(format!(
                    "duplicate short code '{code}'"
                )));
            }
        }

        debug!(records = store.records.len(), "restored in-memory store");

        Ok(Self {
            store: Arc::new(RwLock::new(store)),
        })
    }

    /// Copies every record, deleted ones included, ordered by code.
    pub fn snapshot(&self) -> Vec<StoredUrl> {
        let store = self.store.read();
        let mut entries: Vec<StoredUrl> = store
            .records
            .iter()
            .map(|(code, record)| StoredUrl {
                code: code.clone(),
                record: record.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.code.cmp(&b.code));
        entries
    }

    /// Number of records, deleted ones included.
    pub fn len(&self) -> usize {
        self.store.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadRepository for InMemoryRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        Ok(self.store.read().records.get(code).cloned())
    }

    async fn list_active_by_owner(&self, owner: &str) -> Result<Vec<StoredUrl>> {
        let store = self.store.read();
        Ok(store
            .records
            .iter()
            .filter(|(_, record)| record.owner == owner && !record.deleted)
            .map(|(code, record)| StoredUrl {
                code: code.clone(),
                record: record.clone(),
            })
            .collect())
    }

    async fn statistics(&self) -> Result<Statistics> {
        let store = self.store.read();
        let users: HashSet<&str> = store
            .records
            .values()
            .map(|record| record.owner.as_str())
            .collect();

        Ok(Statistics {
            urls: store.records.len() as u64,
            users: users.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert(&self, code: &ShortCode, record: UrlRecord) -> Result<()> {
        let mut store = self.store.write();

        let key = Store::active_key(&record);
        if let Some(existing) = store.active.get(&key) {
            let short_url = store
                .records
                .get(existing)
                .map(|stored| stored.short_url(existing))
                .ok_or_else(|| {
                    StorageError::InvalidData(format!(
                        "active index points at missing code '{existing}'"
                    ))
                })?;
            trace!(code = %existing, "url already shortened by owner");
            return Err(StorageError::Conflict(short_url));
        }

        if store.records.contains_key(code) {
            return Err(StorageError::CodeTaken(code.to_string()));
        }

        store.active.insert(key, code.clone());
        store.records.insert(code.clone(), record);
        Ok(())
    }

    async fn mark_deleted(&self, code: &ShortCode, owner: &str) -> Result<bool> {
        let mut store = self.store.write();

        let Some(record) = store.records.get_mut(code) else {
            return Ok(false);
        };
        if record.owner != owner || record.deleted {
            return Ok(false);
        }

        record.deleted = true;
        let key = Store::active_key(record);
        store.active.remove(&key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://short.ly";

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn record(url: &str, owner: &str) -> UrlRecord {
        UrlRecord::new(url, owner, BASE)
    }

    #[tokio::test]
    async fn save_and_get() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("abc123"), record("https://example.com", "u1"))
            .await
            .unwrap();

        let result = repo.get(&code("abc123")).await.unwrap().unwrap();
        assert_eq!(result.original_url, "https://example.com");
        assert_eq!(result.owner, "u1");
        assert!(!result.deleted);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = InMemoryRepository::new();

        assert!(repo.get(&code("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_taken_code() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("abc123"), record("https://example.com", "u1"))
            .await
            .unwrap();

        let err = repo
            .insert(&code("abc123"), record("https://other.com", "u1"))
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::CodeTaken("abc123".into()));
    }

    #[tokio::test]
    async fn insert_same_url_same_owner_conflicts() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("first"), record("https://example.com", "u1"))
            .await
            .unwrap();

        let err = repo
            .insert(&code("second"), record("https://example.com", "u1"))
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Conflict("http://short.ly/first".into()));
        assert!(repo.get(&code("second")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflict_reports_base_of_existing_record() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("first"), record("https://example.com", "u1"))
            .await
            .unwrap();

        let err = repo
            .insert(
                &code("second"),
                UrlRecord::new("https://example.com", "u1", "https://other.host/"),
            )
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Conflict("http://short.ly/first".into()));
    }

    #[tokio::test]
    async fn same_url_different_owner_is_allowed() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("first"), record("https://example.com", "u1"))
            .await
            .unwrap();
        repo.insert(&code("second"), record("https://example.com", "u2"))
            .await
            .unwrap();

        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn deleted_record_frees_url_for_owner() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("first"), record("https://example.com", "u1"))
            .await
            .unwrap();
        assert!(repo.mark_deleted(&code("first"), "u1").await.unwrap());

        repo.insert(&code("second"), record("https://example.com", "u1"))
            .await
            .unwrap();

        assert!(repo.get(&code("first")).await.unwrap().unwrap().deleted);
        assert!(!repo.get(&code("second")).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn mark_deleted_respects_owner() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("abc123"), record("https://example.com", "u1"))
            .await
            .unwrap();

        assert!(!repo.mark_deleted(&code("abc123"), "u2").await.unwrap());
        assert!(!repo.get(&code("abc123")).await.unwrap().unwrap().deleted);

        assert!(repo.mark_deleted(&code("abc123"), "u1").await.unwrap());
        assert!(!repo.mark_deleted(&code("abc123"), "u1").await.unwrap());
        assert!(!repo.mark_deleted(&code("missing"), "u1").await.unwrap());
    }

    #[tokio::test]
    async fn list_skips_deleted_and_foreign_records() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("aaa"), record("https://a.com", "u1")).await.unwrap();
        repo.insert(&code("bbb"), record("https://b.com", "u1")).await.unwrap();
        repo.insert(&code("ccc"), record("https://c.com", "u2")).await.unwrap();
        repo.mark_deleted(&code("bbb"), "u1").await.unwrap();

        let listed = repo.list_active_by_owner("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, code("aaa"));

        assert!(repo.list_active_by_owner("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn statistics_count_deleted_records() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("aaa"), record("https://a.com", "u1")).await.unwrap();
        repo.insert(&code("bbb"), record("https://b.com", "u1")).await.unwrap();
        repo.insert(&code("ccc"), record("https://c.com", "u2")).await.unwrap();
        repo.mark_deleted(&code("aaa"), "u1").await.unwrap();

        let stats = repo.statistics().await.unwrap();
        assert_eq!(stats, Statistics { urls: 3, users: 2 });
    }

    #[tokio::test]
    async fn snapshot_restores_identical_store() {
        let repo = InMemoryRepository::new();
        repo.insert(&code("aaa"), record("https://a.com", "u1")).await.unwrap();
        repo.insert(&code("bbb"), record("https://b.com", "u2")).await.unwrap();
        repo.mark_deleted(&code("aaa"), "u1").await.unwrap();

        let restored = InMemoryRepository::from_snapshot(repo.snapshot()).unwrap();
        assert_eq!(restored.snapshot(), repo.snapshot());

        // The active index is rebuilt: the deleted URL can be saved again,
        // the live one still conflicts.
        restored
            .insert(&code("ddd"), record("https://a.com", "u1"))
            .await
            .unwrap();
        let err = restored
            .insert(&code("eee"), record("https://b.com", "u2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn from_snapshot_rejects_duplicate_codes() {
        let entry = StoredUrl {
            code: code("aaa"),
            record: UrlRecord {
                deleted: true,
                ..record("https://a.com", "u1")
            },
        };

        let err = InMemoryRepository::from_snapshot(vec![entry.clone(), entry]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[test]
    fn from_snapshot_rejects_duplicate_active_urls() {
        let first = StoredUrl {
            code: code("aaa"),
            record: record("https://a.com", "u1"),
        };
        let second = StoredUrl {
            code: code("bbb"),
            record: record("https://a.com", "u1"),
        };

        let err = InMemoryRepository::from_snapshot(vec![first, second]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn concurrent_saves_of_same_url_yield_one_record() {
        let repo = InMemoryRepository::new();
        let mut handles = vec![];

        for i in 0..32u64 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let c = ShortCode::new_unchecked(format!("code-{:03}", i));
                repo.insert(&c, UrlRecord::new("https://example.com", "u1", BASE))
                    .await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => created += 1,
                Err(StorageError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(repo.len(), 1);
    }
}
