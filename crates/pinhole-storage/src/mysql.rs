use async_trait::async_trait;
use jiff::Timestamp;
use pinhole_core::error::{Result, StorageError};
use pinhole_core::repository::{ReadRepository, Repository, Statistics, StoredUrl, UrlRecord};
use pinhole_core::shortcode::ShortCode;
use sqlx::mysql::{MySqlDatabaseError, MySqlRow};
use sqlx::{MySqlPool, Row};
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

const SCHEMA: &str = include_str!("../ddl/mysql/short_urls.sql");

const INSERT_ATTEMPTS: u32 = 5;
const INSERT_BACKOFF: Duration = Duration::from_millis(5);

const ER_LOCK_DEADLOCK: u16 = 1213;
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
const ACTIVE_PAIR_KEY: &str = "uq_short_urls_active";

/// MySQL implementation of the repository contract.
///
/// Soft delete is implemented with `deleted_at`. Rows are never removed, so
/// a short code is never reused, and deleted rows still count in statistics.
/// Uniqueness of active `(owner_id, original_url)` pairs is enforced by a
/// locking read inside the insert transaction, backed by a unique key over a
/// generated column that is only set while the row is active. Inserts that
/// lose a race for the same pair are retried and then report the winner.
#[derive(Debug, Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
    ping_timeout: Duration,
}

impl MySqlRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Sets how long `ping` waits before reporting the store as unreachable.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Creates the `short_urls` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// One insert transaction. `Some` carries the short URL of the active
    /// record the owner already has for this URL.
    async fn try_insert(
        &self,
        code: &ShortCode,
        record: &UrlRecord,
    ) -> std::result::Result<Option<String>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT short_code, base_url
            FROM short_urls
            WHERE owner_id = ?
              AND original_url = ?
              AND deleted_at IS NULL
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&record.owner)
        .bind(&record.original_url)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let existing_code: String = row.try_get("short_code")?;
            let base_url: String = row.try_get("base_url")?;
            trace!(code = %existing_code, "url already shortened by owner");
            let short_url = ShortCode::new_unchecked(existing_code).to_url(&base_url);
            return Ok(Some(short_url));
        }

        sqlx::query(
            r#"
            INSERT INTO short_urls
                (short_code, original_url, owner_id, base_url, created_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(code.as_str())
        .bind(&record.original_url)
        .bind(&record.owner)
        .bind(&record.base_url)
        .bind(record.created_at.as_second())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(None)
    }
}

fn parse_timestamp(seconds: i64) -> Result<Timestamp> {
    Timestamp::from_second(seconds).map_err(|e| {
        StorageError::InvalidData(format!("invalid created_at timestamp '{}': {e}", seconds))
    })
}

/// Duplicate primary key on insert, i.e. the generated code is taken.
fn is_duplicate_code(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error(), Some(db) if db.is_unique_violation())
}

/// Errors from two inserts of the same pair racing each other.
///
/// Both locking reads miss and take gap locks, so InnoDB aborts one of the
/// inserts as a deadlock, or the active-pair key rejects the loser. Running
/// the transaction again finds the winner's row.
fn is_retryable_insert(err: &sqlx::Error) -> bool {
    let Some(db) = err.as_database_error() else {
        return false;
    };

    let deadlock = db
        .try_downcast_ref::<MySqlDatabaseError>()
        .is_some_and(|e| e.number() == ER_LOCK_DEADLOCK)
        || db.code().as_deref() == Some(SQLSTATE_SERIALIZATION_FAILURE);
    let active_pair_taken = db.is_unique_violation() && db.message().contains(ACTIVE_PAIR_KEY);

    deadlock || active_pair_taken
}

/// Sorts driver errors into the storage taxonomy.
///
/// Anything that means "the server could not be reached in time" ends up as
/// `Timeout` or `Unavailable`, which the facade reports as a connection
/// failure. Row shape problems are `InvalidData`.
fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    use sqlx::Error as E;

    let message = err.to_string();
    match err {
        E::PoolTimedOut => StorageError::Timeout(message),
        E::PoolClosed | E::WorkerCrashed | E::Io(_) | E::Tls(_) | E::Protocol(_) => {
            StorageError::Unavailable(message)
        }
        E::RowNotFound
        | E::ColumnNotFound(_)
        | E::ColumnIndexOutOfBounds { .. }
        | E::ColumnDecode { .. }
        | E::Decode(_)
        | E::TypeNotFound { .. } => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn stored_url_from_row(row: &MySqlRow) -> Result<StoredUrl> {
    let code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    Ok(StoredUrl {
        code: ShortCode::new_unchecked(code),
        record: record_from_row(row)?,
    })
}

fn record_from_row(row: &MySqlRow) -> Result<UrlRecord> {
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;
    let deleted_at: Option<i64> = row.try_get("deleted_at").map_err(map_sqlx_error)?;

    Ok(UrlRecord {
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner: row.try_get("owner_id").map_err(map_sqlx_error)?,
        base_url: row.try_get("base_url").map_err(map_sqlx_error)?,
        created_at: parse_timestamp(created_at)?,
        deleted: deleted_at.is_some(),
    })
}

#[async_trait]
impl ReadRepository for MySqlRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        let row = sqlx::query(
            r#"
            SELECT original_url, owner_id, base_url, created_at, deleted_at
            FROM short_urls
            WHERE short_code = ?
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_active_by_owner(&self, owner: &str) -> Result<Vec<StoredUrl>> {
        let rows = sqlx::query(
            r#"
            SELECT short_code, original_url, owner_id, base_url, created_at, deleted_at
            FROM short_urls
            WHERE owner_id = ?
              AND deleted_at IS NULL
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(stored_url_from_row).collect()
    }

    async fn statistics(&self) -> Result<Statistics> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS urls, COUNT(DISTINCT owner_id) AS users
            FROM short_urls
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let urls: i64 = row.try_get("urls").map_err(map_sqlx_error)?;
        let users: i64 = row.try_get("users").map_err(map_sqlx_error)?;

        Ok(Statistics {
            urls: urls.max(0) as u64,
            users: users.max(0) as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);

        match tokio::time::timeout(self.ping_timeout, probe).await {
            Ok(result) => result.map(|_| ()).map_err(map_sqlx_error),
            Err(_) => Err(StorageError::Timeout(format!(
                "ping did not answer within {:?}",
                self.ping_timeout
            ))),
        }
    }
}

#[async_trait]
impl Repository for MySqlRepository {
    async fn insert(&self, code: &ShortCode, record: UrlRecord) -> Result<()> {
        for attempt in 1..=INSERT_ATTEMPTS {
            match self.try_insert(code, &record).await {
                Ok(None) => return Ok(()),
                Ok(Some(short_url)) => return Err(StorageError::Conflict(short_url)),
                Err(err) if is_retryable_insert(&err) => {
                    debug!(attempt, code = %code, error = %err, "retrying contended insert");
                    tokio::time::sleep(INSERT_BACKOFF * attempt).await;
                }
                Err(err) if is_duplicate_code(&err) => {
                    return Err(StorageError::CodeTaken(code.to_string()));
                }
                Err(err) => return Err(map_sqlx_error(err)),
            }
        }

        Err(StorageError::Query(format!(
            "insert of {code} still contended after {INSERT_ATTEMPTS} attempts"
        )))
    }

    async fn mark_deleted(&self, code: &ShortCode, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE short_urls
            SET deleted_at = ?
            WHERE short_code = ?
              AND owner_id = ?
              AND deleted_at IS NULL
            "#,
        )
        .bind(Timestamp::now().as_second())
        .bind(code.as_str())
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
