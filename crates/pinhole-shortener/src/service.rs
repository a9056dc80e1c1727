use crate::deletion::{DeletionWorkerPool, DEFAULT_DELETION_WORKERS};
use async_trait::async_trait;
use pinhole_core::{
    ReadRepository, Repository, ShortCode, Shortener, ShortenerError, Statistics, StorageError,
    UrlRecord, UserUrl,
};
use pinhole_generator::Generator;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_MAX_ATTEMPTS: usize = 16;

/// Tunables of [`ShortenerService`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct ServiceSettings {
    /// Number of workers applying soft deletes.
    #[builder(default = DEFAULT_DELETION_WORKERS)]
    pub deletion_workers: usize,
    /// How many generated codes to try before giving up on a save.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A concrete implementation of the `Shortener` trait.
///
/// This service wraps a `Repository` and a `Generator` to handle:
/// - URL validation
/// - Short code generation, retried while generated codes are taken
/// - Asynchronous soft deletion through a [`DeletionWorkerPool`]
///
/// Building the service spawns the deletion workers, so it must happen
/// inside a tokio runtime. Call [`ShortenerService::shutdown`] before
/// persisting the store so queued deletions are applied.
#[derive(Debug)]
pub struct ShortenerService<R, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    deletions: DeletionWorkerPool,
    settings: ServiceSettings,
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    /// Creates a new `ShortenerService` with default settings.
    pub fn new(repository: R, generator: G) -> Self {
        Self::with_settings(repository, generator, ServiceSettings::default())
    }

    pub fn with_settings(repository: R, generator: G, settings: ServiceSettings) -> Self {
        let repository = Arc::new(repository);
        let deletions =
            DeletionWorkerPool::spawn(Arc::clone(&repository), settings.deletion_workers);

        Self {
            repository,
            generator: Arc::new(generator),
            deletions,
            settings,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Number of deletions queued but not yet applied.
    pub fn pending_deletions(&self) -> usize {
        self.deletions.pending()
    }

    /// Stops accepting deletions and waits until the queued ones are applied.
    pub async fn shutdown(&self) {
        self.deletions.shutdown().await;
        info!("shortener service stopped");
    }

    /// Validates that the URL has a valid format (has a scheme and host).
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidInput(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidInput(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidInput(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let host = authority.rsplit('@').next().unwrap_or_default();
        if host.is_empty() || host.starts_with(':') {
            return Err(ShortenerError::InvalidInput(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        }

        Ok(())
    }

    /// Stores `original_url` under a freshly generated code.
    ///
    /// A taken code is retried with a new one up to `max_attempts` times.
    async fn store_new(
        &self,
        original_url: &str,
        base_url: &str,
        owner: &str,
    ) -> Result<String, ShortenerError> {
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let code: ShortCode = self.generator.generate().into();
            let record = UrlRecord::new(original_url, owner, base_url);

            match self.repository.insert(&code, record).await {
                Ok(()) => {
                    debug!(code = %code, owner, "url shortened");
                    return Ok(code.to_url(base_url));
                }
                Err(StorageError::CodeTaken(_)) => {
                    trace!(code = %code, attempt, "generated code already taken");
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(attempts = max_attempts, "gave up generating a free short code");
        Err(ShortenerError::CodeSpaceExhausted(max_attempts))
    }
}

#[async_trait]
impl<R: Repository, G: Generator> Shortener for ShortenerService<R, G> {
    async fn save_url(
        &self,
        original_url: &str,
        base_url: &str,
        owner: &str,
    ) -> Result<String, ShortenerError> {
        Self::validate_url(original_url)?;
        Self::validate_url(base_url)?;

        self.store_new(original_url, base_url, owner).await
    }

    async fn save_urls(
        &self,
        batch: BTreeMap<String, String>,
        base_url: &str,
        owner: &str,
    ) -> Result<BTreeMap<String, String>, ShortenerError> {
        Self::validate_url(base_url)?;
        for (correlation_id, original_url) in &batch {
            if correlation_id.is_empty() {
                return Err(ShortenerError::InvalidInput(
                    "correlation id cannot be empty".to_string(),
                ));
            }
            Self::validate_url(original_url)?;
        }

        let mut saved = BTreeMap::new();
        for (correlation_id, original_url) in batch {
            let short_url = match self.store_new(&original_url, base_url, owner).await {
                Ok(short_url) => short_url,
                Err(ShortenerError::ConflictInsert(existing)) => existing,
                Err(err) => return Err(err),
            };
            saved.insert(correlation_id, short_url);
        }

        debug!(owner, count = saved.len(), "batch shortened");
        Ok(saved)
    }

    async fn get_url(&self, code: &str) -> Result<String, ShortenerError> {
        let short_code =
            ShortCode::new(code).map_err(|_| ShortenerError::NotFound(code.to_string()))?;

        match self.repository.get(&short_code).await? {
            None => Err(ShortenerError::NotFound(code.to_string())),
            Some(record) if record.deleted => Err(ShortenerError::Gone(code.to_string())),
            Some(record) => Ok(record.original_url),
        }
    }

    async fn get_user_urls(&self, owner: &str) -> Result<Vec<UserUrl>, ShortenerError> {
        let urls = self
            .repository
            .list_active_by_owner(owner)
            .await?
            .into_iter()
            .map(|stored| UserUrl {
                short_url: stored.record.short_url(&stored.code),
                original_url: stored.record.original_url,
            })
            .collect();

        Ok(urls)
    }

    async fn delete_urls(&self, codes: Vec<String>, owner: &str) -> Result<(), ShortenerError> {
        let codes = codes
            .into_iter()
            .map(ShortCode::new)
            .collect::<Result<Vec<_>, _>>()?;

        let queued = self.deletions.submit(codes, owner)?;
        debug!(owner, queued, "deletion accepted");
        Ok(())
    }

    async fn statistics(&self) -> Result<Statistics, ShortenerError> {
        Ok(self.repository.statistics().await?)
    }

    async fn check_connection(&self) -> Result<(), ShortenerError> {
        self.repository
            .ping()
            .await
            .map_err(|err| ShortenerError::ConnectionFailure(err.to_string()))
    }
}
