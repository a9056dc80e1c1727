use parking_lot::Mutex;
use pinhole_core::{Repository, ShortCode, ShortenerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_DELETION_WORKERS: usize = 4;

#[derive(Debug)]
struct DeletionTask {
    code: ShortCode,
    owner: Arc<str>,
}

type SharedQueue = Arc<tokio::sync::Mutex<UnboundedReceiver<DeletionTask>>>;

/// A fixed set of workers applying soft deletes from a shared queue.
///
/// Submitting only enqueues; the marking happens later on the workers. At
/// most `workers` marks run at the same time, however long the queue gets.
#[derive(Debug)]
pub struct DeletionWorkerPool {
    sender: Mutex<Option<UnboundedSender<DeletionTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl DeletionWorkerPool {
    /// Spawns `workers` tasks on the current tokio runtime.
    pub fn spawn<R: Repository>(repository: Arc<R>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&repository),
                    Arc::clone(&queue),
                    Arc::clone(&pending),
                ))
            })
            .collect();

        info!(workers, "deletion worker pool started");

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            pending,
        }
    }

    /// Queues every code for deletion on behalf of `owner`.
    ///
    /// Returns the number of queued codes, or `ShuttingDown` once
    /// [`DeletionWorkerPool::shutdown`] has been called.
    pub fn submit(&self, codes: Vec<ShortCode>, owner: &str) -> Result<usize, ShortenerError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(ShortenerError::ShuttingDown)?;

        let owner: Arc<str> = Arc::from(owner);
        let queued = codes.len();
        for code in codes {
            self.pending.fetch_add(1, Ordering::SeqCst);
            let task = DeletionTask {
                code,
                owner: Arc::clone(&owner),
            };
            if sender.send(task).is_err() {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(ShortenerError::ShuttingDown);
            }
        }

        Ok(queued)
    }

    /// Number of queued or in-flight deletions.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Closes the queue, waits for the workers to drain it and stops them.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handles = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return;
        }

        debug!(pending = self.pending(), "draining deletion queue");
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "deletion worker ended abnormally");
            }
        }
        info!("deletion worker pool stopped");
    }
}

async fn run_worker<R: Repository>(
    id: usize,
    repository: Arc<R>,
    queue: SharedQueue,
    pending: Arc<AtomicUsize>,
) {
    loop {
        let task = queue.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };

        match repository.mark_deleted(&task.code, &task.owner).await {
            Ok(true) => debug!(worker = id, code = %task.code, "marked deleted"),
            Ok(false) => trace!(
                worker = id,
                code = %task.code,
                "skipped: unknown, foreign or already deleted"
            ),
            Err(err) => warn!(
                worker = id,
                code = %task.code,
                error = %err,
                "failed to mark deleted"
            ),
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }

    trace!(worker = id, "deletion worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pinhole_core::error::Result as StorageResult;
    use pinhole_core::{ReadRepository, Statistics, StoredUrl, UrlRecord};
    use pinhole_storage::InMemoryRepository;
    use std::time::Duration;

    /// Records how many marks overlap. Every mark succeeds after a short sleep.
    #[derive(Debug, Default)]
    struct CountingRepository {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReadRepository for CountingRepository {
        async fn get(&self, _code: &ShortCode) -> StorageResult<Option<UrlRecord>> {
            Ok(None)
        }

        async fn list_active_by_owner(&self, _owner: &str) -> StorageResult<Vec<StoredUrl>> {
            Ok(Vec::new())
        }

        async fn statistics(&self) -> StorageResult<Statistics> {
            Ok(Statistics::default())
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Repository for CountingRepository {
        async fn insert(&self, _code: &ShortCode, _record: UrlRecord) -> StorageResult<()> {
            Ok(())
        }

        async fn mark_deleted(&self, _code: &ShortCode, _owner: &str) -> StorageResult<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    async fn seeded(count: usize, owner: &str) -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        for i in 0..count {
            repo.insert(
                &code(&format!("code{i:04}")),
                UrlRecord::new(format!("https://example{i}.com"), owner, "http://short.ly"),
            )
            .await
            .unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let repo = seeded(500, "u1").await;
        let pool = DeletionWorkerPool::spawn(Arc::clone(&repo), 4);

        let codes = (0..500).map(|i| code(&format!("code{i:04}"))).collect();
        assert_eq!(pool.submit(codes, "u1").unwrap(), 500);

        pool.shutdown().await;

        assert_eq!(pool.pending(), 0);
        assert!(repo.list_active_by_owner("u1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_marks_never_exceed_worker_count() {
        let repo = Arc::new(CountingRepository::default());
        let pool = DeletionWorkerPool::spawn(Arc::clone(&repo), 3);

        let codes = (0..200).map(|i| code(&format!("code{i:04}"))).collect();
        pool.submit(codes, "u1").unwrap();
        pool.shutdown().await;

        assert_eq!(repo.calls.load(Ordering::SeqCst), 200);
        let peak = repo.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak concurrency {peak}");
    }

    #[tokio::test]
    async fn foreign_and_unknown_codes_are_skipped() {
        let repo = seeded(3, "u1").await;
        let pool = DeletionWorkerPool::spawn(Arc::clone(&repo), 2);

        pool.submit(vec![code("code0000"), code("missing")], "intruder")
            .unwrap();
        pool.shutdown().await;

        assert_eq!(repo.list_active_by_owner("u1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn overlapping_batches_mark_each_record_once() {
        let repo = seeded(50, "u1").await;
        let pool = DeletionWorkerPool::spawn(Arc::clone(&repo), 8);

        let first = (0..40).map(|i| code(&format!("code{i:04}"))).collect();
        let second = (10..50).map(|i| code(&format!("code{i:04}"))).collect();
        pool.submit(first, "u1").unwrap();
        pool.submit(second, "u1").unwrap();
        pool.shutdown().await;

        assert!(repo.list_active_by_owner("u1").await.unwrap().is_empty());
        assert_eq!(repo.statistics().await.unwrap().urls, 50);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let repo = seeded(1, "u1").await;
        let pool = DeletionWorkerPool::spawn(repo, 1);

        pool.shutdown().await;

        assert_eq!(
            pool.submit(vec![code("code0000")], "u1").unwrap_err(),
            ShortenerError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn zero_workers_still_spawns_one() {
        let repo = seeded(1, "u1").await;
        let pool = DeletionWorkerPool::spawn(Arc::clone(&repo), 0);

        pool.submit(vec![code("code0000")], "u1").unwrap();
        pool.shutdown().await;

        assert!(repo.get(&code("code0000")).await.unwrap().unwrap().deleted);
    }
}
