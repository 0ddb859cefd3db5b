//! Bounded-concurrency fan-out over a batch of records.
//!
//! Each item runs in its own Tokio task. A semaphore permit is acquired
//! before a task is spawned and released when it finishes, so at most
//! `concurrency` tasks are in flight. A panicking or timed-out task fails
//! only its own record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Error type for worker pool construction and scheduling.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}\n  Suggestion: Pass a concurrency between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Why a record's task produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerFailure {
    /// The task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Panicked(String),
    /// The task exceeded the per-record budget.
    #[error("record exceeded its {0:?} budget")]
    TimedOut(Duration),
}

/// One record's result, joined back by `record_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordResult<O> {
    pub record_id: u64,
    pub outcome: Result<O, WorkerFailure>,
}

/// Runs an async function once per item with bounded concurrency.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    record_timeout: Option<Duration>,
}

impl WorkerPool {
    /// Creates a pool running at most `concurrency` tasks at once.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    pub fn new(concurrency: usize) -> Result<Self, PoolError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(PoolError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            concurrency,
            record_timeout: None,
        })
    }

    /// Bounds every task by `timeout`; `None` disables the bound.
    #[must_use]
    pub fn with_record_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.record_timeout = timeout;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the per-record budget, if any.
    #[must_use]
    pub fn record_timeout(&self) -> Option<Duration> {
        self.record_timeout
    }

    /// Runs `f` once per `(record_id, item)` pair and waits for all of them.
    ///
    /// Results come back in no particular order; join them to records by
    /// `record_id`. A task failure never cancels sibling tasks.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip_all, fields(concurrency = self.concurrency))]
    pub async fn run_all<I, O, F, Fut>(
        &self,
        items: impl IntoIterator<Item = (u64, I)>,
        mut f: F,
    ) -> Result<Vec<RecordResult<O>>, PoolError>
    where
        F: FnMut(I) -> Fut,
        Fut: Future<Output = O> + Send + 'static,
        O: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles: Vec<(u64, JoinHandle<Result<O, WorkerFailure>>)> = Vec::new();

        for (record_id, item) in items {
            // Blocks while `concurrency` tasks are in flight
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| PoolError::SemaphoreClosed)?;

            let task = f(item);
            let record_timeout = self.record_timeout;
            handles.push((
                record_id,
                tokio::spawn(async move {
                    let _permit = permit;
                    match record_timeout {
                        Some(limit) => tokio::time::timeout(limit, task)
                            .await
                            .map_err(|_| WorkerFailure::TimedOut(limit)),
                        None => Ok(task.await),
                    }
                }),
            ));
        }

        debug!(task_count = handles.len(), "waiting for workers to finish");

        let mut results = Vec::with_capacity(handles.len());
        for (record_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(record_id, error = %e, "worker task panicked");
                    Err(WorkerFailure::Panicked(e.to_string()))
                }
            };
            if let Err(WorkerFailure::TimedOut(limit)) = &outcome {
                warn!(record_id, budget_ms = limit.as_millis(), "record timed out");
            }
            results.push(RecordResult { record_id, outcome });
        }

        info!(records = results.len(), "worker batch complete");
        Ok(results)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_rejects_out_of_range_concurrency() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(PoolError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            WorkerPool::new(101),
            Err(PoolError::InvalidConcurrency { value: 101 })
        ));
        assert_eq!(WorkerPool::new(1).unwrap().concurrency(), 1);
        assert_eq!(WorkerPool::new(100).unwrap().concurrency(), 100);
    }

    #[test]
    fn test_invalid_concurrency_message_has_suggestion() {
        let message = PoolError::InvalidConcurrency { value: 0 }.to_string();
        assert!(message.contains("between 1 and 100"));
        assert!(message.contains("Suggestion:"));
    }

    #[tokio::test]
    async fn test_every_item_yields_one_result() {
        let pool = WorkerPool::new(3).unwrap();
        let items = (1..=10).map(|id| (id, id * 2));

        let results = pool
            .run_all(items, |value| async move { value + 1 })
            .await
            .unwrap();

        let by_id: BTreeMap<u64, u64> = results
            .into_iter()
            .map(|r| (r.record_id, r.outcome.unwrap()))
            .collect();
        assert_eq!(by_id.len(), 10);
        for (id, value) in by_id {
            assert_eq!(value, id * 2 + 1);
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let pool = WorkerPool::new(2).unwrap();
        let results = pool
            .run_all(Vec::<(u64, ())>::new(), |()| async {})
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_limit() {
        let pool = WorkerPool::new(2).unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .run_all((0..12).map(|id| (id, ())), |()| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_fails_only_its_record() {
        let pool = WorkerPool::new(2).unwrap();
        let results = pool
            .run_all((1..=3).map(|id| (id, id)), |id| async move {
                assert!(id != 2, "boom");
                id
            })
            .await
            .unwrap();

        for result in results {
            if result.record_id == 2 {
                assert!(matches!(result.outcome, Err(WorkerFailure::Panicked(_))));
            } else {
                assert_eq!(result.outcome, Ok(result.record_id));
            }
        }
    }

    #[tokio::test]
    async fn test_record_timeout_fails_only_slow_record() {
        tokio::time::pause();
        let pool = WorkerPool::new(4)
            .unwrap()
            .with_record_timeout(Some(Duration::from_secs(5)));

        let results = pool
            .run_all([(1, 1_u64), (2, 60)], |secs| async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                secs
            })
            .await
            .unwrap();

        let slow = results.iter().find(|r| r.record_id == 2).unwrap();
        assert_eq!(
            slow.outcome,
            Err(WorkerFailure::TimedOut(Duration::from_secs(5)))
        );
        let fast = results.iter().find(|r| r.record_id == 1).unwrap();
        assert_eq!(fast.outcome, Ok(1));
    }
}
