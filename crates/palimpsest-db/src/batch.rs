//! Batched persistence with transient-failure retry.
//!
//! Recovery runs can touch thousands of annotations at once; writing them in
//! fixed-size batches keeps transactions short. A batch that fails with a
//! transient database error is retried a few times before the whole run is
//! surrendered to the caller's rollback path.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use palimpsest_core::defaults::{
    BATCH_WRITE_MAX_RETRIES, BATCH_WRITE_RETRY_DELAY_MS, BATCH_WRITE_SIZE,
};
use palimpsest_core::{Error, Result};

/// Writes a slice of items in fixed-size batches through a caller-provided
/// async writer.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self {
            batch_size: BATCH_WRITE_SIZE,
            max_retries: BATCH_WRITE_MAX_RETRIES,
            retry_delay: Duration::from_millis(BATCH_WRITE_RETRY_DELAY_MS),
        }
    }
}

impl BatchWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// True for failures worth retrying at the batch level: connection
    /// trouble, pool exhaustion, deadlocks, serialization conflicts.
    pub fn is_transient(error: &Error) -> bool {
        match error {
            Error::Database(sqlx::Error::Io(_)) => true,
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            Error::Database(sqlx::Error::WorkerCrashed) => true,
            Error::Database(sqlx::Error::Database(db)) => {
                // Class 08 = connection exception, class 53 = insufficient
                // resources, 40001/40P01 = serialization failure / deadlock.
                match db.code().as_deref() {
                    Some(code) => {
                        code.starts_with("08")
                            || code.starts_with("53")
                            || code == "40001"
                            || code == "40P01"
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Write all items in batches, retrying each batch on transient errors.
    /// Returns the number of items written. The first non-transient error,
    /// or a transient error past the retry budget, aborts the run.
    pub async fn write_all<'a, T, F>(&self, items: &'a [T], mut write: F) -> Result<usize>
    where
        T: Sync,
        F: FnMut(&'a [T]) -> BoxFuture<'a, Result<()>>,
    {
        if items.is_empty() {
            return Ok(0);
        }
        let mut written = 0usize;
        for batch in items.chunks(self.batch_size) {
            let mut attempt = 0u32;
            loop {
                match write(batch).await {
                    Ok(()) => {
                        written += batch.len();
                        break;
                    }
                    Err(e) if Self::is_transient(&e) && attempt < self.max_retries => {
                        attempt += 1;
                        warn!(
                            attempt,
                            max_retries = self.max_retries,
                            batch_len = batch.len(),
                            error = %e,
                            "Transient batch write failure, retrying"
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        debug!(written, batch_size = self.batch_size, "Batch write complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transient_error() -> Error {
        Error::Database(sqlx::Error::PoolTimedOut)
    }

    #[tokio::test]
    async fn test_writes_in_fixed_size_batches() {
        let items: Vec<u32> = (0..25).collect();
        let batches = Arc::new(AtomicUsize::new(0));
        let writer = BatchWriter::new().batch_size(10);

        let b = batches.clone();
        let written = writer
            .write_all(&items, move |batch| {
                let b = b.clone();
                assert!(batch.len() <= 10);
                Box::pin(async move {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await
            .unwrap();

        assert_eq!(written, 25);
        assert_eq!(batches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let items = [1u32, 2, 3];
        let attempts = Arc::new(AtomicUsize::new(0));
        let writer = BatchWriter::new()
            .batch_size(10)
            .retry_delay(Duration::from_millis(1));

        let a = attempts.clone();
        let written = writer
            .write_all(&items, move |batch| {
                let a = a.clone();
                let len = batch.len();
                Box::pin(async move {
                    if a.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient_error())
                    } else {
                        assert_eq!(len, 3);
                        Ok(())
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_finite() {
        let items = [1u32];
        let writer = BatchWriter::new()
            .max_retries(2)
            .retry_delay(Duration::from_millis(1));

        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result = writer
            .write_all(&items, move |_| {
                let a = a.clone();
                Box::pin(async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(transient_error())
                })
            })
            .await;

        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_failure_aborts_immediately() {
        let items = [1u32];
        let attempts = Arc::new(AtomicUsize::new(0));
        let writer = BatchWriter::new().retry_delay(Duration::from_millis(1));

        let a = attempts.clone();
        let result = writer
            .write_all(&items, move |_| {
                let a = a.clone();
                Box::pin(async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(Error::InvalidInput("bad row".to_string()))
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_input_is_a_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let writer = BatchWriter::new();

        let c = calls.clone();
        let written = writer
            .write_all(&[] as &[u32], move |_| {
                let c = c.clone();
                Box::pin(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transient_classification() {
        assert!(BatchWriter::is_transient(&transient_error()));
        assert!(!BatchWriter::is_transient(&Error::InvalidInput(
            "x".to_string()
        )));
        assert!(!BatchWriter::is_transient(&Error::Database(
            sqlx::Error::RowNotFound
        )));
    }
}
