//! # Parallel Executor
//!
//! Bounded-concurrency map over a slice, backed by a dedicated rayon pool.
//!
//! - At most `concurrency` items run at once.
//! - [`CollectOrder::Preserve`] returns `out[i] = f(items[i])`;
//!   [`CollectOrder::Completion`] returns results as they finish.
//! - An optional progress callback sees `(completed, total)` after every item.
//! - A [`CancelToken`] stops unstarted items from running. Items already in
//!   flight finish, then the whole call fails with [`EnrichError::Cancelled`].
//!
//! Failures propagate: the first error observed by [`ParallelExecutor::try_map`]
//! is returned and the remaining items are abandoned. Callers that want
//! per-item outcomes return them as values from `f` instead.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};

use log::debug;
use rayon::prelude::*;

use crate::error::{EnrichError, Result};

/// Progress callback: `(completed, total)`.
pub type ProgressCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Shared flag for cooperative cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result ordering for a parallel map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectOrder {
    /// Output index matches input index.
    #[default]
    Preserve,
    /// Output in the order items finished.
    Completion,
}

/// Per-call options for [`ParallelExecutor::map`] and [`ParallelExecutor::try_map`].
#[derive(Clone, Default)]
pub struct MapOptions {
    pub order: CollectOrder,
    pub progress: Option<ProgressCallback>,
    pub cancel: Option<CancelToken>,
}

impl MapOptions {
    pub fn with_order(mut self, order: CollectOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl std::fmt::Debug for MapOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapOptions")
            .field("order", &self.order)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Why an item stopped the map.
enum Abort<E> {
    Cancelled,
    Failed(E),
}

/// Bounded worker pool for per-item work.
pub struct ParallelExecutor {
    pool: rayon::ThreadPool,
    concurrency: usize,
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ParallelExecutor {
    /// Build a pool of exactly `concurrency` worker threads.
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(EnrichError::WorkerPool {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("enrich-worker-{}", i))
            .build()
            .map_err(|e| EnrichError::WorkerPool {
                message: e.to_string(),
            })?;
        Ok(Self { pool, concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Apply an infallible `f` to every item.
    pub fn map<T, R, F>(&self, items: &[T], f: F, options: &MapOptions) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.try_map(items, |item| Ok::<R, EnrichError>(f(item)), options)
    }

    /// Apply a fallible `f` to every item, stopping at the first failure.
    pub fn try_map<T, R, E, F>(
        &self,
        items: &[T],
        f: F,
        options: &MapOptions,
    ) -> std::result::Result<Vec<R>, E>
    where
        T: Sync,
        R: Send,
        E: From<EnrichError> + Send,
        F: Fn(&T) -> std::result::Result<R, E> + Sync + Send,
    {
        let total = items.len() as u32;
        let completed = AtomicU32::new(0);

        if options.is_cancelled() {
            return Err(EnrichError::Cancelled {
                completed: 0,
                total,
            }
            .into());
        }

        debug!(
            "[Executor] Mapping {} items on {} workers ({:?} order)",
            total, self.concurrency, options.order
        );

        let run_one = |item: &T| -> std::result::Result<R, Abort<E>> {
            if options.is_cancelled() {
                return Err(Abort::Cancelled);
            }
            let outcome = f(item);
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(ref cb) = options.progress {
                cb(done, total);
            }
            outcome.map_err(Abort::Failed)
        };

        let outcome: std::result::Result<Vec<R>, Abort<E>> = match options.order {
            CollectOrder::Preserve => self
                .pool
                .install(|| items.par_iter().map(run_one).collect()),
            CollectOrder::Completion => {
                let (tx, rx) = mpsc::channel();
                let sent = self.pool.install(|| {
                    items.par_iter().try_for_each_with(tx, |tx, item| {
                        let value = run_one(item)?;
                        // Receiver outlives the pool scope.
                        let _ = tx.send(value);
                        Ok(())
                    })
                });
                sent.map(|()| rx.into_iter().collect())
            }
        };

        let cancelled = || EnrichError::Cancelled {
            completed: completed.load(Ordering::Relaxed),
            total,
        };
        match outcome {
            // A token flipped after the last item started still discards results.
            Ok(_) if options.is_cancelled() => Err(cancelled().into()),
            Ok(results) => Ok(results),
            Err(Abort::Cancelled) => {
                debug!(
                    "[Executor] Cancelled after {} of {} items",
                    completed.load(Ordering::Relaxed),
                    total
                );
                Err(cancelled().into())
            }
            Err(Abort::Failed(e)) => Err(e),
        }
    }
}
