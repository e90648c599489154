//! Bounded-concurrency job scheduler.
//!
//! A [`Scheduler`] owns a dedicated rayon pool of exactly `N` threads, so at
//! most `N` jobs run at once no matter how many are submitted. Submission is
//! back-pressured: once `N * QUEUE_FACTOR` jobs are waiting or running,
//! [`Scheduler::submit`] blocks until a slot frees up. This keeps a lazy
//! discovery walk from racing ahead of the workers on a huge tree.
//!
//! Cancellation goes through a shared [`CancelToken`]. After it fires:
//!
//! - `submit` rejects new work;
//! - queued jobs that have not started are dropped (and counted);
//! - jobs already running finish normally, so no transaction is cut short.
//!
//! [`Scheduler::drain`] blocks until every accepted job has either run or
//! been dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Jobs accepted per worker before `submit` starts blocking.
const QUEUE_FACTOR: usize = 4;

/// How often a blocked `submit` rechecks the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("concurrency must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}, got {0}")]
    InvalidConcurrency(usize),
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Returned by [`Scheduler::submit`] once the run has been cancelled.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("run cancelled, job not accepted")]
pub struct Cancelled;

/// Shared cancellation flag. Cloning shares the flag.
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

#[derive(Default)]
struct Shared {
    pending: Mutex<usize>,
    changed: Condvar,
    active: AtomicUsize,
    peak: AtomicUsize,
    dropped: AtomicU64,
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, usize> {
        // A panicking job never holds this lock, so poisoning cannot hide a bad count
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases a pending slot when the job finishes, even by panicking.
struct Slot(Arc<Shared>);

impl Drop for Slot {
    fn drop(&mut self) {
        let mut pending = self.0.lock_pending();
        *pending -= 1;
        self.0.changed.notify_all();
    }
}

/// Tracks the number of jobs actually running.
struct Running<'a>(&'a Shared);

impl<'a> Running<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let now = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak.fetch_max(now, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs submitted jobs on `N` worker threads.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
    cancel: CancelToken,
    capacity: usize,
    concurrency: usize,
}

impl Scheduler {
    /// Start a pool of `concurrency` workers observing `cancel`.
    pub fn new(concurrency: usize, cancel: CancelToken) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(SchedulerError::InvalidConcurrency(concurrency));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("imgslim-worker-{i}"))
            .panic_handler(|_| error!("worker job panicked"))
            .build()?;
        debug!(concurrency, "scheduler started");
        Ok(Self {
            pool,
            shared: Arc::new(Shared::default()),
            cancel,
            capacity: concurrency * QUEUE_FACTOR,
            concurrency,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Queue `job`, blocking while the queue is full.
    ///
    /// Fails with [`Cancelled`] if the token fires before the job is accepted.
    pub fn submit<F>(&self, job: F) -> Result<(), Cancelled>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.shared.lock_pending();
        loop {
            if self.cancel.is_cancelled() {
                return Err(Cancelled);
            }
            if *pending < self.capacity {
                break;
            }
            pending = self
                .shared
                .changed
                .wait_timeout(pending, CANCEL_POLL)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        *pending += 1;
        drop(pending);

        let slot = Slot(Arc::clone(&self.shared));
        let cancel = self.cancel.clone();
        self.pool.spawn(move || {
            let slot = slot;
            if cancel.is_cancelled() {
                slot.0.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let _running = Running::enter(&slot.0);
            job();
        });
        Ok(())
    }

    /// Block until every accepted job has finished or been dropped.
    pub fn drain(&self) {
        let mut pending = self.shared.lock_pending();
        while *pending > 0 {
            pending = self
                .shared
                .changed
                .wait(pending)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Most jobs observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    /// Accepted jobs that were dropped because of cancellation.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
