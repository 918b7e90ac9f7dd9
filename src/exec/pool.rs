// src/exec/pool.rs

//! Bounded background worker pool.
//!
//! At most `max_parallel` jobs run at once; the rest wait for a permit.
//! Finished jobs report through a result channel that the owner drains, either
//! opportunistically ([`WorkerPool::drain_completed`]) or at shutdown
//! ([`WorkerPool::wait_all`]). Every submitted job yields exactly one
//! result: a job that panics reports through its `on_failure` fallback.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error};

pub struct WorkerPool<T> {
    permits: Arc<Semaphore>,
    results_tx: mpsc::UnboundedSender<T>,
    results_rx: mpsc::UnboundedReceiver<T>,
    in_flight: usize,
}

impl<T> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("available", &self.permits.available_permits())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(max_parallel: usize) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            results_tx,
            results_rx,
            in_flight: 0,
        }
    }

    /// Jobs submitted but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Queue `job`; it starts as soon as a permit is free. If the job
    /// panics or is cancelled, `on_failure` builds its result instead.
    pub fn submit<F, E>(&mut self, job: F, on_failure: E)
    where
        F: Future<Output = T> + Send + 'static,
        E: FnOnce(String) -> T + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let tx = self.results_tx.clone();
        self.in_flight += 1;

        tokio::spawn(async move {
            // The semaphore is never closed, so acquire only fails if it is.
            let _permit = permits.acquire_owned().await.ok();
            let outcome = match tokio::spawn(job).await {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "pool job panicked or was cancelled");
                    on_failure(e.to_string())
                }
            };
            let _ = tx.send(outcome);
        });
    }

    /// Results of jobs that have already finished; never waits.
    pub fn drain_completed(&mut self) -> Vec<T> {
        let mut done = Vec::new();
        while let Ok(outcome) = self.results_rx.try_recv() {
            self.in_flight -= 1;
            done.push(outcome);
        }
        if !done.is_empty() {
            debug!(collected = done.len(), in_flight = self.in_flight, "collected pool results");
        }
        done
    }

    /// Wait for every outstanding job and return their results.
    pub async fn wait_all(&mut self) -> Vec<T> {
        let mut done = Vec::new();
        while self.in_flight > 0 {
            match self.results_rx.recv().await {
                Some(outcome) => {
                    self.in_flight -= 1;
                    done.push(outcome);
                }
                None => break,
            }
        }
        done
    }
}
